/// Cumulative-mean-normalized difference below which a lag counts as periodic.
pub const DEFAULT_THRESHOLD: f32 = 0.1;

/// YIN fundamental-frequency estimator (de Cheveigné & Kawahara, 2002).
///
/// Buffers are sized once for the analysis window; [`Yin::estimate`] does
/// not allocate.
#[derive(Debug, Clone)]
pub struct Yin {
    threshold: f32,
    difference: Vec<f32>,
    normalized: Vec<f32>,
}

impl Yin {
    /// `window_size` is the analysis length; lags up to half of it are searched.
    pub fn new(window_size: usize, threshold: f32) -> Self {
        let max_lag = (window_size / 2).max(3);
        Self {
            threshold,
            difference: vec![0.0; max_lag],
            normalized: vec![0.0; max_lag],
        }
    }

    pub fn max_lag(&self) -> usize {
        self.difference.len()
    }

    /// Frequency of `window` in Hz, or `None` when no lag falls under the threshold.
    pub fn estimate(&mut self, window: &[f32], sample_rate: f32) -> Option<f32> {
        let max_lag = self.max_lag().min(window.len() / 2);
        if max_lag < 3 {
            return None;
        }
        let integration = window.len() - max_lag;

        // Squared difference function
        for lag in 0..max_lag {
            self.difference[lag] = window[..integration]
                .iter()
                .zip(&window[lag..lag + integration])
                .map(|(a, b)| (a - b) * (a - b))
                .sum();
        }

        // Cumulative mean normalized difference
        self.normalized[0] = 1.0;
        let mut running_sum = 0.0;
        for lag in 1..max_lag {
            running_sum += self.difference[lag];
            self.normalized[lag] = if running_sum > 0.0 {
                self.difference[lag] * lag as f32 / running_sum
            } else {
                1.0
            };
        }

        // First dip under the threshold, then follow it down to its minimum
        let mut lag = (2..max_lag).find(|&l| self.normalized[l] < self.threshold)?;
        while lag + 1 < max_lag && self.normalized[lag + 1] < self.normalized[lag] {
            lag += 1;
        }

        let period = self.refine(lag, max_lag);
        (period > 0.0).then(|| sample_rate / period)
    }

    /// Parabolic interpolation of the raw difference function around `lag`.
    fn refine(&self, lag: usize, max_lag: usize) -> f32 {
        if lag < 1 || lag + 1 >= max_lag {
            return lag as f32;
        }
        let s0 = self.difference[lag - 1];
        let s1 = self.difference[lag];
        let s2 = self.difference[lag + 1];
        let denom = 2.0 * (s0 - 2.0 * s1 + s2);
        if denom.abs() < f32::EPSILON {
            return lag as f32;
        }
        let shift = ((s0 - s2) / denom).clamp(-1.0, 1.0);
        lag as f32 + shift
    }
}
