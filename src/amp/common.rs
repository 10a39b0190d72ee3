/// Convert decibels to linear amplitude.
#[inline]
pub fn db_to_lin(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// Convert linear amplitude to decibels, floored at -100 dB.
#[inline]
pub fn lin_to_db(lin: f32) -> f32 {
    if lin > 1e-5 {
        20.0 * lin.log10()
    } else {
        -100.0
    }
}

/// Calculate a one-pole smoothing coefficient from a time constant in milliseconds.
///
/// Returns `exp(-1 / (sample_rate * time_ms * 0.001))`.
#[inline]
pub fn calculate_coefficient(time_ms: f32, sample_rate: f32) -> f32 {
    (-1.0 / (sample_rate * 0.001 * time_ms)).exp()
}

/// Linearly ramped control value.
///
/// A new target restarts the ramp from the current value, so an update that
/// arrives mid-ramp simply bends the trajectory instead of jumping.
#[derive(Debug, Clone)]
pub struct SmoothedParameter {
    current: f32,
    target: f32,
    step: f32,
    steps_remaining: usize,
    ramp_samples: usize,
}

impl SmoothedParameter {
    pub fn new(initial: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            step: 0.0,
            steps_remaining: 0,
            ramp_samples: 0,
        }
    }

    /// Sets the ramp length and snaps to the current target.
    pub fn reset(&mut self, sample_rate: f32, ramp_ms: f32) {
        self.ramp_samples = (sample_rate * ramp_ms * 0.001).round().max(0.0) as usize;
        self.set_current_and_target(self.target);
    }

    pub fn set_current_and_target(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.step = 0.0;
        self.steps_remaining = 0;
    }

    pub fn set_target(&mut self, value: f32) {
        if value == self.target {
            return;
        }
        self.target = value;

        if self.ramp_samples == 0 {
            self.set_current_and_target(value);
            return;
        }

        self.steps_remaining = self.ramp_samples;
        self.step = (self.target - self.current) / self.ramp_samples as f32;
    }

    pub const fn target(&self) -> f32 {
        self.target
    }

    pub const fn current(&self) -> f32 {
        self.current
    }

    pub const fn is_smoothing(&self) -> bool {
        self.steps_remaining > 0
    }

    #[inline]
    pub fn next_value(&mut self) -> f32 {
        if self.steps_remaining == 0 {
            return self.target;
        }

        self.steps_remaining -= 1;
        if self.steps_remaining == 0 {
            self.current = self.target;
        } else {
            self.current += self.step;
        }
        self.current
    }

    /// Writes the next `out.len()` ramp values into `out`.
    pub fn fill(&mut self, out: &mut [f32]) {
        if !self.is_smoothing() {
            out.fill(self.target);
            return;
        }
        for v in out.iter_mut() {
            *v = self.next_value();
        }
    }

    /// Advances the ramp by `steps` without producing values.
    pub fn skip(&mut self, steps: usize) {
        if steps >= self.steps_remaining {
            self.set_current_and_target(self.target);
        } else {
            self.steps_remaining -= steps;
            self.current += self.step * steps as f32;
        }
    }
}
