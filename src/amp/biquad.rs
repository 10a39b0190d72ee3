use rustfft::num_complex::Complex;
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

use crate::amp::common::db_to_lin;

/// Lowest Q accepted by the designer; smaller values give unstable poles.
pub const MIN_Q: f32 = 0.05;
/// Lowest corner/centre frequency accepted by the designer.
pub const MIN_FREQUENCY_HZ: f32 = 1.0;
/// Highest corner frequency as a fraction of the sample rate (just below Nyquist).
pub const MAX_FREQUENCY_RATIO: f32 = 0.49;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum FilterKind {
    HighPass,
    LowPass,
    LowShelf,
    Peak,
    HighShelf,
}

/// Frequency, Q and gain of one filter section.
#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct FilterStageParams {
    pub frequency: f32,
    pub q: f32,
    pub gain_db: f32,
}

impl FilterStageParams {
    pub const fn new(frequency: f32, q: f32, gain_db: f32) -> Self {
        Self {
            frequency,
            q,
            gain_db,
        }
    }

    /// Clamps frequency into `[1 Hz, 0.49 * fs]` and Q to at least [`MIN_Q`].
    /// Non-finite values fall back to the lower bound.
    pub fn sanitized(self, sample_rate: f32) -> Self {
        let max_freq = (sample_rate * MAX_FREQUENCY_RATIO).max(MIN_FREQUENCY_HZ);
        let frequency = if self.frequency.is_finite() {
            self.frequency.clamp(MIN_FREQUENCY_HZ, max_freq)
        } else {
            MIN_FREQUENCY_HZ
        };
        let q = if self.q.is_finite() {
            self.q.max(MIN_Q)
        } else {
            MIN_Q
        };
        let gain_db = if self.gain_db.is_finite() {
            self.gain_db
        } else {
            0.0
        };

        Self {
            frequency,
            q,
            gain_db,
        }
    }
}

/// Normalised second-order section coefficients (`a0 == 1`).
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct BiquadCoefficients {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
}

impl Default for BiquadCoefficients {
    fn default() -> Self {
        Self::identity()
    }
}

impl BiquadCoefficients {
    pub const fn identity() -> Self {
        Self {
            b0: 1.0,
            b1: 0.0,
            b2: 0.0,
            a1: 0.0,
            a2: 0.0,
        }
    }

    /// Audio EQ Cookbook (Robert Bristow-Johnson) designs.
    ///
    /// The gain in `params` is converted from dB to a linear factor first; the
    /// shelf and peak designs use its square root as the cookbook's `A`.
    pub fn design(kind: FilterKind, sample_rate: f32, params: FilterStageParams) -> Self {
        let params = params.sanitized(sample_rate);
        let fs = f64::from(sample_rate);
        let w0 = 2.0 * PI * f64::from(params.frequency) / fs;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let q = f64::from(params.q);
        let alpha = sin_w0 / (2.0 * q);
        let a = f64::from(db_to_lin(params.gain_db)).sqrt();

        let (b0, b1, b2, a0, a1, a2) = match kind {
            FilterKind::HighPass => (
                (1.0 + cos_w0) / 2.0,
                -(1.0 + cos_w0),
                (1.0 + cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterKind::LowPass => (
                (1.0 - cos_w0) / 2.0,
                1.0 - cos_w0,
                (1.0 - cos_w0) / 2.0,
                1.0 + alpha,
                -2.0 * cos_w0,
                1.0 - alpha,
            ),
            FilterKind::Peak => (
                1.0 + alpha * a,
                -2.0 * cos_w0,
                1.0 - alpha * a,
                1.0 + alpha / a,
                -2.0 * cos_w0,
                1.0 - alpha / a,
            ),
            FilterKind::LowShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 + beta),
                    2.0 * a * ((a - 1.0) - (a + 1.0) * cos_w0),
                    a * ((a + 1.0) - (a - 1.0) * cos_w0 - beta),
                    (a + 1.0) + (a - 1.0) * cos_w0 + beta,
                    -2.0 * ((a - 1.0) + (a + 1.0) * cos_w0),
                    (a + 1.0) + (a - 1.0) * cos_w0 - beta,
                )
            }
            FilterKind::HighShelf => {
                let beta = 2.0 * a.sqrt() * alpha;
                (
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 + beta),
                    -2.0 * a * ((a - 1.0) + (a + 1.0) * cos_w0),
                    a * ((a + 1.0) + (a - 1.0) * cos_w0 - beta),
                    (a + 1.0) - (a - 1.0) * cos_w0 + beta,
                    2.0 * ((a - 1.0) - (a + 1.0) * cos_w0),
                    (a + 1.0) - (a - 1.0) * cos_w0 - beta,
                )
            }
        };

        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: a1 / a0,
            a2: a2 / a0,
        }
    }

    /// Magnitude response in dB at `frequency`.
    pub fn magnitude_db(&self, frequency: f32, sample_rate: f32) -> f32 {
        let w = 2.0 * PI * f64::from(frequency) / f64::from(sample_rate);
        let z1 = Complex::from_polar(1.0, -w);
        let z2 = z1 * z1;

        let num = Complex::new(self.b0, 0.0) + z1 * self.b1 + z2 * self.b2;
        let den = Complex::new(1.0, 0.0) + z1 * self.a1 + z2 * self.a2;

        let mag = (num / den).norm();
        (20.0 * mag.max(1e-12).log10()) as f32
    }
}

/// Per-channel filter memory (transposed direct form II).
#[derive(Copy, Clone, Debug, Default)]
pub struct BiquadState {
    z1: f64,
    z2: f64,
}

impl BiquadState {
    #[inline]
    pub fn process(&mut self, c: &BiquadCoefficients, input: f32) -> f32 {
        let x = f64::from(input);
        let y = c.b0.mul_add(x, self.z1);
        self.z1 = c.b1.mul_add(x, -c.a1 * y) + self.z2;
        self.z2 = c.b2.mul_add(x, -c.a2 * y);
        y as f32
    }

    pub fn process_block(&mut self, c: &BiquadCoefficients, samples: &mut [f32]) {
        for s in samples.iter_mut() {
            *s = self.process(c, *s);
        }
        if self.z1.abs() < 1e-30 {
            self.z1 = 0.0;
        }
        if self.z2.abs() < 1e-30 {
            self.z2 = 0.0;
        }
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 48_000.0;

    fn sine_gain(kind: FilterKind, params: FilterStageParams, freq: f32) -> f32 {
        let c = BiquadCoefficients::design(kind, SR, params);
        let mut state = BiquadState::default();
        let n = 9600;
        let mut peak = 0.0f32;
        for i in 0..n {
            let x = (2.0 * std::f32::consts::PI * freq * i as f32 / SR).sin();
            let y = state.process(&c, x);
            if i > n / 2 {
                peak = peak.max(y.abs());
            }
        }
        peak
    }

    #[test]
    fn design_is_deterministic() {
        let params = FilterStageParams::new(420.0, 0.71, -9.0);
        for kind in [
            FilterKind::HighPass,
            FilterKind::LowPass,
            FilterKind::LowShelf,
            FilterKind::Peak,
            FilterKind::HighShelf,
        ] {
            assert_eq!(
                BiquadCoefficients::design(kind, SR, params),
                BiquadCoefficients::design(kind, SR, params)
            );
        }
    }

    #[test]
    fn zero_db_shelves_and_peaks_are_transparent() {
        let params = FilterStageParams::new(800.0, 0.7, 0.0);
        for kind in [FilterKind::LowShelf, FilterKind::Peak, FilterKind::HighShelf] {
            let c = BiquadCoefficients::design(kind, SR, params);
            for f in [50.0, 800.0, 5000.0] {
                assert!(c.magnitude_db(f, SR).abs() < 1e-3, "{kind:?} at {f} Hz");
            }
        }
    }

    #[test]
    fn peak_hits_requested_gain_at_centre() {
        let c = BiquadCoefficients::design(
            FilterKind::Peak,
            SR,
            FilterStageParams::new(1000.0, 1.0, 6.0),
        );
        assert!((c.magnitude_db(1000.0, SR) - 6.0).abs() < 0.01);
        assert!(c.magnitude_db(20.0, SR).abs() < 0.1);
    }

    #[test]
    fn shelves_boost_their_own_side() {
        let low = BiquadCoefficients::design(
            FilterKind::LowShelf,
            SR,
            FilterStageParams::new(200.0, 0.707, 12.0),
        );
        assert!((low.magnitude_db(20.0, SR) - 12.0).abs() < 0.5);
        assert!(low.magnitude_db(10_000.0, SR).abs() < 0.5);

        let high = BiquadCoefficients::design(
            FilterKind::HighShelf,
            SR,
            FilterStageParams::new(2000.0, 0.707, -12.0),
        );
        assert!((high.magnitude_db(20_000.0, SR) + 12.0).abs() < 0.5);
        assert!(high.magnitude_db(50.0, SR).abs() < 0.5);
    }

    #[test]
    fn highpass_rejects_low_and_passes_high() {
        let params = FilterStageParams::new(1000.0, 0.707, 0.0);
        assert!(sine_gain(FilterKind::HighPass, params, 50.0) < 0.01);
        assert!(sine_gain(FilterKind::HighPass, params, 10_000.0) > 0.95);
    }

    #[test]
    fn invalid_params_are_clamped() {
        let p = FilterStageParams::new(-5.0, 0.0, f32::NAN).sanitized(SR);
        assert_eq!(p.frequency, MIN_FREQUENCY_HZ);
        assert_eq!(p.q, MIN_Q);
        assert_eq!(p.gain_db, 0.0);

        let p = FilterStageParams::new(40_000.0, 1.0, 0.0).sanitized(SR);
        assert!(p.frequency < SR / 2.0);

        let c = BiquadCoefficients::design(
            FilterKind::HighPass,
            SR,
            FilterStageParams::new(0.0, 0.0, 0.0),
        );
        let mut state = BiquadState::default();
        for _ in 0..4096 {
            assert!(state.process(&c, 1.0).is_finite());
        }
    }
}
