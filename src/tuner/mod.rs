pub mod ring;
pub mod yin;

use atomic_float::AtomicF32;
use std::sync::Arc;
use std::sync::atomic::Ordering;

use crate::amp::biquad::{BiquadCoefficients, BiquadState, FilterKind, FilterStageParams};
use crate::audio::buffer::ProcessSpec;
use crate::settings::TunerSettings;
use ring::RingCaptureBuffer;
use yin::Yin;

/// Samples kept for analysis.
pub const CAPTURE_CAPACITY: usize = 4096;
/// Shortest window handed to the estimator; low sample rates still get this much.
pub const ANALYSIS_WINDOW: usize = 2048;
/// Estimates outside this range are discarded.
pub const MIN_FREQUENCY_HZ: f32 = 40.0;
pub const MAX_FREQUENCY_HZ: f32 = 1200.0;

const PREFILTER_CUTOFF_HZ: f32 = 600.0;
/// Extra history run through the prefilter ahead of the window so its start-up
/// transient never reaches the estimator.
const PREFILTER_WARMUP: usize = 256;
const CENTER_CLIP_RATIO: f32 = 0.5;
const CENTER_CLIP_MIN: f32 = 0.002;
const CENTER_CLIP_MAX: f32 = 0.1;
/// Displayed pitch below this is snapped to zero while decaying.
const DISPLAY_FLOOR_HZ: f32 = 1.0;

/// Values published by the detector for the control side.
#[derive(Debug)]
struct TunerStatus {
    frequency: AtomicF32,
    locked: AtomicF32,
    raw: AtomicF32,
}

impl TunerStatus {
    fn new() -> Self {
        Self {
            frequency: AtomicF32::new(0.0),
            locked: AtomicF32::new(0.0),
            raw: AtomicF32::new(0.0),
        }
    }
}

/// YIN pitch detector with stability gating for a tuner display.
///
/// Runs on the audio thread; every buffer is allocated in [`PitchDetector::new`]
/// or [`PitchDetector::prepare`].
pub struct PitchDetector {
    settings: TunerSettings,
    sample_rate: f32,
    ring: RingCaptureBuffer,
    window: Vec<f32>,
    yin: Yin,
    prefilter: BiquadCoefficients,

    last_raw: f32,
    stable_count: u32,
    locked: f32,
    display: f32,

    status: Arc<TunerStatus>,
}

/// Read side of the detector.
#[derive(Clone)]
pub struct TunerHandle {
    status: Arc<TunerStatus>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TunerInfo {
    pub frequency: Option<f32>,
    pub note: Option<String>,
    pub cents_off: Option<f32>,
    pub in_tune: bool,
}

impl PitchDetector {
    pub fn new(settings: TunerSettings, sample_rate: f32) -> (Self, TunerHandle) {
        let status = Arc::new(TunerStatus::new());

        (
            Self {
                settings,
                sample_rate,
                ring: RingCaptureBuffer::new(capture_capacity(sample_rate, 0)),
                window: vec![0.0; PREFILTER_WARMUP + analysis_window(sample_rate)],
                yin: Yin::new(analysis_window(sample_rate), yin::DEFAULT_THRESHOLD),
                prefilter: design_prefilter(sample_rate),
                last_raw: 0.0,
                stable_count: 0,
                locked: 0.0,
                display: 0.0,
                status: Arc::clone(&status),
            },
            TunerHandle { status },
        )
    }

    pub fn prepare(&mut self, spec: &ProcessSpec) {
        self.sample_rate = spec.sample_rate;
        self.prefilter = design_prefilter(spec.sample_rate);
        let window = analysis_window(spec.sample_rate);
        if self.yin.max_lag() != window / 2 {
            self.window = vec![0.0; PREFILTER_WARMUP + window];
            self.yin = Yin::new(window, yin::DEFAULT_THRESHOLD);
        }
        self.ring
            .ensure_capacity(capture_capacity(spec.sample_rate, spec.max_block_size));
        self.reset();
    }

    pub fn reset(&mut self) {
        self.ring.clear();
        self.last_raw = 0.0;
        self.stable_count = 0;
        self.locked = 0.0;
        self.display = 0.0;
        self.publish(0.0);
    }

    /// Feeds one block of mono input and returns the displayed frequency (0 when silent).
    pub fn process(&mut self, samples: &[f32]) -> f32 {
        self.ring.write(samples);

        let rms = rms(samples);
        if rms <= self.settings.noise_floor {
            self.last_raw = 0.0;
            self.stable_count = 0;
            self.locked = 0.0;
            self.display *= 1.0 - self.settings.display_smoothing.clamp(0.0, 1.0);
            if self.display < DISPLAY_FLOOR_HZ {
                self.display = 0.0;
            }
            self.publish(0.0);
            return self.display;
        }

        self.ring.read_latest(&mut self.window);
        self.condition_window(rms);

        let raw = self
            .yin
            .estimate(&self.window[PREFILTER_WARMUP..], self.sample_rate)
            .unwrap_or(0.0);
        self.stabilize(raw);

        if self.locked > 0.0 {
            if self.display == 0.0 {
                self.display = self.locked;
            } else {
                let a = self.settings.display_smoothing.clamp(0.0, 1.0);
                self.display += a * (self.locked - self.display);
            }
        }

        self.publish(raw);
        self.display
    }

    /// Center clip with an RMS-derived threshold, then low-pass.
    fn condition_window(&mut self, rms: f32) {
        let threshold = (CENTER_CLIP_RATIO * rms).clamp(CENTER_CLIP_MIN, CENTER_CLIP_MAX);
        let mut state = BiquadState::default();

        for s in &mut self.window {
            let clipped = if *s > threshold {
                *s - threshold
            } else if *s < -threshold {
                *s + threshold
            } else {
                0.0
            };
            *s = state.process(&self.prefilter, clipped);
        }
    }

    fn stabilize(&mut self, raw: f32) {
        if !(MIN_FREQUENCY_HZ..=MAX_FREQUENCY_HZ).contains(&raw) {
            self.stable_count = 0;
            self.last_raw = 0.0;
            return;
        }

        if self.last_raw > 0.0 && (raw - self.last_raw).abs() <= self.settings.tolerance_hz {
            self.stable_count += 1;
        } else {
            self.stable_count = 0;
        }
        self.last_raw = raw;

        if self.stable_count >= self.settings.stable_frames {
            self.locked = raw;
        }
    }

    fn publish(&self, raw: f32) {
        self.status.raw.store(raw, Ordering::Relaxed);
        self.status.locked.store(self.locked, Ordering::Relaxed);
        self.status.frequency.store(self.display, Ordering::Relaxed);
    }

    pub const fn frequency(&self) -> f32 {
        self.display
    }

    pub const fn locked_frequency(&self) -> f32 {
        self.locked
    }
}

/// Window long enough that the YIN lag search (half the window) covers the
/// period of [`MIN_FREQUENCY_HZ`] plus the neighbours parabolic refinement reads.
pub fn analysis_window(sample_rate: f32) -> usize {
    let longest_period = (sample_rate / MIN_FREQUENCY_HZ).ceil() as usize + 2;
    ANALYSIS_WINDOW.max(2 * longest_period)
}

/// Capture size holding the analysis window, the prefilter warm-up and one block.
fn capture_capacity(sample_rate: f32, max_block_size: usize) -> usize {
    CAPTURE_CAPACITY
        .max(PREFILTER_WARMUP + analysis_window(sample_rate))
        .max(max_block_size)
}

fn design_prefilter(sample_rate: f32) -> BiquadCoefficients {
    BiquadCoefficients::design(
        FilterKind::LowPass,
        sample_rate,
        FilterStageParams::new(PREFILTER_CUTOFF_HZ, std::f32::consts::FRAC_1_SQRT_2, 0.0),
    )
}

fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|x| x * x).sum::<f32>() / samples.len() as f32).sqrt()
}

impl TunerHandle {
    /// Smoothed frequency shown on the display, 0 when nothing is detected.
    pub fn frequency(&self) -> f32 {
        self.status.frequency.load(Ordering::Relaxed)
    }

    pub fn locked_frequency(&self) -> f32 {
        self.status.locked.load(Ordering::Relaxed)
    }

    /// Unfiltered estimate from the most recent block.
    pub fn raw_frequency(&self) -> f32 {
        self.status.raw.load(Ordering::Relaxed)
    }

    pub fn get_tuner_info(&self) -> TunerInfo {
        let f = self.frequency();
        (f > 0.0).then_some(f).into()
    }
}

impl From<Option<f32>> for TunerInfo {
    fn from(freq: Option<f32>) -> Self {
        match freq {
            None => Self::default(),
            Some(f) => {
                let (note, octave, cents) = freq_to_note(f);
                Self {
                    frequency: Some(f),
                    note: Some(format!("{note}{octave}")),
                    cents_off: Some(cents),
                    in_tune: cents.abs() < 5.0,
                }
            }
        }
    }
}

/// Nearest equal-tempered note (A4 = 440 Hz), its octave and the offset in cents.
pub fn freq_to_note(freq: f32) -> (&'static str, i32, f32) {
    const NOTES: [&str; 12] = [
        "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
    ];

    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    let note_number = midi.round() as i32;
    let cents = (midi - note_number as f32) * 100.0;

    let note_index = note_number.rem_euclid(12) as usize;
    let octave = note_number.div_euclid(12) - 1;

    (NOTES[note_index], octave, cents)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::PI;

    const SR: f32 = 48_000.0;
    const BLOCK: usize = 480;

    fn feed_sine(detector: &mut PitchDetector, freq: f32, blocks: usize) -> f32 {
        let mut phase = 0usize;
        let mut last = 0.0;
        for _ in 0..blocks {
            let block: Vec<f32> = (phase..phase + BLOCK)
                .map(|i| 0.5 * (2.0 * PI * freq * i as f32 / SR).sin())
                .collect();
            phase += BLOCK;
            last = detector.process(&block);
        }
        last
    }

    #[test]
    fn test_freq_to_note() {
        let (note, octave, cents) = freq_to_note(440.0);
        assert_eq!(note, "A");
        assert_eq!(octave, 4);
        assert!(cents.abs() < 0.1);

        let (note, octave, cents) = freq_to_note(82.41);
        assert_eq!((note, octave), ("E", 2));
        assert!(cents.abs() < 1.0);

        let (note, octave, _) = freq_to_note(261.63);
        assert_eq!((note, octave), ("C", 4));
    }

    #[test]
    fn sharp_note_is_out_of_tune() {
        let info = TunerInfo::from(Some(446.0));
        assert_eq!(info.note.as_deref(), Some("A4"));
        assert!(info.cents_off.unwrap() > 20.0);
        assert!(!info.in_tune);
        assert!(TunerInfo::from(Some(440.5)).in_tune);
    }

    #[test]
    fn converges_on_sines() {
        for freq in [110.0, 196.0, 440.0, 880.0] {
            let (mut detector, handle) = PitchDetector::new(TunerSettings::default(), SR);
            let shown = feed_sine(&mut detector, freq, 60);

            assert!(
                (shown - freq).abs() / freq < 0.01,
                "{freq} Hz displayed as {shown}"
            );
            assert!((handle.locked_frequency() - freq).abs() / freq < 0.01);
            assert_eq!(handle.frequency(), shown);
        }
    }

    #[test]
    fn converges_at_the_edges_of_the_range() {
        // Bass low E and a pitch just under the upper limit
        for freq in [41.2, 44.0, 1190.0] {
            let (mut detector, handle) = PitchDetector::new(TunerSettings::default(), SR);
            feed_sine(&mut detector, freq, 100);

            let locked = handle.locked_frequency();
            assert!(
                (locked - freq).abs() / freq < 0.01,
                "{freq} Hz locked at {locked}"
            );
        }
    }

    #[test]
    fn lag_search_reaches_the_lowest_pitch() {
        for sample_rate in [44_100.0, 48_000.0, 96_000.0] {
            let window = analysis_window(sample_rate);
            assert!(window / 2 > (sample_rate / MIN_FREQUENCY_HZ) as usize + 1);

            let (mut detector, _) = PitchDetector::new(TunerSettings::default(), SR);
            detector.prepare(&ProcessSpec::new(sample_rate, 512, 2));
            assert_eq!(detector.yin.max_lag(), window / 2);
            assert!(detector.ring.capacity() >= window + PREFILTER_WARMUP);
        }
    }

    #[test]
    fn silence_decays_to_zero() {
        let (mut detector, handle) = PitchDetector::new(TunerSettings::default(), SR);
        feed_sine(&mut detector, 330.0, 40);
        assert!(handle.frequency() > 0.0);

        let silence = [0.0f32; BLOCK];
        let first = detector.process(&silence);
        assert!(first > 0.0 && first < 330.0);
        assert_eq!(handle.locked_frequency(), 0.0);

        for _ in 0..100 {
            detector.process(&silence);
        }
        assert_eq!(handle.frequency(), 0.0);
        assert_eq!(handle.get_tuner_info(), TunerInfo::default());
    }

    #[test]
    fn lock_requires_stable_frames() {
        let settings = TunerSettings {
            stable_frames: 5,
            ..TunerSettings::default()
        };
        let (mut detector, _) = PitchDetector::new(settings, SR);

        for _ in 0..5 {
            detector.stabilize(220.0);
        }
        assert_eq!(detector.locked_frequency(), 0.0);
        detector.stabilize(220.5);
        assert_eq!(detector.locked_frequency(), 220.5);

        // A jump resets the counter without moving the lock
        detector.stabilize(300.0);
        assert_eq!(detector.locked_frequency(), 220.5);
        detector.stabilize(2000.0);
        assert_eq!(detector.locked_frequency(), 220.5);
    }

    #[test]
    fn quiet_input_never_locks() {
        let (mut detector, handle) = PitchDetector::new(TunerSettings::default(), SR);
        let whisper: Vec<f32> = (0..BLOCK)
            .map(|i| 0.005 * (2.0 * PI * 440.0 * i as f32 / SR).sin())
            .collect();
        for _ in 0..50 {
            detector.process(&whisper);
        }
        assert_eq!(handle.frequency(), 0.0);
        assert_eq!(handle.raw_frequency(), 0.0);
    }
}
