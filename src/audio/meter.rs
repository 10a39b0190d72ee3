use atomic_float::AtomicF32;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::amp::common::{calculate_coefficient, lin_to_db};
use crate::audio::buffer::AudioBlock;

const CLIP_THRESHOLD: f32 = 0.95;
const PEAK_HOLD_SECONDS: f32 = 2.0;
const PEAK_RELEASE_MS: f32 = 300.0;

#[derive(Debug)]
struct LevelStatus {
    rms: AtomicF32,
    peak: AtomicF32,
    clipping: AtomicBool,
}

/// Block RMS and held peak of one signal point, published for display.
pub struct LevelMeter {
    current_peak: f32,
    samples_since_peak: usize,
    peak_hold_samples: usize,
    release_coeff: f32,
    status: Arc<LevelStatus>,
}

#[derive(Clone)]
pub struct LevelMeterHandle {
    status: Arc<LevelStatus>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LevelInfo {
    pub rms: f32,
    pub rms_db: f32,
    pub peak: f32,
    pub peak_db: f32,
    pub is_clipping: bool,
}

impl LevelMeter {
    pub fn new(sample_rate: f32) -> (Self, LevelMeterHandle) {
        let status = Arc::new(LevelStatus {
            rms: AtomicF32::new(0.0),
            peak: AtomicF32::new(0.0),
            clipping: AtomicBool::new(false),
        });

        let mut meter = Self {
            current_peak: 0.0,
            samples_since_peak: 0,
            peak_hold_samples: 0,
            release_coeff: 0.0,
            status: Arc::clone(&status),
        };
        meter.prepare(sample_rate);

        (meter, LevelMeterHandle { status })
    }

    pub fn prepare(&mut self, sample_rate: f32) {
        self.peak_hold_samples = (sample_rate * PEAK_HOLD_SECONDS) as usize;
        self.release_coeff = calculate_coefficient(PEAK_RELEASE_MS, sample_rate);
        self.reset();
    }

    pub fn process(&mut self, block: &AudioBlock) {
        let len = block.len();
        let block_peak = (0..block.num_channels())
            .flat_map(|c| block.channel(c).iter())
            .fold(0.0f32, |acc, s| acc.max(s.abs()));

        if block_peak >= self.current_peak {
            self.current_peak = block_peak;
            self.samples_since_peak = 0;
        } else {
            self.samples_since_peak += len;
            if self.samples_since_peak > self.peak_hold_samples {
                // Held long enough, fall back toward the live level
                let released = self.current_peak * self.release_coeff.powi(len as i32);
                self.current_peak = released.max(block_peak);
            }
        }

        self.status.rms.store(block.rms(), Ordering::Relaxed);
        self.status.peak.store(self.current_peak, Ordering::Relaxed);
        self.status
            .clipping
            .store(self.current_peak >= CLIP_THRESHOLD, Ordering::Relaxed);
    }

    pub fn reset(&mut self) {
        self.current_peak = 0.0;
        self.samples_since_peak = 0;
        self.status.rms.store(0.0, Ordering::Relaxed);
        self.status.peak.store(0.0, Ordering::Relaxed);
        self.status.clipping.store(false, Ordering::Relaxed);
    }
}

impl LevelMeterHandle {
    pub fn rms(&self) -> f32 {
        self.status.rms.load(Ordering::Relaxed)
    }

    pub fn get_info(&self) -> LevelInfo {
        let rms = self.rms();
        let peak = self.status.peak.load(Ordering::Relaxed);
        LevelInfo {
            rms,
            rms_db: lin_to_db(rms),
            peak,
            peak_db: lin_to_db(peak),
            is_clipping: self.status.clipping.load(Ordering::Relaxed),
        }
    }
}
