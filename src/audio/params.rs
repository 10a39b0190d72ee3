use atomic_float::AtomicF32;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::amp::biquad::FilterStageParams;
use crate::amp::tonestack::Band;
use crate::settings::EngineSettings;

/// One tone stack band as written by the control side.
#[derive(Debug)]
struct BandCell {
    frequency: AtomicF32,
    q: AtomicF32,
    gain_db: AtomicF32,
    dirty: AtomicBool,
}

impl BandCell {
    fn new(params: FilterStageParams) -> Self {
        Self {
            frequency: AtomicF32::new(params.frequency),
            q: AtomicF32::new(params.q),
            gain_db: AtomicF32::new(params.gain_db),
            dirty: AtomicBool::new(false),
        }
    }

    fn load(&self) -> FilterStageParams {
        FilterStageParams::new(
            self.frequency.load(Ordering::Relaxed),
            self.q.load(Ordering::Relaxed),
            self.gain_db.load(Ordering::Relaxed),
        )
    }
}

/// Lock-free parameter cells shared between the control side and the engine.
///
/// There is a single writer (the [`EngineHandle`](crate::audio::engine::EngineHandle))
/// and a single reader (the audio thread). Continuous values are picked up
/// once per block and become the target of the engine's smoothers.
#[derive(Debug)]
pub struct SharedParams {
    input_gain: AtomicF32,
    output_gain: AtomicF32,
    reverb_gain_db: AtomicF32,
    cabinet_gain: AtomicF32,
    cabinet_mix: AtomicF32,
    bands: [BandCell; Band::ALL.len()],
}

impl SharedParams {
    pub fn new(settings: &EngineSettings) -> Self {
        let tone = &settings.tone_stack;
        Self {
            input_gain: AtomicF32::new(settings.input_gain),
            output_gain: AtomicF32::new(settings.output_gain),
            reverb_gain_db: AtomicF32::new(settings.reverb_gain_db),
            cabinet_gain: AtomicF32::new(settings.cabinet_gain),
            cabinet_mix: AtomicF32::new(settings.cabinet_mix),
            bands: [
                BandCell::new(tone.bass),
                BandCell::new(tone.mid),
                BandCell::new(tone.treble),
                BandCell::new(tone.presence),
            ],
        }
    }

    pub fn set_input_gain(&self, gain: f32) {
        self.input_gain.store(gain.max(0.0), Ordering::Relaxed);
    }

    pub fn input_gain(&self) -> f32 {
        self.input_gain.load(Ordering::Relaxed)
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.output_gain.store(gain.max(0.0), Ordering::Relaxed);
    }

    pub fn output_gain(&self) -> f32 {
        self.output_gain.load(Ordering::Relaxed)
    }

    pub fn set_reverb_gain_db(&self, db: f32) {
        self.reverb_gain_db.store(db, Ordering::Relaxed);
    }

    pub fn reverb_gain_db(&self) -> f32 {
        self.reverb_gain_db.load(Ordering::Relaxed)
    }

    pub fn set_cabinet_gain(&self, gain: f32) {
        self.cabinet_gain.store(gain, Ordering::Relaxed);
    }

    pub fn cabinet_gain(&self) -> f32 {
        self.cabinet_gain.load(Ordering::Relaxed)
    }

    pub fn set_cabinet_mix(&self, mix: f32) {
        self.cabinet_mix.store(mix, Ordering::Relaxed);
    }

    pub fn cabinet_mix(&self) -> f32 {
        self.cabinet_mix.load(Ordering::Relaxed)
    }

    pub fn set_band(&self, band: Band, params: FilterStageParams) {
        let cell = &self.bands[band.index()];
        cell.frequency.store(params.frequency, Ordering::Relaxed);
        cell.q.store(params.q, Ordering::Relaxed);
        cell.gain_db.store(params.gain_db, Ordering::Relaxed);
        cell.dirty.store(true, Ordering::Release);
    }

    pub fn set_band_frequency(&self, band: Band, frequency: f32) {
        let cell = &self.bands[band.index()];
        cell.frequency.store(frequency, Ordering::Relaxed);
        cell.dirty.store(true, Ordering::Release);
    }

    pub fn set_band_q(&self, band: Band, q: f32) {
        let cell = &self.bands[band.index()];
        cell.q.store(q, Ordering::Relaxed);
        cell.dirty.store(true, Ordering::Release);
    }

    pub fn set_band_gain_db(&self, band: Band, gain_db: f32) {
        let cell = &self.bands[band.index()];
        cell.gain_db.store(gain_db, Ordering::Relaxed);
        cell.dirty.store(true, Ordering::Release);
    }

    pub fn band(&self, band: Band) -> FilterStageParams {
        self.bands[band.index()].load()
    }

    /// Returns the band's parameters if they changed since the last call.
    pub fn take_band_update(&self, band: Band) -> Option<FilterStageParams> {
        let cell = &self.bands[band.index()];
        cell.dirty
            .swap(false, Ordering::Acquire)
            .then(|| cell.load())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_from_settings() {
        let settings = EngineSettings::default();
        let params = SharedParams::new(&settings);

        assert_eq!(params.input_gain(), settings.input_gain);
        assert_eq!(params.output_gain(), settings.output_gain);
        assert_eq!(params.cabinet_mix(), settings.cabinet_mix);
        assert_eq!(params.band(Band::Mid), settings.tone_stack.mid);
        for band in Band::ALL {
            assert_eq!(params.take_band_update(band), None);
        }
    }

    #[test]
    fn band_update_is_taken_once() {
        let params = SharedParams::new(&EngineSettings::default());

        params.set_band_gain_db(Band::Treble, 6.0);
        params.set_band_frequency(Band::Treble, 2500.0);

        let update = params.take_band_update(Band::Treble).unwrap();
        assert_eq!(update.gain_db, 6.0);
        assert_eq!(update.frequency, 2500.0);
        assert_eq!(params.take_band_update(Band::Treble), None);
        assert_eq!(params.take_band_update(Band::Bass), None);
    }

    #[test]
    fn gains_are_never_negative() {
        let params = SharedParams::new(&EngineSettings::default());
        params.set_input_gain(-1.0);
        params.set_output_gain(-3.0);
        assert_eq!(params.input_gain(), 0.0);
        assert_eq!(params.output_gain(), 0.0);
    }
}
