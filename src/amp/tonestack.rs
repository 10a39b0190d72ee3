use clap::ValueEnum;
use log::debug;
use serde::{Deserialize, Serialize};

use crate::amp::biquad::{BiquadCoefficients, BiquadState, FilterKind, FilterStageParams};
use crate::audio::buffer::{AudioBlock, MAX_CHANNELS, ProcessSpec};
use crate::settings::ToneStackSettings;

/// User-adjustable tone stack bands, in processing order after the low cut.
#[derive(ValueEnum, Copy, Clone, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Band {
    Bass,
    Mid,
    Treble,
    Presence,
}

impl std::fmt::Display for Band {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bass => write!(f, "Bass"),
            Self::Mid => write!(f, "Mid"),
            Self::Treble => write!(f, "Treble"),
            Self::Presence => write!(f, "Presence"),
        }
    }
}

impl Band {
    pub const ALL: [Self; 4] = [Self::Bass, Self::Mid, Self::Treble, Self::Presence];

    pub const fn index(self) -> usize {
        match self {
            Self::Bass => 0,
            Self::Mid => 1,
            Self::Treble => 2,
            Self::Presence => 3,
        }
    }

    pub const fn filter_kind(self) -> FilterKind {
        match self {
            Self::Bass => FilterKind::LowShelf,
            Self::Mid => FilterKind::Peak,
            Self::Treble | Self::Presence => FilterKind::HighShelf,
        }
    }
}

const NUM_BANDS: usize = Band::ALL.len();
/// Low cut followed by the adjustable bands.
const NUM_SECTIONS: usize = NUM_BANDS + 1;

/// Fixed cascade: low cut, bass shelf, mid bell, treble shelf, presence shelf.
///
/// Coefficients are shared between channels; every channel keeps its own
/// filter memory so stereo content is never coupled.
pub struct ToneStack {
    sample_rate: f32,
    low_cut: FilterStageParams,
    bands: [FilterStageParams; NUM_BANDS],
    coefficients: [BiquadCoefficients; NUM_SECTIONS],
    states: [[BiquadState; NUM_SECTIONS]; MAX_CHANNELS],
}

impl ToneStack {
    pub fn new(settings: &ToneStackSettings, sample_rate: f32) -> Self {
        let mut stack = Self {
            sample_rate,
            low_cut: FilterStageParams::new(settings.low_cut_hz, settings.low_cut_q, 0.0),
            bands: [
                settings.bass,
                settings.mid,
                settings.treble,
                settings.presence,
            ],
            coefficients: [BiquadCoefficients::identity(); NUM_SECTIONS],
            states: [[BiquadState::default(); NUM_SECTIONS]; MAX_CHANNELS],
        };
        stack.update_all();
        stack
    }

    pub fn prepare(&mut self, spec: &ProcessSpec) {
        self.sample_rate = spec.sample_rate;
        self.update_all();
        self.reset();
    }

    pub fn set_band(&mut self, band: Band, params: FilterStageParams) {
        if self.bands[band.index()] == params {
            return;
        }
        self.bands[band.index()] = params;
        self.update_band(band);
    }

    pub fn set_frequency(&mut self, band: Band, frequency: f32) {
        let params = FilterStageParams {
            frequency,
            ..self.band_params(band)
        };
        self.set_band(band, params);
    }

    pub fn set_q(&mut self, band: Band, q: f32) {
        let params = FilterStageParams {
            q,
            ..self.band_params(band)
        };
        self.set_band(band, params);
    }

    pub fn set_gain_db(&mut self, band: Band, gain_db: f32) {
        let params = FilterStageParams {
            gain_db,
            ..self.band_params(band)
        };
        self.set_band(band, params);
    }

    pub const fn band_params(&self, band: Band) -> FilterStageParams {
        self.bands[band.index()]
    }

    pub const fn low_cut_params(&self) -> FilterStageParams {
        self.low_cut
    }

    pub fn process(&mut self, block: &mut AudioBlock) {
        for (channel, states) in block.channels_mut().zip(self.states.iter_mut()) {
            for (state, coefficients) in states.iter_mut().zip(&self.coefficients) {
                state.process_block(coefficients, channel);
            }
        }
    }

    pub fn reset(&mut self) {
        for state in self.states.iter_mut().flatten() {
            state.reset();
        }
    }

    /// Combined magnitude response of all sections in dB.
    pub fn magnitude_db(&self, frequency: f32) -> f32 {
        self.coefficients
            .iter()
            .map(|c| c.magnitude_db(frequency, self.sample_rate))
            .sum()
    }

    fn update_all(&mut self) {
        self.coefficients[0] =
            BiquadCoefficients::design(FilterKind::HighPass, self.sample_rate, self.low_cut);
        for band in Band::ALL {
            self.update_band(band);
        }
    }

    fn update_band(&mut self, band: Band) {
        let params = self.bands[band.index()];
        self.coefficients[band.index() + 1] =
            BiquadCoefficients::design(band.filter_kind(), self.sample_rate, params);
        debug!(
            "{band} band: {} Hz, Q {}, {} dB",
            params.frequency, params.q, params.gain_db
        );
    }
}
