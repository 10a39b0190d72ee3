use anyhow::{Context, Result};
use clap::ValueEnum;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::amp::biquad::FilterStageParams;
use crate::amp::waveshaper::ShaperKind;

/// Factory EQ curves loosely matching a few classic amp families.
#[derive(ValueEnum, Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Voicing {
    /// Mid-forward, gentle top roll-off.
    #[default]
    British,
    /// Deep, wide mid scoop with a chiming top.
    Chime,
    /// Heavily scooped mids, tight low end.
    American,
    /// Every band at 0 dB.
    Flat,
}

impl std::fmt::Display for Voicing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::British => write!(f, "British"),
            Self::Chime => write!(f, "Chime"),
            Self::American => write!(f, "American"),
            Self::Flat => write!(f, "Flat"),
        }
    }
}

impl Voicing {
    pub fn tone_stack(self) -> ToneStackSettings {
        let flat = ToneStackSettings::flat();
        match self {
            Self::British => ToneStackSettings {
                low_cut_hz: 15.0,
                low_cut_q: 0.16,
                mid: FilterStageParams::new(420.0, 0.71, -10.0),
                treble: FilterStageParams::new(415.0, 0.29, -8.0),
                ..flat
            },
            Self::Chime => ToneStackSettings {
                low_cut_hz: 20.0,
                low_cut_q: 0.16,
                mid: FilterStageParams::new(800.0, 0.26, -21.5),
                treble: FilterStageParams::new(800.0, 0.1, -4.5),
                ..flat
            },
            Self::American => ToneStackSettings {
                low_cut_hz: 10.0,
                low_cut_q: 0.09,
                mid: FilterStageParams::new(300.0, 0.807, -23.0),
                treble: FilterStageParams::new(350.0, 1.0, -11.0),
                ..flat
            },
            Self::Flat => flat,
        }
    }
}

/// Band layout of the tone stack. The low cut is fixed at construction.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ToneStackSettings {
    pub low_cut_hz: f32,
    pub low_cut_q: f32,
    pub bass: FilterStageParams,
    pub mid: FilterStageParams,
    pub treble: FilterStageParams,
    pub presence: FilterStageParams,
}

impl ToneStackSettings {
    pub const fn flat() -> Self {
        Self {
            low_cut_hz: 15.0,
            low_cut_q: 0.23,
            bass: FilterStageParams::new(120.0, 0.707, 0.0),
            mid: FilterStageParams::new(420.0, 0.71, 0.0),
            treble: FilterStageParams::new(415.0, 0.71, 0.0),
            presence: FilterStageParams::new(3200.0, 0.707, 0.0),
        }
    }
}

impl Default for ToneStackSettings {
    fn default() -> Self {
        Voicing::default().tone_stack()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct TunerSettings {
    /// Blocks quieter than this RMS are treated as silence.
    pub noise_floor: f32,
    /// Maximum drift in Hz between consecutive estimates that still counts as stable.
    pub tolerance_hz: f32,
    /// Consecutive stable estimates required before the locked pitch moves.
    pub stable_frames: u32,
    /// Per-block convergence factor of the displayed pitch, in `(0, 1]`.
    pub display_smoothing: f32,
}

impl Default for TunerSettings {
    fn default() -> Self {
        Self {
            noise_floor: 0.01,
            tolerance_hz: 3.0,
            stable_frames: 5,
            display_smoothing: 0.3,
        }
    }
}

impl std::fmt::Display for TunerSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Noise Floor: {}", self.noise_floor)?;
        writeln!(f, "Tolerance: {} Hz", self.tolerance_hz)?;
        writeln!(f, "Stable Frames: {}", self.stable_frames)?;
        writeln!(f, "Display Smoothing: {}", self.display_smoothing)?;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    pub tone_stack: ToneStackSettings,
    pub tuner: TunerSettings,
    pub pre_shaper: ShaperKind,
    pub post_shaper: ShaperKind,
    pub input_gain: f32,
    pub output_gain: f32,
    /// Reverb send level in dB, clamped to ±12 dB.
    pub reverb_gain_db: f32,
    /// Linear cabinet level used by the additive output mode.
    pub cabinet_gain: f32,
    /// Cabinet wet/dry blend used by the mix output mode.
    pub cabinet_mix: f32,
    /// Select the wet/dry blend instead of the additive cabinet stage.
    pub use_mix: bool,
    /// Silence inserted ahead of a reverb response's onset.
    pub reverb_predelay_ms: f32,
    /// Ramp length for every smoothed gain.
    pub smoothing_ms: f32,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            tone_stack: ToneStackSettings::default(),
            tuner: TunerSettings::default(),
            pre_shaper: ShaperKind::SoftClip,
            post_shaper: ShaperKind::SoftClip,
            input_gain: 1.0,
            output_gain: 4.0,
            reverb_gain_db: 0.0,
            cabinet_gain: 0.0,
            cabinet_mix: 1.0,
            use_mix: true,
            reverb_predelay_ms: 20.0,
            smoothing_ms: 50.0,
        }
    }
}

impl std::fmt::Display for EngineSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "------------------------------")?;
        writeln!(f, "Pre Shaper: {}", self.pre_shaper)?;
        writeln!(f, "Post Shaper: {}", self.post_shaper)?;
        writeln!(f, "Input Gain: {}", self.input_gain)?;
        writeln!(f, "Output Gain: {}", self.output_gain)?;
        writeln!(f, "Reverb Gain: {} dB", self.reverb_gain_db)?;
        writeln!(f, "Cabinet Gain: {}", self.cabinet_gain)?;
        writeln!(f, "Cabinet Mix: {}", self.cabinet_mix)?;
        writeln!(f, "Use Mix: {}", self.use_mix)?;
        writeln!(f, "Reverb Predelay: {} ms", self.reverb_predelay_ms)?;
        writeln!(f, "Smoothing: {} ms", self.smoothing_ms)?;
        writeln!(
            f,
            "Low Cut: {} Hz (Q {})",
            self.tone_stack.low_cut_hz, self.tone_stack.low_cut_q
        )?;
        writeln!(f, "Tuner Settings:")?;
        write!(f, "{}", self.tuner)?;
        Ok(())
    }
}

impl EngineSettings {
    pub fn with_voicing(voicing: Voicing) -> Self {
        Self {
            tone_stack: voicing.tone_stack(),
            ..Self::default()
        }
    }

    /// Reads settings from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            info!("No settings file at {}, using defaults", path.display());
            return Ok(Self::default());
        }

        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read settings file {}", path.display()))?;
        let settings: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse settings file {}", path.display()))?;
        debug!("Loaded settings from {}", path.display());

        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent).context("Failed to create settings directory")?;
        }

        let json = serde_json::to_string_pretty(self).context("Failed to serialize settings")?;
        fs::write(path, json).context("Failed to write settings file")?;
        info!("Settings saved to {}", path.display());

        Ok(())
    }
}
