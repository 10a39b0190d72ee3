use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::audio::buffer::{AudioBlock, ProcessSpec};

/// Threshold of the hard clipper.
pub const HARD_CLIP_THRESHOLD: f32 = 0.5;

/// Stateless transfer functions available to the waveshaper stage.
#[derive(
    ValueEnum, Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq, Hash,
)]
pub enum ShaperKind {
    /// `x / (|x| + 1)`, gentle and asymptotic to ±1
    #[default]
    SoftClip,
    /// Flat-topped clamp at ±0.5
    HardClip,
    /// `tanh(x)`
    TanhClip,
}

impl std::fmt::Display for ShaperKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::SoftClip => write!(f, "Soft Clip"),
            Self::HardClip => write!(f, "Hard Clip"),
            Self::TanhClip => write!(f, "Tanh Clip"),
        }
    }
}

impl ShaperKind {
    pub const ALL: [Self; 3] = [Self::SoftClip, Self::HardClip, Self::TanhClip];

    #[inline]
    pub fn apply(self, input: f32) -> f32 {
        match self {
            Self::SoftClip => input / (input.abs() + 1.0),
            Self::HardClip => input.clamp(-HARD_CLIP_THRESHOLD, HARD_CLIP_THRESHOLD),
            Self::TanhClip => input.tanh(),
        }
    }
}

/// Pre- and post-EQ nonlinearity.
///
/// Channel 0 is shaped and the result is copied into every other channel,
/// so the stage always leaves the block with identical channels.
#[derive(Debug, Clone, Default)]
pub struct WaveshaperStage {
    pre: ShaperKind,
    post: ShaperKind,
}

impl WaveshaperStage {
    pub fn new(pre: ShaperKind, post: ShaperKind) -> Self {
        Self { pre, post }
    }

    /// Nothing to allocate: the transfer functions carry no state.
    pub fn prepare(&mut self, _spec: &ProcessSpec) {}

    pub fn set_pre_function(&mut self, kind: ShaperKind) {
        self.pre = kind;
    }

    pub fn set_post_function(&mut self, kind: ShaperKind) {
        self.post = kind;
    }

    pub const fn pre_function(&self) -> ShaperKind {
        self.pre
    }

    pub const fn post_function(&self) -> ShaperKind {
        self.post
    }

    pub fn process_pre(&self, block: &mut AudioBlock) {
        shape_and_duplicate(self.pre, block);
    }

    pub fn process_post(&self, block: &mut AudioBlock) {
        shape_and_duplicate(self.post, block);
    }
}

fn shape_and_duplicate(kind: ShaperKind, block: &mut AudioBlock) {
    let (reference, others) = block.split_first_mut();

    for sample in reference.iter_mut() {
        *sample = kind.apply(*sample);
    }

    for channel in others {
        channel.copy_from_slice(reference);
    }
}
