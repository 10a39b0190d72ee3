pub mod fft;
pub mod fir;

pub use fft::{PARTITION_SIZE, PartitionedConvolver};
pub use fir::FirConvolver;

use anyhow::{Context, Result};
use log::debug;

use crate::audio::buffer::{AudioBlock, MAX_CHANNELS};
use crate::ir::model::ImpulseResponse;

/// Responses up to this many taps run through the zero-latency FIR.
pub const MAX_FIR_TAPS: usize = 256;

/// Convolver implementation selector
/// Ignore Clippy warning here so we use enum dispatch for performance
#[allow(clippy::large_enum_variant)]
pub enum Convolver {
    Fir(FirConvolver),
    Partitioned(PartitionedConvolver),
}

impl Convolver {
    /// Picks the direct FIR for short responses, partitioned FFT otherwise.
    pub fn for_response(ir: &[f32]) -> Result<Self> {
        if ir.len() <= MAX_FIR_TAPS {
            Ok(Self::Fir(FirConvolver::new(ir)))
        } else {
            PartitionedConvolver::new(ir).map(Self::Partitioned)
        }
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        match self {
            Self::Fir(c) => c.process_block(samples),
            Self::Partitioned(c) => c.process_block(samples),
        }
    }

    pub fn reset(&mut self) {
        match self {
            Self::Fir(c) => c.reset(),
            Self::Partitioned(c) => c.reset(),
        }
    }

    pub const fn latency(&self) -> usize {
        match self {
            Self::Fir(c) => c.latency(),
            Self::Partitioned(c) => c.latency(),
        }
    }
}

/// One convolver per output channel, all built from the same response.
///
/// Everything is allocated in [`ConvolutionEngine::new`], which is meant to
/// run off the audio thread; processing and reset are allocation free.
pub struct ConvolutionEngine {
    convolvers: Vec<Convolver>,
    ir_len: usize,
    sample_rate: u32,
}

impl ConvolutionEngine {
    pub fn new(ir: &ImpulseResponse) -> Result<Self> {
        let convolvers = (0..MAX_CHANNELS)
            .map(|channel| Convolver::for_response(ir.channel_for(channel)))
            .collect::<Result<Vec<_>>>()
            .context("Failed to build convolution engine")?;

        debug!(
            "Convolution engine: {} taps, {} channel(s), latency {}",
            ir.len(),
            ir.num_channels(),
            convolvers.first().map_or(0, Convolver::latency)
        );

        Ok(Self {
            convolvers,
            ir_len: ir.len(),
            sample_rate: ir.sample_rate(),
        })
    }

    pub fn process(&mut self, block: &mut AudioBlock) {
        for (channel, convolver) in block.channels_mut().zip(self.convolvers.iter_mut()) {
            convolver.process_block(channel);
        }
    }

    pub fn reset(&mut self) {
        for convolver in &mut self.convolvers {
            convolver.reset();
        }
    }

    /// Intrinsic delay between input and the first output tap, in samples.
    pub fn latency(&self) -> usize {
        self.convolvers.first().map_or(0, Convolver::latency)
    }

    pub const fn ir_len(&self) -> usize {
        self.ir_len
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }
}
