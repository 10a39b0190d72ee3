use anyhow::Result;
use log::{debug, info, warn};

use crate::amp::common::{SmoothedParameter, db_to_lin};
use crate::audio::buffer::{AudioBlock, MAX_CHANNELS, ProcessSpec};
use crate::ir::convolver::ConvolutionEngine;
use crate::ir::delay::{DelayLine, MAX_DELAY_SAMPLES};
use crate::ir::model::ImpulseResponse;

pub const MIN_REVERB_GAIN_DB: f32 = -12.0;
pub const MAX_REVERB_GAIN_DB: f32 = 12.0;

/// Prepares a cabinet response for convolution: trimmed and normalized.
pub fn build_cabinet_engine(mut ir: ImpulseResponse) -> Result<Box<ConvolutionEngine>> {
    ir.trim_silence();
    ir.normalize();
    ConvolutionEngine::new(&ir).map(Box::new)
}

/// Prepares a reverb response: trimmed, shifted by `predelay_ms`, normalized.
pub fn build_reverb_engine(
    mut ir: ImpulseResponse,
    predelay_ms: f32,
) -> Result<Box<ConvolutionEngine>> {
    ir.trim_silence();
    ir.prepend_silence_ms(predelay_ms);
    ir.normalize();
    ConvolutionEngine::new(&ir).map(Box::new)
}

/// Cabinet and reverb convolution with dry-path latency compensation.
///
/// Signal flow per block:
/// 1. the dry signal is delayed by the reverb latency and summed with the
///    reverb output scaled by the reverb gain;
/// 2. that mix feeds the cabinet, and a copy delayed by the cabinet latency
///    is blended with the cabinet output, either as a wet/dry mix or as an
///    additive cabinet level.
///
/// With both engines bypassed the block passes through untouched.
pub struct IrProcessor {
    smoothing_ms: f32,
    predelay_ms: f32,

    cabinet: Option<Box<ConvolutionEngine>>,
    reverb: Option<Box<ConvolutionEngine>>,
    cabinet_bypass: bool,
    reverb_bypass: bool,

    dry: AudioBlock,
    reverb_wet: AudioBlock,
    cabinet_wet: AudioBlock,
    gain_ramp: Vec<f32>,

    dry_delay: DelayLine,
    mixed_delay: DelayLine,

    reverb_gain_db: SmoothedParameter,
    cabinet_gain: SmoothedParameter,
    cabinet_mix: SmoothedParameter,
}

impl IrProcessor {
    pub fn new(spec: ProcessSpec, smoothing_ms: f32, predelay_ms: f32) -> Self {
        let mut processor = Self {
            smoothing_ms,
            predelay_ms,
            cabinet: None,
            reverb: None,
            cabinet_bypass: true,
            reverb_bypass: true,
            dry: AudioBlock::new(MAX_CHANNELS, 0),
            reverb_wet: AudioBlock::new(MAX_CHANNELS, 0),
            cabinet_wet: AudioBlock::new(MAX_CHANNELS, 0),
            gain_ramp: Vec::new(),
            dry_delay: DelayLine::new(MAX_CHANNELS, 0),
            mixed_delay: DelayLine::new(MAX_CHANNELS, 0),
            reverb_gain_db: SmoothedParameter::new(0.0),
            cabinet_gain: SmoothedParameter::new(0.0),
            cabinet_mix: SmoothedParameter::new(1.0),
        };
        processor.prepare(&spec);
        processor
    }

    /// Allocates working buffers for `spec` and clears all processing state.
    pub fn prepare(&mut self, spec: &ProcessSpec) {
        // Working buffers always hold every channel a block can carry
        self.dry = AudioBlock::new(MAX_CHANNELS, spec.max_block_size);
        self.reverb_wet = AudioBlock::new(MAX_CHANNELS, spec.max_block_size);
        self.cabinet_wet = AudioBlock::new(MAX_CHANNELS, spec.max_block_size);
        self.gain_ramp = vec![0.0; spec.max_block_size];
        self.dry_delay = DelayLine::new(MAX_CHANNELS, MAX_DELAY_SAMPLES);
        self.mixed_delay = DelayLine::new(MAX_CHANNELS, MAX_DELAY_SAMPLES);

        for param in [
            &mut self.reverb_gain_db,
            &mut self.cabinet_gain,
            &mut self.cabinet_mix,
        ] {
            param.reset(spec.sample_rate, self.smoothing_ms);
        }

        for engine in [&mut self.cabinet, &mut self.reverb].into_iter().flatten() {
            if engine.sample_rate() as f32 != spec.sample_rate {
                warn!(
                    "Loaded response is at {} Hz but the stream runs at {} Hz",
                    engine.sample_rate(),
                    spec.sample_rate
                );
            }
            engine.reset();
        }

        self.update_latency_compensation();
    }

    /// Builds and installs a cabinet engine. Allocates; not for the audio thread.
    pub fn load_cabinet_impulse(&mut self, ir: ImpulseResponse) -> Result<()> {
        let engine = build_cabinet_engine(ir)?;
        drop(self.install_cabinet(engine));
        info!("Cabinet IR loaded and normalized");
        Ok(())
    }

    /// Builds and installs a reverb engine. Allocates; not for the audio thread.
    pub fn load_reverb_impulse(&mut self, ir: ImpulseResponse) -> Result<()> {
        let engine = build_reverb_engine(ir, self.predelay_ms)?;
        drop(self.install_reverb(engine));
        info!("Reverb IR loaded and normalized");
        Ok(())
    }

    /// Swaps in a prebuilt cabinet engine and enables it; returns the previous one.
    pub fn install_cabinet(
        &mut self,
        mut engine: Box<ConvolutionEngine>,
    ) -> Option<Box<ConvolutionEngine>> {
        engine.reset();
        let old = self.cabinet.replace(engine);
        self.cabinet_bypass = false;
        self.update_latency_compensation();
        old
    }

    /// Swaps in a prebuilt reverb engine and enables it; returns the previous one.
    pub fn install_reverb(
        &mut self,
        mut engine: Box<ConvolutionEngine>,
    ) -> Option<Box<ConvolutionEngine>> {
        engine.reset();
        let old = self.reverb.replace(engine);
        self.reverb_bypass = false;
        self.update_latency_compensation();
        old
    }

    /// Bypasses the cabinet and hands back its engine; the reverb is untouched.
    pub fn reset_cabinet(&mut self) -> Option<Box<ConvolutionEngine>> {
        self.cabinet_bypass = true;
        self.update_latency_compensation();
        self.cabinet.take()
    }

    /// Bypasses the reverb and hands back its engine; the cabinet is untouched.
    pub fn reset_reverb(&mut self) -> Option<Box<ConvolutionEngine>> {
        self.reverb_bypass = true;
        self.update_latency_compensation();
        self.reverb.take()
    }

    pub fn set_cabinet_bypass(&mut self, bypass: bool) {
        if self.cabinet_bypass == bypass {
            return;
        }
        self.cabinet_bypass = bypass;
        if let Some(engine) = self.cabinet.as_mut() {
            engine.reset();
        }
        self.update_latency_compensation();
    }

    pub fn set_reverb_bypass(&mut self, bypass: bool) {
        if self.reverb_bypass == bypass {
            return;
        }
        self.reverb_bypass = bypass;
        if let Some(engine) = self.reverb.as_mut() {
            engine.reset();
        }
        self.update_latency_compensation();
    }

    pub const fn is_cabinet_active(&self) -> bool {
        !self.cabinet_bypass && self.cabinet.is_some()
    }

    pub const fn is_reverb_active(&self) -> bool {
        !self.reverb_bypass && self.reverb.is_some()
    }

    pub fn set_reverb_gain_db(&mut self, db: f32) {
        self.reverb_gain_db
            .set_target(db.clamp(MIN_REVERB_GAIN_DB, MAX_REVERB_GAIN_DB));
    }

    pub fn set_cabinet_gain(&mut self, gain: f32) {
        self.cabinet_gain.set_target(gain.max(0.0));
    }

    pub fn set_cabinet_mix(&mut self, mix: f32) {
        self.cabinet_mix.set_target(mix.clamp(0.0, 1.0));
    }

    /// Snaps every smoothed parameter to its target.
    pub fn skip_smoothing(&mut self) {
        for param in [
            &mut self.reverb_gain_db,
            &mut self.cabinet_gain,
            &mut self.cabinet_mix,
        ] {
            param.set_current_and_target(param.target());
        }
    }

    /// Total latency added by the enabled engines, in samples.
    pub fn latency(&self) -> usize {
        self.cabinet_latency() + self.reverb_latency()
    }

    fn cabinet_latency(&self) -> usize {
        match &self.cabinet {
            Some(engine) if !self.cabinet_bypass => engine.latency(),
            _ => 0,
        }
    }

    fn reverb_latency(&self) -> usize {
        match &self.reverb {
            Some(engine) if !self.reverb_bypass => engine.latency(),
            _ => 0,
        }
    }

    fn update_latency_compensation(&mut self) {
        self.dry_delay.set_delay(self.reverb_latency());
        self.mixed_delay.set_delay(self.cabinet_latency());
        debug!(
            "IR latency compensation: reverb {} + cabinet {} samples",
            self.dry_delay.delay(),
            self.mixed_delay.delay()
        );
    }

    /// Processes `block` in place. `use_mix` selects the wet/dry cabinet
    /// blend over the additive cabinet level.
    pub fn process(&mut self, block: &mut AudioBlock, use_mix: bool) {
        let len = block.len();
        debug_assert!(
            len <= self.dry.capacity(),
            "block of {len} frames exceeds prepared capacity {}",
            self.dry.capacity()
        );

        let reverb_on = self.is_reverb_active();
        let cabinet_on = self.is_cabinet_active();

        // Bypassed paths still run their delay line at zero delay, so a
        // later enable reads recent input rather than audio from before the bypass
        if reverb_on {
            self.mix_reverb(block);
        } else {
            self.dry_delay.process(block);
            self.reverb_gain_db.skip(len);
        }

        if cabinet_on {
            self.mix_cabinet(block, use_mix);
        } else {
            self.mixed_delay.process(block);
            self.cabinet_gain.skip(len);
            self.cabinet_mix.skip(len);
        }
    }

    fn mix_reverb(&mut self, block: &mut AudioBlock) {
        let len = block.len().min(self.gain_ramp.len());

        self.dry.copy_from(block);
        self.dry_delay.process(&mut self.dry);

        self.reverb_wet.copy_from(block);
        if let Some(reverb) = self.reverb.as_mut() {
            reverb.process(&mut self.reverb_wet);
        }

        let ramp = &mut self.gain_ramp[..len];
        self.reverb_gain_db.fill(ramp);
        for g in ramp.iter_mut() {
            *g = db_to_lin(*g);
        }

        for (index, out) in block.channels_mut().enumerate() {
            let dry = self.dry.channel(index);
            let wet = self.reverb_wet.channel(index);
            for (((o, &d), &w), &g) in out.iter_mut().zip(dry).zip(wet).zip(ramp.iter()) {
                *o = g.mul_add(w, d);
            }
        }
    }

    fn mix_cabinet(&mut self, block: &mut AudioBlock, use_mix: bool) {
        let len = block.len().min(self.gain_ramp.len());

        self.cabinet_wet.copy_from(block);
        if let Some(cabinet) = self.cabinet.as_mut() {
            cabinet.process(&mut self.cabinet_wet);
        }
        self.mixed_delay.process(block);

        let ramp = &mut self.gain_ramp[..len];
        if use_mix {
            self.cabinet_mix.fill(ramp);
            self.cabinet_gain.skip(len);
        } else {
            self.cabinet_gain.fill(ramp);
            self.cabinet_mix.skip(len);
        }

        for (index, out) in block.channels_mut().enumerate() {
            let wet = self.cabinet_wet.channel(index);
            for ((o, &w), &g) in out.iter_mut().zip(wet).zip(ramp.iter()) {
                *o = if use_mix {
                    g.mul_add(w, (1.0 - g) * *o)
                } else {
                    g.mul_add(w, *o)
                };
            }
        }
    }

    /// Clears convolution tails and delay lines.
    pub fn reset(&mut self) {
        for engine in [&mut self.cabinet, &mut self.reverb].into_iter().flatten() {
            engine.reset();
        }
        self.dry_delay.reset();
        self.mixed_delay.reset();
    }
}
