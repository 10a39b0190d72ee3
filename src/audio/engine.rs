use crossbeam::channel::{Receiver, Sender, TrySendError, bounded};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::amp::biquad::FilterStageParams;
use crate::amp::common::SmoothedParameter;
use crate::amp::tonestack::{Band, ToneStack};
use crate::amp::waveshaper::{ShaperKind, WaveshaperStage};
use crate::audio::buffer::{AudioBlock, ProcessSpec};
use crate::audio::meter::{LevelInfo, LevelMeter, LevelMeterHandle};
use crate::audio::params::SharedParams;
use crate::ir::convolver::ConvolutionEngine;
use crate::ir::loader::IrLoader;
use crate::ir::model::ImpulseResponse;
use crate::ir::processor::{IrProcessor, build_cabinet_engine, build_reverb_engine};
use crate::settings::EngineSettings;
use crate::tuner::{PitchDetector, TunerHandle, TunerInfo};

/// Pending control messages the engine can hold between two blocks.
const MESSAGE_QUEUE_SIZE: usize = 64;

#[derive(ValueEnum, Copy, Clone, Debug, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum EngineMode {
    #[default]
    Amp,
    Tuner,
}

impl std::fmt::Display for EngineMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Amp => write!(f, "Amp"),
            Self::Tuner => write!(f, "Tuner"),
        }
    }
}

/// Discrete state changes, applied by the audio thread before a block.
pub enum EngineMessage {
    SetPreShaper(ShaperKind),
    SetPostShaper(ShaperKind),
    SetMode(EngineMode),
    SetUseMix(bool),
    SetCabinet(Box<ConvolutionEngine>),
    SetReverb(Box<ConvolutionEngine>),
    ResetCabinet,
    ResetReverb,
    SetCabinetBypass(bool),
    SetReverbBypass(bool),
}

/// The amplifier signal chain.
///
/// `process` is called once per block from the audio thread. It never
/// allocates, locks or touches the filesystem; every change coming from the
/// [`EngineHandle`] is either an atomic parameter or a message drained at the
/// start of the block.
pub struct Engine {
    spec: ProcessSpec,
    smoothing_ms: f32,

    shaper: WaveshaperStage,
    tone_stack: ToneStack,
    ir: IrProcessor,
    tuner: PitchDetector,

    input_gain: SmoothedParameter,
    output_gain: SmoothedParameter,
    gain_ramp: Vec<f32>,

    mode: EngineMode,
    use_mix: bool,

    params: Arc<SharedParams>,
    latency: Arc<AtomicUsize>,
    input_meter: LevelMeter,
    output_meter: LevelMeter,

    /// Channel for control updates.
    rx_updates: Receiver<EngineMessage>,
    /// Replaced convolution engines go back to the control side to be freed.
    tx_retired: Sender<Box<ConvolutionEngine>>,
}

/// Control side of the [`Engine`].
///
/// IR decoding, resampling and FFT planning happen here, on the caller's
/// thread; only finished convolution engines are sent to the audio thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx_updates: Sender<EngineMessage>,
    rx_retired: Receiver<Box<ConvolutionEngine>>,
    params: Arc<SharedParams>,
    latency: Arc<AtomicUsize>,
    input_meter: LevelMeterHandle,
    output_meter: LevelMeterHandle,
    tuner: TunerHandle,
    sample_rate: f32,
    predelay_ms: f32,
}

impl Engine {
    pub fn new(spec: ProcessSpec, settings: &EngineSettings) -> (Self, EngineHandle) {
        let (tx_updates, rx_updates) = bounded(MESSAGE_QUEUE_SIZE);
        let (tx_retired, rx_retired) = bounded(MESSAGE_QUEUE_SIZE);

        let params = Arc::new(SharedParams::new(settings));
        let latency = Arc::new(AtomicUsize::new(0));
        let (tuner, tuner_handle) = PitchDetector::new(settings.tuner, spec.sample_rate);
        let (input_meter, input_meter_handle) = LevelMeter::new(spec.sample_rate);
        let (output_meter, output_meter_handle) = LevelMeter::new(spec.sample_rate);

        let mut ir = IrProcessor::new(spec, settings.smoothing_ms, settings.reverb_predelay_ms);
        ir.set_reverb_gain_db(settings.reverb_gain_db);
        ir.set_cabinet_gain(settings.cabinet_gain);
        ir.set_cabinet_mix(settings.cabinet_mix);
        ir.skip_smoothing();

        let mut engine = Self {
            spec,
            smoothing_ms: settings.smoothing_ms,
            shaper: WaveshaperStage::new(settings.pre_shaper, settings.post_shaper),
            tone_stack: ToneStack::new(&settings.tone_stack, spec.sample_rate),
            ir,
            tuner,
            input_gain: SmoothedParameter::new(settings.input_gain),
            output_gain: SmoothedParameter::new(settings.output_gain),
            gain_ramp: Vec::new(),
            mode: EngineMode::Amp,
            use_mix: settings.use_mix,
            params: Arc::clone(&params),
            latency: Arc::clone(&latency),
            input_meter,
            output_meter,
            rx_updates,
            tx_retired,
        };
        engine.prepare(&spec);

        let handle = EngineHandle {
            tx_updates,
            rx_retired,
            params,
            latency,
            input_meter: input_meter_handle,
            output_meter: output_meter_handle,
            tuner: tuner_handle,
            sample_rate: spec.sample_rate,
            predelay_ms: settings.reverb_predelay_ms,
        };

        (engine, handle)
    }

    /// Sizes every buffer for `spec` and clears all processing state.
    /// Allocates; call before streaming starts or while it is stopped.
    pub fn prepare(&mut self, spec: &ProcessSpec) {
        self.spec = *spec;

        self.shaper.prepare(spec);
        self.tone_stack.prepare(spec);
        self.ir.prepare(spec);
        self.tuner.prepare(spec);
        self.input_meter.prepare(spec.sample_rate);
        self.output_meter.prepare(spec.sample_rate);

        self.gain_ramp = vec![0.0; spec.max_block_size];
        self.input_gain.reset(spec.sample_rate, self.smoothing_ms);
        self.output_gain.reset(spec.sample_rate, self.smoothing_ms);

        self.publish_latency();
        debug!(
            "Engine prepared: {} Hz, {} frames, {} channels",
            spec.sample_rate, spec.max_block_size, spec.num_channels
        );
    }

    pub const fn spec(&self) -> &ProcessSpec {
        &self.spec
    }

    pub const fn mode(&self) -> EngineMode {
        self.mode
    }

    /// Samples of delay added by the enabled convolution engines.
    pub fn latency(&self) -> usize {
        self.ir.latency()
    }

    pub fn process(&mut self, block: &mut AudioBlock) {
        debug_assert!(
            block.len() <= self.spec.max_block_size,
            "block of {} frames exceeds prepared maximum {}",
            block.len(),
            self.spec.max_block_size
        );

        self.handle_messages();
        self.apply_parameters();

        self.input_meter.process(block);
        apply_smoothed_gain(&mut self.input_gain, &mut self.gain_ramp, block);

        if self.mode == EngineMode::Tuner {
            self.tuner.process(block.channel(0));
            block.clear();
            self.output_gain.skip(block.len());
            self.output_meter.process(block);
            return;
        }

        self.shaper.process_pre(block);
        self.tone_stack.process(block);
        self.shaper.process_post(block);
        self.ir.process(block, self.use_mix);

        apply_smoothed_gain(&mut self.output_gain, &mut self.gain_ramp, block);
        for channel in block.channels_mut() {
            for sample in channel.iter_mut() {
                *sample = sample.clamp(-1.0, 1.0);
            }
        }

        self.output_meter.process(block);
    }

    /// Clears filter memories, convolution tails, delay lines and the tuner.
    pub fn reset(&mut self) {
        self.tone_stack.reset();
        self.ir.reset();
        self.tuner.reset();
        self.input_meter.reset();
        self.output_meter.reset();
    }

    fn apply_parameters(&mut self) {
        let params = &self.params;

        self.input_gain.set_target(params.input_gain());
        self.output_gain.set_target(params.output_gain());
        self.ir.set_reverb_gain_db(params.reverb_gain_db());
        self.ir.set_cabinet_gain(params.cabinet_gain());
        self.ir.set_cabinet_mix(params.cabinet_mix());

        for band in Band::ALL {
            if let Some(update) = params.take_band_update(band) {
                self.tone_stack.set_band(band, update);
            }
        }
    }

    fn handle_messages(&mut self) {
        while let Ok(message) = self.rx_updates.try_recv() {
            match message {
                EngineMessage::SetPreShaper(kind) => {
                    self.shaper.set_pre_function(kind);
                    debug!("Pre shaper set to {kind}");
                }
                EngineMessage::SetPostShaper(kind) => {
                    self.shaper.set_post_function(kind);
                    debug!("Post shaper set to {kind}");
                }
                EngineMessage::SetMode(mode) => {
                    if self.mode != mode {
                        self.mode = mode;
                        // Stale tails from before the switch must not leak out
                        self.tuner.reset();
                        self.tone_stack.reset();
                        self.ir.reset();
                        debug!("Engine mode: {mode}");
                    }
                }
                EngineMessage::SetUseMix(use_mix) => {
                    self.use_mix = use_mix;
                    debug!("Cabinet mix mode: {use_mix}");
                }
                EngineMessage::SetCabinet(engine) => {
                    let old = self.ir.install_cabinet(engine);
                    self.retire(old);
                    debug!("Received new cabinet engine");
                }
                EngineMessage::SetReverb(engine) => {
                    let old = self.ir.install_reverb(engine);
                    self.retire(old);
                    debug!("Received new reverb engine");
                }
                EngineMessage::ResetCabinet => {
                    let old = self.ir.reset_cabinet();
                    self.retire(old);
                    debug!("Cabinet reset");
                }
                EngineMessage::ResetReverb => {
                    let old = self.ir.reset_reverb();
                    self.retire(old);
                    debug!("Reverb reset");
                }
                EngineMessage::SetCabinetBypass(bypass) => {
                    self.ir.set_cabinet_bypass(bypass);
                    debug!("Cabinet bypass: {bypass}");
                }
                EngineMessage::SetReverbBypass(bypass) => {
                    self.ir.set_reverb_bypass(bypass);
                    debug!("Reverb bypass: {bypass}");
                }
            }
        }

        self.publish_latency();
    }

    fn retire(&self, engine: Option<Box<ConvolutionEngine>>) {
        let Some(engine) = engine else {
            return;
        };
        if let Err(TrySendError::Full(engine) | TrySendError::Disconnected(engine)) =
            self.tx_retired.try_send(engine)
        {
            warn!("Retired convolution engine freed on the audio thread");
            drop(engine);
        }
    }

    fn publish_latency(&self) {
        self.latency.store(self.ir.latency(), Ordering::Relaxed);
    }
}

/// Multiplies every channel of `block` by the same smoothed ramp.
fn apply_smoothed_gain(param: &mut SmoothedParameter, ramp: &mut [f32], block: &mut AudioBlock) {
    let len = block.len().min(ramp.len());
    let ramp = &mut ramp[..len];
    param.fill(ramp);

    let tail_gain = param.current();
    for channel in block.channels_mut() {
        let (head, tail) = channel.split_at_mut(len);
        for (sample, gain) in head.iter_mut().zip(ramp.iter()) {
            *sample *= gain;
        }
        for sample in tail {
            *sample *= tail_gain;
        }
    }
}

impl EngineHandle {
    fn send(&self, message: EngineMessage) -> bool {
        match self.tx_updates.try_send(message) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                warn!("Engine message queue full, dropping update");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                error!("Engine is gone, dropping update");
                false
            }
        }
    }

    /// Frees engines the audio thread has swapped out.
    fn collect_retired(&self) {
        let freed = self.rx_retired.try_iter().count();
        if freed > 0 {
            debug!("Freed {freed} retired convolution engines");
        }
    }

    pub fn set_pre_shaper(&self, kind: ShaperKind) -> bool {
        self.send(EngineMessage::SetPreShaper(kind))
    }

    pub fn set_post_shaper(&self, kind: ShaperKind) -> bool {
        self.send(EngineMessage::SetPostShaper(kind))
    }

    pub fn set_mode(&self, mode: EngineMode) -> bool {
        self.send(EngineMessage::SetMode(mode))
    }

    pub fn set_tuner_enabled(&self, enabled: bool) -> bool {
        self.set_mode(if enabled {
            EngineMode::Tuner
        } else {
            EngineMode::Amp
        })
    }

    pub fn set_use_mix(&self, use_mix: bool) -> bool {
        self.send(EngineMessage::SetUseMix(use_mix))
    }

    pub fn set_input_gain(&self, gain: f32) {
        self.params.set_input_gain(gain);
    }

    pub fn set_output_gain(&self, gain: f32) {
        self.params.set_output_gain(gain);
    }

    pub fn set_reverb_gain_db(&self, db: f32) {
        self.params.set_reverb_gain_db(db);
    }

    pub fn set_cabinet_gain(&self, gain: f32) {
        self.params.set_cabinet_gain(gain);
    }

    pub fn set_cabinet_mix(&self, mix: f32) {
        self.params.set_cabinet_mix(mix);
    }

    pub fn set_band(&self, band: Band, params: FilterStageParams) {
        self.params.set_band(band, params);
    }

    pub fn set_band_frequency(&self, band: Band, frequency: f32) {
        self.params.set_band_frequency(band, frequency);
    }

    pub fn set_band_q(&self, band: Band, q: f32) {
        self.params.set_band_q(band, q);
    }

    pub fn set_band_gain_db(&self, band: Band, gain_db: f32) {
        self.params.set_band_gain_db(band, gain_db);
    }

    pub fn band(&self, band: Band) -> FilterStageParams {
        self.params.band(band)
    }

    /// Decodes, prepares and installs a cabinet response. Returns `false`
    /// and logs the cause on failure; the engine keeps its current state.
    pub fn load_cabinet_file(&self, path: &Path) -> bool {
        let loader = IrLoader::new(self.sample_rate as u32);
        self.load_cabinet_with(|| loader.load_file(path), &path.display().to_string())
    }

    pub fn load_reverb_file(&self, path: &Path) -> bool {
        let loader = IrLoader::new(self.sample_rate as u32);
        self.load_reverb_with(|| loader.load_file(path), &path.display().to_string())
    }

    /// Installs an already decoded cabinet response, resampled if its rate differs.
    pub fn load_cabinet(&self, ir: ImpulseResponse) -> bool {
        let loader = IrLoader::new(self.sample_rate as u32);
        self.load_cabinet_with(|| loader.conform(ir), "decoded response")
    }

    pub fn load_reverb(&self, ir: ImpulseResponse) -> bool {
        let loader = IrLoader::new(self.sample_rate as u32);
        self.load_reverb_with(|| loader.conform(ir), "decoded response")
    }

    fn load_cabinet_with(
        &self,
        decode: impl FnOnce() -> Result<ImpulseResponse>,
        source: &str,
    ) -> bool {
        self.collect_retired();
        match decode().and_then(build_cabinet_engine) {
            Ok(engine) => {
                info!("Cabinet IR loaded and normalized: {source}");
                self.send(EngineMessage::SetCabinet(engine))
            }
            Err(e) => {
                error!("Failed to load cabinet IR from {source}: {e:#}");
                false
            }
        }
    }

    fn load_reverb_with(
        &self,
        decode: impl FnOnce() -> Result<ImpulseResponse>,
        source: &str,
    ) -> bool {
        self.collect_retired();
        match decode().and_then(|ir| build_reverb_engine(ir, self.predelay_ms)) {
            Ok(engine) => {
                info!("Reverb IR loaded and normalized: {source}");
                self.send(EngineMessage::SetReverb(engine))
            }
            Err(e) => {
                error!("Failed to load reverb IR from {source}: {e:#}");
                false
            }
        }
    }

    pub fn reset_cabinet(&self) -> bool {
        self.collect_retired();
        self.send(EngineMessage::ResetCabinet)
    }

    pub fn reset_reverb(&self) -> bool {
        self.collect_retired();
        self.send(EngineMessage::ResetReverb)
    }

    pub fn set_cabinet_bypass(&self, bypass: bool) -> bool {
        self.send(EngineMessage::SetCabinetBypass(bypass))
    }

    pub fn set_reverb_bypass(&self, bypass: bool) -> bool {
        self.send(EngineMessage::SetReverbBypass(bypass))
    }

    /// Latency in samples as of the last processed block, for host delay compensation.
    pub fn latency(&self) -> usize {
        self.latency.load(Ordering::Relaxed)
    }

    pub fn input_level(&self) -> LevelInfo {
        self.input_meter.get_info()
    }

    pub fn output_level(&self) -> LevelInfo {
        self.output_meter.get_info()
    }

    pub const fn tuner(&self) -> &TunerHandle {
        &self.tuner
    }

    pub fn tuner_info(&self) -> TunerInfo {
        self.tuner.get_tuner_info()
    }
}
