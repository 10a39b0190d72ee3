use anyhow::{Context, Result, bail};
use clap::Parser;
use hound::WavReader;
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use ampchain::amp::waveshaper::ShaperKind;
use ampchain::audio::buffer::{AudioBlock, MAX_CHANNELS, ProcessSpec};
use ampchain::audio::engine::{Engine, EngineHandle, EngineMode};
use ampchain::audio::recorder::Recorder;
use ampchain::ir::loader::{IrLoader, decode_wav};
use ampchain::settings::{EngineSettings, Voicing};

#[derive(Parser, Debug)]
#[command(name = "ampchain-render")]
#[command(version)]
#[command(about = "Renders a WAV file through the amp chain, or runs it through the tuner.")]
struct Args {
    #[arg(short, long, help = "Input WAV file")]
    input: Option<PathBuf>,
    #[arg(
        short,
        long,
        help = "Output WAV file, timestamped in the render directory if omitted"
    )]
    output: Option<PathBuf>,
    #[arg(
        long,
        env = "RENDER_DIR",
        default_value = "./renders",
        help = "Directory for timestamped renders"
    )]
    render_dir: PathBuf,
    #[arg(long, env = "AMPCHAIN_SETTINGS", help = "Settings JSON file")]
    settings: Option<PathBuf>,
    #[arg(long, help = "Write the effective settings to this file")]
    save_settings: Option<PathBuf>,

    #[arg(long, env = "IR_DIR", help = "Directory of impulse responses")]
    ir_dir: Option<PathBuf>,
    #[arg(long, help = "List the responses found in --ir-dir and exit")]
    list_irs: bool,
    #[arg(long, help = "Cabinet IR: a WAV path, or a name from --ir-dir")]
    cabinet: Option<PathBuf>,
    #[arg(long, help = "Reverb IR: a WAV path, or a name from --ir-dir")]
    reverb: Option<PathBuf>,

    #[arg(long, value_enum)]
    voicing: Option<Voicing>,
    #[arg(long, value_enum)]
    pre: Option<ShaperKind>,
    #[arg(long, value_enum)]
    post: Option<ShaperKind>,
    #[arg(long)]
    input_gain: Option<f32>,
    #[arg(long)]
    output_gain: Option<f32>,
    #[arg(long, help = "Reverb level in dB")]
    reverb_gain: Option<f32>,
    #[arg(long, help = "Cabinet level for the additive mode")]
    cabinet_gain: Option<f32>,
    #[arg(long, help = "Cabinet wet/dry blend, 0 to 1")]
    cabinet_mix: Option<f32>,
    #[arg(long, help = "Blend the cabinet wet/dry instead of adding it")]
    use_mix: Option<bool>,

    #[arg(long, help = "Run the tuner and log detected notes instead of rendering")]
    tuner: bool,
    #[arg(long, default_value_t = 256)]
    block_size: usize,
}

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    info!("ampchain v{}", env!("CARGO_PKG_VERSION"));
    info!("Args: {:?}", args);

    if args.list_irs {
        return list_irs(args.ir_dir.as_deref());
    }

    let Some(input) = args.input.as_deref() else {
        bail!("--input is required unless --list-irs is given");
    };
    let (channels, sample_rate) = read_input(input)?;
    info!(
        "Loaded {}: {} channels, {} Hz, {} frames",
        input.display(),
        channels.len(),
        sample_rate,
        channels[0].len()
    );

    let settings = build_settings(&args)?;
    info!("Settings:\n{settings}");
    if let Some(path) = &args.save_settings {
        settings.save(path)?;
        info!("Settings saved to {}", path.display());
    }

    let spec = ProcessSpec::new(sample_rate as f32, args.block_size, channels.len());
    let (mut engine, handle) = Engine::new(spec, &settings);

    let library = match &args.ir_dir {
        Some(dir) => Some(IrLoader::with_directory(dir, sample_rate)?),
        None => None,
    };
    if let Some(cabinet) = &args.cabinet
        && !load_ir(&handle, library.as_ref(), cabinet, IrSlot::Cabinet)
    {
        warn!("Continuing without a cabinet");
    }
    if let Some(reverb) = &args.reverb
        && !load_ir(&handle, library.as_ref(), reverb, IrSlot::Reverb)
    {
        warn!("Continuing without a reverb");
    }
    if args.tuner {
        handle.set_mode(EngineMode::Tuner);
    }

    let running = Arc::new(AtomicBool::new(true));
    let shutdown_flag = Arc::clone(&running);
    ctrlc::set_handler(move || {
        info!("Ctrl+C received, finishing the current block...");
        shutdown_flag.store(false, Ordering::SeqCst);
    })
    .context("error setting Ctrl+C handler")?;

    if args.tuner {
        run_tuner(&mut engine, &handle, &channels, &running);
        return Ok(());
    }

    let output = args.output.clone().unwrap_or_else(|| {
        args.render_dir.join(format!(
            "render_{}.wav",
            chrono::Local::now().format("%Y%m%d_%H%M%S")
        ))
    });
    render(&mut engine, &handle, &channels, &output, sample_rate, &running)
}

fn build_settings(args: &Args) -> Result<EngineSettings> {
    let mut settings = match &args.settings {
        Some(path) => EngineSettings::load(path)?,
        None => EngineSettings::default(),
    };

    if let Some(voicing) = args.voicing {
        settings.tone_stack = voicing.tone_stack();
    }
    if let Some(pre) = args.pre {
        settings.pre_shaper = pre;
    }
    if let Some(post) = args.post {
        settings.post_shaper = post;
    }
    if let Some(gain) = args.input_gain {
        settings.input_gain = gain;
    }
    if let Some(gain) = args.output_gain {
        settings.output_gain = gain;
    }
    if let Some(db) = args.reverb_gain {
        settings.reverb_gain_db = db;
    }
    if let Some(gain) = args.cabinet_gain {
        settings.cabinet_gain = gain;
    }
    if let Some(mix) = args.cabinet_mix {
        settings.cabinet_mix = mix;
    }
    if let Some(use_mix) = args.use_mix {
        settings.use_mix = use_mix;
    }

    Ok(settings)
}

fn list_irs(ir_dir: Option<&Path>) -> Result<()> {
    let Some(dir) = ir_dir else {
        bail!("--list-irs needs --ir-dir or IR_DIR");
    };
    let loader = IrLoader::with_directory(dir, 48_000)?;
    let names = loader.available_ir_names();
    info!("{} impulse responses in {}", names.len(), dir.display());
    for name in names {
        info!("  {name}");
    }
    Ok(())
}

#[derive(Debug, Clone, Copy)]
enum IrSlot {
    Cabinet,
    Reverb,
}

/// Loads `value` as a file path, or as a name from `library` when no such file exists.
fn load_ir(
    handle: &EngineHandle,
    library: Option<&IrLoader>,
    value: &Path,
    slot: IrSlot,
) -> bool {
    if let Some(library) = library
        && !value.exists()
    {
        let name = value.to_string_lossy();
        return match library.load_by_name(&name) {
            Ok(ir) => match slot {
                IrSlot::Cabinet => handle.load_cabinet(ir),
                IrSlot::Reverb => handle.load_reverb(ir),
            },
            Err(e) => {
                error!("Failed to load {slot:?} IR '{name}': {e:#}");
                false
            }
        };
    }

    match slot {
        IrSlot::Cabinet => handle.load_cabinet_file(value),
        IrSlot::Reverb => handle.load_reverb_file(value),
    }
}

/// Decodes a WAV file into at most two channels of normalized samples.
fn read_input(path: &Path) -> Result<(Vec<Vec<f32>>, u32)> {
    let reader = WavReader::open(path)
        .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
    let sample_rate = reader.spec().sample_rate;
    let channels = decode_wav(reader, path, MAX_CHANNELS)?;
    Ok((channels, sample_rate))
}

/// Copies `frames` frames of `channels` starting at `offset` into `block`,
/// zero-filling past the end of the input.
fn fill_block(block: &mut AudioBlock, channels: &[Vec<f32>], offset: usize, frames: usize) {
    block.set_len(frames);
    for (index, out) in block.channels_mut().enumerate() {
        let source = &channels[index.min(channels.len() - 1)];
        let available = source.len().saturating_sub(offset).min(frames);
        out[..available].copy_from_slice(&source[offset..offset + available]);
        out[available..].fill(0.0);
    }
}

/// Streams the input through the engine into `output`, dropping the first
/// `latency` frames and flushing as many so the render lines up with the input.
fn render(
    engine: &mut Engine,
    handle: &EngineHandle,
    channels: &[Vec<f32>],
    output: &Path,
    sample_rate: u32,
    running: &AtomicBool,
) -> Result<()> {
    let spec = *engine.spec();
    let total = channels[0].len();
    let mut block = AudioBlock::for_spec(&spec);

    // Zero-length block so queued IR loads are applied before measuring latency
    block.set_len(0);
    engine.process(&mut block);
    let latency = handle.latency();
    debug!("Compensating {latency} samples of convolution latency");

    let recorder = Recorder::new(output, sample_rate, spec.num_channels as u16)?;
    let mut to_skip = latency;
    let mut offset = 0;
    let mut peak = 0.0f32;

    while offset < total + latency && running.load(Ordering::SeqCst) {
        let frames = spec.max_block_size.min(total + latency - offset);
        fill_block(&mut block, channels, offset, frames);
        engine.process(&mut block);
        peak = peak.max(handle.output_level().peak);

        let skip = to_skip.min(frames);
        to_skip -= skip;
        recorder.record_block(&block, skip)?;
        offset += frames;
    }

    if !running.load(Ordering::SeqCst) {
        warn!("Render interrupted after {offset} of {total} frames");
    }
    recorder.stop()?;
    info!("Peak output level: {:.3}", peak);
    Ok(())
}

/// Feeds the input through the tuner and logs each newly detected note.
fn run_tuner(
    engine: &mut Engine,
    handle: &EngineHandle,
    channels: &[Vec<f32>],
    running: &AtomicBool,
) {
    let spec = *engine.spec();
    let total = channels[0].len();
    let mut block = AudioBlock::for_spec(&spec);
    let mut last_note: Option<String> = None;
    let mut offset = 0;

    while offset < total && running.load(Ordering::SeqCst) {
        let frames = spec.max_block_size.min(total - offset);
        fill_block(&mut block, channels, offset, frames);
        engine.process(&mut block);
        offset += frames;

        let info = handle.tuner_info();
        if info.note != last_note {
            let seconds = offset as f32 / spec.sample_rate;
            match (&info.note, info.frequency, info.cents_off) {
                (Some(note), Some(freq), Some(cents)) => {
                    info!("{seconds:7.2}s  {note:<4} {freq:8.2} Hz  {cents:+6.1} cents");
                }
                _ => info!("{seconds:7.2}s  --"),
            }
            last_note = info.note;
        }
    }
}
