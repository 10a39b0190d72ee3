use anyhow::{Context, Result, anyhow, bail};
use hound::WavReader;
use log::{debug, warn};
use std::fs;
use std::io::Read;
use std::path::{Path, PathBuf};

use rubato::{
    Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction,
};

use crate::ir::model::ImpulseResponse;

const MAX_IR_LENGTH_SECONDS: u64 = 10;

/// Reads every frame of `reader` into planar channels scaled to [-1, 1],
/// keeping at most `max_channels`. `path` only labels errors and warnings.
pub fn decode_wav<R: Read>(
    reader: WavReader<R>,
    path: &Path,
    max_channels: usize,
) -> Result<Vec<Vec<f32>>> {
    let spec = reader.spec();

    let samples: Vec<f32> = if spec.sample_format == hound::SampleFormat::Float {
        reader
            .into_samples::<f32>()
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read float samples")?
    } else {
        let max_val = (1i64 << (spec.bits_per_sample - 1)) as f32;
        reader
            .into_samples::<i32>()
            .map(|s| s.map(|v| v as f32 / max_val))
            .collect::<Result<Vec<_>, _>>()
            .context("Failed to read integer samples")?
    };

    let num_channels = usize::from(spec.channels).max(1);
    if samples.len() < num_channels {
        bail!("{} contains no audio", path.display());
    }
    if num_channels > max_channels {
        warn!(
            "{} has {num_channels} channels, keeping the first {max_channels}",
            path.display()
        );
    }

    Ok((0..num_channels.min(max_channels.max(1)))
        .map(|c| {
            samples
                .chunks_exact(num_channels)
                .map(|frame| frame[c])
                .collect()
        })
        .collect())
}

/// Decodes WAV impulse responses and converts them to the engine rate.
///
/// Optionally indexes a directory of responses so they can be picked by
/// their path relative to that directory.
pub struct IrLoader {
    available_ir_paths: Vec<(String, PathBuf)>,
    ir_directory: Option<PathBuf>,
    target_sample_rate: u32,
}

impl IrLoader {
    pub fn new(target_sample_rate: u32) -> Self {
        Self {
            available_ir_paths: Vec::new(),
            ir_directory: None,
            target_sample_rate,
        }
    }

    pub fn with_directory(directory: &Path, target_sample_rate: u32) -> Result<Self> {
        let mut loader = Self {
            available_ir_paths: Vec::new(),
            ir_directory: Some(directory.to_path_buf()),
            target_sample_rate,
        };

        loader.scan_ir_directory()?;

        Ok(loader)
    }

    pub const fn target_sample_rate(&self) -> u32 {
        self.target_sample_rate
    }

    pub fn available_ir_names(&self) -> Vec<String> {
        self.available_ir_paths
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    pub fn load_by_name(&self, name: &str) -> Result<ImpulseResponse> {
        let (_, path) = self
            .available_ir_paths
            .iter()
            .find(|(ir_name, _)| ir_name == name)
            .ok_or_else(|| anyhow!("ir name '{name}' not found"))?;

        self.load_file(path)
    }

    pub fn load_file(&self, path: &Path) -> Result<ImpulseResponse> {
        let reader = WavReader::open(path)
            .with_context(|| format!("Failed to open WAV file {}", path.display()))?;
        let spec = reader.spec();

        if reader.duration() as u64 > spec.sample_rate as u64 * MAX_IR_LENGTH_SECONDS {
            return Err(anyhow!(
                "Failed to load IR as the IR is too long: {} seconds (max {}).",
                reader.duration() as f64 / spec.sample_rate as f64,
                MAX_IR_LENGTH_SECONDS
            ));
        }

        let channels = decode_wav(reader, path, 2)?;

        let channels = if spec.sample_rate == self.target_sample_rate {
            channels
        } else {
            debug!(
                "Resampling IR from {} Hz to {} Hz",
                spec.sample_rate, self.target_sample_rate
            );
            resample(&channels, spec.sample_rate, self.target_sample_rate)?
        };

        let ir = ImpulseResponse::new(channels, self.target_sample_rate)
            .with_context(|| format!("Invalid impulse response in {}", path.display()))?;
        debug!(
            "Decoded {}: {} channels, {:.2} s",
            path.display(),
            ir.num_channels(),
            ir.duration_secs()
        );
        Ok(ir)
    }

    /// Resamples an already decoded response to the target rate when needed.
    pub fn conform(&self, ir: ImpulseResponse) -> Result<ImpulseResponse> {
        if ir.sample_rate() == self.target_sample_rate {
            return Ok(ir);
        }
        debug!(
            "Resampling IR from {} Hz to {} Hz",
            ir.sample_rate(),
            self.target_sample_rate
        );
        let channels = resample(ir.channels(), ir.sample_rate(), self.target_sample_rate)?;
        ImpulseResponse::new(channels, self.target_sample_rate)
    }

    pub fn scan_ir_directory(&mut self) -> Result<()> {
        let Some(directory) = self.ir_directory.clone() else {
            return Ok(());
        };

        if !directory.exists() {
            fs::create_dir_all(&directory).context("Failed to create IR directory")?;
            warn!("IR directory created at {}", directory.display());
            return Ok(());
        }

        self.available_ir_paths.clear();
        self.scan_recursive(&directory, &directory)?;

        self.available_ir_paths.sort_by(|a, b| {
            let a_sep_count = a.0.matches('/').count();
            let b_sep_count = b.0.matches('/').count();
            a_sep_count.cmp(&b_sep_count).then_with(|| a.0.cmp(&b.0))
        });

        debug!(
            "Found {} impulse response files",
            self.available_ir_paths.len()
        );
        Ok(())
    }

    fn scan_recursive(&mut self, current_dir: &Path, base_dir: &Path) -> Result<()> {
        for entry in fs::read_dir(current_dir)? {
            let path = entry?.path();

            if path.is_dir() {
                self.scan_recursive(&path, base_dir)?;
            } else if path
                .extension()
                .and_then(|s| s.to_str())
                .is_some_and(|ext| ext.eq_ignore_ascii_case("wav"))
            {
                let relative_path = path
                    .strip_prefix(base_dir)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");

                self.available_ir_paths.push((relative_path, path));
            }
        }
        Ok(())
    }
}

/// Converts every channel from `from_rate` to `to_rate` in one pass.
fn resample(channels: &[Vec<f32>], from_rate: u32, to_rate: u32) -> Result<Vec<Vec<f32>>> {
    if from_rate == to_rate {
        return Ok(channels.to_vec());
    }
    let frames = channels.first().map_or(0, Vec::len);
    if frames == 0 {
        return Err(anyhow!("Cannot resample an empty impulse response"));
    }

    let ratio = to_rate as f64 / from_rate as f64;

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let mut resampler = SincFixedIn::<f32>::new(ratio, 1.0, params, frames, channels.len())
        .context("Failed to create resampler")?;

    let output = resampler
        .process(channels, None)
        .context("Failed to resample impulse response")?;

    if output.is_empty() {
        return Err(anyhow!("Resampling failed"));
    }
    Ok(output)
}
