use anyhow::{Context, Result};
use crossbeam::channel::{Receiver, Sender, bounded};
use hound::WavWriter;
use log::{error, info};
use std::fs;
use std::path::{Path, PathBuf};
use std::thread;

use crate::audio::buffer::AudioBlock;

/// Interleaved frames handed to the writer thread.
pub type FrameBlock = Vec<f32>;
const BLOCK_CHANNEL_CAPACITY: usize = 32;

/// Streams processed blocks to a 32-bit float WAV file on a background thread.
pub struct Recorder {
    tx: Sender<FrameBlock>,
    handle: thread::JoinHandle<()>,
    channels: u16,
}

impl Recorder {
    /// Creates the parent directory of `path` if needed and starts the writer.
    pub fn new(path: &Path, sample_rate: u32, channels: u16) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory {}", parent.display()))?;
        }

        let spec = hound::WavSpec {
            channels,
            sample_rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let writer = WavWriter::create(path, spec)
            .with_context(|| format!("Failed to create WAV file {}", path.display()))?;
        info!("Recording to: {}", path.display());

        let (tx, rx) = bounded::<FrameBlock>(BLOCK_CHANNEL_CAPACITY);
        let path = path.to_path_buf();
        let handle = thread::spawn(move || run_writer_thread(writer, path, rx));

        Ok(Self {
            tx,
            handle,
            channels,
        })
    }

    /// Interleaves the valid frames of `block` from `start` on and queues them for writing.
    pub fn record_block(&self, block: &AudioBlock, start: usize) -> Result<()> {
        let channels = usize::from(self.channels);
        let last = block.num_channels() - 1;
        let start = start.min(block.len());
        let mut frames = Vec::with_capacity((block.len() - start) * channels);
        for i in start..block.len() {
            for c in 0..channels {
                frames.push(block.channel(c.min(last))[i]);
            }
        }
        self.tx
            .send(frames)
            .context("Recorder writer thread has stopped")
    }

    /// Stops the recording and waits for the writer thread to finish.
    /// This is needed for WAV files to be finalized properly.
    pub fn stop(self) -> Result<()> {
        drop(self.tx);
        self.handle
            .join()
            .map_err(|e| anyhow::anyhow!("Writer thread panicked (join failed): {:?}", e))
    }
}

/// Writes every block received over `rx`, then finalizes the file.
fn run_writer_thread(
    mut writer: WavWriter<std::io::BufWriter<fs::File>>,
    path: PathBuf,
    rx: Receiver<FrameBlock>,
) {
    for block in rx {
        for &sample in &block {
            if let Err(e) = writer.write_sample(sample) {
                error!("Failed to write sample to WAV file '{}': {e}", path.display());
                return;
            }
        }
    }

    if let Err(e) = writer.finalize() {
        error!("Failed to finalize WAV file: {e}");
    } else {
        info!("Recording saved: {}", path.display());
    }
}
