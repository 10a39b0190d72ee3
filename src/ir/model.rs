use anyhow::{Result, bail};

use crate::audio::buffer::MAX_CHANNELS;

/// Samples below this magnitude count as silence when trimming.
const TRIM_THRESHOLD: f32 = 1.0e-5;

/// Decoded impulse response, one or two channels of equal length.
#[derive(Debug, Clone, PartialEq)]
pub struct ImpulseResponse {
    channels: Vec<Vec<f32>>,
    sample_rate: u32,
}

impl ImpulseResponse {
    /// Extra channels beyond stereo are dropped; shorter channels are zero-padded.
    pub fn new(mut channels: Vec<Vec<f32>>, sample_rate: u32) -> Result<Self> {
        channels.truncate(MAX_CHANNELS);
        let len = channels.iter().map(Vec::len).max().unwrap_or(0);
        if len == 0 {
            bail!("impulse response contains no samples");
        }
        if sample_rate == 0 {
            bail!("impulse response has a sample rate of 0 Hz");
        }
        for channel in &mut channels {
            channel.resize(len, 0.0);
        }

        Ok(Self {
            channels,
            sample_rate,
        })
    }

    pub fn mono(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        Self::new(vec![samples], sample_rate)
    }

    pub fn channels(&self) -> &[Vec<f32>] {
        &self.channels
    }

    /// Response for output channel `index`; a mono response feeds every channel.
    pub fn channel_for(&self, index: usize) -> &[f32] {
        &self.channels[index.min(self.channels.len() - 1)]
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.channels[0].len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn duration_secs(&self) -> f32 {
        self.len() as f32 / self.sample_rate as f32
    }

    /// Drops leading and trailing silence common to all channels.
    ///
    /// A response that is silent throughout keeps a single sample.
    pub fn trim_silence(&mut self) {
        let audible = |i: usize| self.channels.iter().any(|c| c[i].abs() > TRIM_THRESHOLD);
        let len = self.len();

        let start = (0..len).find(|&i| audible(i)).unwrap_or(0);
        let end = (start..len).rev().find(|&i| audible(i)).map_or(start + 1, |i| i + 1);

        if start == 0 && end == len {
            return;
        }
        for channel in &mut self.channels {
            channel.truncate(end);
            channel.drain(..start);
        }
    }

    /// Prepends `ms` milliseconds of silence.
    pub fn prepend_silence_ms(&mut self, ms: f32) {
        let samples = (ms.max(0.0) * 0.001 * self.sample_rate as f32).round() as usize;
        if samples == 0 {
            return;
        }
        for channel in &mut self.channels {
            channel.splice(0..0, std::iter::repeat_n(0.0, samples));
        }
    }

    /// Scales all channels so that the loudest channel carries unit energy.
    pub fn normalize(&mut self) {
        let max_energy = self
            .channels
            .iter()
            .map(|c| c.iter().map(|x| x * x).sum::<f32>())
            .fold(0.0f32, f32::max);
        if max_energy <= f32::EPSILON {
            return;
        }

        let gain = max_energy.sqrt().recip();
        for sample in self.channels.iter_mut().flatten() {
            *sample *= gain;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_response_is_rejected() {
        assert!(ImpulseResponse::mono(Vec::new(), 48_000).is_err());
        assert!(ImpulseResponse::mono(vec![1.0], 0).is_err());
    }

    #[test]
    fn channels_are_padded_and_limited() {
        let ir = ImpulseResponse::new(vec![vec![1.0, 0.5], vec![1.0], vec![0.0; 8]], 48_000)
            .unwrap();
        assert_eq!(ir.num_channels(), 2);
        assert_eq!(ir.channels()[1], vec![1.0, 0.0]);
    }

    #[test]
    fn mono_feeds_every_channel() {
        let ir = ImpulseResponse::mono(vec![0.25, 0.5], 48_000).unwrap();
        assert_eq!(ir.channel_for(0), ir.channel_for(1));
    }

    #[test]
    fn trim_removes_leading_and_trailing_silence() {
        let mut ir = ImpulseResponse::new(
            vec![vec![0.0, 0.0, 0.5, 0.0, 0.25, 0.0], vec![0.0, 0.0, 0.0, 0.1, 0.0, 0.0]],
            48_000,
        )
        .unwrap();
        ir.trim_silence();
        assert_eq!(ir.channels()[0], vec![0.5, 0.0, 0.25]);
        assert_eq!(ir.channels()[1], vec![0.0, 0.1, 0.0]);
    }

    #[test]
    fn predelay_inserts_silence_before_onset() {
        let mut ir = ImpulseResponse::mono(vec![1.0, 0.5], 1000).unwrap();
        ir.prepend_silence_ms(3.0);
        assert_eq!(ir.channels()[0], vec![0.0, 0.0, 0.0, 1.0, 0.5]);
    }

    #[test]
    fn normalize_gives_unit_energy() {
        let mut ir = ImpulseResponse::mono(vec![3.0, 4.0], 48_000).unwrap();
        ir.normalize();
        let energy: f32 = ir.channels()[0].iter().map(|x| x * x).sum();
        assert!((energy - 1.0).abs() < 1e-6);
        assert!((ir.channels()[0][0] - 0.6).abs() < 1e-6);
    }
}
