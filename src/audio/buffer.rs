/// Maximum number of channels the chain is built for (mono guitar in, stereo out).
pub const MAX_CHANNELS: usize = 2;

/// Stream parameters negotiated with the host before processing starts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProcessSpec {
    pub sample_rate: f32,
    pub max_block_size: usize,
    pub num_channels: usize,
}

impl ProcessSpec {
    pub fn new(sample_rate: f32, max_block_size: usize, num_channels: usize) -> Self {
        Self {
            sample_rate,
            max_block_size: max_block_size.max(1),
            num_channels: num_channels.clamp(1, MAX_CHANNELS),
        }
    }
}

/// Planar multi-channel block of samples.
///
/// Storage is allocated once for `capacity` frames; `len` is the number of
/// valid frames for the current callback and may change between calls
/// without reallocating.
#[derive(Debug, Clone)]
pub struct AudioBlock {
    channels: Vec<Vec<f32>>,
    len: usize,
}

impl AudioBlock {
    pub fn new(num_channels: usize, capacity: usize) -> Self {
        let num_channels = num_channels.clamp(1, MAX_CHANNELS);
        Self {
            channels: vec![vec![0.0; capacity]; num_channels],
            len: capacity,
        }
    }

    /// Builds a block from planar channel data; all channels are truncated to the shortest.
    pub fn from_channels(channels: Vec<Vec<f32>>) -> Self {
        let len = channels.iter().map(Vec::len).min().unwrap_or(0);
        let mut channels = channels;
        channels.truncate(MAX_CHANNELS);
        if channels.is_empty() {
            channels.push(Vec::new());
        }
        Self { channels, len }
    }

    pub fn for_spec(spec: &ProcessSpec) -> Self {
        Self::new(spec.num_channels, spec.max_block_size)
    }

    pub fn num_channels(&self) -> usize {
        self.channels.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.channels[0].len()
    }

    /// Sets the number of valid frames. Growing past capacity is a
    /// configuration error; release builds clamp.
    pub fn set_len(&mut self, len: usize) {
        debug_assert!(
            len <= self.capacity(),
            "block of {len} frames exceeds prepared capacity {}",
            self.capacity()
        );
        self.len = len.min(self.capacity());
    }

    pub fn channel(&self, index: usize) -> &[f32] {
        &self.channels[index][..self.len]
    }

    pub fn channel_mut(&mut self, index: usize) -> &mut [f32] {
        let len = self.len;
        &mut self.channels[index][..len]
    }

    pub fn channels_mut(&mut self) -> impl Iterator<Item = &mut [f32]> {
        let len = self.len;
        self.channels.iter_mut().map(move |c| &mut c[..len])
    }

    /// Splits off channel 0 from the remaining channels.
    pub fn split_first_mut(&mut self) -> (&mut [f32], impl Iterator<Item = &mut [f32]>) {
        let len = self.len;
        // Constructors guarantee at least one channel
        let (first, rest) = self.channels.split_at_mut(1);
        (
            &mut first[0][..len],
            rest.iter_mut().map(move |c| &mut c[..len]),
        )
    }

    pub fn clear(&mut self) {
        for channel in self.channels_mut() {
            channel.fill(0.0);
        }
    }

    /// Copies `len` frames of `other` into this block and adopts its length.
    /// Channels missing from `other` receive a copy of its last channel.
    pub fn copy_from(&mut self, other: &Self) {
        self.set_len(other.len);
        let last = other.num_channels() - 1;
        for (index, channel) in self.channels_mut().enumerate() {
            channel.copy_from_slice(other.channel(index.min(last)));
        }
    }

    /// Root-mean-square level over all valid samples of all channels.
    pub fn rms(&self) -> f32 {
        if self.len == 0 {
            return 0.0;
        }
        let sum: f32 = (0..self.num_channels())
            .map(|c| self.channel(c).iter().map(|x| x * x).sum::<f32>())
            .sum();
        (sum / (self.len * self.num_channels()) as f32).sqrt()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_len_reuses_storage() {
        let mut block = AudioBlock::new(2, 512);
        block.set_len(128);
        assert_eq!(block.len(), 128);
        assert_eq!(block.capacity(), 512);
        assert_eq!(block.channel(1).len(), 128);
    }

    #[test]
    fn copy_from_duplicates_mono_into_stereo() {
        let mono = AudioBlock::from_channels(vec![vec![0.25, -0.5, 1.0]]);
        let mut stereo = AudioBlock::new(2, 8);
        stereo.copy_from(&mono);

        assert_eq!(stereo.len(), 3);
        assert_eq!(stereo.channel(0), &[0.25, -0.5, 1.0]);
        assert_eq!(stereo.channel(1), &[0.25, -0.5, 1.0]);
    }

    #[test]
    fn rms_of_constant_block() {
        let block = AudioBlock::from_channels(vec![vec![0.5; 64], vec![-0.5; 64]]);
        assert!((block.rms() - 0.5).abs() < 1e-6);
    }
}
