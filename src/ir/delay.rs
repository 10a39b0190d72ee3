use crate::audio::buffer::AudioBlock;

/// Largest compensation delay the IR processor can apply.
pub const MAX_DELAY_SAMPLES: usize = 8192;

/// Integer-sample multichannel delay line.
///
/// Storage is sized once for `max_delay`; changing the delay never
/// reallocates.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffers: Vec<Vec<f32>>,
    write_pos: usize,
    delay: usize,
}

impl DelayLine {
    pub fn new(num_channels: usize, max_delay: usize) -> Self {
        Self {
            buffers: vec![vec![0.0; max_delay + 1]; num_channels.max(1)],
            write_pos: 0,
            delay: 0,
        }
    }

    pub fn max_delay(&self) -> usize {
        self.buffers[0].len() - 1
    }

    pub const fn delay(&self) -> usize {
        self.delay
    }

    /// Values above [`Self::max_delay`] are clamped.
    pub fn set_delay(&mut self, delay: usize) {
        self.delay = delay.min(self.max_delay());
    }

    pub fn process(&mut self, block: &mut AudioBlock) {
        let capacity = self.buffers[0].len();
        let read_offset = capacity - self.delay;

        for (samples, buffer) in block.channels_mut().zip(self.buffers.iter_mut()) {
            let mut w = self.write_pos;
            for sample in samples.iter_mut() {
                buffer[w] = *sample;
                *sample = buffer[(w + read_offset) % capacity];
                w = (w + 1) % capacity;
            }
        }

        self.write_pos = (self.write_pos + block.len()) % capacity;
    }

    pub fn reset(&mut self) {
        for buffer in &mut self.buffers {
            buffer.fill(0.0);
        }
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp(len: usize) -> Vec<f32> {
        (1..=len).map(|i| i as f32).collect()
    }

    #[test]
    fn zero_delay_is_identity() {
        let mut line = DelayLine::new(1, 16);
        let mut block = AudioBlock::from_channels(vec![ramp(5)]);
        line.process(&mut block);
        assert_eq!(block.channel(0), ramp(5).as_slice());
    }

    #[test]
    fn delays_across_block_boundaries() {
        let mut line = DelayLine::new(2, 16);
        line.set_delay(3);

        let input = ramp(10);
        let mut output = Vec::new();
        for chunk in input.chunks(4) {
            let mut block = AudioBlock::from_channels(vec![chunk.to_vec(), chunk.to_vec()]);
            line.process(&mut block);
            assert_eq!(block.channel(0), block.channel(1));
            output.extend_from_slice(block.channel(0));
        }

        assert_eq!(output, vec![0.0, 0.0, 0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0]);
    }

    #[test]
    fn delay_is_clamped_to_capacity() {
        let mut line = DelayLine::new(1, 8);
        line.set_delay(100);
        assert_eq!(line.delay(), 8);

        let mut block = AudioBlock::from_channels(vec![ramp(12)]);
        line.process(&mut block);
        assert_eq!(&block.channel(0)[8..], &[1.0, 2.0, 3.0, 4.0]);
    }
}
