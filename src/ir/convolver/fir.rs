/// Time-domain FIR convolver over a ring buffer.
///
/// Meant for short responses (a few hundred taps). Zero latency,
/// O(block_len * taps).
pub struct FirConvolver {
    /// Response taps, stored in their original order.
    coefficients: Vec<f32>,
    /// Input history, one slot per tap.
    history: Vec<f32>,
    write_pos: usize,
}

impl FirConvolver {
    pub fn new(ir: &[f32]) -> Self {
        Self {
            coefficients: ir.to_vec(),
            history: vec![0.0; ir.len().max(1)],
            write_pos: 0,
        }
    }

    #[inline]
    pub fn process_sample(&mut self, input: f32) -> f32 {
        if self.coefficients.is_empty() {
            return 0.0;
        }

        let len = self.coefficients.len();
        self.history[self.write_pos] = input;

        let mut output = 0.0;
        let mut idx = self.write_pos;

        for &coeff in &self.coefficients {
            output += self.history[idx] * coeff;
            idx = if idx == 0 { len - 1 } else { idx - 1 };
        }

        self.write_pos = (self.write_pos + 1) % len;

        output
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            *sample = self.process_sample(*sample);
        }
    }

    pub fn reset(&mut self) {
        self.history.fill(0.0);
        self.write_pos = 0;
    }

    pub const fn latency(&self) -> usize {
        0
    }
}
