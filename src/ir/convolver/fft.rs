use anyhow::{Result, anyhow};
use realfft::{ComplexToReal, RealFftPlanner, RealToComplex};
use rustfft::num_complex::Complex;
use std::sync::Arc;

/// Partition length in samples; also the convolver's latency.
pub const PARTITION_SIZE: usize = 512;
/// FFT length (two partitions, overlap-save).
const FFT_BLOCK_SIZE: usize = PARTITION_SIZE * 2;
const NUM_BINS: usize = FFT_BLOCK_SIZE / 2 + 1;

/// Uniformly partitioned overlap-save convolver.
///
/// The response is split into `PARTITION_SIZE` chunks whose spectra are
/// precomputed. Every full partition of input is transformed once and
/// multiplied against the whole spectral history, so the cost per sample
/// stays flat however long the response is. Output lags input by exactly
/// `PARTITION_SIZE` samples.
pub struct PartitionedConvolver {
    partitions: Vec<Vec<Complex<f32>>>,

    r2c: Arc<dyn RealToComplex<f32>>,
    c2r: Arc<dyn ComplexToReal<f32>>,

    /// Previous partition followed by the one being collected.
    input_window: Vec<f32>,
    input_pos: usize,
    /// Output of the last completed partition, read out while the next fills.
    output_block: Vec<f32>,

    /// Spectra of past input windows, newest at `history_head - 1`.
    history: Vec<Vec<Complex<f32>>>,
    history_head: usize,

    time_scratch: Vec<f32>,
    freq_scratch: Vec<Complex<f32>>,
    freq_accumulator: Vec<Complex<f32>>,
    r2c_scratch: Vec<Complex<f32>>,
    c2r_scratch: Vec<Complex<f32>>,
}

impl PartitionedConvolver {
    pub fn new(ir: &[f32]) -> Result<Self> {
        let mut planner = RealFftPlanner::<f32>::new();
        let r2c = planner.plan_fft_forward(FFT_BLOCK_SIZE);
        let c2r = planner.plan_fft_inverse(FFT_BLOCK_SIZE);
        let mut r2c_scratch = r2c.make_scratch_vec();
        let c2r_scratch = c2r.make_scratch_vec();

        let num_partitions = ir.len().div_ceil(PARTITION_SIZE).max(1);
        let mut partitions = Vec::with_capacity(num_partitions);
        let mut time_block = vec![0.0f32; FFT_BLOCK_SIZE];

        for p in 0..num_partitions {
            let start = (p * PARTITION_SIZE).min(ir.len());
            let end = (start + PARTITION_SIZE).min(ir.len());

            // Zero-pad each chunk to the FFT length
            time_block.fill(0.0);
            time_block[..end - start].copy_from_slice(&ir[start..end]);

            let mut freq_block = vec![Complex::new(0.0, 0.0); NUM_BINS];
            r2c.process_with_scratch(&mut time_block, &mut freq_block, &mut r2c_scratch)
                .map_err(|e| anyhow!("FFT failed during IR partitioning: {e}"))?;

            partitions.push(freq_block);
        }

        Ok(Self {
            history: vec![vec![Complex::new(0.0, 0.0); NUM_BINS]; num_partitions],
            history_head: 0,
            partitions,
            r2c,
            c2r,
            input_window: vec![0.0; FFT_BLOCK_SIZE],
            input_pos: 0,
            output_block: vec![0.0; PARTITION_SIZE],
            time_scratch: vec![0.0; FFT_BLOCK_SIZE],
            freq_scratch: vec![Complex::new(0.0, 0.0); NUM_BINS],
            freq_accumulator: vec![Complex::new(0.0, 0.0); NUM_BINS],
            r2c_scratch,
            c2r_scratch,
        })
    }

    pub fn process_block(&mut self, samples: &mut [f32]) {
        let mut offset = 0;
        while offset < samples.len() {
            let n = (PARTITION_SIZE - self.input_pos).min(samples.len() - offset);
            let chunk = &mut samples[offset..offset + n];
            let range = self.input_pos..self.input_pos + n;

            self.input_window[PARTITION_SIZE + range.start..PARTITION_SIZE + range.end]
                .copy_from_slice(chunk);
            chunk.copy_from_slice(&self.output_block[range]);

            self.input_pos += n;
            offset += n;

            if self.input_pos == PARTITION_SIZE {
                self.process_partition();
                self.input_pos = 0;
            }
        }
    }

    fn process_partition(&mut self) {
        self.time_scratch.copy_from_slice(&self.input_window);
        // The window slides by one partition
        self.input_window.copy_within(PARTITION_SIZE.., 0);

        if self
            .r2c
            .process_with_scratch(
                &mut self.time_scratch,
                &mut self.freq_scratch,
                &mut self.r2c_scratch,
            )
            .is_err()
        {
            self.output_block.fill(0.0);
            return;
        }

        let len = self.history.len();
        self.history[self.history_head].copy_from_slice(&self.freq_scratch);
        self.history_head = (self.history_head + 1) % len;

        self.freq_accumulator.fill(Complex::new(0.0, 0.0));
        for (j, partition) in self.partitions.iter().enumerate() {
            let hist_idx = (self.history_head + len - 1 - j) % len;
            for ((acc, x), h) in self
                .freq_accumulator
                .iter_mut()
                .zip(&self.history[hist_idx])
                .zip(partition)
            {
                *acc += x * h;
            }
        }

        // DC and Nyquist bins must be purely real for the inverse transform
        self.freq_accumulator[0].im = 0.0;
        if let Some(last) = self.freq_accumulator.last_mut() {
            last.im = 0.0;
        }

        if self
            .c2r
            .process_with_scratch(
                &mut self.freq_accumulator,
                &mut self.time_scratch,
                &mut self.c2r_scratch,
            )
            .is_err()
        {
            self.output_block.fill(0.0);
            return;
        }

        // Only the second half of the circular result is alias-free
        let scale = 1.0 / FFT_BLOCK_SIZE as f32;
        for (out, &y) in self
            .output_block
            .iter_mut()
            .zip(&self.time_scratch[PARTITION_SIZE..])
        {
            *out = y * scale;
        }
    }

    pub fn reset(&mut self) {
        self.input_window.fill(0.0);
        self.input_pos = 0;
        self.output_block.fill(0.0);

        self.history_head = 0;
        for hist in &mut self.history {
            hist.fill(Complex::new(0.0, 0.0));
        }
    }

    pub const fn latency(&self) -> usize {
        PARTITION_SIZE
    }

    pub fn num_partitions(&self) -> usize {
        self.partitions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decaying_ir(len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (-(i as f32) / 100.0).exp() * if i % 2 == 0 { 1.0 } else { -0.5 })
            .collect()
    }

    fn direct_convolution(input: &[f32], ir: &[f32]) -> Vec<f32> {
        (0..input.len())
            .map(|n| {
                ir.iter()
                    .enumerate()
                    .take(n + 1)
                    .map(|(k, &h)| f64::from(h) * f64::from(input[n - k]))
                    .sum::<f64>() as f32
            })
            .collect()
    }

    #[test]
    fn impulse_comes_out_one_partition_late() {
        let ir = decaying_ir(1500);
        let mut conv = PartitionedConvolver::new(&ir).unwrap();
        assert_eq!(conv.num_partitions(), 3);

        let mut signal = vec![0.0f32; 4096];
        signal[0] = 1.0;
        conv.process_block(&mut signal);

        assert!(signal[..PARTITION_SIZE].iter().all(|s| s.abs() < 1e-6));
        for (i, &h) in ir.iter().enumerate() {
            assert!(
                (signal[PARTITION_SIZE + i] - h).abs() < 1e-4,
                "tap {i}: {} vs {h}",
                signal[PARTITION_SIZE + i]
            );
        }
        assert!(signal[PARTITION_SIZE + ir.len()..].iter().all(|s| s.abs() < 1e-4));
    }

    #[test]
    fn matches_direct_convolution_with_uneven_blocks() {
        let ir = decaying_ir(700);
        let input: Vec<f32> = (0..3000).map(|i| ((i as f32) * 0.013).sin()).collect();
        let expected = direct_convolution(&input, &ir);

        let mut conv = PartitionedConvolver::new(&ir).unwrap();
        let mut output = input;
        let mut start = 0;
        for size in [1, 37, 480, 512, 700, 64].iter().cycle() {
            if start >= output.len() {
                break;
            }
            let end = (start + size).min(output.len());
            conv.process_block(&mut output[start..end]);
            start = end;
        }

        for n in PARTITION_SIZE..output.len() {
            assert!(
                (output[n] - expected[n - PARTITION_SIZE]).abs() < 1e-3,
                "sample {n}"
            );
        }
    }

    #[test]
    fn reset_silences_tail() {
        let mut conv = PartitionedConvolver::new(&decaying_ir(2000)).unwrap();
        let mut noise: Vec<f32> = (0..1500).map(|i| ((i * 13) % 7) as f32 - 3.0).collect();
        conv.process_block(&mut noise);

        conv.reset();
        let mut silence = vec![0.0f32; 2048];
        conv.process_block(&mut silence);
        assert!(silence.iter().all(|&s| s == 0.0));
    }
}
