use ampchain::ir::loader::IrLoader;
use ampchain::ir::model::ImpulseResponse;
use hound::{WavSpec, WavWriter};
use std::fs;
use std::path::Path;

/// Decodes a synthetic response of `ir_length` taps through the WAV loader.
pub fn load_test_response(ir_length: usize, sample_rate: u32) -> ImpulseResponse {
    let ir_dir = std::env::temp_dir().join("ampchain_bench_ir");
    fs::create_dir_all(&ir_dir).unwrap();

    let name = format!("test_ir_{ir_length}_{sample_rate}.wav");
    let ir_path = ir_dir.join(&name);
    if !ir_path.exists() {
        create_synthetic_ir(&ir_path, ir_length, sample_rate);
    }

    let loader = IrLoader::with_directory(&ir_dir, sample_rate).unwrap();
    loader.load_by_name(&name).unwrap()
}

fn create_synthetic_ir(path: &Path, length: usize, sample_rate: u32) {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };

    let mut writer = WavWriter::create(path, spec).unwrap();

    for i in 0..length {
        let t = i as f32 / sample_rate as f32;
        let decay = (-t * 3.0).exp();
        let freq = 440.0 * 2.0 * std::f32::consts::PI;
        let sample = (freq * t).sin() * decay;
        let sample_i16 = (sample * i16::MAX as f32) as i16;
        writer.write_sample(sample_i16).unwrap();
    }

    writer.finalize().unwrap();
}
