use ampchain::amp::waveshaper::ShaperKind;
use ampchain::audio::buffer::{AudioBlock, ProcessSpec};
use ampchain::audio::engine::{Engine, EngineHandle, EngineMode};
use ampchain::ir::model::ImpulseResponse;
use ampchain::settings::{EngineSettings, ToneStackSettings};
use anyhow::Result;
use hound::{WavSpec, WavWriter};
use std::f32::consts::PI;
use tempfile::TempDir;

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK_SIZE: usize = 480;

/// Flat EQ with the low cut pushed out of the audible band, unity gains.
fn transparent_settings() -> EngineSettings {
    EngineSettings {
        tone_stack: ToneStackSettings {
            low_cut_hz: 1.0,
            ..ToneStackSettings::flat()
        },
        pre_shaper: ShaperKind::SoftClip,
        post_shaper: ShaperKind::SoftClip,
        input_gain: 1.0,
        output_gain: 1.0,
        ..EngineSettings::default()
    }
}

fn build_engine(settings: &EngineSettings) -> (Engine, EngineHandle) {
    Engine::new(ProcessSpec::new(SAMPLE_RATE, BLOCK_SIZE, 2), settings)
}

fn sine_block(freq: f32, amplitude: f32, start: usize) -> AudioBlock {
    let samples: Vec<f32> = (start..start + BLOCK_SIZE)
        .map(|i| amplitude * (2.0 * PI * freq * i as f32 / SAMPLE_RATE).sin())
        .collect();
    AudioBlock::from_channels(vec![samples.clone(), samples])
}

fn impulse_at(index: usize, total: usize) -> Vec<f32> {
    let mut samples = vec![0.0; total];
    samples[index] = 0.5;
    samples
}

/// Runs `input` through the engine block by block and returns channel 0.
fn run_mono(engine: &mut Engine, input: &[f32]) -> Vec<f32> {
    let mut output = Vec::with_capacity(input.len());
    for chunk in input.chunks(BLOCK_SIZE) {
        let mut block = AudioBlock::from_channels(vec![chunk.to_vec(), chunk.to_vec()]);
        engine.process(&mut block);
        output.extend_from_slice(block.channel(0));
    }
    output
}

fn peak_index(samples: &[f32]) -> usize {
    samples
        .iter()
        .enumerate()
        .max_by(|a, b| a.1.abs().total_cmp(&b.1.abs()))
        .map_or(0, |(i, _)| i)
}

/// Long enough to select the partitioned convolver.
fn long_response() -> ImpulseResponse {
    let mut taps = vec![0.0; 2048];
    taps[0] = 1.0;
    taps[1800] = 0.1;
    ImpulseResponse::mono(taps, SAMPLE_RATE as u32).unwrap()
}

fn write_wav_ir(path: &std::path::Path, taps: &[f32]) -> Result<()> {
    let spec = WavSpec {
        channels: 1,
        sample_rate: SAMPLE_RATE as u32,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = WavWriter::create(path, spec)?;
    for &tap in taps {
        writer.write_sample(tap)?;
    }
    writer.finalize()?;
    Ok(())
}

#[test]
fn quiet_block_passes_through_unchanged() {
    const AMPLITUDE: f32 = 1.0e-3;
    let (mut engine, handle) = build_engine(&transparent_settings());

    let input = sine_block(2_000.0, AMPLITUDE, 0);
    let mut block = input.clone();
    engine.process(&mut block);

    assert_eq!(handle.latency(), 0);
    for c in 0..2 {
        for (out, inp) in block.channel(c).iter().zip(input.channel(c)) {
            assert!(out.abs() <= 1.0);
            assert!(
                (out - inp).abs() <= 0.02 * AMPLITUDE,
                "expected {inp}, got {out}"
            );
        }
    }
}

#[test]
fn loud_input_is_clamped_to_unit_range() {
    let settings = EngineSettings {
        input_gain: 50.0,
        output_gain: 50.0,
        ..transparent_settings()
    };
    let (mut engine, _) = build_engine(&settings);

    for b in 0..10 {
        let mut block = sine_block(220.0, 0.8, b * BLOCK_SIZE);
        engine.process(&mut block);
        for c in 0..2 {
            assert!(block.channel(c).iter().all(|s| s.abs() <= 1.0));
        }
        if b > 0 {
            assert!(block.channel(0).iter().any(|s| s.abs() == 1.0));
        }
    }
}

#[test]
fn bypassed_engines_match_an_engine_without_responses() {
    let settings = transparent_settings();
    let (mut plain, _) = build_engine(&settings);
    let (mut bypassed, handle) = build_engine(&settings);

    assert!(handle.load_cabinet(long_response()));
    assert!(handle.load_reverb(long_response()));
    assert!(handle.set_cabinet_bypass(true));
    assert!(handle.set_reverb_bypass(true));

    let input: Vec<f32> = (0..BLOCK_SIZE * 6)
        .map(|i| 0.2 * (2.0 * PI * 330.0 * i as f32 / SAMPLE_RATE).sin())
        .collect();

    assert_eq!(run_mono(&mut bypassed, &input), run_mono(&mut plain, &input));
    assert_eq!(handle.latency(), 0);
}

#[test]
fn enabling_a_cabinet_adds_its_latency_to_the_dry_path() {
    let settings = EngineSettings {
        cabinet_mix: 0.0,
        ..transparent_settings()
    };
    let (mut engine, handle) = build_engine(&settings);

    assert!(handle.load_cabinet(long_response()));
    let output = run_mono(&mut engine, &impulse_at(10, BLOCK_SIZE * 4));

    assert_eq!(handle.latency(), 512);
    assert_eq!(peak_index(&output), 10 + 512);
}

#[test]
fn stacked_engines_report_summed_latency() {
    let settings = EngineSettings {
        cabinet_mix: 0.0,
        reverb_gain_db: -12.0,
        ..transparent_settings()
    };
    let (mut engine, handle) = build_engine(&settings);

    assert!(handle.load_cabinet(long_response()));
    assert!(handle.load_reverb(long_response()));
    let output = run_mono(&mut engine, &impulse_at(10, BLOCK_SIZE * 6));

    assert_eq!(handle.latency(), 1024);
    assert_eq!(peak_index(&output), 10 + 1024);

    assert!(handle.reset_reverb());
    run_mono(&mut engine, &[0.0; BLOCK_SIZE]);
    assert_eq!(handle.latency(), 512);
}

#[test]
fn cabinet_loads_from_wav_file() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let path = temp_dir.path().join("cab.wav");
    let taps: Vec<f32> = (0..600).map(|i| (-(i as f32) / 80.0).exp()).collect();
    write_wav_ir(&path, &taps)?;

    let (mut engine, handle) = build_engine(&transparent_settings());
    assert!(handle.load_cabinet_file(&path));
    assert!(!handle.load_reverb_file(&temp_dir.path().join("missing.wav")));

    run_mono(&mut engine, &[0.0; BLOCK_SIZE]);
    assert_eq!(handle.latency(), 512);
    Ok(())
}

#[test]
fn tuner_converges_on_sines_and_decays_on_silence() {
    let (mut engine, handle) = build_engine(&EngineSettings::default());
    assert!(handle.set_mode(EngineMode::Tuner));

    for freq in [110.0, 196.0, 440.0] {
        for b in 0..60 {
            let mut block = sine_block(freq, 0.5, b * BLOCK_SIZE);
            engine.process(&mut block);
            assert!(block.channel(0).iter().all(|&s| s == 0.0));
        }

        let locked = handle.tuner().locked_frequency();
        assert!(
            (locked - freq).abs() / freq < 0.01,
            "{freq} Hz locked at {locked}"
        );
        assert!((handle.tuner().frequency() - freq).abs() / freq < 0.01);
        let info = handle.tuner_info();
        assert!(info.note.is_some());
    }

    for _ in 0..40 {
        let mut block = AudioBlock::new(2, BLOCK_SIZE);
        engine.process(&mut block);
    }
    assert_eq!(handle.tuner().frequency(), 0.0);
    assert_eq!(handle.tuner_info().note, None);
}

#[test]
fn leaving_tuner_mode_restores_the_amp() {
    let (mut engine, handle) = build_engine(&transparent_settings());

    handle.set_tuner_enabled(true);
    let mut block = sine_block(440.0, 0.1, 0);
    engine.process(&mut block);
    assert_eq!(engine.mode(), EngineMode::Tuner);
    assert_eq!(handle.output_level().rms, 0.0);

    handle.set_tuner_enabled(false);
    let mut block = sine_block(440.0, 0.1, BLOCK_SIZE);
    engine.process(&mut block);
    assert_eq!(engine.mode(), EngineMode::Amp);
    assert!(handle.output_level().rms > 0.03);
}
