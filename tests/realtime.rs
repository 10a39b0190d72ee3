use ampchain::amp::tonestack::Band;
use ampchain::amp::waveshaper::ShaperKind;
use ampchain::audio::buffer::{AudioBlock, ProcessSpec};
use ampchain::audio::engine::{Engine, EngineMode};
use ampchain::ir::model::ImpulseResponse;
use ampchain::settings::EngineSettings;
use assert_no_alloc::{AllocDisabler, assert_no_alloc};
use std::f32::consts::PI;

#[global_allocator]
static A: AllocDisabler = AllocDisabler;

const SAMPLE_RATE: f32 = 48_000.0;
const BLOCK_SIZE: usize = 256;

fn response(len: usize) -> ImpulseResponse {
    let taps = (0..len).map(|i| (-(i as f32) / 200.0).exp()).collect();
    ImpulseResponse::mono(taps, SAMPLE_RATE as u32).unwrap()
}

fn fill_sine(block: &mut AudioBlock, start: usize) {
    for channel in block.channels_mut() {
        for (i, s) in channel.iter_mut().enumerate() {
            *s = 0.4 * (2.0 * PI * 220.0 * (start + i) as f32 / SAMPLE_RATE).sin();
        }
    }
}

#[test]
fn processing_never_allocates() {
    let spec = ProcessSpec::new(SAMPLE_RATE, BLOCK_SIZE, 2);
    let (mut engine, handle) = Engine::new(spec, &EngineSettings::default());
    let mut block = AudioBlock::for_spec(&spec);

    // Engines are built here, then swapped in and retired on the audio side
    assert!(handle.load_cabinet(response(1500)));
    assert!(handle.load_reverb(response(3000)));
    assert!(handle.load_cabinet(response(200)));

    for b in 0..40 {
        match b {
            10 => {
                handle.set_band_gain_db(Band::Mid, 6.0);
                handle.set_band_frequency(Band::Treble, 2_500.0);
                handle.set_output_gain(2.0);
                handle.set_reverb_gain_db(-6.0);
                handle.set_cabinet_mix(0.5);
                handle.set_pre_shaper(ShaperKind::TanhClip);
                handle.set_post_shaper(ShaperKind::HardClip);
                handle.set_use_mix(false);
            }
            20 => {
                handle.set_mode(EngineMode::Tuner);
            }
            30 => {
                handle.set_mode(EngineMode::Amp);
                handle.set_cabinet_bypass(true);
                handle.reset_reverb();
            }
            _ => {}
        }

        fill_sine(&mut block, b * BLOCK_SIZE);
        assert_no_alloc(|| engine.process(&mut block));
    }

    assert_eq!(handle.latency(), 0);
}
