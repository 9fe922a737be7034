//! Engine blocks with realistic voice loads.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use polyscene::{
    dsp::BasicVoice,
    modulation::ModulatorId,
    patch::{
        modes::SceneMode,
        params::{GlobalParam, ParamId, SceneParam},
    },
    EngineConfig, EngineHandle, SynthEngine, BLOCK_SIZE, MAX_VOICES,
};

use crate::{SAMPLE_RATE, VOICE_COUNTS};

type Engine = SynthEngine<BasicVoice>;

fn engine() -> (Engine, EngineHandle) {
    let mut config = EngineConfig::with_sample_rate(SAMPLE_RATE);
    config.poly_limit = MAX_VOICES;
    match SynthEngine::new(config, || BasicVoice::new(SAMPLE_RATE)) {
        Ok(pair) => pair,
        Err(err) => panic!("engine setup failed: {err}"),
    }
}

fn chord(engine: &mut Engine, voices: usize) {
    for i in 0..voices {
        engine.note_on(0, 36 + i as u8, 100, 0.0);
    }
}

pub fn bench_poly(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/poly");
    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];

    for &voices in VOICE_COUNTS {
        let (mut engine, _handle) = engine();
        chord(&mut engine, voices);

        group.bench_with_input(BenchmarkId::new("held", voices), &voices, |b, _| {
            b.iter(|| {
                engine.render_block(black_box(&mut left), black_box(&mut right));
            })
        });
    }

    // Notes arriving every block: voice start, soft-kill and free paths
    let (mut engine, mut handle) = engine();
    let mut key = 36u8;
    group.bench_function("note_churn", |b| {
        b.iter(|| {
            let _ = handle.note_on(0, key, 100);
            let _ = handle.note_off(0, key.wrapping_sub(4).max(36), 0);
            key = if key >= 96 { 36 } else { key + 1 };
            engine.render_block(black_box(&mut left), black_box(&mut right));
        })
    });

    group.finish();
}

pub fn bench_modulated(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/modulated");
    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];

    let cutoff = ParamId::scene(0, SceneParam::FilterCutoff);
    let pan = ParamId::scene(0, SceneParam::Pan);
    let volume = ParamId::scene(0, SceneParam::Volume);

    for &voices in VOICE_COUNTS {
        let (mut engine, _handle) = engine();
        let routes = [
            (cutoff, ModulatorId::Lfo1, 0.4),
            (cutoff, ModulatorId::Velocity, 0.2),
            (cutoff, ModulatorId::ModWheel, 0.3),
            (pan, ModulatorId::Lfo2, 0.5),
            (volume, ModulatorId::SLfo1, -0.1),
        ];
        for (param, modulator, depth) in routes {
            if let Err(err) = engine.set_modulation(param, modulator, 0, depth) {
                panic!("routing rejected: {err}");
            }
        }
        chord(&mut engine, voices);

        group.bench_with_input(BenchmarkId::new("five_routes", voices), &voices, |b, _| {
            b.iter(|| {
                engine.render_block(black_box(&mut left), black_box(&mut right));
            })
        });
    }

    group.finish();
}

pub fn bench_scene_modes(c: &mut Criterion) {
    let mut group = c.benchmark_group("scenarios/scene_modes");
    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];

    for mode in [SceneMode::Single, SceneMode::KeySplit, SceneMode::Dual] {
        let (mut engine, _handle) = engine();
        let _ = engine.set_parameter(ParamId::global(GlobalParam::SceneMode), mode.as_value());
        let _ = engine.set_parameter(ParamId::global(GlobalParam::SplitPoint), 48.0);
        chord(&mut engine, 16);

        group.bench_function(format!("{mode:?}").to_lowercase(), |b| {
            b.iter(|| {
                engine.render_block(black_box(&mut left), black_box(&mut right));
            })
        });
    }

    group.finish();
}
