//! Benchmarks for the block-rate DSP helpers and whole engine blocks.
//!
//! Run with: cargo bench
//!
//! The engine renders fixed 32-sample blocks, so every measurement here is
//! per block. At 48kHz one block leaves a 0.67ms deadline; a full engine
//! block with the voice budget in use must come in well under that.
//!
//! Benchmark groups:
//!   - dsp/*        Filters, decimation and the reference delay
//!   - scenarios/*  Engine blocks at increasing polyphony and modulation load

use criterion::{criterion_group, criterion_main};

mod dsp;
mod scenarios;

pub const SAMPLE_RATE: f32 = 48_000.0;

/// Voice counts to render in the polyphony scenarios.
pub const VOICE_COUNTS: &[usize] = &[1, 8, 16, 32];

criterion_group!(
    benches,
    dsp::bench_filter,
    dsp::bench_halfband,
    dsp::bench_delay,
    scenarios::bench_poly,
    scenarios::bench_modulated,
    scenarios::bench_scene_modes,
);
criterion_main!(benches);
