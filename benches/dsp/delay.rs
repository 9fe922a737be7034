//! Benchmarks for the delay line and the stereo delay effect.

use std::hint::black_box;

use criterion::{BenchmarkId, Criterion};
use polyscene::{
    dsp::{delay::DelayLine, StereoDelay},
    engine::fx::Effect,
    BLOCK_SIZE,
};

use crate::SAMPLE_RATE;

pub fn bench_delay(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/delay");

    let input: Vec<f32> = (0..BLOCK_SIZE).map(|i| (i as f32 * 0.1).sin()).collect();

    let delay_times: &[usize] = &[
        480,   // 10ms at 48kHz
        48000, // 1 second at 48kHz
    ];
    for &delay_samples in delay_times {
        let mut delay = DelayLine::with_capacity(48_001);
        let mut buffer = input.clone();
        group.bench_with_input(
            BenchmarkId::new("line", delay_samples),
            &delay_samples,
            |b, &samples| {
                b.iter(|| {
                    buffer.copy_from_slice(&input);
                    delay.render(black_box(&mut buffer), black_box(samples));
                })
            },
        );
    }

    let mut effect = StereoDelay::new(0.25, 0.4, 0.3);
    effect.init(SAMPLE_RATE);
    let mut left = [0.0f32; BLOCK_SIZE];
    let mut right = [0.0f32; BLOCK_SIZE];
    group.bench_function("stereo_effect", |b| {
        b.iter(|| {
            left.copy_from_slice(&input);
            right.copy_from_slice(&input);
            effect.process(black_box(&mut left), black_box(&mut right));
        })
    });

    group.finish();
}
