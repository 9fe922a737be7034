//! Benchmarks for the state-variable filter at oversampled block size.

use std::hint::black_box;

use criterion::Criterion;
use polyscene::{dsp::filter::SVFilter, BLOCK_SIZE_OS, OVERSAMPLING};

use crate::SAMPLE_RATE;

pub fn bench_filter(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/filter");
    let rate = SAMPLE_RATE * OVERSAMPLING as f32;

    // sawtooth-like ramp
    let input: Vec<f32> = (0..BLOCK_SIZE_OS)
        .map(|i| (i as f32 / BLOCK_SIZE_OS as f32) * 2.0 - 1.0)
        .collect();

    let mut filter = SVFilter::lowpass(1000.0);
    filter.set_resonance(0.5);
    let mut buffer = input.clone();
    group.bench_function("lowpass", |b| {
        b.iter(|| {
            buffer.copy_from_slice(&input);
            filter.render(black_box(&mut buffer), black_box(rate));
        })
    });

    // scene low cut
    let mut filter = SVFilter::highpass(80.0);
    let mut buffer = input.clone();
    group.bench_function("low_cut", |b| {
        b.iter(|| {
            buffer.copy_from_slice(&input);
            filter.render(black_box(&mut buffer), black_box(rate));
        })
    });

    group.finish();
}
