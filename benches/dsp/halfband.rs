//! Benchmarks for the 2x decimator that ends every scene.

use std::hint::black_box;

use criterion::Criterion;
use polyscene::{dsp::halfband::HalfbandDecimator, BLOCK_SIZE, BLOCK_SIZE_OS};

pub fn bench_halfband(c: &mut Criterion) {
    let mut group = c.benchmark_group("dsp/halfband");

    let mut left = [0.0f32; BLOCK_SIZE_OS];
    let mut right = [0.0f32; BLOCK_SIZE_OS];
    for i in 0..BLOCK_SIZE_OS {
        left[i] = (i as f32 * 0.1).sin();
        right[i] = (i as f32 * 0.13).cos();
    }
    let mut out_left = [0.0f32; BLOCK_SIZE];
    let mut out_right = [0.0f32; BLOCK_SIZE];
    let mut decimator = HalfbandDecimator::new();

    group.bench_function("stereo_block", |b| {
        b.iter(|| {
            decimator.process_block(
                black_box(&left),
                black_box(&right),
                &mut out_left,
                &mut out_right,
            );
        })
    });

    group.finish();
}
