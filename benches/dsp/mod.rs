//! Benchmarks for low-level DSP pieces of the render path.

mod delay;
mod filter;
mod halfband;

pub use delay::bench_delay;
pub use filter::bench_filter;
pub use halfband::bench_halfband;
