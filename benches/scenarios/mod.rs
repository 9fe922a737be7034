//! Whole-engine benchmarks: note handling, voice rendering and the mix bus
//! together, one block per iteration.

mod engine;

pub use engine::{bench_modulated, bench_poly, bench_scene_modes};
