pub mod dsp; // Block-level helpers and the reference voice/effect units
pub mod engine; // Render pipeline, MIDI interpretation, cross-thread deferral
pub mod error;
pub mod io;
pub mod modulation; // Sources, smoothing and the routing matrix
pub mod patch;
pub mod synth; // Voice arena and polyphony management

pub use engine::{config::EngineConfig, handle::EngineHandle, SynthEngine};
pub use error::{DspError, EngineError, ModulationError, PatchError};

/// Samples per channel produced by one call to `SynthEngine::render_block`.
pub const BLOCK_SIZE: usize = 32;
pub const OVERSAMPLING: usize = 2;
/// Samples per channel rendered by voice units before decimation.
pub const BLOCK_SIZE_OS: usize = BLOCK_SIZE * OVERSAMPLING;

pub const N_SCENES: usize = 2;
pub const MAX_VOICES: usize = 64;
pub const DEFAULT_POLYLIMIT: usize = 16;
/// Voices rendered together as one batch.
pub const BATCH_WIDTH: usize = 4;

pub const N_CHANNELS: usize = 16;
pub const N_KEYS: usize = 128;

pub(crate) const MIN_TIME: f32 = 1.0 / 48_000.0;
