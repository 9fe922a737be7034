//! Block-level DSP used by the render pipeline and the reference units.
//!
//! Everything here is allocation-free once constructed, so it can live
//! inside voice slots and effect racks that the audio thread owns.

pub mod clip;
/// Delay line and the reference stereo delay effect.
pub mod delay;
/// Attack/decay/sustain/release envelope with the forced "uber" release.
pub mod envelope;
/// State-variable filter, used for the voice low-pass and scene low cut.
pub mod filter;
/// 2x decimator from the oversampled voice rate to the output rate.
pub mod halfband;
pub mod lfo;
pub mod meter;
pub mod oscillator;
pub mod ramp;
/// Reference voice unit.
pub mod voice;

pub use clip::HardclipMode;
pub use delay::StereoDelay;
pub use envelope::EnvelopeState;
pub use voice::BasicVoice;
