#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

pub use crate::dsp::clip::HardclipMode;
use crate::{modulation::controller::SmoothingMode, DEFAULT_POLYLIMIT, N_SCENES};

/// Engine-wide settings that are not part of a patch.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub sample_rate: f32,
    /// Polyphony limit written into the init patch. Loaded patches carry
    /// their own.
    pub poly_limit: usize,
    pub master_hardclip: HardclipMode,
    pub scene_hardclip: [HardclipMode; N_SCENES],
    /// Smoothing applied to the MIDI controller sources.
    pub smoothing: SmoothingMode,
    /// Bound CCs wait until they cross the parameter's current value.
    pub soft_takeover: bool,
    /// MPE timbre (CC74) maps to 0..1 instead of -1..1.
    pub mpe_timbre_unipolar: bool,
    /// MIDI channels 2 and 3 play scene A and scene B directly.
    pub use_ch23: bool,
    /// Per-note bend range set when MPE is switched on, in semitones.
    pub mpe_pitch_bend_range: f32,
    /// Bend range of the shared pitch-bend source, in semitones.
    pub pitch_bend_range: f32,
    pub message_capacity: usize,
    pub param_capacity: usize,
    pub refresh_capacity: usize,
    pub fx_queue_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            sample_rate: 48_000.0,
            poly_limit: DEFAULT_POLYLIMIT,
            master_hardclip: HardclipMode::Clip18,
            scene_hardclip: [HardclipMode::Clip18; N_SCENES],
            smoothing: SmoothingMode::FastExp,
            soft_takeover: false,
            mpe_timbre_unipolar: false,
            use_ch23: true,
            mpe_pitch_bend_range: 48.0,
            pitch_bend_range: 2.0,
            message_capacity: 1024,
            param_capacity: 8,
            refresh_capacity: 8,
            fx_queue_capacity: 8,
        }
    }
}

impl EngineConfig {
    pub fn with_sample_rate(sample_rate: f32) -> Self {
        Self {
            sample_rate,
            ..Self::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_documented_values() {
        let config = EngineConfig::default();
        assert_eq!(config.poly_limit, 16);
        assert_eq!(config.param_capacity, 8);
        assert_eq!(config.refresh_capacity, 8);
        assert_eq!(config.mpe_pitch_bend_range, 48.0);
        assert!(config.use_ch23);
        assert_eq!(EngineConfig::with_sample_rate(44_100.0).sample_rate, 44_100.0);
    }
}
