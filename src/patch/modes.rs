#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// How incoming notes are distributed over the two scenes.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SceneMode {
    /// Only the active scene plays.
    #[default]
    Single,
    /// Keys below the split point play scene A, the rest scene B.
    KeySplit,
    /// Both scenes play every note.
    Dual,
    /// Channels below the split channel play scene A, the rest scene B.
    ChannelSplit,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PolyMode {
    #[default]
    Poly,
    Mono,
    /// Mono, single trigger: legato notes re-pitch the sounding voice.
    MonoSt,
    /// Mono with fingered portamento.
    MonoFp,
    MonoStFp,
    /// Mono, but note-off never releases the last voice.
    Latch,
}

impl PolyMode {
    pub fn is_mono(self) -> bool {
        self != PolyMode::Poly
    }

    /// Modes that retrigger a fresh voice on every note.
    pub fn is_retriggering_mono(self) -> bool {
        matches!(self, PolyMode::Mono | PolyMode::MonoFp | PolyMode::Latch)
    }

    /// Modes that re-pitch the gated voice in place.
    pub fn is_legato_mono(self) -> bool {
        matches!(self, PolyMode::MonoSt | PolyMode::MonoStFp)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonoPriority {
    #[default]
    Latest,
    Highest,
    Lowest,
    /// Latest on note-on, highest held key on note-off.
    LatestRetriggerHighest,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MonoPedalMode {
    #[default]
    HoldAll,
    ReleaseIfOthersHeld,
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FxBypass {
    #[default]
    AllFx,
    NoSends,
    SceneFxOnly,
    NoFx,
}

impl FxBypass {
    pub fn sends(self) -> bool {
        self == FxBypass::AllFx
    }

    pub fn inserts(self) -> bool {
        self != FxBypass::NoFx
    }

    pub fn globals(self) -> bool {
        matches!(self, FxBypass::AllFx | FxBypass::NoSends)
    }
}

macro_rules! from_value {
    ($ty:ident { $($variant:ident),+ $(,)? }) => {
        impl $ty {
            const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Map a stored parameter value onto the mode, clamping out of
            /// range values to the nearest end.
            pub fn from_value(value: f32) -> Self {
                let last = Self::ALL.len() - 1;
                let index = if value.is_finite() {
                    (value.round().max(0.0) as usize).min(last)
                } else {
                    0
                };
                Self::ALL[index]
            }

            pub fn as_value(self) -> f32 {
                Self::ALL.iter().position(|m| *m == self).unwrap_or(0) as f32
            }
        }
    };
}

from_value!(SceneMode { Single, KeySplit, Dual, ChannelSplit });
from_value!(PolyMode { Poly, Mono, MonoSt, MonoFp, MonoStFp, Latch });
from_value!(MonoPriority { Latest, Highest, Lowest, LatestRetriggerHighest });
from_value!(MonoPedalMode { HoldAll, ReleaseIfOthersHeld });
from_value!(FxBypass { AllFx, NoSends, SceneFxOnly, NoFx });

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn values_map_onto_modes() {
        assert_eq!(PolyMode::from_value(3.0), PolyMode::MonoFp);
        assert_eq!(PolyMode::from_value(99.0), PolyMode::Latch);
        assert_eq!(PolyMode::from_value(-2.0), PolyMode::Poly);
        assert_eq!(SceneMode::from_value(f32::NAN), SceneMode::Single);
        assert_eq!(MonoPriority::LatestRetriggerHighest.as_value(), 3.0);
    }

    #[test]
    fn bypass_levels() {
        assert!(FxBypass::AllFx.sends());
        assert!(!FxBypass::NoSends.sends() && FxBypass::NoSends.globals());
        assert!(FxBypass::SceneFxOnly.inserts() && !FxBypass::SceneFxOnly.globals());
        assert!(!FxBypass::NoFx.inserts());
    }
}
