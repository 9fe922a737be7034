#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Modulation Sources
==================

A source lives at one of two rates:

  voice-rate    One value per voice. Velocity, keytrack, the two voice
                envelopes, the six voice LFOs, timbre, release velocity and
                the per-note random/alternate draws.

  scene-rate    One value per scene, shared by every voice in it. MIDI
                controllers, the eight macros, the six scene LFOs and the
                lowest/highest/latest key trackers.

The rate decides which routing list a connection lands in, and which
destinations it may reach: a monophonic destination (evaluated once per
scene, like a send level) can only follow a scene-rate source, since there
is no single voice to read a voice-rate value from.
*/

pub const N_MACROS: usize = 8;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ModulatorId {
    None,
    Velocity,
    Keytrack,
    PolyAftertouch,
    Aftertouch,
    PitchBend,
    ModWheel,
    Ctrl1,
    Ctrl2,
    Ctrl3,
    Ctrl4,
    Ctrl5,
    Ctrl6,
    Ctrl7,
    Ctrl8,
    AmpEg,
    FilterEg,
    Lfo1,
    Lfo2,
    Lfo3,
    Lfo4,
    Lfo5,
    Lfo6,
    SLfo1,
    SLfo2,
    SLfo3,
    SLfo4,
    SLfo5,
    SLfo6,
    Timbre,
    ReleaseVelocity,
    RandomBipolar,
    RandomUnipolar,
    AlternateBipolar,
    AlternateUnipolar,
    Breath,
    Expression,
    Sustain,
    LowestKey,
    HighestKey,
    LatestKey,
}

pub const N_MODULATORS: usize = 41;

impl ModulatorId {
    pub const ALL: [ModulatorId; N_MODULATORS] = [
        ModulatorId::None,
        ModulatorId::Velocity,
        ModulatorId::Keytrack,
        ModulatorId::PolyAftertouch,
        ModulatorId::Aftertouch,
        ModulatorId::PitchBend,
        ModulatorId::ModWheel,
        ModulatorId::Ctrl1,
        ModulatorId::Ctrl2,
        ModulatorId::Ctrl3,
        ModulatorId::Ctrl4,
        ModulatorId::Ctrl5,
        ModulatorId::Ctrl6,
        ModulatorId::Ctrl7,
        ModulatorId::Ctrl8,
        ModulatorId::AmpEg,
        ModulatorId::FilterEg,
        ModulatorId::Lfo1,
        ModulatorId::Lfo2,
        ModulatorId::Lfo3,
        ModulatorId::Lfo4,
        ModulatorId::Lfo5,
        ModulatorId::Lfo6,
        ModulatorId::SLfo1,
        ModulatorId::SLfo2,
        ModulatorId::SLfo3,
        ModulatorId::SLfo4,
        ModulatorId::SLfo5,
        ModulatorId::SLfo6,
        ModulatorId::Timbre,
        ModulatorId::ReleaseVelocity,
        ModulatorId::RandomBipolar,
        ModulatorId::RandomUnipolar,
        ModulatorId::AlternateBipolar,
        ModulatorId::AlternateUnipolar,
        ModulatorId::Breath,
        ModulatorId::Expression,
        ModulatorId::Sustain,
        ModulatorId::LowestKey,
        ModulatorId::HighestKey,
        ModulatorId::LatestKey,
    ];

    pub const fn index(self) -> usize {
        self as usize
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Self::ALL.get(index).copied()
    }

    /// Macro slot `i` (0..8).
    pub fn macro_slot(i: usize) -> Option<Self> {
        (i < N_MACROS).then(|| Self::ALL[ModulatorId::Ctrl1.index() + i])
    }

    pub fn as_macro(self) -> Option<usize> {
        let i = self.index();
        (ModulatorId::Ctrl1.index()..=ModulatorId::Ctrl8.index())
            .contains(&i)
            .then(|| i - ModulatorId::Ctrl1.index())
    }

    /// LFO `i` in parameter order: 0..6 voice LFOs, 6..12 scene LFOs.
    pub fn lfo(i: usize) -> Option<Self> {
        (i < 12).then(|| Self::ALL[ModulatorId::Lfo1.index() + i])
    }

    pub fn as_scene_lfo(self) -> Option<usize> {
        let i = self.index();
        (ModulatorId::SLfo1.index()..=ModulatorId::SLfo6.index())
            .contains(&i)
            .then(|| i - ModulatorId::SLfo1.index())
    }

    pub fn as_voice_lfo(self) -> Option<usize> {
        let i = self.index();
        (ModulatorId::Lfo1.index()..=ModulatorId::Lfo6.index())
            .contains(&i)
            .then(|| i - ModulatorId::Lfo1.index())
    }

    /// Evaluated once per scene rather than once per voice.
    pub fn is_scene_level(self) -> bool {
        use ModulatorId::*;
        let i = self.index();
        let controllers = i <= Ctrl8.index() || (SLfo1.index()..=SLfo6.index()).contains(&i);
        let per_note = matches!(self, Velocity | Keytrack | PolyAftertouch | ReleaseVelocity);
        (controllers && !per_note) || (Breath.index()..=LatestKey.index()).contains(&i)
    }

    pub fn can_modulate_monophonic(self) -> bool {
        self.is_scene_level() || self == ModulatorId::Aftertouch
    }

    pub fn is_envelope(self) -> bool {
        matches!(self, ModulatorId::AmpEg | ModulatorId::FilterEg)
    }

    pub fn is_bipolar(self) -> bool {
        use ModulatorId::*;
        matches!(
            self,
            Keytrack
                | PitchBend
                | Timbre
                | RandomBipolar
                | AlternateBipolar
                | LowestKey
                | HighestKey
                | LatestKey
        ) || self.as_voice_lfo().is_some()
            || self.as_scene_lfo().is_some()
    }
}
