use crate::patch::params::ParamId;

/// Control-context request drained by the audio thread at block start.
#[derive(Debug, Copy, Clone, PartialEq)]
pub enum EngineMessage {
    NoteOn {
        channel: u8,
        key: u8,
        velocity: u8,
        /// Per-note detune in semitones.
        detune: f32,
    },
    NoteOff {
        channel: u8,
        key: u8,
        velocity: u8,
    },
    /// Raw 14-bit bend centred on zero, -8192 ..= 8191.
    PitchBend {
        channel: u8,
        value: i16,
    },
    ControlChange {
        channel: u8,
        controller: u8,
        value: u8,
    },
    ChannelAftertouch {
        channel: u8,
        value: u8,
    },
    PolyAftertouch {
        channel: u8,
        key: u8,
        value: u8,
    },
    ProgramChange {
        channel: u8,
        program: u8,
    },
    AllNotesOff,
    AllSoundOff,
    /// Learn the next eligible CC (or note, for the split point) into this
    /// parameter.
    LearnParameter(ParamId),
    /// Learn the next eligible CC into macro slot `n`.
    LearnMacro(usize),
    CancelLearn,
    ClearParameterBinding(ParamId),
    ClearMacroBinding(usize),
    /// One-shot: suspend the effect slots whose bit is set.
    SuspendEffects(u8),
}

/// A parameter write coming from outside the audio thread.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct ParamChange {
    pub param: ParamId,
    /// Plain value, clamped on arrival.
    pub value: f32,
    /// Glide through an interpolator instead of jumping.
    pub smoothed: bool,
}
