use crate::{
    error::DspError,
    modulation::{bank::NoteDraw, source::ModulatorId},
    patch::params::N_SCENE_PARAMS,
    BLOCK_SIZE_OS,
};

/// Where a voice is in its life. Mirrors the gate/uber-release flag pair:
/// `Releasing` is a normal note-off, `Killed` the forced fast fade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VoiceState {
    Gated,
    Releasing,
    Killed,
}

/// Bookkeeping for one sounding note. The DSP state lives next to it in the
/// arena; this part is what the polyphony manager reasons about.
#[derive(Debug, Clone, PartialEq)]
pub struct Voice {
    pub scene: usize,
    pub channel: u8,
    /// Channel whose bend/pressure is shared with this voice: channel 0
    /// under MPE, the voice's own channel otherwise.
    pub main_channel: u8,
    pub key: u8,
    pub velocity: u8,
    pub release_velocity: u8,
    pub detune: f32,
    /// Blocks rendered since the voice started.
    pub age: u64,
    /// Blocks rendered since the voice left the gated state.
    pub age_release: u64,
    /// Creation order across the whole engine.
    pub order: u64,
    pub gate: bool,
    pub uber_release: bool,
    /// Pitch (semitones) the voice glides from.
    pub porta_from: f32,
    pub draw: NoteDraw,
}

impl Voice {
    pub fn state(&self) -> VoiceState {
        match (self.gate, self.uber_release) {
            (_, true) => VoiceState::Killed,
            (true, false) => VoiceState::Gated,
            (false, false) => VoiceState::Releasing,
        }
    }

    pub fn matches(&self, channel: u8, key: u8) -> bool {
        self.channel == channel && self.key == key
    }

    pub(crate) fn release(&mut self) {
        self.gate = false;
    }

    pub(crate) fn kill(&mut self) {
        self.gate = false;
        self.uber_release = true;
    }

    pub(crate) fn advance_age(&mut self) {
        self.age += 1;
        if !self.gate {
            self.age_release += 1;
        }
    }
}

/// Everything a voice unit needs to start or re-pitch a note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteContext {
    pub sample_rate: f32,
    pub scene: usize,
    pub channel: u8,
    pub key: u8,
    /// Tuned pitch of the key in semitones.
    pub pitch: f32,
    pub velocity: u8,
    pub detune: f32,
    pub porta_from: f32,
    /// Glide time in seconds; 0 disables portamento.
    pub portamento: f32,
    pub draw: NoteDraw,
}

/// Parameter snapshot for one lane of a batch. Inactive lanes keep a
/// neutral snapshot and are never handed to a voice unit.
#[derive(Debug, Clone)]
pub struct VoiceParams {
    pub active: bool,
    /// Scene values with this voice's modulation applied, indexed by
    /// `SceneParam::index`.
    pub values: [f32; N_SCENE_PARAMS],
    /// Bend in semitones from the shared and per-note channels.
    pub pitch_bend: f32,
    pub pressure: f32,
    pub poly_aftertouch: f32,
    pub timbre: f32,
}

impl Default for VoiceParams {
    fn default() -> Self {
        Self {
            active: false,
            values: [0.0; N_SCENE_PARAMS],
            pitch_bend: 0.0,
            pressure: 0.0,
            poly_aftertouch: 0.0,
            timbre: 0.0,
        }
    }
}

impl VoiceParams {
    pub fn neutral(&mut self) {
        self.active = false;
        self.values.fill(0.0);
        self.pitch_bend = 0.0;
        self.pressure = 0.0;
        self.poly_aftertouch = 0.0;
        self.timbre = 0.0;
    }
}

/// One oversampled stereo block.
#[derive(Debug, Clone)]
pub struct StereoBlock {
    pub left: [f32; BLOCK_SIZE_OS],
    pub right: [f32; BLOCK_SIZE_OS],
}

impl Default for StereoBlock {
    fn default() -> Self {
        Self {
            left: [0.0; BLOCK_SIZE_OS],
            right: [0.0; BLOCK_SIZE_OS],
        }
    }
}

impl StereoBlock {
    pub fn clear(&mut self) {
        self.left.fill(0.0);
        self.right.fill(0.0);
    }

    pub fn is_finite(&self) -> bool {
        self.left.iter().chain(self.right.iter()).all(|s| s.is_finite())
    }
}

/// Render contract for the per-voice DSP. Units are created once per arena
/// slot and reused for every note that lands in the slot.
pub trait VoiceDsp: Send {
    fn note_on(&mut self, note: &NoteContext);

    /// Re-pitch the sounding note without retriggering envelopes.
    fn legato(&mut self, note: &NoteContext);

    /// Normal note-off.
    fn release(&mut self);

    /// Fast forced fade used when the voice is stolen.
    fn uber_release(&mut self);

    /// Current value of a voice-rate modulation source (envelopes, voice
    /// LFOs). Sources the unit does not own read 0.
    fn source_output(&self, id: ModulatorId) -> f32;

    /// Render one oversampled block. Returns whether the voice should be
    /// kept alive for the next block.
    fn process_block(
        &mut self,
        params: &VoiceParams,
        out: &mut StereoBlock,
    ) -> Result<bool, DspError>;

    /// Render a batch. Lanes with `None` are inactive and left silent. Units
    /// that can share work across lanes override this; the default renders
    /// lane by lane.
    fn process_batch(
        lanes: &mut [Option<&mut Self>],
        params: &[VoiceParams],
        outs: &mut [StereoBlock],
        results: &mut [Result<bool, DspError>],
    ) where
        Self: Sized,
    {
        for (((lane, params), out), result) in lanes
            .iter_mut()
            .zip(params)
            .zip(outs.iter_mut())
            .zip(results.iter_mut())
        {
            out.clear();
            *result = match lane {
                Some(unit) if params.active => unit.process_block(params, out),
                _ => Ok(false),
            };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn voice() -> Voice {
        Voice {
            scene: 0,
            channel: 0,
            main_channel: 0,
            key: 60,
            velocity: 100,
            release_velocity: 0,
            detune: 0.0,
            age: 0,
            age_release: 0,
            order: 0,
            gate: true,
            uber_release: false,
            porta_from: 60.0,
            draw: NoteDraw::default(),
        }
    }

    #[test]
    fn state_follows_flags() {
        let mut v = voice();
        assert_eq!(v.state(), VoiceState::Gated);
        v.release();
        assert_eq!(v.state(), VoiceState::Releasing);
        v.kill();
        assert_eq!(v.state(), VoiceState::Killed);
    }

    #[test]
    fn release_age_only_counts_after_gate() {
        let mut v = voice();
        v.advance_age();
        v.release();
        v.advance_age();
        v.advance_age();
        assert_eq!(v.age, 3);
        assert_eq!(v.age_release, 2);
    }
}
