//! Interpretation of channel messages: notes, controllers, RPN/NRPN, MPE and
//! MIDI learn.
//!
//! ```text
//!   CC ──► structural? (bank, data entry, sustain, RPN/NRPN select, 120/123)
//!            │ yes: update channel state, done
//!            │ no
//!            ▼
//!          learn pending? ──► bind (controller, channel)
//!            ▼
//!          macros bound to it ──► set target
//!            ▼
//!          parameters bound to it ──► soft takeover ──► smoothed write
//!                                                        └─► refresh queue
//! ```
//!
//! Data entry LSB (CC38) is forwarded as a 14-bit controller: its id is the
//! parameter number with bit 16 set for NRPN or bit 17 for RPN, so the two
//! spaces never collide with plain CC numbers.

use log::debug;

use crate::{
    engine::SynthEngine,
    io::converter::{int7_to_bipolar, join14},
    modulation::source::{ModulatorId, N_MACROS},
    patch::params::{GlobalParam, ParamId, ValueKind, N_PARAMS},
    patch::modes::SceneMode,
    synth::{message::EngineMessage, voice::VoiceDsp},
    N_SCENES,
};

/// Controllers handled by the engine itself; learning skips them.
const STRUCTURAL_CCS: [u8; 12] = [0, 6, 32, 38, 64, 74, 98, 99, 100, 101, 120, 123];
/// Soft takeover dead zone, 1.5 CC steps.
const TAKEOVER_BUFFER: f32 = 1.5 / 127.0;
const NRPN_FLAG: u32 = 1 << 16;
const RPN_FLAG: u32 = 2 << 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LearnTarget {
    Parameter(ParamId),
    Macro(usize),
}

/// A controller id (plain CC number, or a flagged 14-bit RPN/NRPN number)
/// on one channel or on any channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CcBinding {
    pub controller: u32,
    pub channel: Option<u8>,
}

impl CcBinding {
    pub fn matches(&self, controller: u32, channel: u8) -> bool {
        self.controller == controller && self.channel.map_or(true, |c| c == channel)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Takeover {
    #[default]
    WaitingFirstLook,
    WaitingBelow,
    WaitingAbove,
    Locked,
}

impl Takeover {
    /// Advance the takeover state for an incoming value against the
    /// parameter's current value, both normalized.
    pub fn update(self, incoming: f32, current: f32) -> Self {
        match self {
            Takeover::WaitingFirstLook if incoming < current - TAKEOVER_BUFFER => {
                Takeover::WaitingBelow
            }
            Takeover::WaitingFirstLook if incoming > current + TAKEOVER_BUFFER => {
                Takeover::WaitingAbove
            }
            Takeover::WaitingFirstLook => Takeover::Locked,
            Takeover::WaitingBelow if incoming > current - TAKEOVER_BUFFER => Takeover::Locked,
            Takeover::WaitingAbove if incoming < current + TAKEOVER_BUFFER => Takeover::Locked,
            other => other,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParamBinding {
    pub binding: CcBinding,
    pub takeover: Takeover,
}

/// MIDI-side state that lives outside the channel table.
#[derive(Debug, Clone)]
pub struct MidiState {
    learn: Option<LearnTarget>,
    params: [Option<ParamBinding>; N_PARAMS],
    macros: [Option<CcBinding>; N_MACROS],
    bank_msb: u8,
    bank_lsb: u8,
    pub(crate) mpe_enabled: bool,
    mpe_voices: u8,
    /// Default per-note bend range applied when MPE switches on.
    mpe_bend_range: f32,
    /// Range of the shared pitch-bend source in semitones.
    pub(crate) global_bend_range: f32,
    soft_takeover: bool,
    timbre_unipolar: bool,
}

impl MidiState {
    pub fn new(mpe_bend_range: f32, global_bend_range: f32, soft_takeover: bool, timbre_unipolar: bool) -> Self {
        Self {
            learn: None,
            params: [None; N_PARAMS],
            macros: [None; N_MACROS],
            bank_msb: 0,
            bank_lsb: 0,
            mpe_enabled: false,
            mpe_voices: 0,
            mpe_bend_range,
            global_bend_range,
            soft_takeover,
            timbre_unipolar,
        }
    }

    pub fn learn(&self) -> Option<LearnTarget> {
        self.learn
    }

    pub fn parameter_binding(&self, param: ParamId) -> Option<ParamBinding> {
        self.params.get(param.index()).copied().flatten()
    }

    pub fn macro_binding(&self, slot: usize) -> Option<CcBinding> {
        self.macros.get(slot).copied().flatten()
    }

    pub fn bind_parameter(&mut self, param: ParamId, binding: CcBinding) {
        if let Some(slot) = self.params.get_mut(param.index()) {
            *slot = Some(ParamBinding {
                binding,
                takeover: Takeover::Locked,
            });
        }
    }

    pub fn bind_macro(&mut self, slot: usize, binding: CcBinding) {
        if let Some(entry) = self.macros.get_mut(slot) {
            *entry = Some(binding);
        }
    }

    pub fn bank(&self) -> u16 {
        join14(self.bank_msb, self.bank_lsb)
    }

    pub fn mpe_voices(&self) -> u8 {
        self.mpe_voices
    }

    /// Per-note bend range MPE member channels use, in semitones.
    pub fn mpe_bend_range(&self) -> f32 {
        self.mpe_bend_range
    }

    pub fn global_bend_range(&self) -> f32 {
        self.global_bend_range
    }

    /// After a patch swap every bound controller must be picked up again.
    pub(crate) fn reset_takeover(&mut self) {
        for binding in self.params.iter_mut().flatten() {
            binding.takeover = Takeover::WaitingFirstLook;
        }
    }
}

fn is_structural(cc: u8) -> bool {
    STRUCTURAL_CCS.contains(&cc)
}

impl<V: VoiceDsp> SynthEngine<V> {
    /// Apply one control message. Called for every queued message at the
    /// start of a block, or directly by an owner that drives the engine
    /// without a handle.
    pub fn handle_message(&mut self, message: EngineMessage) {
        match message {
            EngineMessage::NoteOn {
                channel,
                key,
                velocity,
                detune,
            } => self.note_on(channel, key, velocity, detune),
            EngineMessage::NoteOff {
                channel,
                key,
                velocity,
            } => self.note_off(channel, key, velocity),
            EngineMessage::PitchBend { channel, value } => self.pitch_bend(channel, value),
            EngineMessage::ControlChange {
                channel,
                controller,
                value,
            } => self.control_change(channel, controller, value),
            EngineMessage::ChannelAftertouch { channel, value } => {
                self.channel_aftertouch(channel, value)
            }
            EngineMessage::PolyAftertouch {
                channel,
                key,
                value,
            } => self.poly_aftertouch(channel, key, value),
            EngineMessage::ProgramChange { channel, program } => {
                self.program_change(channel, program)
            }
            EngineMessage::AllNotesOff => self.all_notes_off(),
            EngineMessage::AllSoundOff => self.all_sound_off(),
            EngineMessage::LearnParameter(param) if param.is_valid() => {
                self.midi.learn = Some(LearnTarget::Parameter(param));
            }
            EngineMessage::LearnParameter(_) => {}
            EngineMessage::LearnMacro(slot) if slot < N_MACROS => {
                self.midi.learn = Some(LearnTarget::Macro(slot));
            }
            EngineMessage::LearnMacro(_) => {}
            EngineMessage::CancelLearn => self.midi.learn = None,
            EngineMessage::ClearParameterBinding(param) => {
                if let Some(slot) = self.midi.params.get_mut(param.index()) {
                    *slot = None;
                }
            }
            EngineMessage::ClearMacroBinding(slot) => {
                if let Some(entry) = self.midi.macros.get_mut(slot) {
                    *entry = None;
                }
            }
            EngineMessage::SuspendEffects(mask) => self.fx.suspend(mask),
        }
    }

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8, detune: f32) {
        let (channel, key) = (channel & 0x0F, key & 0x7F);
        if velocity == 0 {
            self.note_off(channel, key, 0);
            return;
        }
        if self.learn_from_note(channel, key) {
            return;
        }
        let settings = self.note_settings();
        self.manager
            .play_note(&settings, &mut self.bank, channel, key, velocity, detune, None);
    }

    /// The split point can be learned from a key (or, in channel split, a
    /// channel). The note is consumed.
    fn learn_from_note(&mut self, channel: u8, key: u8) -> bool {
        let split = ParamId::global(GlobalParam::SplitPoint);
        if self.midi.learn != Some(LearnTarget::Parameter(split)) {
            return false;
        }
        let value = if self.patch.scene_mode() == SceneMode::ChannelSplit {
            channel as f32 * 8.0
        } else {
            key as f32
        };
        self.set_parameter_value(split, value);
        self.refresh.push(split, value);
        self.midi.learn = None;
        debug!("split point learned: {value}");
        true
    }

    pub fn note_off(&mut self, channel: u8, key: u8, velocity: u8) {
        let settings = self.note_settings();
        self.manager
            .release_note(&settings, &mut self.bank, channel & 0x0F, key & 0x7F, velocity);
    }

    pub fn pitch_bend(&mut self, channel: u8, value: i16) {
        let channel = channel & 0x0F;
        let value = value.clamp(-8192, 8191);
        self.manager.channels_mut().get_mut(channel as usize).pitch_bend = value;
        if self.midi.mpe_enabled && channel != 0 {
            return;
        }
        let target = value as f32 / 8192.0;
        for scene in 0..N_SCENES {
            self.bank.scene_mut(scene).pitch_bend.set_target(target);
        }
    }

    pub fn channel_aftertouch(&mut self, channel: u8, value: u8) {
        let channel = channel & 0x0F;
        let pressure = (value & 0x7F) as f32 / 127.0;
        self.manager.channels_mut().get_mut(channel as usize).pressure = pressure;
        if !self.midi.mpe_enabled || channel == 0 {
            self.bank.set_controller(ModulatorId::Aftertouch, pressure);
        }
    }

    pub fn poly_aftertouch(&mut self, channel: u8, key: u8, value: u8) {
        let state = &mut self.manager.channels_mut().get_mut((channel & 0x0F) as usize).keys
            [(key & 0x7F) as usize];
        state.poly_aftertouch = (value & 0x7F) as f32 / 127.0;
    }

    pub fn program_change(&mut self, _channel: u8, program: u8) {
        let bank = self.midi.bank();
        match self.store.patch_for_program(bank, program & 0x7F) {
            Some(id) => {
                debug!(target: "polyscene::deferred", "program {bank}:{program} selects patch {id}");
                self.shared.request_patch(id);
            }
            None => debug!("program {bank}:{program} has no patch"),
        }
    }

    pub fn all_notes_off(&mut self) {
        let settings = self.note_settings();
        self.manager.all_notes_off(&settings, &mut self.bank);
    }

    /// Fade the master out over a few blocks, then free every voice.
    pub fn all_sound_off(&mut self) {
        self.all_sound_off_pending = true;
    }

    pub fn control_change(&mut self, channel: u8, cc: u8, value: u8) {
        let channel = channel & 0x0F;
        let cc = cc & 0x7F;
        let value = value & 0x7F;
        let mut fval = value as f32 / 127.0;
        let mpe = self.midi.mpe_enabled;

        match cc {
            0 => {
                self.midi.bank_msb = value;
                return;
            }
            1 => self.bank.set_controller(ModulatorId::ModWheel, fval),
            2 => self.bank.set_controller(ModulatorId::Breath, fval),
            6 => {
                let state = self.manager.channels_mut().get_mut(channel as usize);
                if state.nrpn_last {
                    state.nrpn.value[1] = value;
                } else {
                    state.rpn.value[1] = value;
                    let rpn = state.rpn;
                    self.on_rpn(channel, rpn.number[0], rpn.number[1], rpn.value[1]);
                }
                return;
            }
            10 if mpe => {
                self.manager.channels_mut().get_mut(channel as usize).pan = int7_to_bipolar(value);
                return;
            }
            11 => self.bank.set_controller(ModulatorId::Expression, fval),
            32 => {
                self.midi.bank_lsb = value;
                return;
            }
            38 => {
                let state = self.manager.channels_mut().get_mut(channel as usize);
                if state.nrpn_last {
                    state.nrpn.value[0] = value;
                } else {
                    state.rpn.value[0] = value;
                }
            }
            64 => {
                self.sustain(channel, value);
                return;
            }
            74 if mpe => {
                let timbre = if self.midi.timbre_unipolar {
                    fval
                } else {
                    int7_to_bipolar(value)
                };
                self.manager.channels_mut().get_mut(channel as usize).timbre = timbre;
                return;
            }
            98 | 99 | 100 | 101 => {
                let state = self.manager.channels_mut().get_mut(channel as usize);
                match cc {
                    98 => state.nrpn.number[0] = value,
                    99 => state.nrpn.number[1] = value,
                    100 => state.rpn.number[0] = value,
                    _ => state.rpn.number[1] = value,
                }
                state.nrpn_last = cc < 100;
                return;
            }
            120 => {
                if !(mpe && channel != 0) {
                    self.all_sound_off();
                }
                return;
            }
            123 => {
                if !(mpe && channel != 0) {
                    self.all_notes_off();
                }
                return;
            }
            _ => {}
        }

        let mut controller = cc as u32;
        if cc == 38 {
            let state = self.manager.channels().get(channel as usize);
            let (number, flag) = if state.nrpn_last {
                (state.nrpn, NRPN_FLAG)
            } else {
                (state.rpn, RPN_FLAG)
            };
            let value14 = join14(number.value[1], number.value[0]);
            controller = join14(number.number[1], number.number[0]) as u32 | flag;
            fval = value14 as f32 / 16384.0;
        }

        self.learn_from_cc(cc, controller, channel);

        for slot in 0..N_MACROS {
            if self.midi.macros[slot].is_some_and(|b| b.matches(controller, channel)) {
                self.bank.macro_mut(slot).set_target01(fval);
            }
        }

        for index in 0..N_PARAMS {
            let Some(mut bound) = self.midi.params[index] else {
                continue;
            };
            if !bound.binding.matches(controller, channel) {
                continue;
            }
            let param = ParamId::from_raw(index as u16);
            if self.midi.soft_takeover && bound.takeover != Takeover::Locked {
                bound.takeover = bound.takeover.update(fval, self.patch.get01(param));
                self.midi.params[index] = Some(bound);
                if bound.takeover != Takeover::Locked {
                    continue;
                }
            }
            self.write_from_controller(param, fval);
        }
    }

    fn learn_from_cc(&mut self, cc: u8, controller: u32, channel: u8) {
        let Some(target) = self.midi.learn else {
            return;
        };
        if is_structural(cc) {
            return;
        }
        let binding = CcBinding {
            controller,
            channel: Some(channel),
        };
        match target {
            LearnTarget::Parameter(param) => self.midi.bind_parameter(param, binding),
            LearnTarget::Macro(slot) => self.midi.bind_macro(slot, binding),
        }
        debug!("learned controller {controller:#x} on channel {channel} for {target:?}");
        self.midi.learn = None;
    }

    fn write_from_controller(&mut self, param: ParamId, fval: f32) {
        let Some(info) = param.info() else {
            return;
        };
        let value = info.to_plain(fval);
        if info.kind == ValueKind::Float {
            self.set_parameter_smoothed01(param, fval);
        } else {
            self.set_parameter_value(param, value);
        }
        self.refresh.push(param, value);
    }

    fn sustain(&mut self, channel: u8, value: u8) {
        self.bank.set_controller(ModulatorId::Sustain, value as f32 / 127.0);
        self.manager.channels_mut().get_mut(channel as usize).hold = value > 63;

        // Both edges: pressing settles tombstones, lifting releases.
        let settings = self.note_settings();
        let scenes: u8 = match settings.scene_mode {
            SceneMode::Single => 1 << settings.active_scene,
            SceneMode::KeySplit | SceneMode::Dual => 0b11,
            SceneMode::ChannelSplit if settings.mpe && channel == 0 => 0b11,
            SceneMode::ChannelSplit if channel < settings.split_channel() => 0b01,
            SceneMode::ChannelSplit => 0b10,
        };
        for scene in 0..N_SCENES {
            if scenes & (1 << scene) != 0 {
                self.manager
                    .purge_hold_buffer(&settings, &mut self.bank, scene);
            }
        }
    }

    fn on_rpn(&mut self, channel: u8, lsb: u8, msb: u8, value_msb: u8) {
        match (lsb, msb) {
            (0, 0) => {
                let range = value_msb as f32;
                if channel == 1 {
                    self.midi.mpe_bend_range = range;
                    self.manager.channels_mut().set_pitch_bend_range(range);
                } else if channel == 0 {
                    self.midi.global_bend_range = range;
                }
            }
            (6, 0) => {
                self.midi.mpe_enabled = value_msb > 0;
                self.midi.mpe_voices = value_msb & 0x0F;
                if self.midi.mpe_bend_range <= 0.0 {
                    self.midi.mpe_bend_range = self.config.mpe_pitch_bend_range;
                }
                let range = self.midi.mpe_bend_range;
                self.manager.channels_mut().set_pitch_bend_range(range);
                debug!(
                    "MPE {} with {} voices",
                    if self.midi.mpe_enabled { "on" } else { "off" },
                    self.midi.mpe_voices
                );
            }
            _ => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takeover_locks_when_crossing() {
        let t = Takeover::WaitingFirstLook.update(0.1, 0.5);
        assert_eq!(t, Takeover::WaitingBelow);
        let t = t.update(0.3, 0.5);
        assert_eq!(t, Takeover::WaitingBelow);
        assert_eq!(t.update(0.495, 0.5), Takeover::Locked);

        let t = Takeover::WaitingFirstLook.update(0.9, 0.5);
        assert_eq!(t, Takeover::WaitingAbove);
        assert_eq!(t.update(0.5, 0.5), Takeover::Locked);

        assert_eq!(Takeover::WaitingFirstLook.update(0.5, 0.5), Takeover::Locked);
    }

    #[test]
    fn bindings_match_channel_or_any() {
        let on_two = CcBinding {
            controller: 7,
            channel: Some(2),
        };
        assert!(on_two.matches(7, 2));
        assert!(!on_two.matches(7, 3));
        assert!(!on_two.matches(8, 2));
        let any = CcBinding {
            controller: 7 | NRPN_FLAG,
            channel: None,
        };
        assert!(any.matches(7 | NRPN_FLAG, 9));
        assert!(!any.matches(7, 9));
    }

    #[test]
    fn timbre_controller_reaches_bindings_only_without_mpe() {
        use crate::{dsp::BasicVoice, engine::config::EngineConfig};

        let (mut engine, _handle) =
            SynthEngine::new(EngineConfig::default(), || BasicVoice::new(48_000.0)).expect("engine");
        let param = ParamId::global(GlobalParam::MasterVolume);
        engine.midi.bind_parameter(
            param,
            CcBinding {
                controller: 74,
                channel: None,
            },
        );

        engine.control_change(3, 74, 127);
        let top = param.info().map(|info| info.to_plain(1.0));
        let queued: Vec<(ParamId, Option<f32>)> = engine.refresh.iter().map(|(p, v)| (p, Some(v))).collect();
        assert_eq!(queued, vec![(param, top)]);
        assert_eq!(engine.manager.channels().get(3).timbre, 0.0);

        engine.refresh.clear();
        engine.midi.mpe_enabled = true;
        engine.control_change(3, 74, 0);
        assert!(engine.refresh.is_empty());
        assert_eq!(engine.manager.channels().get(3).timbre, -1.0);
    }

    #[test]
    fn structural_controllers_are_not_learnable() {
        for cc in [0, 6, 32, 38, 64, 74, 98, 99, 100, 101, 120, 123] {
            assert!(is_structural(cc), "{cc}");
        }
        assert!(!is_structural(1));
        assert!(!is_structural(7));
    }

    #[test]
    fn patch_swap_resets_takeover() {
        let mut state = MidiState::new(48.0, 2.0, true, false);
        let param = ParamId::global(GlobalParam::MasterVolume);
        state.bind_parameter(
            param,
            CcBinding {
                controller: 7,
                channel: None,
            },
        );
        assert_eq!(state.parameter_binding(param).map(|b| b.takeover), Some(Takeover::Locked));
        state.reset_takeover();
        assert_eq!(
            state.parameter_binding(param).map(|b| b.takeover),
            Some(Takeover::WaitingFirstLook)
        );
    }
}
