use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use rtrb::Producer;

use crate::{
    engine::{
        deferred::SharedState,
        fx::{Effect, FxControl, FxSlot},
    },
    error::{EngineError, PatchError},
    io::{converter::midi_to_message, midi::MidiEvent},
    modulation::{routing::RoutingMatrix, source::ModulatorId},
    patch::{params::ParamId, store::PatchStore},
    synth::message::{EngineMessage, ParamChange},
};

/// Control-context side of a `SynthEngine`.
///
/// Every method returns immediately: notes and controllers go through a
/// lock-free queue drained at the next block, routing edits take the short
/// routing lock, and patch loads only record the requested id.
pub struct EngineHandle {
    messages: Producer<EngineMessage>,
    params: Producer<ParamChange>,
    routing: Arc<Mutex<RoutingMatrix>>,
    shared: Arc<SharedState>,
    fx: FxControl,
    store: Arc<dyn PatchStore>,
}

impl EngineHandle {
    pub(crate) fn new(
        messages: Producer<EngineMessage>,
        params: Producer<ParamChange>,
        routing: Arc<Mutex<RoutingMatrix>>,
        shared: Arc<SharedState>,
        fx: FxControl,
        store: Arc<dyn PatchStore>,
    ) -> Self {
        Self {
            messages,
            params,
            routing,
            shared,
            fx,
            store,
        }
    }

    pub fn send(&mut self, message: EngineMessage) -> Result<(), EngineError> {
        self.messages
            .push(message)
            .map_err(|_| EngineError::QueueFull)
    }

    pub fn note_on(&mut self, channel: u8, key: u8, velocity: u8) -> Result<(), EngineError> {
        self.note_on_detuned(channel, key, velocity, 0.0)
    }

    pub fn note_on_detuned(
        &mut self,
        channel: u8,
        key: u8,
        velocity: u8,
        detune: f32,
    ) -> Result<(), EngineError> {
        self.send(EngineMessage::NoteOn {
            channel,
            key,
            velocity,
            detune,
        })
    }

    pub fn note_off(&mut self, channel: u8, key: u8, velocity: u8) -> Result<(), EngineError> {
        self.send(EngineMessage::NoteOff {
            channel,
            key,
            velocity,
        })
    }

    pub fn pitch_bend(&mut self, channel: u8, value: i16) -> Result<(), EngineError> {
        self.send(EngineMessage::PitchBend { channel, value })
    }

    pub fn control_change(&mut self, channel: u8, controller: u8, value: u8) -> Result<(), EngineError> {
        self.send(EngineMessage::ControlChange {
            channel,
            controller,
            value,
        })
    }

    /// Decode raw MIDI bytes and queue the result. Returns `false` for
    /// messages the engine does not handle (clock, sysex, ...).
    pub fn send_midi(&mut self, bytes: &[u8]) -> Result<bool, EngineError> {
        match MidiEvent::from_bytes(bytes) {
            Some(event) => self.send(midi_to_message(event)).map(|_| true),
            None => Ok(false),
        }
    }

    /// Jump a parameter to a plain value at the next block.
    pub fn set_parameter(&mut self, param: ParamId, value: f32) -> Result<(), EngineError> {
        self.push_param(param, value, false)
    }

    /// Glide a parameter to a plain value through a control interpolator.
    pub fn set_parameter_smoothed(&mut self, param: ParamId, value: f32) -> Result<(), EngineError> {
        self.push_param(param, value, true)
    }

    fn push_param(&mut self, param: ParamId, value: f32, smoothed: bool) -> Result<(), EngineError> {
        if !param.is_valid() {
            return Err(EngineError::UnknownParameter(param));
        }
        self.params
            .push(ParamChange {
                param,
                value,
                smoothed,
            })
            .map_err(|_| EngineError::QueueFull)
    }

    /// Add, update or (with a depth of 0) remove a routing.
    pub fn set_modulation(
        &self,
        param: ParamId,
        modulator: ModulatorId,
        source_scene: usize,
        depth: f32,
    ) -> Result<(), EngineError> {
        self.routing
            .lock()
            .set_modulation(param, modulator, source_scene, depth)?;
        Ok(())
    }

    pub fn clear_modulation(&self, param: ParamId, modulator: ModulatorId, source_scene: usize) -> bool {
        self.routing
            .lock()
            .clear_modulation(param, modulator, source_scene)
    }

    pub fn modulation_depth(&self, param: ParamId, modulator: ModulatorId, source_scene: usize) -> f32 {
        self.routing
            .lock()
            .modulation_depth(param, modulator, source_scene)
    }

    /// Start a faded patch swap. Unknown ids are rejected here; a patch
    /// that fails to load later is reported by `take_load_error`.
    pub fn load_patch(&self, id: usize) -> Result<(), EngineError> {
        if id >= self.store.patch_count() {
            return Err(PatchError::NotFound(id).into());
        }
        debug!(target: "polyscene::deferred", "patch {id} requested");
        self.shared.request_patch(id);
        Ok(())
    }

    pub fn take_load_error(&self) -> Option<PatchError> {
        self.shared.take_load_error()
    }

    pub fn is_halted(&self) -> bool {
        self.shared.is_halted()
    }

    pub fn is_loading(&self) -> bool {
        self.shared.pending_patch().is_some() || self.shared.is_halted()
    }

    pub fn voice_count(&self) -> usize {
        self.shared.voice_count()
    }

    /// Master peak levels, left and right.
    pub fn vu(&self) -> [f32; 2] {
        self.shared.vu()
    }

    pub fn install_effect(&mut self, slot: FxSlot, effect: Box<dyn Effect>) -> Result<(), EngineError> {
        self.fx.install(slot, effect)
    }

    pub fn remove_effect(&mut self, slot: FxSlot) -> Result<(), EngineError> {
        self.fx.clear(slot)
    }

    /// Drop effects the audio thread has swapped out.
    pub fn collect_retired(&mut self) -> usize {
        self.fx.collect_retired()
    }

    /// Parameters changed by MIDI since the last call, with the plain
    /// value each was set to.
    pub fn drain_refresh(&self, f: impl FnMut(ParamId, f32)) {
        self.shared.drain_refresh(f);
    }
}
