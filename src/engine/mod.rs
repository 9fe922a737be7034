//! The real-time engine: one `SynthEngine` per synth instance, driven one
//! block at a time from the audio callback, plus the `EngineHandle` that
//! talks to it from everywhere else.

pub mod config;
pub mod deferred;
pub mod fx;
pub mod handle;
pub mod midi;
pub mod render;

use std::sync::Arc;

use log::{debug, warn};
use parking_lot::Mutex;
use rtrb::{Consumer, RingBuffer};

use crate::{
    error::{EngineError, PatchError},
    modulation::{
        bank::ModulatorBank, interpolator::InterpolatorPool, routing::RoutingMatrix,
        source::ModulatorId,
    },
    patch::{
        modes::PolyMode,
        params::{GlobalParam, ParamId, ParamScope, SceneParam, ValueKind, N_GLOBAL_PARAMS, N_SCENE_PARAMS},
        store::{MemoryPatchStore, PatchStore},
        tuning::{StandardTuning, Tuning},
        Patch,
    },
    synth::{
        factory::VoiceFactory,
        manager::{NoteSettings, VoiceManager},
        message::{EngineMessage, ParamChange},
        voice::VoiceDsp,
    },
    N_SCENES,
};

use self::{
    config::EngineConfig,
    deferred::{LoadedPatch, PatchLoader, RefreshQueue, SharedState},
    fx::{fx_channel, FxRack},
    handle::EngineHandle,
    midi::{CcBinding, MidiState, ParamBinding},
    render::{MixBus, VoiceBatch},
};

/// Owns every piece of state the audio thread touches.
///
/// Only the routing matrix is shared with the control context, behind a
/// short mutex; everything else arrives through the handle's queues and is
/// applied at the start of the next block.
pub struct SynthEngine<V: VoiceDsp> {
    config: EngineConfig,
    patch: Patch,
    manager: VoiceManager<V>,
    bank: ModulatorBank,
    interpolators: InterpolatorPool,
    routing: Arc<Mutex<RoutingMatrix>>,
    messages: Consumer<EngineMessage>,
    params: Consumer<ParamChange>,
    shared: Arc<SharedState>,
    loader: PatchLoader,
    store: Arc<dyn PatchStore>,
    fx: FxRack,
    midi: MidiState,
    refresh: RefreshQueue,
    bus: MixBus,
    batch: VoiceBatch,
    masterfade: f32,
    all_sound_off_pending: bool,
    release_if_latched: [bool; N_SCENES],
    release_anyway: [bool; N_SCENES],
    osc_type_changed: [bool; N_SCENES],
    /// Scene values with scene-rate modulation applied, rebuilt every block.
    scene_values: [[f32; N_SCENE_PARAMS]; N_SCENES],
    global_values: [f32; N_GLOBAL_PARAMS],
}

impl<V: VoiceDsp> SynthEngine<V> {
    /// Engine with an empty patch store; only the init patch is available.
    pub fn new<F>(config: EngineConfig, factory: F) -> Result<(Self, EngineHandle), EngineError>
    where
        F: VoiceFactory<Voice = V>,
    {
        Self::with_store(config, factory, Arc::new(MemoryPatchStore::default()))
    }

    pub fn with_store<F>(
        config: EngineConfig,
        factory: F,
        store: Arc<dyn PatchStore>,
    ) -> Result<(Self, EngineHandle), EngineError>
    where
        F: VoiceFactory<Voice = V>,
    {
        let sample_rate = config.sample_rate;
        let (message_tx, message_rx) = RingBuffer::<EngineMessage>::new(config.message_capacity.max(1));
        let (param_tx, param_rx) = RingBuffer::<ParamChange>::new(config.param_capacity.max(1));
        let (fx_control, fx_rack) = fx_channel(config.fx_queue_capacity, sample_rate);

        let shared = Arc::new(SharedState::new(config.refresh_capacity));
        let routing = Arc::new(Mutex::new(RoutingMatrix::new()));
        let loader = PatchLoader::spawn(Arc::clone(&shared), Arc::clone(&store))?;

        let mut patch = Patch::default();
        patch.set(ParamId::global(GlobalParam::PolyLimit), config.poly_limit as f32);

        let tuning: Arc<dyn Tuning> = Arc::new(StandardTuning);
        let mut manager = VoiceManager::new(sample_rate, tuning, || factory.create_voice());
        manager
            .channels_mut()
            .set_pitch_bend_range(config.mpe_pitch_bend_range);

        let midi = MidiState::new(
            config.mpe_pitch_bend_range,
            config.pitch_bend_range,
            config.soft_takeover,
            config.mpe_timbre_unipolar,
        );

        let handle = EngineHandle::new(
            message_tx,
            param_tx,
            Arc::clone(&routing),
            Arc::clone(&shared),
            fx_control,
            Arc::clone(&store),
        );

        let engine = Self {
            bank: ModulatorBank::new(config.smoothing, sample_rate),
            interpolators: InterpolatorPool::new(sample_rate),
            refresh: RefreshQueue::with_capacity(config.refresh_capacity),
            bus: MixBus::new(&config),
            batch: VoiceBatch::default(),
            patch,
            manager,
            routing,
            messages: message_rx,
            params: param_rx,
            shared,
            loader,
            store,
            fx: fx_rack,
            midi,
            masterfade: 1.0,
            all_sound_off_pending: false,
            release_if_latched: [false; N_SCENES],
            release_anyway: [false; N_SCENES],
            osc_type_changed: [false; N_SCENES],
            scene_values: [[0.0; N_SCENE_PARAMS]; N_SCENES],
            global_values: [0.0; N_GLOBAL_PARAMS],
            config,
        };
        debug!("engine ready at {} Hz", engine.config.sample_rate);
        Ok((engine, handle))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn patch(&self) -> &Patch {
        &self.patch
    }

    pub fn manager(&self) -> &VoiceManager<V> {
        &self.manager
    }

    pub fn bank(&self) -> &ModulatorBank {
        &self.bank
    }

    pub fn shared(&self) -> &Arc<SharedState> {
        &self.shared
    }

    pub fn is_halted(&self) -> bool {
        self.shared.is_halted()
    }

    pub fn masterfade(&self) -> f32 {
        self.masterfade
    }

    pub fn mpe_enabled(&self) -> bool {
        self.midi.mpe_enabled
    }

    pub fn midi(&self) -> &MidiState {
        &self.midi
    }

    pub fn parameter_binding(&self, param: ParamId) -> Option<ParamBinding> {
        self.midi.parameter_binding(param)
    }

    pub fn macro_binding(&self, slot: usize) -> Option<CcBinding> {
        self.midi.macro_binding(slot)
    }

    pub fn set_tuning(&mut self, tuning: Arc<dyn Tuning>) {
        self.manager.set_tuning(tuning);
    }

    pub fn note_settings(&self) -> NoteSettings {
        NoteSettings::from_patch(&self.patch, self.midi.mpe_enabled, self.config.use_ch23)
    }

    /// Write a plain parameter value now. Any glide on it is dropped.
    pub fn set_parameter(&mut self, param: ParamId, value: f32) -> Result<(), EngineError> {
        if !param.is_valid() {
            return Err(EngineError::UnknownParameter(param));
        }
        self.set_parameter_value(param, value);
        Ok(())
    }

    pub fn set_modulation(
        &mut self,
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

    pub fn clear_modulation(
        &mut self,
        param: ParamId,
        modulator: ModulatorId,
        source_scene: usize,
    ) -> bool {
        self.routing
            .lock()
            .clear_modulation(param, modulator, source_scene)
    }

    pub fn modulation_depth(
        &self,
        param: ParamId,
        modulator: ModulatorId,
        source_scene: usize,
    ) -> f32 {
        self.routing
            .lock()
            .modulation_depth(param, modulator, source_scene)
    }

    pub(crate) fn set_parameter_value(&mut self, param: ParamId, value: f32) {
        self.interpolators.release(param);
        self.store_param(param, value);
    }

    /// Glide towards a normalized target. A full pool snaps instead.
    pub(crate) fn set_parameter_smoothed01(&mut self, param: ParamId, target01: f32) {
        let current = self.patch.get01(param);
        if !self.interpolators.smooth_to(param, current, target01) {
            warn!("interpolator pool full, {param:?} jumps to its target");
            if let Some(info) = param.info() {
                self.store_param(param, info.to_plain(target01));
            }
        }
    }

    fn apply_param_change(&mut self, change: ParamChange) {
        let Some(info) = change.param.info() else {
            return;
        };
        if change.smoothed && info.kind == ValueKind::Float {
            self.set_parameter_smoothed01(change.param, info.to_normalized(info.clamp(change.value)));
        } else {
            self.set_parameter_value(change.param, change.value);
        }
    }

    /// Store a plain value and schedule whatever the change implies for the
    /// voices: leaving latch releases latched notes, a new oscillator type
    /// kills the scene.
    fn store_param(&mut self, param: ParamId, value: f32) {
        let Some(scope) = param.scope() else {
            return;
        };
        let before = self.patch.get(param);
        let Some(after) = self.patch.set(param, value) else {
            return;
        };
        if before == after {
            return;
        }

        match scope {
            ParamScope::Global(GlobalParam::SceneMode) | ParamScope::Global(GlobalParam::ActiveScene) => {
                self.release_if_latched = [true; N_SCENES];
            }
            ParamScope::Scene {
                scene,
                param: SceneParam::PolyMode,
            } => {
                if PolyMode::from_value(before) == PolyMode::Latch
                    && PolyMode::from_value(after) != PolyMode::Latch
                {
                    self.release_if_latched[scene] = true;
                    self.release_anyway[scene] = true;
                }
            }
            ParamScope::Scene {
                scene,
                param: SceneParam::OscType,
            } => self.osc_type_changed[scene] = true,
            _ => {}
        }
    }

    fn drain_params(&mut self) {
        while let Ok(change) = self.params.pop() {
            self.apply_param_change(change);
        }
    }

    fn drain_messages(&mut self) {
        while let Ok(message) = self.messages.pop() {
            self.handle_message(message);
        }
    }

    /// Swap a loaded patch in, returning the one it replaced. Voices must
    /// already be stopped.
    fn install_patch(&mut self, mut loaded: LoadedPatch) -> LoadedPatch {
        std::mem::swap(&mut self.patch, &mut loaded.patch);
        std::mem::swap(&mut *self.routing.lock(), &mut loaded.routing);
        self.interpolators.clear();
        self.midi.reset_takeover();
        self.fx.suspend_all();
        self.bus.reset();
        self.masterfade = 1.0;
        self.release_if_latched = [false; N_SCENES];
        self.release_anyway = [false; N_SCENES];
        self.osc_type_changed = [false; N_SCENES];
        debug!(target: "polyscene::deferred", "patch {} ({}) installed", loaded.id, self.patch.name);
        loaded
    }

    /// Apply deferred work synchronously, for use while no audio is
    /// running: effect swaps, a pending patch load and queued parameter
    /// writes.
    pub fn process_pending_offline(&mut self) -> Result<(), EngineError> {
        self.fx.apply_swaps();
        if let Some(id) = self.shared.take_pending_patch() {
            match LoadedPatch::build(self.store.as_ref(), id) {
                Ok(loaded) => {
                    self.manager.stop_sound();
                    drop(self.install_patch(loaded));
                }
                Err(err) => {
                    self.report_load_failure(err.clone());
                    return Err(err.into());
                }
            }
        }
        self.drain_params();
        Ok(())
    }

    fn report_load_failure(&self, err: PatchError) {
        warn!(target: "polyscene::deferred", "patch load failed: {err}");
        self.shared.report_load_error(err);
    }
}
