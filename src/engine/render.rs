use std::{f32::consts::FRAC_1_SQRT_2, sync::Arc};

use log::{debug, warn};

use crate::{
    dsp::{clip::HardclipMode, filter::SVFilter, halfband::HalfbandDecimator, meter::PeakMeter, ramp::LinearRamp},
    engine::{config::EngineConfig, deferred::LoadOutcome, fx::FxSlot, SynthEngine},
    error::DspError,
    modulation::{
        bank::ModulatorBank,
        routing::{Routing, RoutingMatrix},
        source::ModulatorId,
    },
    patch::{
        modes::{PolyMode, SceneMode},
        params::{GlobalParam, ParamId, SceneParam, N_GLOBAL_PARAMS, N_SCENE_PARAMS, N_SENDS},
    },
    synth::{
        channel::ChannelTable,
        voice::{StereoBlock, Voice, VoiceDsp, VoiceParams},
    },
    BATCH_WIDTH, BLOCK_SIZE, N_SCENES,
};

/*
Block Render Pipeline
=====================

One call to `render_block` produces BLOCK_SIZE stereo frames:

  control pass    queued messages and parameter writes, interpolator glides,
                  modulator refresh, scene and global routings
        │
  voices          per scene, oldest first, in batches of BATCH_WIDTH lanes
        │         (oversampled; finished voices are freed after the batch)
  scene stage     hard clip ─► half-band decimate ─► low cut
        │
  effects         inserts (2 per scene) ─► sends (2) ─► globals (2)
        │
  master          volume and fade ramps ─► hard clip ─► peak meter

A patch swap first fades `masterfade` to silence, then halts the engine:
halted blocks are all zeros until the loader hands over the new patch.
*/

/// Blocks the decimator keeps running after a scene's last voice ends.
const HALFBAND_TAIL_BLOCKS: u32 = 16;
/// Per-block master fade step while a patch load is pending (20 blocks).
const PATCH_FADE_STEP: f32 = 0.05;
/// Per-block fade step for all-sound-off (8 blocks).
const SOUND_OFF_FADE_STEP: f32 = 0.125;
/// Fade level (squared) below which the output counts as silent.
const SILENCE_THRESHOLD: f32 = 1e-4;
/// Q of 1/sqrt(2) for the scene low cut.
const LOW_CUT_RESONANCE: f32 = 1.0 - FRAC_1_SQRT_2;
const LATCH_KEY: u8 = 60;
const LATCH_VELOCITY: u8 = 100;

type Block = [f32; BLOCK_SIZE];

/// Scene, send and master buffers plus the ramps between them.
pub(crate) struct MixBus {
    scene_os: [StereoBlock; N_SCENES],
    scene: [[Block; 2]; N_SCENES],
    send: [[Block; 2]; N_SENDS],
    main: [Block; 2],
    decimators: [HalfbandDecimator; N_SCENES],
    low_cut: [[SVFilter; 2]; N_SCENES],
    /// Blocks since the scene last had a voice.
    silent_blocks: [u32; N_SCENES],
    send_level: [[LinearRamp; N_SENDS]; N_SCENES],
    send_return: [LinearRamp; N_SENDS],
    master_volume: LinearRamp,
    fade: LinearRamp,
    meter: PeakMeter,
    scene_hardclip: [HardclipMode; N_SCENES],
    master_hardclip: HardclipMode,
    sample_rate: f32,
}

impl MixBus {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            scene_os: std::array::from_fn(|_| StereoBlock::default()),
            scene: [[[0.0; BLOCK_SIZE]; 2]; N_SCENES],
            send: [[[0.0; BLOCK_SIZE]; 2]; N_SENDS],
            main: [[0.0; BLOCK_SIZE]; 2],
            decimators: std::array::from_fn(|_| HalfbandDecimator::new()),
            low_cut: std::array::from_fn(|_| {
                std::array::from_fn(|_| {
                    let mut filter = SVFilter::highpass(20.0);
                    filter.set_resonance(LOW_CUT_RESONANCE);
                    filter
                })
            }),
            silent_blocks: [HALFBAND_TAIL_BLOCKS; N_SCENES],
            send_level: std::array::from_fn(|_| std::array::from_fn(|_| LinearRamp::default())),
            send_return: std::array::from_fn(|_| LinearRamp::default()),
            master_volume: LinearRamp::default(),
            fade: LinearRamp::default(),
            meter: PeakMeter::new(config.sample_rate),
            scene_hardclip: config.scene_hardclip,
            master_hardclip: config.master_hardclip,
            sample_rate: config.sample_rate,
        }
    }

    /// Forget every filter state and ramp, as after a patch swap.
    pub(crate) fn reset(&mut self) {
        for s in 0..N_SCENES {
            self.scene_os[s].clear();
            self.decimators[s].reset();
            self.low_cut[s].iter_mut().for_each(SVFilter::reset);
            self.silent_blocks[s] = HALFBAND_TAIL_BLOCKS;
            self.send_level[s].iter_mut().for_each(LinearRamp::reset);
        }
        self.send_return.iter_mut().for_each(LinearRamp::reset);
        self.master_volume.reset();
        self.fade.reset();
    }
}

/// Lane storage for one batch of voices.
pub(crate) struct VoiceBatch {
    params: [VoiceParams; BATCH_WIDTH],
    outs: [StereoBlock; BATCH_WIDTH],
    results: [Result<bool, DspError>; BATCH_WIDTH],
    lanes: [Option<usize>; BATCH_WIDTH],
}

impl Default for VoiceBatch {
    fn default() -> Self {
        Self {
            params: std::array::from_fn(|_| VoiceParams::default()),
            outs: std::array::from_fn(|_| StereoBlock::default()),
            results: std::array::from_fn(|_| Ok(false)),
            lanes: [None; BATCH_WIDTH],
        }
    }
}

/// Range of a scene parameter, the scale a routing depth of 1 covers.
fn scene_span(index: usize) -> f32 {
    SceneParam::from_index(index).map_or(0.0, |p| {
        let info = p.info();
        info.max - info.min
    })
}

fn global_span(index: usize) -> f32 {
    ParamId::from_raw(index as u16)
        .info()
        .map_or(0.0, |info| info.max - info.min)
}

/// Value of a modulator as seen by one voice.
fn voice_source<V: VoiceDsp>(
    id: ModulatorId,
    voice: &Voice,
    unit: &V,
    channels: &ChannelTable,
    bank: &ModulatorBank,
    mpe: bool,
) -> f32 {
    let channel = channels.get(voice.channel as usize);
    match id {
        ModulatorId::Velocity => voice.velocity as f32 / 127.0,
        ModulatorId::ReleaseVelocity => voice.release_velocity as f32 / 127.0,
        ModulatorId::Keytrack => (voice.key as f32 - 60.0) / 12.0,
        ModulatorId::PolyAftertouch => channel.keys[voice.key as usize].poly_aftertouch,
        ModulatorId::Timbre => channel.timbre,
        ModulatorId::Aftertouch if mpe => channel.pressure,
        ModulatorId::RandomBipolar => voice.draw.random_bipolar,
        ModulatorId::RandomUnipolar => voice.draw.random_unipolar,
        ModulatorId::AlternateBipolar => voice.draw.alternate_bipolar,
        ModulatorId::AlternateUnipolar => voice.draw.alternate_unipolar,
        ModulatorId::AmpEg | ModulatorId::FilterEg => unit.source_output(id),
        other if other.as_voice_lfo().is_some() => unit.source_output(other),
        other => bank.output(voice.scene, other),
    }
}

fn apply_routing(values: &mut [f32], routing: &Routing, source: f32, span: f32) {
    if let Some(value) = values.get_mut(routing.destination) {
        *value += routing.depth * source * span;
    }
}

impl<V: VoiceDsp> SynthEngine<V> {
    /// Render one block into `left` and `right`.
    pub fn render_block(&mut self, left: &mut [f32; BLOCK_SIZE], right: &mut [f32; BLOCK_SIZE]) {
        if self.shared.is_halted() {
            left.fill(0.0);
            right.fill(0.0);
            self.finish_halt();
            return;
        }

        if self.shared.pending_patch().is_some() {
            self.masterfade = (self.masterfade - PATCH_FADE_STEP).max(0.0);
            if self.masterfade * self.masterfade < SILENCE_THRESHOLD {
                self.manager.stop_sound();
                self.shared.set_halted(true);
                if let Some(id) = self.shared.take_pending_patch() {
                    debug!(target: "polyscene::deferred", "faded out, loading patch {id}");
                    self.loader.request(id);
                }
                left.fill(0.0);
                right.fill(0.0);
                self.shared.publish_voice_count(0);
                return;
            }
        }

        if self.all_sound_off_pending {
            self.masterfade = (self.masterfade - SOUND_OFF_FADE_STEP).max(0.0);
            if self.masterfade <= 0.0 {
                for scene in 0..N_SCENES {
                    self.manager.unlatch_scene(scene);
                    self.manager.release_scene(scene);
                }
                self.masterfade = 1.0;
                self.all_sound_off_pending = false;
            }
        }

        self.drain_messages();
        self.drain_params();

        // Held from the control pass through the last voice batch so every
        // lane of the block sees the routings its sources were refreshed for.
        let routing_lock = Arc::clone(&self.routing);
        let routing = routing_lock.lock();
        let played = self.process_control(&routing);

        let mut active = [false; N_SCENES];
        for scene in 0..N_SCENES {
            self.bus.scene_os[scene].clear();
            if played[scene] || !self.manager.arena(scene).is_empty() {
                active[scene] = self.render_voices(scene, &routing);
            }
        }
        drop(routing);

        self.scene_stage(&active);
        self.effects_stage(&active);
        self.master_stage(left, right);

        self.shared.publish_voice_count(self.manager.voice_count());
        self.shared.publish_vu(self.bus.meter.peaks());
        self.shared.try_publish_refresh(&mut self.refresh);
    }

    /// Poll the loader while halted. Either outcome ends the halt.
    fn finish_halt(&mut self) {
        match self.loader.poll() {
            Some(LoadOutcome::Ready(loaded)) => {
                let old = self.install_patch(loaded);
                self.loader.retire(old);
                self.shared.set_halted(false);
            }
            Some(LoadOutcome::Failed) => {
                warn!(target: "polyscene::deferred", "patch load failed, keeping the current patch");
                self.masterfade = 1.0;
                self.shared.set_halted(false);
            }
            None => {}
        }
    }

    /// Everything that runs at block rate before voices render. Returns
    /// which scenes the current scene mode plays.
    fn process_control(&mut self, routing: &RoutingMatrix) -> [bool; N_SCENES] {
        for scene in 0..N_SCENES {
            if !self.release_if_latched[scene] {
                continue;
            }
            if self.patch.poly_mode(scene) != PolyMode::Latch || self.release_anyway[scene] {
                self.manager.release_latched(scene);
            }
            self.release_if_latched[scene] = false;
            self.release_anyway[scene] = false;
        }

        let patch = &mut self.patch;
        self.interpolators.step(|param, value01| {
            patch.set01(param, value01);
        });

        let settings = self.note_settings();
        let played: [bool; N_SCENES] = match settings.scene_mode {
            SceneMode::Single => std::array::from_fn(|s| s == settings.active_scene),
            _ => [true; N_SCENES],
        };

        for scene in 0..N_SCENES {
            let mods = self.bank.scene_mut(scene);
            mods.clear_do_process();
            for r in routing.scene(scene).iter().chain(routing.voice(scene).iter()) {
                mods.mark(r.modulator);
            }
            for r in routing.global().iter().filter(|r| r.source_scene == scene) {
                mods.mark(r.modulator);
            }
            self.manager.update_high_low_keys(&mut self.bank, scene);

            let start = N_GLOBAL_PARAMS + scene * N_SCENE_PARAMS;
            self.scene_values[scene].copy_from_slice(&self.patch.values[start..start + N_SCENE_PARAMS]);
        }
        self.global_values
            .copy_from_slice(&self.patch.values[..N_GLOBAL_PARAMS]);

        for scene in 0..N_SCENES {
            if played[scene]
                && settings.poly_mode[scene] == PolyMode::Latch
                && self.manager.arena(scene).is_empty()
            {
                self.manager.play_note(
                    &settings,
                    &mut self.bank,
                    0,
                    LATCH_KEY,
                    LATCH_VELOCITY,
                    0.0,
                    Some(scene),
                );
            }
        }

        for scene in 0..N_SCENES {
            self.bank.scene_mut(scene).process(&self.scene_values[scene]);
        }
        self.bank.process_macros();

        for scene in 0..N_SCENES {
            for r in routing.scene(scene).iter() {
                let source = self.bank.output(scene, r.modulator);
                apply_routing(&mut self.scene_values[scene], r, source, scene_span(r.destination));
            }
        }
        for r in routing.global().iter() {
            let source = self.bank.output(r.source_scene, r.modulator);
            apply_routing(&mut self.global_values, r, source, global_span(r.destination));
        }

        for scene in 0..N_SCENES {
            if std::mem::take(&mut self.osc_type_changed[scene]) {
                debug!(target: "polyscene::voices", "oscillator type changed, killing scene {scene}");
                self.manager.kill_scene(scene);
            }
        }
        self.fx.apply_swaps();
        self.fx.update_disabled(self.patch.fx_disable());

        played
    }

    /// Render every voice of a scene into its oversampled buffer. Returns
    /// whether any voice rendered.
    fn render_voices(&mut self, scene: usize, routing: &RoutingMatrix) -> bool {
        let snapshot = self.manager.arena(scene).snapshot();
        if snapshot.is_empty() {
            return false;
        }
        let mpe = self.midi.mpe_enabled;
        let global_bend = self.midi.global_bend_range;
        let mut slots = snapshot.iter().peekable();

        while slots.peek().is_some() {
            let batch = &mut self.batch;
            batch.lanes = [None; BATCH_WIDTH];
            for lane in batch.lanes.iter_mut() {
                *lane = slots.next();
            }

            {
                let arena = self.manager.arena(scene);
                let channels = self.manager.channels();
                let bend = self.bank.output(scene, ModulatorId::PitchBend) * global_bend;
                for (lane, params) in batch.lanes.iter().zip(batch.params.iter_mut()) {
                    let Some((slot, voice)) = lane.and_then(|slot| arena.voice(slot).map(|v| (slot, v)))
                    else {
                        params.neutral();
                        continue;
                    };
                    let unit = arena.unit(slot);
                    let channel = channels.get(voice.channel as usize);

                    params.active = true;
                    params.values = self.scene_values[scene];
                    for r in routing.voice(scene).iter() {
                        let source = voice_source(r.modulator, voice, unit, channels, &self.bank, mpe);
                        apply_routing(&mut params.values, r, source, scene_span(r.destination));
                    }
                    params.pitch_bend = bend + if mpe { channel.pitch_bend_semitones() } else { 0.0 };
                    params.pressure = channel.pressure;
                    params.poly_aftertouch = channel.keys[voice.key as usize].poly_aftertouch;
                    params.timbre = channel.timbre;
                }
            }

            let arena = self.manager.arena_mut(scene);
            let mut units = arena.units_for(&batch.lanes);
            V::process_batch(&mut units, &batch.params, &mut batch.outs, &mut batch.results);

            let scene_out = &mut self.bus.scene_os[scene];
            for lane in 0..BATCH_WIDTH {
                let Some(slot) = batch.lanes[lane] else { continue };
                let keep = match &batch.results[lane] {
                    Ok(keep) => {
                        let out = &batch.outs[lane];
                        for (acc, s) in scene_out.left.iter_mut().zip(out.left.iter()) {
                            *acc += s;
                        }
                        for (acc, s) in scene_out.right.iter_mut().zip(out.right.iter()) {
                            *acc += s;
                        }
                        *keep
                    }
                    Err(err) => {
                        warn!(target: "polyscene::voices", "voice in scene {scene} silenced: {err}");
                        false
                    }
                };
                if !keep {
                    arena.free(slot);
                }
            }
        }

        self.manager.advance_ages(scene);
        true
    }

    fn scene_stage(&mut self, active: &[bool; N_SCENES]) {
        let bus = &mut self.bus;
        for scene in 0..N_SCENES {
            if active[scene] {
                bus.silent_blocks[scene] = 0;
            } else {
                bus.silent_blocks[scene] = bus.silent_blocks[scene].saturating_add(1);
            }

            let tail = bus.silent_blocks[scene] < HALFBAND_TAIL_BLOCKS;
            let [out_l, out_r] = &mut bus.scene[scene];
            if !active[scene] && !tail {
                out_l.fill(0.0);
                out_r.fill(0.0);
                continue;
            }

            let os = &mut bus.scene_os[scene];
            bus.scene_hardclip[scene].apply(&mut os.left);
            bus.scene_hardclip[scene].apply(&mut os.right);
            bus.decimators[scene].process_block(&os.left, &os.right, out_l, out_r);

            if self.patch.low_cut_enabled(scene) {
                let cutoff = self.scene_values[scene][SceneParam::LowCut.index()];
                for (filter, buffer) in bus.low_cut[scene].iter_mut().zip([&mut *out_l, &mut *out_r]) {
                    filter.set_cutoff(cutoff);
                    filter.render(buffer, bus.sample_rate);
                }
            }
        }
    }

    fn effects_stage(&mut self, active: &[bool; N_SCENES]) {
        let bypass = self.patch.fx_bypass();
        let bus = &mut self.bus;
        let fx = &mut self.fx;

        if bypass.inserts() {
            for scene in 0..N_SCENES {
                let [l, r] = &mut bus.scene[scene];
                for n in 0..2 {
                    fx.process(FxSlot::insert(scene, n), l, r, active[scene]);
                }
            }
        }

        let [main_l, main_r] = &mut bus.main;
        main_l.fill(0.0);
        main_r.fill(0.0);
        for [l, r] in &bus.scene {
            for i in 0..BLOCK_SIZE {
                main_l[i] += l[i];
                main_r[i] += r[i];
            }
        }

        if bypass.sends() {
            let any_active = active.iter().any(|a| *a);
            for n in 0..N_SENDS {
                let [send_l, send_r] = &mut bus.send[n];
                send_l.fill(0.0);
                send_r.fill(0.0);
                for scene in 0..N_SCENES {
                    let level = self.scene_values[scene][SceneParam::SendLevel(n as u8).index()];
                    let ramp = &mut bus.send_level[scene][n];
                    ramp.set_target(level);
                    let [l, r] = &bus.scene[scene];
                    ramp.accumulate_stereo(l, r, send_l, send_r);
                }

                if fx.process(FxSlot::send(n), send_l, send_r, any_active) {
                    let level = self.global_values[GlobalParam::SendReturn(n as u8).index()];
                    let ramp = &mut bus.send_return[n];
                    ramp.set_target(level);
                    ramp.accumulate_stereo(send_l, send_r, main_l, main_r);
                }
            }
        }

        if bypass.globals() {
            let any_active = active.iter().any(|a| *a);
            for n in 0..2 {
                fx.process(FxSlot::global(n), main_l, main_r, any_active);
            }
        }
    }

    fn master_stage(&mut self, left: &mut [f32; BLOCK_SIZE], right: &mut [f32; BLOCK_SIZE]) {
        let bus = &mut self.bus;
        left.copy_from_slice(&bus.main[0]);
        right.copy_from_slice(&bus.main[1]);

        let db = self.global_values[GlobalParam::MasterVolume.index()];
        bus.master_volume.set_target(10.0_f32.powf(db / 20.0));
        bus.master_volume.multiply_stereo(left, right);
        bus.fade.set_target(self.masterfade * self.masterfade);
        bus.fade.multiply_stereo(left, right);

        bus.master_hardclip.apply(left);
        bus.master_hardclip.apply(right);
        bus.meter.process(left, right);
    }
}
