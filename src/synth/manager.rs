//! Note lifecycle across both scenes.
//!
//! ```text
//!   note-on ──► channel mask ──► scene A ─┐
//!                      │                   ├─► play_voice ─► softkill / enforce
//!                      └─────► scene B ───┘          │
//!                                                    ├─► poly: new voice
//!                                                    ├─► mono/fp/latch: kill all, new voice
//!                                                    └─► mono st: legato the gated voice
//!
//!   note-off ──► pedal down? ──yes──► hold buffer ──(pedal up)──┐
//!                    │ no                                       │
//!                    └──────────────► release_note_post_hold_check
//!                                         ├─► poly: release matching voice
//!                                         ├─► mono: retrigger the next held key
//!                                         └─► mono st: legato to the next held key
//! ```
//!
//! The manager never allocates: voices live in fixed arenas, loops that may
//! start or free voices walk a copied active list, and the hold buffer is
//! drained through its own swap buffer.

use std::sync::Arc;

use log::{debug, warn};

use crate::{
    modulation::bank::{ModulatorBank, NoteDraw},
    patch::{
        modes::{MonoPedalMode, MonoPriority, PolyMode, SceneMode},
        tuning::Tuning,
        Patch,
    },
    synth::{
        arena::VoiceArena,
        channel::ChannelTable,
        hold::HoldBuffer,
        voice::{NoteContext, Voice, VoiceDsp},
    },
    MAX_VOICES, N_CHANNELS, N_KEYS, N_SCENES,
};

/// Key that maps to 0 on the key modulators.
const KEYTRACK_ROOT: f32 = 60.0;

/// The patch fields note handling depends on, captured once per event so
/// the manager never has to look at the live patch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteSettings {
    pub scene_mode: SceneMode,
    pub active_scene: usize,
    pub split_point: u8,
    pub poly_limit: usize,
    pub poly_mode: [PolyMode; N_SCENES],
    pub priority: [MonoPriority; N_SCENES],
    pub pedal_mode: [MonoPedalMode; N_SCENES],
    pub portamento: [f32; N_SCENES],
    pub mpe: bool,
    /// Route MIDI channels 2 and 3 to scenes A and B directly.
    pub use_ch23: bool,
}

impl Default for NoteSettings {
    fn default() -> Self {
        Self::from_patch(&Patch::default(), false, false)
    }
}

impl NoteSettings {
    pub fn from_patch(patch: &Patch, mpe: bool, use_ch23: bool) -> Self {
        Self {
            scene_mode: patch.scene_mode(),
            active_scene: patch.active_scene(),
            split_point: patch.split_point(),
            poly_limit: patch.poly_limit(),
            poly_mode: std::array::from_fn(|s| patch.poly_mode(s)),
            priority: std::array::from_fn(|s| patch.mono_priority(s)),
            pedal_mode: std::array::from_fn(|s| patch.pedal_mode(s)),
            portamento: std::array::from_fn(|s| patch.portamento(s)),
            mpe,
            use_ch23,
        }
    }

    /// First channel that belongs to scene B in channel-split mode.
    pub fn split_channel(&self) -> u8 {
        self.split_point / 8 + 1
    }

    /// Bit set of the scenes a note plays on: bit 0 is scene A, bit 1 scene B.
    pub fn channel_mask(&self, channel: u8, key: u8) -> u8 {
        let follows_mode = self.mpe
            || self.scene_mode == SceneMode::ChannelSplit
            || !self.use_ch23
            || channel == 0
            || channel > 2;

        if !follows_mode {
            return match self.scene_mode {
                SceneMode::Single => 1 << self.active_scene,
                _ => channel & 3,
            };
        }

        match self.scene_mode {
            SceneMode::Single => 1 << self.active_scene,
            SceneMode::Dual => 0b11,
            SceneMode::KeySplit if key < self.split_point => 0b01,
            SceneMode::KeySplit => 0b10,
            SceneMode::ChannelSplit if channel < self.split_channel() => 0b01,
            SceneMode::ChannelSplit => 0b10,
        }
    }

    /// Keys a scene answers to, both ends inclusive. Empty when `low > high`.
    fn key_range(&self, scene: usize) -> (i32, i32) {
        let split = self.split_point as i32;
        match (self.scene_mode, scene) {
            (SceneMode::KeySplit, 0) => (0, split - 1),
            (SceneMode::KeySplit, _) => (split, N_KEYS as i32 - 1),
            _ => (0, N_KEYS as i32 - 1),
        }
    }

    /// MPE member channels a scene scans for held notes.
    fn mpe_channels(&self, scene: usize) -> std::ops::Range<u8> {
        let last = N_CHANNELS as u8;
        let split = self.split_channel().min(last);
        match (self.scene_mode, scene) {
            (SceneMode::ChannelSplit, 0) => 1..split,
            (SceneMode::ChannelSplit, _) => split..last,
            _ => 1..last,
        }
    }

    /// Channels scanned for other held keys when a mono scene picks a note.
    fn scan_channels(&self, scene: usize, channel: u8) -> std::ops::Range<u8> {
        if self.mpe {
            self.mpe_channels(scene)
        } else {
            channel..channel + 1
        }
    }
}

/// Held keys found while scanning for the note a mono scene should fall
/// back to.
#[derive(Debug, Clone, Copy, Default)]
struct HeldScan {
    highest: Option<(u8, u8)>,
    lowest: Option<(u8, u8)>,
    latest: Option<(u8, u8)>,
}

impl HeldScan {
    fn pick(&self, priority: MonoPriority) -> Option<(u8, u8)> {
        match priority {
            MonoPriority::Highest | MonoPriority::LatestRetriggerHighest => self.highest,
            MonoPriority::Latest => self.latest,
            MonoPriority::Lowest => self.lowest,
        }
    }
}

/// Owns the voice arenas, channel state and sustain holds of both scenes.
pub struct VoiceManager<V> {
    arenas: [VoiceArena<V>; N_SCENES],
    hold: [HoldBuffer; N_SCENES],
    channels: ChannelTable,
    /// Press order of each key per scene, 0 when up.
    key_pressed: [[u64; N_KEYS]; N_SCENES],
    key_order: u64,
    voice_order: u64,
    last_key: [u8; N_SCENES],
    tuning: Arc<dyn Tuning>,
    sample_rate: f32,
}

impl<V: VoiceDsp> VoiceManager<V> {
    pub fn new(sample_rate: f32, tuning: Arc<dyn Tuning>, mut make_unit: impl FnMut() -> V) -> Self {
        Self {
            arenas: std::array::from_fn(|_| VoiceArena::new(&mut make_unit)),
            hold: std::array::from_fn(|_| HoldBuffer::default()),
            channels: ChannelTable::default(),
            key_pressed: [[0; N_KEYS]; N_SCENES],
            key_order: 0,
            voice_order: 0,
            last_key: [60; N_SCENES],
            tuning,
            sample_rate,
        }
    }

    pub fn set_tuning(&mut self, tuning: Arc<dyn Tuning>) {
        self.tuning = tuning;
    }

    pub fn sample_rate(&self) -> f32 {
        self.sample_rate
    }

    pub fn channels(&self) -> &ChannelTable {
        &self.channels
    }

    pub fn channels_mut(&mut self) -> &mut ChannelTable {
        &mut self.channels
    }

    pub fn arena(&self, scene: usize) -> &VoiceArena<V> {
        &self.arenas[scene]
    }

    pub fn arena_mut(&mut self, scene: usize) -> &mut VoiceArena<V> {
        &mut self.arenas[scene]
    }

    pub fn hold(&self, scene: usize) -> &HoldBuffer {
        &self.hold[scene]
    }

    /// Live voices of a scene, oldest first.
    pub fn voices(&self, scene: usize) -> impl Iterator<Item = &Voice> + '_ {
        self.arenas[scene].iter().map(|(_, v)| v)
    }

    pub fn last_key(&self, scene: usize) -> u8 {
        self.last_key[scene]
    }

    pub fn is_key_pressed(&self, scene: usize, key: u8) -> bool {
        self.key_pressed[scene][key as usize] > 0
    }

    pub fn non_released(&self, scene: usize) -> usize {
        self.voices(scene).filter(|v| v.gate).count()
    }

    pub fn non_uber(&self, scene: usize) -> usize {
        self.voices(scene).filter(|v| !v.uber_release).count()
    }

    pub fn voice_count(&self) -> usize {
        self.arenas.iter().map(VoiceArena::len).sum()
    }

    /// Start a note. Returns `false` when the tuning leaves the key
    /// unmapped and the note was dropped.
    #[allow(clippy::too_many_arguments)]
    pub fn play_note(
        &mut self,
        settings: &NoteSettings,
        bank: &mut ModulatorBank,
        channel: u8,
        key: u8,
        velocity: u8,
        detune: f32,
        force_scene: Option<usize>,
    ) -> bool {
        if !self.tuning.is_mapped(key) {
            debug!(target: "polyscene::voices", "key {key} is unmapped, dropping note");
            return false;
        }

        let mask = match force_scene {
            Some(scene) => 1 << scene.min(N_SCENES - 1),
            None => settings.channel_mask(channel, key),
        };

        for scene in 0..N_SCENES {
            if mask & (1 << scene) != 0 {
                self.key_order += 1;
                self.key_pressed[scene][key as usize] = self.key_order;
                self.play_voice(settings, bank, scene, channel, key, velocity, detune);
            }
        }

        let state = &mut self.channels.get_mut(channel as usize).keys[key as usize];
        state.velocity = velocity;
        state.last_detune = detune;

        if self.pedal_down(settings, channel) {
            for hold in &mut self.hold {
                hold.tombstone(channel, key);
            }
        }
        true
    }

    #[allow(clippy::too_many_arguments)]
    fn play_voice(
        &mut self,
        settings: &NoteSettings,
        bank: &mut ModulatorBank,
        scene: usize,
        channel: u8,
        key: u8,
        velocity: u8,
        detune: f32,
    ) {
        if self.non_released(scene) == 0 {
            bank.scene_mut(scene).attack_lfos();
        }
        let draw = bank.scene_mut(scene).reroll();

        let excess = (self.non_uber(scene) + 1).saturating_sub(settings.poly_limit);
        for _ in 0..excess {
            self.softkill(scene);
        }
        self.enforce_polyphony_limit(settings, scene, 3);

        let mode = settings.poly_mode[scene];
        match mode {
            PolyMode::Poly => {
                self.start_voice(settings, scene, channel, key, velocity, detune, draw, false);
            }
            PolyMode::Mono | PolyMode::MonoFp | PolyMode::Latch => {
                if self.priority_allows(settings, scene, channel, key) {
                    let mut glide = false;
                    for slot in self.arenas[scene].snapshot().iter() {
                        if self.arenas[scene].voice(slot).is_some_and(|v| v.gate) {
                            glide = true;
                        }
                        self.kill_voice(scene, slot);
                    }
                    if mode == PolyMode::MonoFp && !glide {
                        self.last_key[scene] = key;
                    }
                    let keep_last_key = mode == PolyMode::MonoFp && glide;
                    self.start_voice(settings, scene, channel, key, velocity, detune, draw, keep_last_key);
                } else {
                    self.touch_key(channel, key);
                }
            }
            PolyMode::MonoSt | PolyMode::MonoStFp => {
                if self.priority_allows(settings, scene, channel, key) {
                    let mut found = false;
                    for slot in self.arenas[scene].snapshot().iter() {
                        let Some(voice) = self.arenas[scene].voice(slot) else {
                            continue;
                        };
                        if voice.gate {
                            self.legato(settings, scene, slot, key, detune);
                            if settings.mpe {
                                if let Some(voice) = self.arenas[scene].voice_mut(slot) {
                                    voice.channel = channel;
                                }
                            }
                            found = true;
                            break;
                        } else if !voice.uber_release {
                            self.kill_voice(scene, slot);
                        }
                    }
                    if found {
                        self.touch_key(channel, key);
                    } else {
                        self.start_voice(settings, scene, channel, key, velocity, detune, draw, false);
                    }
                } else {
                    self.touch_key(channel, key);
                }
            }
        }

        self.update_high_low_keys(bank, scene);
    }

    /// Whether the priority lets a mono scene take over for `key`.
    fn priority_allows(&self, settings: &NoteSettings, scene: usize, channel: u8, key: u8) -> bool {
        let priority = settings.priority[scene];
        if !matches!(priority, MonoPriority::Highest | MonoPriority::Lowest) {
            return true;
        }
        let (low, high) = settings.key_range(scene);
        for ch in settings.scan_channels(scene, channel) {
            let state = self.channels.get(ch as usize);
            for k in low.max(0)..=high {
                let k = k as usize;
                if !state.key_down(k) {
                    continue;
                }
                let blocks = match priority {
                    MonoPriority::Highest => k > key as usize,
                    _ => k < key as usize,
                };
                if blocks {
                    return false;
                }
            }
        }
        true
    }

    fn next_voice_order(&mut self) -> u64 {
        self.voice_order += 1;
        self.voice_order
    }

    fn touch_key(&mut self, channel: u8, key: u8) {
        let order = self.next_voice_order();
        self.channels.get_mut(channel as usize).keys[key as usize].voice_order = order;
    }

    #[allow(clippy::too_many_arguments)]
    fn start_voice(
        &mut self,
        settings: &NoteSettings,
        scene: usize,
        channel: u8,
        key: u8,
        velocity: u8,
        detune: f32,
        draw: NoteDraw,
        keep_last_key: bool,
    ) -> Option<usize> {
        let pitch = self.tuning.pitch(key);
        let portamento = settings.portamento[scene];
        let porta_from = if settings.poly_mode[scene] == PolyMode::MonoStFp || portamento <= 0.0 {
            pitch
        } else {
            self.tuning.pitch(self.last_key[scene])
        };

        let order = self.voice_order + 1;
        let voice = Voice {
            scene,
            channel,
            main_channel: if settings.mpe { 0 } else { channel },
            key,
            velocity,
            release_velocity: 0,
            detune,
            age: 0,
            age_release: 0,
            order,
            gate: true,
            uber_release: false,
            porta_from,
            draw,
        };
        let Some(slot) = self.arenas[scene].acquire(voice) else {
            warn!(
                target: "polyscene::voices",
                "voice arena for scene {scene} exhausted, dropping key {key}"
            );
            return None;
        };
        self.voice_order = order;
        self.channels.get_mut(channel as usize).keys[key as usize].voice_order = order;
        if !keep_last_key {
            self.last_key[scene] = key;
        }

        let note = NoteContext {
            sample_rate: self.sample_rate,
            scene,
            channel,
            key,
            pitch,
            velocity,
            detune,
            porta_from,
            portamento,
            draw,
        };
        self.arenas[scene].unit_mut(slot).note_on(&note);
        Some(slot)
    }

    /// Re-pitch a sounding voice to `key` without a new attack.
    fn legato(&mut self, settings: &NoteSettings, scene: usize, slot: usize, key: u8, detune: f32) {
        let sample_rate = self.sample_rate;
        let pitch = self.tuning.pitch(key);
        let Some((voice, unit)) = self.arenas[scene].pair_mut(slot) else {
            return;
        };
        let porta_from = self.tuning.pitch(voice.key);
        voice.porta_from = porta_from;
        voice.key = key;
        voice.detune = detune;
        let note = NoteContext {
            sample_rate,
            scene,
            channel: voice.channel,
            key,
            pitch,
            velocity: voice.velocity,
            detune,
            porta_from,
            portamento: settings.portamento[scene],
            draw: voice.draw,
        };
        unit.legato(&note);
        self.last_key[scene] = key;
    }

    fn release_voice(&mut self, scene: usize, slot: usize) {
        if let Some((voice, unit)) = self.arenas[scene].pair_mut(slot) {
            voice.release();
            unit.release();
        }
    }

    fn kill_voice(&mut self, scene: usize, slot: usize) {
        if let Some((voice, unit)) = self.arenas[scene].pair_mut(slot) {
            voice.kill();
            unit.uber_release();
        }
    }

    fn pedal_down(&self, settings: &NoteSettings, channel: u8) -> bool {
        self.channels.get(channel as usize).hold || (settings.mpe && self.channels.get(0).hold)
    }

    pub fn release_note(
        &mut self,
        settings: &NoteSettings,
        bank: &mut ModulatorBank,
        channel: u8,
        key: u8,
        velocity: u8,
    ) {
        for arena in &mut self.arenas {
            for voice in arena.iter_mut() {
                if voice.matches(channel, key) {
                    voice.release_velocity = velocity;
                }
            }
        }

        let k = key as usize;
        match settings.scene_mode {
            SceneMode::Single => self.key_pressed[settings.active_scene][k] = 0,
            SceneMode::Dual => {
                for pressed in &mut self.key_pressed {
                    pressed[k] = 0;
                }
            }
            SceneMode::KeySplit => {
                let scene = usize::from(key >= settings.split_point);
                self.key_pressed[scene][k] = 0;
            }
            SceneMode::ChannelSplit => {
                let scene = usize::from(channel >= settings.split_channel());
                self.key_pressed[scene][k] = 0;
            }
        }

        let held = self.pedal_down(settings, channel);
        let mask = settings.channel_mask(channel, key);
        for scene in 0..N_SCENES {
            let mut release = !held;
            let mode = settings.poly_mode[scene];
            if held
                && !settings.mpe
                && settings.pedal_mode[scene] == MonoPedalMode::ReleaseIfOthersHeld
                && mode.is_mono()
                && mode != PolyMode::Latch
            {
                let state = self.channels.get(channel as usize);
                release = (0..N_KEYS).any(|other| other != k && state.key_down(other));
            }

            if release {
                self.release_note_post_hold_check(settings, bank, scene, channel, key, velocity);
            } else if mask & (1 << scene) != 0 || self.sounds(scene, channel, key) {
                self.hold[scene].push(channel, key);
            }
        }
    }

    /// Whether a scene still has a voice for this note, e.g. one started
    /// before the active scene changed.
    fn sounds(&self, scene: usize, channel: u8, key: u8) -> bool {
        self.arenas[scene].iter().any(|(_, v)| v.matches(channel, key))
    }

    /// Release `key` in one scene now that the pedal no longer holds it.
    pub fn release_note_post_hold_check(
        &mut self,
        settings: &NoteSettings,
        bank: &mut ModulatorBank,
        scene: usize,
        channel: u8,
        key: u8,
        velocity: u8,
    ) {
        self.channels.get_mut(channel as usize).keys[key as usize].velocity = 0;
        let mode = settings.poly_mode[scene];

        for slot in self.arenas[scene].snapshot().iter() {
            let Some(voice) = self.arenas[scene].voice(slot) else {
                continue;
            };
            let (v_key, v_channel, v_gate, v_velocity, v_order) =
                (voice.key, voice.channel, voice.gate, voice.velocity, voice.order);

            match mode {
                PolyMode::Poly => {
                    if v_key == key && v_channel == channel && v_gate {
                        self.release_voice(scene, slot);
                    }
                }
                PolyMode::Mono | PolyMode::MonoFp | PolyMode::Latch => {
                    if v_key != key || v_channel != channel {
                        continue;
                    }
                    let next = self
                        .scan_held(settings, scene, channel, key)
                        .pick(settings.priority[scene]);
                    let Some((next_channel, next_key)) = next else {
                        if mode != PolyMode::Latch {
                            self.release_voice(scene, slot);
                        }
                        continue;
                    };

                    self.kill_voice(scene, slot);
                    if self.non_uber(scene) == 0 {
                        // a fingered glide sees the outgoing voice as still gated
                        if let Some(voice) = self.arenas[scene].voice_mut(slot) {
                            voice.gate = mode == PolyMode::MonoFp;
                        }
                        let detune = self.channels.get(next_channel as usize).keys
                            [next_key as usize]
                            .last_detune;
                        self.play_voice(
                            settings,
                            bank,
                            scene,
                            next_channel,
                            next_key,
                            v_velocity,
                            detune,
                        );
                        if let Some(voice) = self.arenas[scene].voice_mut(slot) {
                            if voice.order == v_order {
                                voice.gate = false;
                            }
                        }
                    }
                }
                PolyMode::MonoSt | PolyMode::MonoStFp => {
                    let main = |ch: u8| if settings.mpe { 0 } else { ch };
                    if v_key != key || main(v_channel) != main(channel) {
                        continue;
                    }
                    let next = self
                        .scan_held(settings, scene, channel, key)
                        .pick(settings.priority[scene]);
                    match next {
                        Some((next_channel, next_key)) => {
                            let detune = self.channels.get(next_channel as usize).keys
                                [next_key as usize]
                                .last_detune;
                            self.legato(settings, scene, slot, next_key, detune);
                            if settings.mpe {
                                if let Some(voice) = self.arenas[scene].voice_mut(slot) {
                                    voice.channel = next_channel;
                                }
                            }
                        }
                        None => self.release_voice(scene, slot),
                    }
                }
            }
        }

        self.update_high_low_keys(bank, scene);
        if self.non_released(scene) == 0 {
            bank.scene_mut(scene).release_lfos();
        }
    }

    /// Other keys still down in the scene's range. Without MPE only the
    /// note's own channel is scanned; under MPE every member channel except
    /// the note's own.
    fn scan_held(&self, settings: &NoteSettings, scene: usize, channel: u8, key: u8) -> HeldScan {
        let (low, high) = settings.key_range(scene);
        let mut scan = HeldScan::default();
        let mut latest_order = 0;

        for k in (low.max(0)..=high).rev() {
            let k = k as u8;
            for ch in settings.scan_channels(scene, channel) {
                let excluded = if settings.mpe { ch == channel } else { k == key };
                if excluded {
                    continue;
                }
                let state = &self.channels.get(ch as usize).keys[k as usize];
                if state.velocity == 0 {
                    continue;
                }
                if scan.highest.is_none_or(|(_, h)| k >= h) {
                    scan.highest = Some((ch, k));
                }
                if scan.lowest.is_none_or(|(_, l)| k <= l) {
                    scan.lowest = Some((ch, k));
                }
                if state.voice_order >= latest_order {
                    latest_order = state.voice_order;
                    scan.latest = Some((ch, k));
                }
            }
        }
        scan
    }

    /// Force the fast fade on the oldest gated voice, or the oldest
    /// releasing one when nothing is gated. Returns whether a voice was hit.
    pub fn softkill(&mut self, scene: usize) -> bool {
        let mut oldest: Option<(usize, u64)> = None;
        for (slot, voice) in self.arenas[scene].iter() {
            if voice.gate && oldest.is_none_or(|(_, age)| voice.age > age) {
                oldest = Some((slot, voice.age));
            }
        }
        if oldest.is_none() {
            for (slot, voice) in self.arenas[scene].iter() {
                if !voice.gate
                    && !voice.uber_release
                    && oldest.is_none_or(|(_, age)| voice.age_release > age)
                {
                    oldest = Some((slot, voice.age_release));
                }
            }
        }

        match oldest {
            Some((slot, _)) => {
                self.kill_voice(scene, slot);
                true
            }
            None => false,
        }
    }

    /// Free fading voices until the scene is back within `poly_limit +
    /// margin`.
    pub fn enforce_polyphony_limit(&mut self, settings: &NoteSettings, scene: usize, margin: usize) {
        let padded = (settings.poly_limit + margin).min(MAX_VOICES - 1);
        let mut excess = self.arenas[scene].len().saturating_sub(padded);
        if excess == 0 {
            return;
        }
        for slot in self.arenas[scene].snapshot().iter() {
            if excess == 0 {
                break;
            }
            if self.arenas[scene].voice(slot).is_some_and(|v| v.uber_release) {
                self.arenas[scene].free(slot);
                excess -= 1;
            }
        }
    }

    /// Settle note-offs the pedal was holding for a scene.
    pub fn purge_hold_buffer(&mut self, settings: &NoteSettings, bank: &mut ModulatorBank, scene: usize) {
        let pending = self.hold[scene].begin_purge();
        for i in 0..pending {
            let item = self.hold[scene].draining(i);
            if item.tombstone {
                if settings.poly_mode[scene] == PolyMode::Poly && !settings.mpe {
                    self.purge_duplicates(scene, item.channel, item.key);
                }
            } else if !self.channels.get(0).hold && !self.channels.get(item.channel as usize).hold {
                self.release_note_post_hold_check(settings, bank, scene, item.channel, item.key, 127);
            } else {
                self.hold[scene].retain_item(item);
            }
        }
        self.hold[scene].end_purge();
    }

    /// Re-striking a held key leaves two gated voices for it. Keep the
    /// newest and release the rest.
    fn purge_duplicates(&mut self, scene: usize, channel: u8, key: u8) {
        let newest = self.arenas[scene]
            .iter()
            .filter(|(_, v)| v.gate && v.matches(channel, key))
            .max_by_key(|(_, v)| v.order)
            .map(|(slot, _)| slot);

        for slot in self.arenas[scene].snapshot().iter() {
            let duplicate = self.arenas[scene]
                .voice(slot)
                .is_some_and(|v| v.gate && v.matches(channel, key));
            if duplicate && Some(slot) != newest {
                self.release_voice(scene, slot);
            }
        }
    }

    /// Push the key modulators to the currently pressed keys. They keep
    /// their value once the last key is up.
    pub fn update_high_low_keys(&self, bank: &mut ModulatorBank, scene: usize) {
        let mut lowest = None;
        let mut highest = None;
        let mut latest = None;
        let mut latest_order = 0;
        for (k, &order) in self.key_pressed[scene].iter().enumerate() {
            if order == 0 {
                continue;
            }
            lowest.get_or_insert(k);
            highest = Some(k);
            if order > latest_order {
                latest_order = order;
                latest = Some(k);
            }
        }

        let to_octaves = |k: usize| (k as f32 - KEYTRACK_ROOT) / 12.0;
        let mods = bank.scene_mut(scene);
        if let Some(k) = lowest {
            mods.lowest_key.reset(to_octaves(k));
        }
        if let Some(k) = highest {
            mods.highest_key.reset(to_octaves(k));
        }
        if let Some(k) = latest {
            mods.latest_key.reset(to_octaves(k));
        }
    }

    /// Release every pressed key and every gated voice, through the normal
    /// note-off path.
    pub fn all_notes_off(&mut self, settings: &NoteSettings, bank: &mut ModulatorBank) {
        for key in 0..N_KEYS {
            if !self.key_pressed.iter().any(|pressed| pressed[key] > 0) {
                continue;
            }
            for channel in 0..N_CHANNELS {
                if self.channels.get(channel).key_down(key) {
                    self.release_note(settings, bank, channel as u8, key as u8, 0);
                }
            }
        }

        let mut gated = [(0u8, 0u8); N_SCENES * MAX_VOICES];
        let mut count = 0;
        for arena in &self.arenas {
            for (_, voice) in arena.iter().filter(|(_, v)| v.gate) {
                gated[count] = (voice.channel, voice.key);
                count += 1;
            }
        }
        for &(channel, key) in &gated[..count] {
            self.release_note(settings, bank, channel, key, 0);
        }
    }

    /// Drop all voices and note state at once.
    pub fn stop_sound(&mut self) {
        self.channels.clear_notes();
        for arena in &mut self.arenas {
            arena.free_all();
        }
        for hold in &mut self.hold {
            hold.clear();
        }
        self.key_pressed = [[0; N_KEYS]; N_SCENES];
    }

    /// Fast-fade every voice of a scene, e.g. after its oscillator type
    /// changed under it.
    pub fn kill_scene(&mut self, scene: usize) {
        for slot in self.arenas[scene].snapshot().iter() {
            self.kill_voice(scene, slot);
        }
    }

    /// Free every voice of one scene without touching key state.
    pub fn release_scene(&mut self, scene: usize) {
        self.arenas[scene].free_all();
    }

    /// Release the gated voices of a scene leaving latch mode, keeping
    /// the keyboard state consistent with what is still sounding.
    pub fn unlatch_scene(&mut self, scene: usize) {
        for slot in self.arenas[scene].snapshot().iter() {
            let Some(voice) = self.arenas[scene].voice(slot) else {
                continue;
            };
            let (channel, key) = (voice.channel, voice.key);
            self.channels.get_mut(channel as usize).keys[key as usize].velocity = 0;
            self.key_pressed[scene][key as usize] = 0;
        }
    }

    /// Normal release for every gated voice of a scene that left latch mode.
    pub fn release_latched(&mut self, scene: usize) {
        self.unlatch_scene(scene);
        for slot in self.arenas[scene].snapshot().iter() {
            if self.arenas[scene].voice(slot).is_some_and(|v| v.gate) {
                self.release_voice(scene, slot);
            }
        }
    }

    pub fn advance_ages(&mut self, scene: usize) {
        for voice in self.arenas[scene].iter_mut() {
            voice.advance_age();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        error::DspError,
        modulation::{controller::SmoothingMode, source::ModulatorId},
        patch::tuning::{KeyMapTuning, StandardTuning},
        synth::voice::{StereoBlock, VoiceParams, VoiceState},
    };

    #[derive(Debug, Default)]
    struct Probe {
        notes: Vec<NoteContext>,
        legatos: Vec<NoteContext>,
        released: bool,
        killed: bool,
    }

    impl VoiceDsp for Probe {
        fn note_on(&mut self, note: &NoteContext) {
            self.notes.push(*note);
            self.released = false;
            self.killed = false;
        }

        fn legato(&mut self, note: &NoteContext) {
            self.legatos.push(*note);
        }

        fn release(&mut self) {
            self.released = true;
        }

        fn uber_release(&mut self) {
            self.killed = true;
        }

        fn source_output(&self, _id: ModulatorId) -> f32 {
            0.0
        }

        fn process_block(&mut self, _: &VoiceParams, _: &mut StereoBlock) -> Result<bool, DspError> {
            Ok(!self.killed)
        }
    }

    struct Rig {
        manager: VoiceManager<Probe>,
        bank: ModulatorBank,
        settings: NoteSettings,
    }

    impl Rig {
        fn new() -> Self {
            Self {
                manager: VoiceManager::new(48_000.0, Arc::new(StandardTuning), Probe::default),
                bank: ModulatorBank::new(SmoothingMode::FastExp, 48_000.0),
                settings: NoteSettings::default(),
            }
        }

        fn on(&mut self, channel: u8, key: u8) {
            self.manager
                .play_note(&self.settings, &mut self.bank, channel, key, 100, 0.0, None);
        }

        fn off(&mut self, channel: u8, key: u8) {
            self.manager
                .release_note(&self.settings, &mut self.bank, channel, key, 64);
        }

        fn pedal(&mut self, channel: u8, down: bool) {
            self.manager.channels_mut().get_mut(channel as usize).hold = down;
            if !down {
                for scene in 0..N_SCENES {
                    self.manager
                        .purge_hold_buffer(&self.settings, &mut self.bank, scene);
                }
            }
        }

        fn states(&self, scene: usize) -> Vec<(u8, VoiceState)> {
            self.manager
                .voices(scene)
                .map(|v| (v.key, v.state()))
                .collect()
        }

        fn gated_keys(&self, scene: usize) -> Vec<u8> {
            self.manager
                .voices(scene)
                .filter(|v| v.gate)
                .map(|v| v.key)
                .collect()
        }
    }

    #[test]
    fn channel_mask_follows_scene_mode() {
        let mut s = NoteSettings::default();
        assert_eq!(s.channel_mask(0, 10), 0b01);
        s.active_scene = 1;
        assert_eq!(s.channel_mask(0, 10), 0b10);
        s.scene_mode = SceneMode::Dual;
        assert_eq!(s.channel_mask(5, 10), 0b11);
        s.scene_mode = SceneMode::KeySplit;
        s.split_point = 60;
        assert_eq!(s.channel_mask(0, 59), 0b01);
        assert_eq!(s.channel_mask(0, 60), 0b10);
        s.scene_mode = SceneMode::ChannelSplit;
        s.split_point = 32;
        assert_eq!(s.split_channel(), 5);
        assert_eq!(s.channel_mask(3, 60), 0b01);
        assert_eq!(s.channel_mask(7, 60), 0b10);
    }

    #[test]
    fn channels_two_and_three_pick_scenes_directly() {
        let mut s = NoteSettings {
            scene_mode: SceneMode::Dual,
            use_ch23: true,
            ..NoteSettings::default()
        };
        assert_eq!(s.channel_mask(1, 60), 0b01);
        assert_eq!(s.channel_mask(2, 60), 0b10);
        assert_eq!(s.channel_mask(0, 60), 0b11);
        s.mpe = true;
        assert_eq!(s.channel_mask(1, 60), 0b11);
    }

    #[test]
    fn poly_note_on_and_off() {
        let mut rig = Rig::new();
        rig.on(0, 60);
        rig.on(0, 64);
        assert_eq!(rig.gated_keys(0), vec![60, 64]);
        assert!(rig.manager.voices(1).next().is_none());
        assert!(rig.manager.is_key_pressed(0, 60));

        rig.off(0, 60);
        assert_eq!(
            rig.states(0),
            vec![(60, VoiceState::Releasing), (64, VoiceState::Gated)]
        );
        assert!(!rig.manager.is_key_pressed(0, 60));
        let released = rig.manager.voices(0).next().map(|v| v.release_velocity);
        assert_eq!(released, Some(64));
    }

    #[test]
    fn unmapped_keys_are_dropped() {
        let mut rig = Rig::new();
        rig.manager
            .set_tuning(Arc::new(KeyMapTuning::only_keys([60, 62, 64])));
        assert!(!rig
            .manager
            .play_note(&rig.settings, &mut rig.bank, 0, 61, 100, 0.0, None));
        assert_eq!(rig.manager.voice_count(), 0);
        rig.on(0, 62);
        assert_eq!(rig.manager.voice_count(), 1);
    }

    #[test]
    fn softkill_takes_the_oldest_voices_over_the_limit() {
        let mut rig = Rig::new();
        rig.settings.poly_limit = 4;
        for key in 60..66 {
            rig.on(0, key);
        }
        let killed: Vec<u8> = rig
            .manager
            .voices(0)
            .filter(|v| v.uber_release)
            .map(|v| v.key)
            .collect();
        assert_eq!(killed, vec![60, 61]);
        assert_eq!(rig.manager.non_uber(0), 4);
    }

    #[test]
    fn softkill_prefers_gated_then_oldest_release() {
        let mut rig = Rig::new();
        rig.on(0, 60);
        rig.on(0, 62);
        rig.off(0, 60);
        rig.off(0, 62);
        // both releasing; the one released first has aged longer
        rig.manager.advance_ages(0);
        if let Some(v) = rig.manager.arena_mut(0).iter_mut().find(|v| v.key == 62) {
            v.age_release = 0;
        }
        assert!(rig.manager.softkill(0));
        assert_eq!(
            rig.states(0),
            vec![(60, VoiceState::Killed), (62, VoiceState::Releasing)]
        );
    }

    #[test]
    fn enforce_frees_only_fading_voices() {
        let mut rig = Rig::new();
        rig.settings.poly_limit = 2;
        for key in 60..64 {
            rig.on(0, key);
        }
        // limit 2 + margin 3 keeps everything
        assert_eq!(rig.manager.arena(0).len(), 4);
        rig.manager.enforce_polyphony_limit(&rig.settings, 0, 0);
        assert_eq!(rig.manager.arena(0).len(), 2);
        assert!(rig.manager.voices(0).all(|v| v.gate));
    }

    #[test]
    fn mono_retriggers_and_falls_back_to_held_key() {
        let mut rig = Rig::new();
        rig.settings.poly_mode[0] = PolyMode::Mono;
        rig.on(0, 60);
        rig.on(0, 64);
        assert_eq!(rig.gated_keys(0), vec![64]);
        assert_eq!(rig.manager.non_uber(0), 1);

        rig.off(0, 64);
        assert_eq!(rig.gated_keys(0), vec![60]);

        rig.off(0, 60);
        assert!(rig.gated_keys(0).is_empty());
        assert!(!rig.bank.scene(0).lfo(0).is_held());
    }

    #[test]
    fn highest_priority_ignores_lower_notes() {
        let mut rig = Rig::new();
        rig.settings.poly_mode[0] = PolyMode::Mono;
        rig.settings.priority[0] = MonoPriority::Highest;
        rig.on(0, 64);
        rig.on(0, 60);
        assert_eq!(rig.gated_keys(0), vec![64]);
        rig.off(0, 64);
        assert_eq!(rig.gated_keys(0), vec![60]);
    }

    #[test]
    fn latch_keeps_the_last_voice() {
        let mut rig = Rig::new();
        rig.settings.poly_mode[0] = PolyMode::Latch;
        rig.on(0, 60);
        rig.off(0, 60);
        assert_eq!(rig.gated_keys(0), vec![60]);
    }

    #[test]
    fn fingered_portamento_only_glides_on_legato() {
        let mut rig = Rig::new();
        rig.settings.poly_mode[0] = PolyMode::MonoFp;
        rig.settings.portamento[0] = 0.2;
        rig.on(0, 60);
        rig.on(0, 64);
        assert_eq!(rig.manager.last_key(0), 60);
        let voice = rig.manager.voices(0).find(|v| v.gate).map(|v| (v.key, v.porta_from));
        assert_eq!(voice, Some((64, 60.0)));
    }

    #[test]
    fn mono_st_repitches_in_place() {
        let mut rig = Rig::new();
        rig.settings.poly_mode[0] = PolyMode::MonoSt;
        rig.on(0, 60);
        rig.on(0, 67);
        assert_eq!(rig.manager.arena(0).len(), 1);
        assert_eq!(rig.gated_keys(0), vec![67]);
        assert_eq!(rig.manager.last_key(0), 67);

        rig.off(0, 67);
        assert_eq!(rig.gated_keys(0), vec![60]);
        let slot = rig.manager.arena(0).active()[0];
        let unit = rig.manager.arena(0).unit(slot);
        assert_eq!(unit.notes.len(), 1);
        assert_eq!(unit.legatos.len(), 2);
        assert_eq!(unit.legatos[1].porta_from, 67.0);
    }

    #[test]
    fn sustain_defers_release_until_pedal_up() {
        let mut rig = Rig::new();
        rig.pedal(0, true);
        rig.on(0, 60);
        rig.off(0, 60);
        assert_eq!(rig.gated_keys(0), vec![60]);
        assert_eq!(rig.manager.hold(0).len(), 1);

        rig.pedal(0, false);
        assert!(rig.gated_keys(0).is_empty());
        assert!(rig.manager.hold(0).is_empty());
    }

    #[test]
    fn held_note_offs_stay_with_the_scenes_that_play_them() {
        let mut rig = Rig::new();
        rig.pedal(0, true);
        for _ in 0..300 {
            rig.on(0, 60);
            rig.off(0, 60);
        }
        assert_eq!(rig.manager.hold(0).len(), 1);
        assert!(rig.manager.hold(1).is_empty());

        // a voice left behind by a scene switch still waits for the pedal
        rig.on(0, 64);
        rig.settings.active_scene = 1;
        rig.off(0, 64);
        assert_eq!(rig.manager.hold(0).len(), 2);
        assert_eq!(rig.manager.hold(1).len(), 1);

        rig.pedal(0, false);
        assert!(rig.gated_keys(0).is_empty());
        assert!(rig.manager.hold(0).is_empty());
    }

    #[test]
    fn restrike_under_pedal_keeps_only_newest_voice() {
        let mut rig = Rig::new();
        rig.pedal(0, true);
        rig.on(0, 60);
        rig.off(0, 60);
        rig.on(0, 60);
        assert_eq!(rig.gated_keys(0), vec![60, 60]);
        rig.pedal(0, false);

        let gated: Vec<u64> = rig
            .manager
            .voices(0)
            .filter(|v| v.gate)
            .map(|v| v.order)
            .collect();
        assert_eq!(gated, vec![2]);
    }

    #[test]
    fn mono_pedal_releases_when_others_held() {
        let mut rig = Rig::new();
        rig.settings.poly_mode[0] = PolyMode::Mono;
        rig.settings.pedal_mode[0] = MonoPedalMode::ReleaseIfOthersHeld;
        rig.pedal(0, true);
        rig.on(0, 60);
        rig.on(0, 64);
        rig.off(0, 64);
        assert_eq!(rig.gated_keys(0), vec![60]);
        assert!(rig.manager.hold(0).is_empty());
    }

    #[test]
    fn key_modulators_track_pressed_keys() {
        let mut rig = Rig::new();
        rig.on(0, 48);
        rig.on(0, 72);
        let mods = rig.bank.scene(0);
        assert_eq!(mods.lowest_key.output(), -1.0);
        assert_eq!(mods.highest_key.output(), 1.0);
        assert_eq!(mods.latest_key.output(), 1.0);

        rig.off(0, 72);
        rig.off(0, 48);
        // the last values stick once nothing is held
        assert_eq!(rig.bank.scene(0).lowest_key.output(), -1.0);
    }

    #[test]
    fn all_notes_off_releases_everything() {
        let mut rig = Rig::new();
        rig.settings.scene_mode = SceneMode::Dual;
        rig.on(0, 60);
        rig.on(3, 64);
        rig.manager.all_notes_off(&rig.settings, &mut rig.bank);
        assert_eq!(rig.manager.non_released(0), 0);
        assert_eq!(rig.manager.non_released(1), 0);
    }

    #[test]
    fn stop_sound_clears_state() {
        let mut rig = Rig::new();
        rig.pedal(0, true);
        rig.on(0, 60);
        rig.off(0, 60);
        rig.manager.stop_sound();
        assert_eq!(rig.manager.voice_count(), 0);
        assert!(rig.manager.hold(0).is_empty());
        assert!(!rig.manager.channels().get(0).hold);
    }
}
