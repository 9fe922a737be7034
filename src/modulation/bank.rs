use crate::{
    dsp::lfo::{BlockLfo, LfoShape},
    modulation::{
        controller::{ControllerSource, SmoothingMode},
        source::{ModulatorId, N_MACROS, N_MODULATORS},
    },
    patch::params::{SceneParam, N_SCENE_LFOS, N_VOICE_LFOS},
    BLOCK_SIZE, N_SCENES,
};

/// Small xorshift generator for the per-note random sources. Never allocates
/// and is deterministic per seed, which keeps tests reproducible.
#[derive(Debug, Clone)]
pub struct NoteRandom {
    state: u32,
}

impl NoteRandom {
    pub fn new(seed: u32) -> Self {
        Self { state: seed.max(1) }
    }

    /// Uniform value in 0..1.
    pub fn next_unipolar(&mut self) -> f32 {
        let mut x = self.state;
        x ^= x << 13;
        x ^= x >> 17;
        x ^= x << 5;
        self.state = x;
        (x >> 8) as f32 / (1u32 << 24) as f32
    }
}

/// Values drawn when a voice starts; the voice keeps its own copy.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct NoteDraw {
    pub random_bipolar: f32,
    pub random_unipolar: f32,
    pub alternate_bipolar: f32,
    pub alternate_unipolar: f32,
}

/// Scene-rate modulators of one scene.
#[derive(Debug, Clone)]
pub struct SceneModulators {
    pub mod_wheel: ControllerSource,
    pub breath: ControllerSource,
    pub expression: ControllerSource,
    pub sustain: ControllerSource,
    pub aftertouch: ControllerSource,
    pub pitch_bend: ControllerSource,
    pub lowest_key: ControllerSource,
    pub highest_key: ControllerSource,
    pub latest_key: ControllerSource,
    lfos: Vec<BlockLfo>,
    random: NoteRandom,
    draw: NoteDraw,
    do_process: [bool; N_MODULATORS],
}

impl SceneModulators {
    fn new(mode: SmoothingMode, sample_rate: f32, seed: u32) -> Self {
        let source = || ControllerSource::new(mode, sample_rate);
        Self {
            mod_wheel: source(),
            breath: source(),
            expression: source(),
            sustain: source(),
            aftertouch: source(),
            pitch_bend: source().bipolar(),
            lowest_key: source(),
            highest_key: source(),
            latest_key: source(),
            lfos: (0..N_SCENE_LFOS)
                .map(|_| BlockLfo::new(LfoShape::Sine, sample_rate, BLOCK_SIZE))
                .collect(),
            random: NoteRandom::new(seed),
            draw: NoteDraw {
                alternate_bipolar: -1.0,
                ..NoteDraw::default()
            },
            do_process: [false; N_MODULATORS],
        }
    }

    fn controller_mut(&mut self, id: ModulatorId) -> Option<&mut ControllerSource> {
        Some(match id {
            ModulatorId::ModWheel => &mut self.mod_wheel,
            ModulatorId::Breath => &mut self.breath,
            ModulatorId::Expression => &mut self.expression,
            ModulatorId::Sustain => &mut self.sustain,
            ModulatorId::Aftertouch => &mut self.aftertouch,
            ModulatorId::PitchBend => &mut self.pitch_bend,
            ModulatorId::LowestKey => &mut self.lowest_key,
            ModulatorId::HighestKey => &mut self.highest_key,
            ModulatorId::LatestKey => &mut self.latest_key,
            _ => return None,
        })
    }

    fn set_smoothing(&mut self, mode: SmoothingMode) {
        for id in [
            ModulatorId::ModWheel,
            ModulatorId::Breath,
            ModulatorId::Expression,
            ModulatorId::Sustain,
            ModulatorId::Aftertouch,
            ModulatorId::PitchBend,
            ModulatorId::LowestKey,
            ModulatorId::HighestKey,
            ModulatorId::LatestKey,
        ] {
            if let Some(source) = self.controller_mut(id) {
                source.set_mode(mode);
            }
        }
    }

    /// Draw a fresh set of per-note random values and flip the alternators.
    pub fn reroll(&mut self) -> NoteDraw {
        let u = self.random.next_unipolar();
        let b = self.random.next_unipolar();
        self.draw.random_unipolar = u;
        self.draw.random_bipolar = 2.0 * b - 1.0;
        self.draw.alternate_bipolar = -self.draw.alternate_bipolar;
        self.draw.alternate_unipolar = 1.0 - self.draw.alternate_unipolar;
        self.draw
    }

    pub fn draw(&self) -> NoteDraw {
        self.draw
    }

    pub fn attack_lfos(&mut self) {
        self.lfos.iter_mut().for_each(BlockLfo::attack);
    }

    pub fn release_lfos(&mut self) {
        self.lfos.iter_mut().for_each(BlockLfo::release);
    }

    pub fn lfo(&self, i: usize) -> &BlockLfo {
        &self.lfos[i]
    }

    pub fn clear_do_process(&mut self) {
        self.do_process = [false; N_MODULATORS];
    }

    pub fn mark(&mut self, id: ModulatorId) {
        self.do_process[id.index()] = true;
    }

    pub fn is_marked(&self, id: ModulatorId) -> bool {
        self.do_process[id.index()]
    }

    /// Advance the flagged sources one block. Pitch bend always runs, the
    /// voices read it for their base pitch.
    pub fn process(&mut self, scene_values: &[f32]) {
        for id in [
            ModulatorId::ModWheel,
            ModulatorId::Breath,
            ModulatorId::Expression,
            ModulatorId::Sustain,
            ModulatorId::Aftertouch,
            ModulatorId::LowestKey,
            ModulatorId::HighestKey,
            ModulatorId::LatestKey,
        ] {
            if self.do_process[id.index()] {
                if let Some(source) = self.controller_mut(id) {
                    source.process_block();
                }
            }
        }
        self.pitch_bend.process_block();

        for (i, lfo) in self.lfos.iter_mut().enumerate() {
            let Some(id) = ModulatorId::lfo(N_VOICE_LFOS + i) else {
                continue;
            };
            if self.do_process[id.index()] {
                let param = (N_VOICE_LFOS + i) as u8;
                let rate = scene_values[SceneParam::LfoRate(param).index()];
                let amplitude = scene_values[SceneParam::LfoAmplitude(param).index()];
                lfo.process_block(rate, amplitude);
            }
        }
    }

    fn output(&self, id: ModulatorId) -> f32 {
        match id {
            ModulatorId::ModWheel => self.mod_wheel.output(),
            ModulatorId::Breath => self.breath.output(),
            ModulatorId::Expression => self.expression.output(),
            ModulatorId::Sustain => self.sustain.output(),
            ModulatorId::Aftertouch => self.aftertouch.output(),
            ModulatorId::PitchBend => self.pitch_bend.output(),
            ModulatorId::LowestKey => self.lowest_key.output(),
            ModulatorId::HighestKey => self.highest_key.output(),
            ModulatorId::LatestKey => self.latest_key.output(),
            other => other
                .as_scene_lfo()
                .map_or(0.0, |i| self.lfos[i].output()),
        }
    }
}

/// All scene-rate modulation sources: the shared macros plus one
/// `SceneModulators` per scene.
#[derive(Debug, Clone)]
pub struct ModulatorBank {
    macros: [ControllerSource; N_MACROS],
    scenes: [SceneModulators; N_SCENES],
}

impl ModulatorBank {
    pub fn new(mode: SmoothingMode, sample_rate: f32) -> Self {
        Self {
            macros: std::array::from_fn(|_| ControllerSource::new(mode, sample_rate)),
            scenes: std::array::from_fn(|s| {
                SceneModulators::new(mode, sample_rate, 0x9E37_79B9 ^ (s as u32 + 1))
            }),
        }
    }

    pub fn set_smoothing(&mut self, mode: SmoothingMode) {
        self.macros.iter_mut().for_each(|m| m.set_mode(mode));
        self.scenes.iter_mut().for_each(|s| s.set_smoothing(mode));
    }

    pub fn scene(&self, scene: usize) -> &SceneModulators {
        &self.scenes[scene]
    }

    pub fn scene_mut(&mut self, scene: usize) -> &mut SceneModulators {
        &mut self.scenes[scene]
    }

    pub fn macro_source(&self, slot: usize) -> &ControllerSource {
        &self.macros[slot]
    }

    pub fn macro_mut(&mut self, slot: usize) -> &mut ControllerSource {
        &mut self.macros[slot]
    }

    /// Write the same controller target into both scenes.
    pub fn set_controller(&mut self, id: ModulatorId, target01: f32) {
        if let Some(slot) = id.as_macro() {
            self.macros[slot].set_target01(target01);
            return;
        }
        for scene in &mut self.scenes {
            if let Some(source) = scene.controller_mut(id) {
                source.set_target01(target01);
            }
        }
    }

    /// Scene-rate output of `id` as seen from `scene`. Voice-rate ids read 0.
    pub fn output(&self, scene: usize, id: ModulatorId) -> f32 {
        if let Some(slot) = id.as_macro() {
            return self.macros[slot].output();
        }
        self.scenes[scene].output(id)
    }

    /// Macros are shared, so they are advanced once regardless of scenes.
    pub fn process_macros(&mut self) {
        self.macros.iter_mut().for_each(ControllerSource::process_block);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::params::N_SCENE_PARAMS;

    fn bank() -> ModulatorBank {
        ModulatorBank::new(SmoothingMode::Direct, 48_000.0)
    }

    #[test]
    fn controllers_reach_both_scenes() {
        let mut bank = bank();
        bank.set_controller(ModulatorId::ModWheel, 0.5);
        let values = vec![0.0; N_SCENE_PARAMS];
        for scene in 0..N_SCENES {
            bank.scene_mut(scene).mark(ModulatorId::ModWheel);
            bank.scene_mut(scene).process(&values);
            assert_eq!(bank.output(scene, ModulatorId::ModWheel), 0.5);
        }
    }

    #[test]
    fn unflagged_sources_do_not_advance() {
        let mut bank = bank();
        bank.set_controller(ModulatorId::Breath, 1.0);
        let values = vec![0.0; N_SCENE_PARAMS];
        bank.scene_mut(0).clear_do_process();
        bank.scene_mut(0).process(&values);
        assert_eq!(bank.output(0, ModulatorId::Breath), 0.0);
    }

    #[test]
    fn pitch_bend_is_bipolar_and_always_runs() {
        let mut bank = bank();
        bank.set_controller(ModulatorId::PitchBend, 0.0);
        let values = vec![0.0; N_SCENE_PARAMS];
        bank.scene_mut(1).process(&values);
        assert_eq!(bank.output(1, ModulatorId::PitchBend), -1.0);
    }

    #[test]
    fn macros_are_shared() {
        let mut bank = bank();
        bank.set_controller(ModulatorId::Ctrl3, 0.75);
        bank.process_macros();
        assert_eq!(bank.output(0, ModulatorId::Ctrl3), 0.75);
        assert_eq!(bank.output(1, ModulatorId::Ctrl3), 0.75);
    }

    #[test]
    fn alternate_flips_on_every_roll() {
        let mut bank = bank();
        let first = bank.scene_mut(0).reroll();
        let second = bank.scene_mut(0).reroll();
        assert_eq!(first.alternate_bipolar, -second.alternate_bipolar);
        assert_eq!(first.alternate_unipolar + second.alternate_unipolar, 1.0);
        assert!((0.0..1.0).contains(&first.random_unipolar));
        assert!((-1.0..1.0).contains(&second.random_bipolar));
    }
}
