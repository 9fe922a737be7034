#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{modulation::source::ModulatorId, N_SCENES};

/*
Parameter Layout
================

Every parameter has one flat id. Globals come first, then one block per
scene with an identical layout:

    0 .. N_GLOBAL_PARAMS                         global parameters
    N_GLOBAL_PARAMS + s * N_SCENE_PARAMS .. +N   scene s (s = 0 for A, 1 for B)

Routing destinations are stored relative to their scope: a global routing
keeps the flat id, a scene routing keeps the index inside the scene block
(`ParamId::index_in_scene`). That way both scenes share one table of
per-scene working values with the same indexing.

Values are stored in plain units (dB, seconds, semitones, Hz). The
normalized 0..1 form is only used for host/MIDI style writes and by the
control interpolators.
*/

pub const N_SENDS: usize = 2;
pub const N_VOICE_LFOS: usize = 6;
pub const N_SCENE_LFOS: usize = 6;
pub const N_LFOS: usize = N_VOICE_LFOS + N_SCENE_LFOS;

pub const N_GLOBAL_PARAMS: usize = 9;
pub const N_SCENE_PARAMS: usize = 48;
pub const N_PARAMS: usize = N_GLOBAL_PARAMS + N_SCENES * N_SCENE_PARAMS;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalParam {
    MasterVolume,
    ActiveScene,
    SceneMode,
    SplitPoint,
    PolyLimit,
    FxBypass,
    FxDisable,
    SendReturn(u8),
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EnvStage {
    Attack,
    Decay,
    Sustain,
    Release,
}

impl EnvStage {
    const fn offset(self) -> usize {
        match self {
            EnvStage::Attack => 0,
            EnvStage::Decay => 1,
            EnvStage::Sustain => 2,
            EnvStage::Release => 3,
        }
    }

    const fn from_offset(offset: usize) -> Self {
        match offset {
            0 => EnvStage::Attack,
            1 => EnvStage::Decay,
            2 => EnvStage::Sustain,
            _ => EnvStage::Release,
        }
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SceneParam {
    Pitch,
    Octave,
    PolyMode,
    MonoPriority,
    MonoPedalMode,
    Portamento,
    OscType,
    Volume,
    Pan,
    SendLevel(u8),
    FilterCutoff,
    FilterResonance,
    FilterEgAmount,
    AmpEg(EnvStage),
    FilterEg(EnvStage),
    /// Rate of LFO `i`; 0..6 are voice LFOs, 6..12 scene LFOs.
    LfoRate(u8),
    LfoAmplitude(u8),
    LowCut,
    LowCutEnabled,
}

const SEND_LEVEL_BASE: usize = 9;
const FILTER_CUTOFF: usize = SEND_LEVEL_BASE + N_SENDS;
const AMP_EG_BASE: usize = FILTER_CUTOFF + 3;
const FILTER_EG_BASE: usize = AMP_EG_BASE + 4;
const LFO_RATE_BASE: usize = FILTER_EG_BASE + 4;
const LFO_AMP_BASE: usize = LFO_RATE_BASE + N_LFOS;
const LOW_CUT: usize = LFO_AMP_BASE + N_LFOS;

impl GlobalParam {
    pub const fn index(self) -> usize {
        match self {
            GlobalParam::MasterVolume => 0,
            GlobalParam::ActiveScene => 1,
            GlobalParam::SceneMode => 2,
            GlobalParam::SplitPoint => 3,
            GlobalParam::PolyLimit => 4,
            GlobalParam::FxBypass => 5,
            GlobalParam::FxDisable => 6,
            GlobalParam::SendReturn(i) => 7 + i as usize,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Some(match index {
            0 => GlobalParam::MasterVolume,
            1 => GlobalParam::ActiveScene,
            2 => GlobalParam::SceneMode,
            3 => GlobalParam::SplitPoint,
            4 => GlobalParam::PolyLimit,
            5 => GlobalParam::FxBypass,
            6 => GlobalParam::FxDisable,
            7..=8 => GlobalParam::SendReturn((index - 7) as u8),
            _ => return None,
        })
    }

    pub fn info(self) -> ParamInfo {
        use ValueKind::*;
        match self {
            GlobalParam::MasterVolume => ParamInfo::float("master volume", -48.0, 12.0, 0.0)
                .modulated(false),
            GlobalParam::ActiveScene => ParamInfo::fixed("active scene", Int, 0.0, 1.0, 0.0),
            GlobalParam::SceneMode => ParamInfo::fixed("scene mode", Int, 0.0, 3.0, 0.0),
            GlobalParam::SplitPoint => ParamInfo::fixed("split point", Int, 0.0, 127.0, 60.0),
            GlobalParam::PolyLimit => ParamInfo::fixed("polyphony", Int, 1.0, 64.0, 16.0),
            GlobalParam::FxBypass => ParamInfo::fixed("fx bypass", Int, 0.0, 3.0, 0.0),
            GlobalParam::FxDisable => ParamInfo::fixed("fx disable", Int, 0.0, 255.0, 0.0),
            GlobalParam::SendReturn(_) => {
                ParamInfo::float("send return", 0.0, 1.0, 1.0).modulated(false)
            }
        }
    }
}

impl SceneParam {
    pub const fn index(self) -> usize {
        match self {
            SceneParam::Pitch => 0,
            SceneParam::Octave => 1,
            SceneParam::PolyMode => 2,
            SceneParam::MonoPriority => 3,
            SceneParam::MonoPedalMode => 4,
            SceneParam::Portamento => 5,
            SceneParam::OscType => 6,
            SceneParam::Volume => 7,
            SceneParam::Pan => 8,
            SceneParam::SendLevel(i) => SEND_LEVEL_BASE + i as usize,
            SceneParam::FilterCutoff => FILTER_CUTOFF,
            SceneParam::FilterResonance => FILTER_CUTOFF + 1,
            SceneParam::FilterEgAmount => FILTER_CUTOFF + 2,
            SceneParam::AmpEg(stage) => AMP_EG_BASE + stage.offset(),
            SceneParam::FilterEg(stage) => FILTER_EG_BASE + stage.offset(),
            SceneParam::LfoRate(i) => LFO_RATE_BASE + i as usize,
            SceneParam::LfoAmplitude(i) => LFO_AMP_BASE + i as usize,
            SceneParam::LowCut => LOW_CUT,
            SceneParam::LowCutEnabled => LOW_CUT + 1,
        }
    }

    pub fn from_index(index: usize) -> Option<Self> {
        Some(match index {
            0 => SceneParam::Pitch,
            1 => SceneParam::Octave,
            2 => SceneParam::PolyMode,
            3 => SceneParam::MonoPriority,
            4 => SceneParam::MonoPedalMode,
            5 => SceneParam::Portamento,
            6 => SceneParam::OscType,
            7 => SceneParam::Volume,
            8 => SceneParam::Pan,
            i if i < FILTER_CUTOFF => SceneParam::SendLevel((i - SEND_LEVEL_BASE) as u8),
            i if i == FILTER_CUTOFF => SceneParam::FilterCutoff,
            i if i == FILTER_CUTOFF + 1 => SceneParam::FilterResonance,
            i if i == FILTER_CUTOFF + 2 => SceneParam::FilterEgAmount,
            i if i < FILTER_EG_BASE => SceneParam::AmpEg(EnvStage::from_offset(i - AMP_EG_BASE)),
            i if i < LFO_RATE_BASE => {
                SceneParam::FilterEg(EnvStage::from_offset(i - FILTER_EG_BASE))
            }
            i if i < LFO_AMP_BASE => SceneParam::LfoRate((i - LFO_RATE_BASE) as u8),
            i if i < LOW_CUT => SceneParam::LfoAmplitude((i - LFO_AMP_BASE) as u8),
            i if i == LOW_CUT => SceneParam::LowCut,
            i if i == LOW_CUT + 1 => SceneParam::LowCutEnabled,
            _ => return None,
        })
    }

    pub fn info(self) -> ParamInfo {
        use ValueKind::*;
        match self {
            SceneParam::Pitch => ParamInfo::float("pitch", -7.0, 7.0, 0.0),
            SceneParam::Octave => ParamInfo::fixed("octave", Int, -3.0, 3.0, 0.0),
            SceneParam::PolyMode => ParamInfo::fixed("play mode", Int, 0.0, 5.0, 0.0),
            SceneParam::MonoPriority => ParamInfo::fixed("mono priority", Int, 0.0, 3.0, 0.0),
            SceneParam::MonoPedalMode => ParamInfo::fixed("mono pedal", Int, 0.0, 1.0, 0.0),
            SceneParam::Portamento => ParamInfo::float("portamento", 0.0, 4.0, 0.0),
            SceneParam::OscType => ParamInfo::fixed("osc type", Int, 0.0, 3.0, 1.0),
            SceneParam::Volume => ParamInfo::float("volume", 0.0, 1.0, 0.8),
            SceneParam::Pan => ParamInfo::float("pan", -1.0, 1.0, 0.0),
            SceneParam::SendLevel(_) => {
                ParamInfo::float("send level", 0.0, 1.0, 0.0).modulated(false)
            }
            SceneParam::FilterCutoff => {
                ParamInfo::float("cutoff", -60.0, 70.0, 36.0).grouped(ControlGroup::Filter, None)
            }
            SceneParam::FilterResonance => ParamInfo::float("resonance", 0.0, 0.95, 0.2)
                .grouped(ControlGroup::Filter, None),
            SceneParam::FilterEgAmount => ParamInfo::float("filter eg amount", -48.0, 48.0, 0.0)
                .grouped(ControlGroup::Filter, None),
            SceneParam::AmpEg(stage) => envelope_info("amp eg", stage, ModulatorId::AmpEg),
            SceneParam::FilterEg(stage) => {
                envelope_info("filter eg", stage, ModulatorId::FilterEg)
            }
            SceneParam::LfoRate(i) => {
                lfo_info(ParamInfo::float("lfo rate", 0.01, 50.0, 1.0), i)
            }
            SceneParam::LfoAmplitude(i) => {
                lfo_info(ParamInfo::float("lfo amplitude", -1.0, 1.0, 1.0), i)
            }
            SceneParam::LowCut => ParamInfo::float("low cut", 5.0, 2000.0, 20.0).modulated(false),
            SceneParam::LowCutEnabled => ParamInfo::fixed("low cut on", Bool, 0.0, 1.0, 0.0),
        }
    }
}

fn envelope_info(name: &'static str, stage: EnvStage, eg: ModulatorId) -> ParamInfo {
    let info = match stage {
        EnvStage::Attack => ParamInfo::float(name, 0.0, 10.0, 0.005),
        EnvStage::Decay => ParamInfo::float(name, 0.0, 10.0, 0.2),
        EnvStage::Sustain => ParamInfo::float(name, 0.0, 1.0, 0.8),
        EnvStage::Release => ParamInfo::float(name, 0.0, 10.0, 0.25),
    };
    info.grouped(ControlGroup::Envelope, Some(eg))
}

fn lfo_info(info: ParamInfo, lfo: u8) -> ParamInfo {
    let entry = ModulatorId::lfo(lfo as usize);
    let info = info.grouped(ControlGroup::Lfo, entry);
    if (lfo as usize) < N_VOICE_LFOS {
        info
    } else {
        info.modulated(false)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    Float,
    Int,
    Bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlGroup {
    Global,
    Scene,
    Filter,
    Envelope,
    Lfo,
}

/// Static description of one parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParamInfo {
    pub name: &'static str,
    pub kind: ValueKind,
    pub min: f32,
    pub max: f32,
    pub default: f32,
    pub modulatable: bool,
    /// Evaluated separately for every voice; monophonic parameters are
    /// evaluated once per scene or once globally.
    pub per_voice: bool,
    pub group: ControlGroup,
    /// For envelope and LFO parameters, the modulator they belong to.
    pub group_entry: Option<ModulatorId>,
}

impl ParamInfo {
    const fn float(name: &'static str, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            kind: ValueKind::Float,
            min,
            max,
            default,
            modulatable: true,
            per_voice: true,
            group: ControlGroup::Scene,
            group_entry: None,
        }
    }

    const fn fixed(name: &'static str, kind: ValueKind, min: f32, max: f32, default: f32) -> Self {
        Self {
            name,
            kind,
            min,
            max,
            default,
            modulatable: false,
            per_voice: false,
            group: ControlGroup::Scene,
            group_entry: None,
        }
    }

    const fn modulated(mut self, per_voice: bool) -> Self {
        self.per_voice = per_voice;
        self
    }

    const fn grouped(mut self, group: ControlGroup, entry: Option<ModulatorId>) -> Self {
        self.group = group;
        self.group_entry = entry;
        self
    }

    /// Clamp a plain value into range, snapping discrete kinds to integers.
    pub fn clamp(&self, value: f32) -> f32 {
        let value = if value.is_finite() { value } else { self.default };
        let value = value.clamp(self.min, self.max);
        match self.kind {
            ValueKind::Float => value,
            ValueKind::Int | ValueKind::Bool => value.round(),
        }
    }

    pub fn to_plain(&self, normalized: f32) -> f32 {
        self.clamp(self.min + normalized.clamp(0.0, 1.0) * (self.max - self.min))
    }

    pub fn to_normalized(&self, plain: f32) -> f32 {
        let span = self.max - self.min;
        if span <= 0.0 {
            return 0.0;
        }
        ((plain - self.min) / span).clamp(0.0, 1.0)
    }
}

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ParamScope {
    Global(GlobalParam),
    Scene { scene: usize, param: SceneParam },
}

/// Flat parameter id across the whole patch.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ParamId(u16);

impl ParamId {
    pub const fn global(param: GlobalParam) -> Self {
        Self(param.index() as u16)
    }

    pub const fn scene(scene: usize, param: SceneParam) -> Self {
        Self((N_GLOBAL_PARAMS + scene * N_SCENE_PARAMS + param.index()) as u16)
    }

    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    pub const fn raw(self) -> u16 {
        self.0
    }

    pub const fn index(self) -> usize {
        self.0 as usize
    }

    pub const fn is_valid(self) -> bool {
        (self.0 as usize) < N_PARAMS
    }

    pub fn scope(self) -> Option<ParamScope> {
        let index = self.index();
        if index < N_GLOBAL_PARAMS {
            return GlobalParam::from_index(index).map(ParamScope::Global);
        }
        if index >= N_PARAMS {
            return None;
        }
        let local = index - N_GLOBAL_PARAMS;
        let scene = local / N_SCENE_PARAMS;
        SceneParam::from_index(local % N_SCENE_PARAMS).map(|param| ParamScope::Scene { scene, param })
    }

    pub fn scene_index(self) -> Option<usize> {
        match self.scope()? {
            ParamScope::Scene { scene, .. } => Some(scene),
            ParamScope::Global(_) => None,
        }
    }

    /// Index inside the scene block, used as a scene/voice routing destination.
    pub fn index_in_scene(self) -> Option<usize> {
        match self.scope()? {
            ParamScope::Scene { param, .. } => Some(param.index()),
            ParamScope::Global(_) => None,
        }
    }

    pub fn info(self) -> Option<ParamInfo> {
        Some(match self.scope()? {
            ParamScope::Global(param) => {
                let mut info = param.info();
                info.group = ControlGroup::Global;
                info
            }
            ParamScope::Scene { param, .. } => param.info(),
        })
    }

    pub fn is_global(self) -> bool {
        matches!(self.scope(), Some(ParamScope::Global(_)))
    }
}

impl From<GlobalParam> for ParamId {
    fn from(param: GlobalParam) -> Self {
        ParamId::global(param)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scene_indices_round_trip() {
        for index in 0..N_SCENE_PARAMS {
            let param = SceneParam::from_index(index).expect("index in range");
            assert_eq!(param.index(), index, "{param:?}");
        }
        assert_eq!(SceneParam::from_index(N_SCENE_PARAMS), None);
    }

    #[test]
    fn global_indices_round_trip() {
        for index in 0..N_GLOBAL_PARAMS {
            let param = GlobalParam::from_index(index).expect("index in range");
            assert_eq!(param.index(), index);
        }
    }

    #[test]
    fn flat_ids_resolve_to_their_scope() {
        let id = ParamId::scene(1, SceneParam::FilterCutoff);
        assert_eq!(
            id.scope(),
            Some(ParamScope::Scene {
                scene: 1,
                param: SceneParam::FilterCutoff
            })
        );
        assert_eq!(id.index_in_scene(), Some(SceneParam::FilterCutoff.index()));

        let master = ParamId::global(GlobalParam::MasterVolume);
        assert!(master.is_global());
        assert_eq!(master.index_in_scene(), None);

        assert!(!ParamId::from_raw(N_PARAMS as u16).is_valid());
        assert_eq!(ParamId::from_raw(N_PARAMS as u16).info(), None);
    }

    #[test]
    fn lfo_parameters_know_their_owner() {
        let info = SceneParam::LfoRate(2).info();
        assert_eq!(info.group, ControlGroup::Lfo);
        assert_eq!(info.group_entry, Some(ModulatorId::Lfo3));

        let info = SceneParam::LfoRate(7).info();
        assert_eq!(info.group_entry, Some(ModulatorId::SLfo2));
        assert!(!info.per_voice);
    }

    #[test]
    fn discrete_values_snap() {
        let info = GlobalParam::SplitPoint.info();
        assert_eq!(info.clamp(63.6), 64.0);
        assert_eq!(info.clamp(500.0), 127.0);
        assert_eq!(info.to_plain(0.5), 64.0);
        assert_eq!(info.clamp(f32::NAN), 60.0);
    }
}
