#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::ModulationError,
    modulation::source::ModulatorId,
    patch::params::{ControlGroup, ParamId, ParamScope, SceneParam, ValueKind},
    N_SCENES,
};

/*
Routing Matrix
==============

A routing is a weighted edge `source --depth--> destination`. Edges are kept
in three kinds of list, chosen when the edge is created:

  global      destination is a global parameter. Applied once per block;
              the entry also remembers which scene's copy of the source to
              read, since every scene owns its own controller sources.

  scene[s]    destination is in scene s, source is scene-rate. Applied once
              per block into the scene's working values.

  voice[s]    destination is in scene s, source is voice-rate. Applied per
              voice when its parameter snapshot is built.

Within one list a (source, destination) pair appears at most once; writing
a depth of exactly zero removes the edge instead of storing a dead row.

The whole matrix sits behind one mutex shared by the control thread (edits)
and the audio thread (application), see `engine::render`.
*/

const LIST_CAPACITY: usize = 64;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Routing {
    pub modulator: ModulatorId,
    /// Flat id for global routings, index inside the scene block otherwise.
    pub destination: usize,
    pub source_scene: usize,
    pub depth: f32,
}

/// Patch-level description of one routing, independent of list placement.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoutingSpec {
    pub param: ParamId,
    pub modulator: ModulatorId,
    pub source_scene: usize,
    pub depth: f32,
}

#[derive(Debug, Clone)]
pub struct RoutingList {
    entries: Vec<Routing>,
}

impl Default for RoutingList {
    fn default() -> Self {
        Self {
            entries: Vec::with_capacity(LIST_CAPACITY),
        }
    }
}

impl RoutingList {
    fn position(&self, modulator: ModulatorId, destination: usize, source_scene: usize) -> Option<usize> {
        self.entries.iter().position(|r| {
            r.modulator == modulator && r.destination == destination && r.source_scene == source_scene
        })
    }

    /// Insert, update or (for a zero depth) remove.
    pub fn set(&mut self, routing: Routing) {
        let existing = self.position(routing.modulator, routing.destination, routing.source_scene);
        match (existing, routing.depth == 0.0) {
            (Some(i), true) => {
                self.entries.remove(i);
            }
            (Some(i), false) => self.entries[i].depth = routing.depth,
            (None, true) => {}
            (None, false) => self.entries.push(routing),
        }
    }

    pub fn remove(&mut self, modulator: ModulatorId, destination: usize, source_scene: usize) -> bool {
        match self.position(modulator, destination, source_scene) {
            Some(i) => {
                self.entries.remove(i);
                true
            }
            None => false,
        }
    }

    pub fn depth(&self, modulator: ModulatorId, destination: usize, source_scene: usize) -> f32 {
        self.position(modulator, destination, source_scene)
            .map_or(0.0, |i| self.entries[i].depth)
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Routing> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoutingTier {
    Global,
    Scene(usize),
    Voice(usize),
}

/// Where a `(param, modulator)` edge lives and its destination key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RoutingSlot {
    pub tier: RoutingTier,
    pub destination: usize,
    pub source_scene: usize,
}

/// Structural validity of a `(param, modulator)` pair.
pub fn is_valid_modulation(param: ParamId, modulator: ModulatorId) -> bool {
    if modulator == ModulatorId::None {
        return false;
    }
    let (Some(info), Some(scope)) = (param.info(), param.scope()) else {
        return false;
    };
    if !info.modulatable || info.kind != ValueKind::Float {
        return false;
    }
    if !info.per_voice && !modulator.can_modulate_monophonic() {
        return false;
    }
    if modulator == ModulatorId::Keytrack
        && matches!(scope, ParamScope::Scene { param: SceneParam::Pitch, .. })
    {
        return false;
    }
    match (info.group, info.group_entry) {
        (ControlGroup::Lfo, Some(owner)) => {
            if owner == modulator {
                return false;
            }
            if owner.as_scene_lfo().is_some() && !modulator.is_scene_level() {
                return false;
            }
        }
        (ControlGroup::Envelope, _) if modulator.is_envelope() => return false,
        _ => {}
    }
    true
}

#[derive(Debug, Clone, Default)]
pub struct RoutingMatrix {
    global: RoutingList,
    scene: [RoutingList; N_SCENES],
    voice: [RoutingList; N_SCENES],
}

impl RoutingMatrix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_specs(specs: &[RoutingSpec]) -> Result<Self, ModulationError> {
        let mut matrix = Self::new();
        for spec in specs {
            matrix.set_modulation(spec.param, spec.modulator, spec.source_scene, spec.depth)?;
        }
        Ok(matrix)
    }

    /// Pick the list and destination key for an edge, or `None` if invalid.
    pub fn slot_for(param: ParamId, modulator: ModulatorId, source_scene: usize) -> Option<RoutingSlot> {
        if !is_valid_modulation(param, modulator) {
            return None;
        }
        match param.scope()? {
            ParamScope::Global(_) => Some(RoutingSlot {
                tier: RoutingTier::Global,
                destination: param.index(),
                source_scene,
            }),
            ParamScope::Scene { scene, param } => Some(RoutingSlot {
                tier: if modulator.is_scene_level() {
                    RoutingTier::Scene(scene)
                } else {
                    RoutingTier::Voice(scene)
                },
                destination: param.index(),
                source_scene: scene,
            }),
        }
    }

    fn list_mut(&mut self, tier: RoutingTier) -> &mut RoutingList {
        match tier {
            RoutingTier::Global => &mut self.global,
            RoutingTier::Scene(s) => &mut self.scene[s],
            RoutingTier::Voice(s) => &mut self.voice[s],
        }
    }

    fn list(&self, tier: RoutingTier) -> &RoutingList {
        match tier {
            RoutingTier::Global => &self.global,
            RoutingTier::Scene(s) => &self.scene[s],
            RoutingTier::Voice(s) => &self.voice[s],
        }
    }

    pub fn set_modulation(
        &mut self,
        param: ParamId,
        modulator: ModulatorId,
        source_scene: usize,
        depth: f32,
    ) -> Result<(), ModulationError> {
        if source_scene >= N_SCENES {
            return Err(ModulationError::NoSuchScene(source_scene));
        }
        if !depth.is_finite() {
            return Err(ModulationError::NonFiniteDepth(depth));
        }
        let slot = Self::slot_for(param, modulator, source_scene)
            .ok_or(ModulationError::InvalidRouting { param, modulator })?;
        self.list_mut(slot.tier).set(Routing {
            modulator,
            destination: slot.destination,
            source_scene: slot.source_scene,
            depth,
        });
        Ok(())
    }

    pub fn clear_modulation(&mut self, param: ParamId, modulator: ModulatorId, source_scene: usize) -> bool {
        match Self::slot_for(param, modulator, source_scene) {
            Some(slot) => self
                .list_mut(slot.tier)
                .remove(modulator, slot.destination, slot.source_scene),
            None => false,
        }
    }

    pub fn modulation_depth(&self, param: ParamId, modulator: ModulatorId, source_scene: usize) -> f32 {
        Self::slot_for(param, modulator, source_scene).map_or(0.0, |slot| {
            self.list(slot.tier)
                .depth(modulator, slot.destination, slot.source_scene)
        })
    }

    pub fn global(&self) -> &RoutingList {
        &self.global
    }

    pub fn scene(&self, scene: usize) -> &RoutingList {
        &self.scene[scene]
    }

    pub fn voice(&self, scene: usize) -> &RoutingList {
        &self.voice[scene]
    }

    pub fn len(&self) -> usize {
        self.global.len()
            + self.scene.iter().map(RoutingList::len).sum::<usize>()
            + self.voice.iter().map(RoutingList::len).sum::<usize>()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&mut self) {
        self.global.clear();
        self.scene.iter_mut().for_each(RoutingList::clear);
        self.voice.iter_mut().for_each(RoutingList::clear);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::params::{EnvStage, GlobalParam};

    fn cutoff(scene: usize) -> ParamId {
        ParamId::scene(scene, SceneParam::FilterCutoff)
    }

    #[test]
    fn depth_round_trips() {
        let mut matrix = RoutingMatrix::new();
        matrix
            .set_modulation(cutoff(0), ModulatorId::Velocity, 0, 12.5)
            .expect("valid routing");
        assert_eq!(matrix.modulation_depth(cutoff(0), ModulatorId::Velocity, 0), 12.5);
        assert_eq!(matrix.voice(0).len(), 1);
        assert!(matrix.scene(0).is_empty());
    }

    #[test]
    fn zero_depth_removes_the_entry() {
        let mut matrix = RoutingMatrix::new();
        matrix
            .set_modulation(cutoff(1), ModulatorId::ModWheel, 1, 3.0)
            .expect("valid routing");
        assert_eq!(matrix.scene(1).len(), 1);

        matrix
            .set_modulation(cutoff(1), ModulatorId::ModWheel, 1, 0.0)
            .expect("valid routing");
        assert_eq!(matrix.modulation_depth(cutoff(1), ModulatorId::ModWheel, 1), 0.0);
        assert!(matrix.is_empty());
    }

    #[test]
    fn updating_keeps_one_entry_per_pair() {
        let mut matrix = RoutingMatrix::new();
        for depth in [1.0, 2.0, -3.0] {
            matrix
                .set_modulation(cutoff(0), ModulatorId::Lfo1, 0, depth)
                .expect("valid routing");
        }
        assert_eq!(matrix.voice(0).len(), 1);
        assert_eq!(matrix.modulation_depth(cutoff(0), ModulatorId::Lfo1, 0), -3.0);
    }

    #[test]
    fn global_routings_are_keyed_by_source_scene() {
        let mut matrix = RoutingMatrix::new();
        let volume = ParamId::global(GlobalParam::MasterVolume);
        matrix
            .set_modulation(volume, ModulatorId::SLfo1, 0, -6.0)
            .expect("valid routing");
        matrix
            .set_modulation(volume, ModulatorId::SLfo1, 1, -3.0)
            .expect("valid routing");
        assert_eq!(matrix.global().len(), 2);
        assert_eq!(matrix.modulation_depth(volume, ModulatorId::SLfo1, 1), -3.0);
        assert!(matrix.clear_modulation(volume, ModulatorId::SLfo1, 0));
        assert!(!matrix.clear_modulation(volume, ModulatorId::SLfo1, 0));
        assert_eq!(matrix.global().len(), 1);
    }

    #[test]
    fn invalid_pairs_are_rejected_without_mutation() {
        let mut matrix = RoutingMatrix::new();
        let pitch = ParamId::scene(0, SceneParam::Pitch);
        let err = matrix
            .set_modulation(pitch, ModulatorId::Keytrack, 0, 1.0)
            .unwrap_err();
        assert_eq!(
            err,
            ModulationError::InvalidRouting {
                param: pitch,
                modulator: ModulatorId::Keytrack
            }
        );
        assert!(matrix.is_empty());
        assert!(matrix
            .set_modulation(cutoff(0), ModulatorId::Velocity, 0, f32::NAN)
            .is_err());
    }

    #[test]
    fn validity_rules() {
        let send = ParamId::scene(0, SceneParam::SendLevel(0));
        let amp_attack = ParamId::scene(0, SceneParam::AmpEg(EnvStage::Attack));
        let lfo1_rate = ParamId::scene(0, SceneParam::LfoRate(0));
        let slfo1_rate = ParamId::scene(0, SceneParam::LfoRate(6));
        let poly_mode = ParamId::scene(0, SceneParam::PolyMode);

        assert!(!is_valid_modulation(cutoff(0), ModulatorId::None));
        assert!(!is_valid_modulation(ParamId::from_raw(9999), ModulatorId::Velocity));
        assert!(!is_valid_modulation(poly_mode, ModulatorId::ModWheel));

        assert!(is_valid_modulation(send, ModulatorId::ModWheel));
        assert!(is_valid_modulation(send, ModulatorId::Aftertouch));
        assert!(!is_valid_modulation(send, ModulatorId::Velocity));

        assert!(!is_valid_modulation(amp_attack, ModulatorId::FilterEg));
        assert!(is_valid_modulation(amp_attack, ModulatorId::Velocity));

        assert!(!is_valid_modulation(lfo1_rate, ModulatorId::Lfo1));
        assert!(is_valid_modulation(lfo1_rate, ModulatorId::Lfo2));
        assert!(!is_valid_modulation(slfo1_rate, ModulatorId::Velocity));
        assert!(is_valid_modulation(slfo1_rate, ModulatorId::SLfo2));
        assert!(!is_valid_modulation(slfo1_rate, ModulatorId::SLfo1));

        let pitch_b = ParamId::scene(1, SceneParam::Pitch);
        assert!(!is_valid_modulation(pitch_b, ModulatorId::Keytrack));
        assert!(is_valid_modulation(pitch_b, ModulatorId::PitchBend));
    }
}
