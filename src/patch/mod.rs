//! Patch snapshot: every parameter value plus the modulation routings.

pub mod modes;
pub mod params;
pub mod store;
pub mod tuning;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use crate::{
    error::PatchError,
    modulation::routing::{is_valid_modulation, RoutingSpec},
    N_SCENES,
};

use self::{
    modes::{FxBypass, MonoPedalMode, MonoPriority, PolyMode, SceneMode},
    params::{GlobalParam, ParamId, SceneParam, N_PARAMS},
};

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, PartialEq)]
pub struct Patch {
    pub name: String,
    /// Plain values indexed by `ParamId::index`.
    pub values: Vec<f32>,
    pub routings: Vec<RoutingSpec>,
}

impl Default for Patch {
    fn default() -> Self {
        Self::named("init")
    }
}

impl Patch {
    /// Every parameter at its default, no routings.
    pub fn named(name: &str) -> Self {
        let values = (0..N_PARAMS)
            .map(|i| {
                ParamId::from_raw(i as u16)
                    .info()
                    .map_or(0.0, |info| info.default)
            })
            .collect();
        Self {
            name: name.to_string(),
            values,
            routings: Vec::new(),
        }
    }

    pub fn get(&self, id: ParamId) -> f32 {
        self.values[id.index()]
    }

    /// Store a plain value, clamped to the parameter's range. Returns the
    /// value actually stored, or `None` for an unknown id.
    pub fn set(&mut self, id: ParamId, value: f32) -> Option<f32> {
        let info = id.info()?;
        let value = info.clamp(value);
        self.values[id.index()] = value;
        Some(value)
    }

    pub fn get01(&self, id: ParamId) -> f32 {
        id.info().map_or(0.0, |info| info.to_normalized(self.get(id)))
    }

    pub fn set01(&mut self, id: ParamId, normalized: f32) -> Option<f32> {
        let info = id.info()?;
        self.set(id, info.to_plain(normalized))
    }

    /// Check the snapshot is usable before it replaces the live one.
    pub fn validate(&self, id: usize) -> Result<(), PatchError> {
        if self.values.len() != N_PARAMS {
            return Err(PatchError::ParameterCount {
                id,
                found: self.values.len(),
                expected: N_PARAMS,
            });
        }
        if let Some(bad) = self.values.iter().position(|v| !v.is_finite()) {
            return Err(PatchError::Malformed {
                id,
                reason: format!("parameter {bad} is not finite"),
            });
        }
        for routing in &self.routings {
            if routing.source_scene >= N_SCENES
                || !routing.depth.is_finite()
                || !is_valid_modulation(routing.param, routing.modulator)
            {
                return Err(PatchError::Malformed {
                    id,
                    reason: format!(
                        "routing {:?} -> {:?} is not allowed",
                        routing.modulator, routing.param
                    ),
                });
            }
        }
        Ok(())
    }

    pub fn copy_values_from(&mut self, other: &Patch) {
        self.name.clone_from(&other.name);
        self.values.copy_from_slice(&other.values);
        self.routings.clone_from(&other.routings);
    }

    fn global(&self, param: GlobalParam) -> f32 {
        self.get(ParamId::global(param))
    }

    fn scene_value(&self, scene: usize, param: SceneParam) -> f32 {
        self.get(ParamId::scene(scene, param))
    }

    pub fn scene_mode(&self) -> SceneMode {
        SceneMode::from_value(self.global(GlobalParam::SceneMode))
    }

    pub fn active_scene(&self) -> usize {
        (self.global(GlobalParam::ActiveScene).round().max(0.0) as usize).min(N_SCENES - 1)
    }

    pub fn split_point(&self) -> u8 {
        self.global(GlobalParam::SplitPoint).round().clamp(0.0, 127.0) as u8
    }

    pub fn poly_limit(&self) -> usize {
        self.global(GlobalParam::PolyLimit).round().max(1.0) as usize
    }

    pub fn fx_bypass(&self) -> FxBypass {
        FxBypass::from_value(self.global(GlobalParam::FxBypass))
    }

    pub fn fx_disable(&self) -> u8 {
        self.global(GlobalParam::FxDisable).round().clamp(0.0, 255.0) as u8
    }

    pub fn poly_mode(&self, scene: usize) -> PolyMode {
        PolyMode::from_value(self.scene_value(scene, SceneParam::PolyMode))
    }

    pub fn mono_priority(&self, scene: usize) -> MonoPriority {
        MonoPriority::from_value(self.scene_value(scene, SceneParam::MonoPriority))
    }

    pub fn pedal_mode(&self, scene: usize) -> MonoPedalMode {
        MonoPedalMode::from_value(self.scene_value(scene, SceneParam::MonoPedalMode))
    }

    pub fn portamento(&self, scene: usize) -> f32 {
        self.scene_value(scene, SceneParam::Portamento)
    }

    pub fn osc_type(&self, scene: usize) -> usize {
        self.scene_value(scene, SceneParam::OscType).round().max(0.0) as usize
    }

    pub fn low_cut_enabled(&self, scene: usize) -> bool {
        self.scene_value(scene, SceneParam::LowCutEnabled) > 0.5
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modulation::source::ModulatorId;

    #[test]
    fn init_patch_uses_defaults() {
        let patch = Patch::default();
        assert_eq!(patch.values.len(), N_PARAMS);
        assert_eq!(patch.poly_limit(), 16);
        assert_eq!(patch.split_point(), 60);
        assert_eq!(patch.scene_mode(), SceneMode::Single);
        assert_eq!(patch.poly_mode(1), PolyMode::Poly);
        assert!(patch.validate(0).is_ok());
    }

    #[test]
    fn set_clamps_and_snaps() {
        let mut patch = Patch::default();
        let limit = ParamId::global(GlobalParam::PolyLimit);
        assert_eq!(patch.set(limit, 200.0), Some(64.0));
        assert_eq!(patch.set(ParamId::from_raw(u16::MAX), 1.0), None);
        patch.set01(ParamId::scene(0, SceneParam::PolyMode), 1.0);
        assert_eq!(patch.poly_mode(0), PolyMode::Latch);
    }

    #[test]
    fn invalid_routings_fail_validation() {
        let mut patch = Patch::default();
        patch.routings.push(RoutingSpec {
            param: ParamId::scene(0, SceneParam::Pitch),
            modulator: ModulatorId::Keytrack,
            source_scene: 0,
            depth: 1.0,
        });
        assert!(matches!(
            patch.validate(4),
            Err(PatchError::Malformed { id: 4, .. })
        ));
    }
}
