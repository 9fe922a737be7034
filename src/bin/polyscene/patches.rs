//! A handful of built-in patches so there is something to switch between.

use polyscene::{
    modulation::{ModulatorId, RoutingSpec},
    patch::{
        modes::{PolyMode, SceneMode},
        params::{GlobalParam, ParamId, SceneParam},
        store::MemoryPatchStore,
        Patch,
    },
};

fn scene(s: usize, param: SceneParam) -> ParamId {
    ParamId::scene(s, param)
}

fn mono_lead() -> Patch {
    let mut patch = Patch::named("mono lead");
    patch.set(scene(0, SceneParam::PolyMode), PolyMode::MonoFp.as_value());
    patch.set(scene(0, SceneParam::Portamento), 0.4);
    patch.set(scene(0, SceneParam::FilterCutoff), 20.0);
    patch.set(scene(0, SceneParam::FilterResonance), 0.6);
    patch.routings.push(RoutingSpec {
        param: scene(0, SceneParam::FilterCutoff),
        modulator: ModulatorId::Lfo1,
        source_scene: 0,
        depth: 0.2,
    });
    patch
}

fn split_pad() -> Patch {
    let mut patch = Patch::named("split pad");
    patch.set(ParamId::global(GlobalParam::SceneMode), SceneMode::KeySplit.as_value());
    patch.set(ParamId::global(GlobalParam::SplitPoint), 60.0);
    patch.set(scene(0, SceneParam::PolyMode), PolyMode::Mono.as_value());
    patch.set(scene(0, SceneParam::Octave), -1.0);
    patch.set(scene(1, SceneParam::FilterCutoff), 10.0);
    patch.set(scene(1, SceneParam::LowCutEnabled), 1.0);
    patch.set(scene(1, SceneParam::LowCut), 200.0);
    patch.routings.push(RoutingSpec {
        param: scene(1, SceneParam::Pan),
        modulator: ModulatorId::Lfo2,
        source_scene: 1,
        depth: 0.5,
    });
    patch
}

fn dual_latch() -> Patch {
    let mut patch = Patch::named("dual latch");
    patch.set(ParamId::global(GlobalParam::SceneMode), SceneMode::Dual.as_value());
    patch.set(scene(0, SceneParam::PolyMode), PolyMode::Latch.as_value());
    patch.set(scene(1, SceneParam::Pitch), 7.0);
    patch.routings.push(RoutingSpec {
        param: scene(1, SceneParam::FilterCutoff),
        modulator: ModulatorId::Velocity,
        source_scene: 1,
        depth: 0.3,
    });
    patch
}

pub fn builtin() -> MemoryPatchStore {
    MemoryPatchStore::new(vec![Patch::default(), mono_lead(), split_pad(), dual_latch()])
}

#[cfg(test)]
mod tests {
    use super::*;
    use polyscene::patch::store::PatchStore;

    #[test]
    fn builtin_patches_validate() {
        let store = builtin();
        for id in 0..store.patch_count() {
            assert!(store.load(id).is_ok(), "patch {id} is invalid");
        }
    }
}
