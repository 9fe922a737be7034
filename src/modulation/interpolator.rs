use crate::{
    modulation::controller::{ControllerSource, SmoothingMode},
    patch::params::ParamId,
};

pub const N_INTERPOLATORS: usize = 32;
/// Distance (in normalized units) at which a glide snaps and retires.
const RETIRE_SIGMA: f32 = 0.001;

#[derive(Debug, Clone)]
struct Slot {
    param: Option<ParamId>,
    source: ControllerSource,
}

/// Fixed pool of parameter glides driven once per block.
///
/// A smoothed write claims the slot already gliding that parameter or a free
/// one; slots retire themselves once they land on their target.
#[derive(Debug, Clone)]
pub struct InterpolatorPool {
    slots: Vec<Slot>,
}

impl InterpolatorPool {
    pub fn new(sample_rate: f32) -> Self {
        let slots = (0..N_INTERPOLATORS)
            .map(|_| Slot {
                param: None,
                source: ControllerSource::new(SmoothingMode::FastExp, sample_rate),
            })
            .collect();
        Self { slots }
    }

    /// Start (or retarget) a glide. Returns false when the pool is full, in
    /// which case the caller should write the target directly.
    pub fn smooth_to(&mut self, param: ParamId, current01: f32, target01: f32) -> bool {
        if let Some(slot) = self.slots.iter_mut().find(|s| s.param == Some(param)) {
            slot.source.set_target(target01);
            return true;
        }
        match self.slots.iter_mut().find(|s| s.param.is_none()) {
            Some(slot) => {
                slot.param = Some(param);
                slot.source.reset(current01);
                slot.source.set_target(target01);
                true
            }
            None => false,
        }
    }

    /// Drop any glide on `param`, e.g. because it was written directly.
    pub fn release(&mut self, param: ParamId) {
        for slot in self.slots.iter_mut().filter(|s| s.param == Some(param)) {
            slot.param = None;
        }
    }

    pub fn is_gliding(&self, param: ParamId) -> bool {
        self.slots.iter().any(|s| s.param == Some(param))
    }

    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| s.param.is_some()).count()
    }

    /// Advance every glide by one block, handing each new normalized value to
    /// `write`.
    pub fn step(&mut self, mut write: impl FnMut(ParamId, f32)) {
        for slot in &mut self.slots {
            let Some(param) = slot.param else { continue };
            let still_moving = slot.source.process_block_until_close(RETIRE_SIGMA);
            write(param, slot.source.output());
            if !still_moving {
                slot.param = None;
            }
        }
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.param = None;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::patch::params::SceneParam;

    #[test]
    fn glide_reaches_target_and_retires() {
        let mut pool = InterpolatorPool::new(48_000.0);
        let id = ParamId::scene(0, SceneParam::FilterCutoff);
        assert!(pool.smooth_to(id, 0.0, 1.0));

        let mut last = 0.0;
        for _ in 0..10_000 {
            pool.step(|p, v| {
                assert_eq!(p, id);
                last = v;
            });
            if !pool.is_gliding(id) {
                break;
            }
        }
        assert!(!pool.is_gliding(id));
        assert_eq!(last, 1.0);
    }

    #[test]
    fn retargeting_reuses_the_slot() {
        let mut pool = InterpolatorPool::new(48_000.0);
        let id = ParamId::scene(1, SceneParam::Volume);
        pool.smooth_to(id, 0.2, 0.8);
        pool.smooth_to(id, 0.5, 0.1);
        assert_eq!(pool.active(), 1);
    }

    #[test]
    fn full_pool_refuses() {
        let mut pool = InterpolatorPool::new(48_000.0);
        for i in 0..N_INTERPOLATORS {
            assert!(pool.smooth_to(ParamId::from_raw(i as u16), 0.0, 1.0));
        }
        assert!(!pool.smooth_to(ParamId::from_raw(N_INTERPOLATORS as u16), 0.0, 1.0));

        pool.release(ParamId::from_raw(3));
        assert!(pool.smooth_to(ParamId::from_raw(N_INTERPOLATORS as u16), 0.0, 1.0));
    }
}
