#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Controller Smoothing
====================

MIDI controllers arrive as 7-bit steps at irregular times. Feeding those
steps straight into a filter cutoff produces zipper noise, so every
controller-driven source chases its target once per block instead:

  exponential   value += a * (target - value), where the coefficient grows
                with the remaining distance and is normalized to 44.1 kHz
                so the glide time does not depend on the sample rate.

      a = clamp(k * (44100 / sample_rate) * |target - value|, 0, 1)
      k = 0.99 (fast) or 0.9 (slow, legacy)

                Once within `sigma` of the target the value snaps, except in
                legacy mode which keeps converging asymptotically.

  linear        The distance from where the glide started to the target is
                covered in a fixed number of blocks.

  direct        No smoothing; the value is the target.
*/

const LINEAR_BLOCKS: f32 = 50.0;
const REFERENCE_RATE: f32 = 44_100.0;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SmoothingMode {
    Legacy,
    SlowExp,
    #[default]
    FastExp,
    FastLine,
    Direct,
}

#[derive(Debug, Clone)]
pub struct ControllerSource {
    value: f32,
    target: f32,
    mode: SmoothingMode,
    rate_scale: f32,
    bipolar: bool,
    line_start: f32,
    changed: bool,
}

impl ControllerSource {
    pub fn new(mode: SmoothingMode, sample_rate: f32) -> Self {
        Self {
            value: 0.0,
            target: 0.0,
            mode,
            rate_scale: REFERENCE_RATE / sample_rate.max(1.0),
            bipolar: false,
            line_start: 0.0,
            changed: false,
        }
    }

    pub fn bipolar(mut self) -> Self {
        self.bipolar = true;
        self
    }

    pub fn set_mode(&mut self, mode: SmoothingMode) {
        self.mode = mode;
    }

    pub fn set_target(&mut self, target: f32) {
        if target != self.target {
            self.line_start = self.value;
        }
        self.target = target;
        self.changed = true;
    }

    /// Set the target from a 0..1 controller position.
    pub fn set_target01(&mut self, value: f32) {
        let target = if self.bipolar {
            2.0 * value - 1.0
        } else {
            value
        };
        self.set_target(target);
    }

    /// Jump to `value` with no glide.
    pub fn reset(&mut self, value: f32) {
        self.value = value;
        self.target = value;
        self.line_start = value;
        self.changed = false;
    }

    pub fn output(&self) -> f32 {
        self.value
    }

    pub fn target(&self) -> f32 {
        self.target
    }

    /// True once since the last call if a new target was written.
    pub fn take_changed(&mut self) -> bool {
        std::mem::take(&mut self.changed)
    }

    pub fn process_block(&mut self) {
        let sigma = match self.mode {
            SmoothingMode::FastExp | SmoothingMode::FastLine => 0.005,
            _ => 0.0025,
        };
        self.step(sigma);
    }

    /// Advance one block, snapping within `sigma`. Returns false once the
    /// target has been reached.
    pub fn process_block_until_close(&mut self, sigma: f32) -> bool {
        self.step(sigma);
        self.value != self.target
    }

    fn step(&mut self, sigma: f32) {
        let distance = (self.target - self.value).abs();
        match self.mode {
            SmoothingMode::Direct => self.value = self.target,
            SmoothingMode::FastLine => {
                let increment = (self.target - self.line_start) / LINEAR_BLOCKS;
                if distance <= increment.abs() || distance < sigma {
                    self.value = self.target;
                } else {
                    self.value += increment;
                }
            }
            SmoothingMode::Legacy | SmoothingMode::SlowExp | SmoothingMode::FastExp => {
                if distance < sigma && self.mode != SmoothingMode::Legacy {
                    self.value = self.target;
                    return;
                }
                let k = if self.mode == SmoothingMode::FastExp {
                    0.99
                } else {
                    0.9
                };
                let a = (k * self.rate_scale * distance).clamp(0.0, 1.0);
                self.value = (1.0 - a) * self.value + a * self.target;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blocks_to_settle(source: &mut ControllerSource, limit: usize) -> Option<usize> {
        (1..=limit).find(|_| !source.process_block_until_close(0.001))
    }

    #[test]
    fn fast_exp_converges_and_snaps() {
        let mut source = ControllerSource::new(SmoothingMode::FastExp, 48_000.0);
        source.set_target(1.0);
        let blocks = blocks_to_settle(&mut source, 10_000).expect("settles");
        assert!(blocks > 1, "should glide, not jump");
        assert_eq!(source.output(), 1.0);
    }

    #[test]
    fn direct_mode_jumps() {
        let mut source = ControllerSource::new(SmoothingMode::Direct, 48_000.0);
        source.set_target(0.25);
        source.process_block();
        assert_eq!(source.output(), 0.25);
    }

    #[test]
    fn linear_mode_takes_fixed_block_count() {
        let mut source = ControllerSource::new(SmoothingMode::FastLine, 48_000.0);
        source.set_target(1.0);
        for _ in 0..10 {
            source.process_block();
        }
        assert!((source.output() - 0.2).abs() < 1e-4, "{}", source.output());
        let blocks = blocks_to_settle(&mut source, 100).expect("settles");
        assert!(blocks <= 41);
        assert_eq!(source.output(), 1.0);
    }

    #[test]
    fn legacy_never_snaps_far_from_target() {
        let mut source = ControllerSource::new(SmoothingMode::Legacy, 48_000.0);
        source.set_target(1.0);
        source.process_block();
        assert!(source.output() > 0.0 && source.output() < 1.0);
    }

    #[test]
    fn bipolar_target_from_unipolar_position() {
        let mut source = ControllerSource::new(SmoothingMode::Direct, 48_000.0).bipolar();
        source.set_target01(0.0);
        source.process_block();
        assert_eq!(source.output(), -1.0);
        assert!(source.take_changed());
        assert!(!source.take_changed());
    }
}
