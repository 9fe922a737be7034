//! Block-rate low frequency oscillators.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

use std::f32::consts::TAU;

/*
Block-Rate LFOs
===============

An LFO runs at sub-audio frequencies (roughly 0.01 Hz to 20 Hz), so there is
no need to evaluate it per sample. Here every LFO is advanced once per block
and its value is held for the whole block; at 48 kHz with 32-sample blocks
that is a 1500 Hz control rate, far above anything an LFO is asked to do.

Vocabulary
----------

  phase       Position inside one cycle, 0.0 .. 1.0.

  rate        Cycles per second. The phase advances by rate * block_seconds
              on every block.

  bipolar     Output swings -amplitude .. +amplitude. This is the native
              form; unipolar consumers use `bipolar_to_unipolar`.

  attack      Start of a gesture. A voice LFO attacks when its voice starts,
              a scene LFO when the first key of an empty scene goes down.
              Attack restarts the phase so every gesture has the same shape.

  release     End of a gesture. The LFO keeps running, the flag only tells
              the owner that nothing is holding it anymore.


Shapes
------

    sine       smooth sweep
    triangle   constant rate of change
    saw        rising ramp, snap back
    square     hard switch between the two extremes
*/

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Saw,
    Square,
}

impl LfoShape {
    /// Bipolar value of the shape at `phase` (0..1).
    #[inline]
    pub fn value_at(self, phase: f32) -> f32 {
        match self {
            LfoShape::Sine => (TAU * phase).sin(),
            LfoShape::Triangle => 1.0 - 4.0 * ((phase + 0.25).fract() - 0.5).abs(),
            LfoShape::Saw => 2.0 * phase - 1.0,
            LfoShape::Square => {
                if phase < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct BlockLfo {
    shape: LfoShape,
    phase: f32,
    block_seconds: f32,
    output: f32,
    held: bool,
}

impl BlockLfo {
    pub fn new(shape: LfoShape, sample_rate: f32, block_size: usize) -> Self {
        Self {
            shape,
            phase: 0.0,
            block_seconds: block_size as f32 / sample_rate.max(1.0),
            output: 0.0,
            held: false,
        }
    }

    pub fn set_shape(&mut self, shape: LfoShape) {
        self.shape = shape;
    }

    pub fn attack(&mut self) {
        self.phase = 0.0;
        self.held = true;
    }

    pub fn release(&mut self) {
        self.held = false;
    }

    pub fn is_held(&self) -> bool {
        self.held
    }

    pub fn phase(&self) -> f32 {
        self.phase
    }

    /// Compute this block's value, then advance the phase.
    pub fn process_block(&mut self, rate_hz: f32, amplitude: f32) -> f32 {
        self.output = self.shape.value_at(self.phase) * amplitude;
        let advance = rate_hz.max(0.0) * self.block_seconds;
        self.phase = (self.phase + advance).fract();
        self.output
    }

    pub fn output(&self) -> f32 {
        self.output
    }
}

/// Convert bipolar signal (-1.0 to +1.0) to unipolar (0.0 to 1.0).
#[inline]
pub fn bipolar_to_unipolar(bipolar: f32) -> f32 {
    (bipolar + 1.0) * 0.5
}

/// Convert unipolar signal (0.0 to 1.0) to bipolar (-1.0 to +1.0).
#[inline]
pub fn unipolar_to_bipolar(unipolar: f32) -> f32 {
    (unipolar * 2.0) - 1.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shapes_hit_their_extremes() {
        assert!((LfoShape::Sine.value_at(0.25) - 1.0).abs() < 1e-6);
        assert!((LfoShape::Triangle.value_at(0.25) - 1.0).abs() < 1e-6);
        assert!((LfoShape::Triangle.value_at(0.75) + 1.0).abs() < 1e-6);
        assert!((LfoShape::Triangle.value_at(0.0)).abs() < 1e-6);
        assert_eq!(LfoShape::Saw.value_at(0.0), -1.0);
        assert_eq!(LfoShape::Square.value_at(0.7), -1.0);
    }

    #[test]
    fn one_hertz_completes_a_cycle_per_second() {
        // 1000 Hz with 10-sample blocks: 100 blocks per second
        let mut lfo = BlockLfo::new(LfoShape::Saw, 1_000.0, 10);
        for _ in 0..50 {
            lfo.process_block(1.0, 1.0);
        }
        assert!((lfo.phase() - 0.5).abs() < 1e-3, "{}", lfo.phase());
    }

    #[test]
    fn attack_restarts_phase() {
        let mut lfo = BlockLfo::new(LfoShape::Sine, 48_000.0, 32);
        for _ in 0..17 {
            lfo.process_block(3.0, 1.0);
        }
        assert!(lfo.phase() > 0.0);
        lfo.attack();
        assert_eq!(lfo.phase(), 0.0);
        assert!(lfo.is_held());
        assert_eq!(lfo.process_block(3.0, 0.5), 0.0);
        lfo.release();
        assert!(!lfo.is_held());
    }

    #[test]
    fn test_roundtrip_conversion() {
        for &val in &[-1.0, -0.5, 0.0, 0.5, 1.0] {
            let roundtrip = unipolar_to_bipolar(bipolar_to_unipolar(val));
            assert!((roundtrip - val).abs() < 1e-6);
        }
    }
}
