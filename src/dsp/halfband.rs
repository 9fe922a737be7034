//! 2x polyphase IIR decimator used to bring the oversampled scene output
//! back to the engine rate.

use crate::{BLOCK_SIZE, BLOCK_SIZE_OS};

/*
Each output sample consumes two input samples. The even sample runs through
allpass chain B, the odd one through chain A, and the two are averaged:

    x[2n]   ──► B0 ──► B1 ──► B2 ──┐
                                   (+) ──► × 0.5 ──► y[n]
    x[2n+1] ──► A0 ──► A1 ──► A2 ──┘

Every stage is a first-order allpass at the decimated rate:

    y = x[-1] + (x - y[-1]) · c

DC passes with unity gain; content near the input Nyquist cancels.
*/

const COEFFS_A: [f32; 3] = [0.127_141_41, 0.652_824_6, 0.917_694_2];
const COEFFS_B: [f32; 3] = [0.400_567_9, 0.820_416_4, 0.976_311_45];

#[derive(Debug, Clone, Copy, Default)]
struct AllpassChain {
    x1: [f32; 3],
    y1: [f32; 3],
}

impl AllpassChain {
    #[inline]
    fn process(&mut self, mut sample: f32, coeffs: &[f32; 3]) -> f32 {
        for (stage, &c) in coeffs.iter().enumerate() {
            let y = self.x1[stage] + (sample - self.y1[stage]) * c;
            self.x1[stage] = sample;
            self.y1[stage] = y;
            sample = y;
        }
        sample
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Decimator {
    a: AllpassChain,
    b: AllpassChain,
}

impl Decimator {
    #[inline]
    fn process(&mut self, even: f32, odd: f32) -> f32 {
        0.5 * (self.b.process(even, &COEFFS_B) + self.a.process(odd, &COEFFS_A))
    }
}

#[derive(Debug, Clone, Default)]
pub struct HalfbandDecimator {
    left: Decimator,
    right: Decimator,
}

impl HalfbandDecimator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn process_block(
        &mut self,
        in_left: &[f32; BLOCK_SIZE_OS],
        in_right: &[f32; BLOCK_SIZE_OS],
        out_left: &mut [f32; BLOCK_SIZE],
        out_right: &mut [f32; BLOCK_SIZE],
    ) {
        for n in 0..BLOCK_SIZE {
            out_left[n] = self.left.process(in_left[2 * n], in_left[2 * n + 1]);
            out_right[n] = self.right.process(in_right[2 * n], in_right[2 * n + 1]);
        }
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(decimator: &mut HalfbandDecimator, input: impl Fn(usize) -> f32, blocks: usize) -> [f32; BLOCK_SIZE] {
        let mut out_l = [0.0; BLOCK_SIZE];
        let mut out_r = [0.0; BLOCK_SIZE];
        for _ in 0..blocks {
            let block: [f32; BLOCK_SIZE_OS] = std::array::from_fn(&input);
            decimator.process_block(&block, &block, &mut out_l, &mut out_r);
        }
        out_l
    }

    #[test]
    fn dc_passes_at_unity() {
        let mut decimator = HalfbandDecimator::new();
        let out = run(&mut decimator, |_| 1.0, 16);
        assert!((out[BLOCK_SIZE - 1] - 1.0).abs() < 1e-3);
    }

    #[test]
    fn input_nyquist_is_rejected() {
        let mut decimator = HalfbandDecimator::new();
        let out = run(&mut decimator, |i| if i % 2 == 0 { 1.0 } else { -1.0 }, 16);
        assert!(out[BLOCK_SIZE - 1].abs() < 1e-3);
    }

    #[test]
    fn reset_clears_history() {
        let mut decimator = HalfbandDecimator::new();
        run(&mut decimator, |_| 1.0, 4);
        decimator.reset();
        let out = run(&mut decimator, |_| 0.0, 1);
        assert!(out.iter().all(|&s| s == 0.0));
    }
}
