//! Output clipping and waveshaping.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Per-scene output protection applied before decimation.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HardclipMode {
    /// Clamp at ±8 (+18 dBFS), only catches runaway voices.
    #[default]
    Clip18,
    /// Clamp at ±1 (0 dBFS).
    Clip0,
    Off,
}

impl HardclipMode {
    pub fn limit(self) -> Option<f32> {
        match self {
            HardclipMode::Clip18 => Some(8.0),
            HardclipMode::Clip0 => Some(1.0),
            HardclipMode::Off => None,
        }
    }

    pub fn apply(self, buffer: &mut [f32]) {
        if let Some(limit) = self.limit() {
            hard_clip_block(buffer, limit);
        }
    }
}

#[inline]
pub fn hard_clip_block(buffer: &mut [f32], limit: f32) {
    for sample in buffer.iter_mut() {
        *sample = sample.clamp(-limit, limit);
    }
}

/// `x / (1 + |x|)` saturation, used on the reference voice's output stage.
#[inline]
pub fn soft_clip(sample: f32, drive: f32) -> f32 {
    let x = sample * drive;
    x / (1.0 + x.abs())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn modes_clamp_to_their_limit() {
        let mut buffer = [20.0, -20.0, 0.5];
        HardclipMode::Clip18.apply(&mut buffer);
        assert_eq!(buffer, [8.0, -8.0, 0.5]);
        HardclipMode::Clip0.apply(&mut buffer);
        assert_eq!(buffer, [1.0, -1.0, 0.5]);

        let mut loud = [20.0];
        HardclipMode::Off.apply(&mut loud);
        assert_eq!(loud, [20.0]);
    }

    #[test]
    fn soft_clip_is_bounded() {
        assert!(soft_clip(1.0e6, 1.0) < 1.0);
        assert_eq!(soft_clip(0.0, 4.0), 0.0);
    }
}
