#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Waveforms of the reference voice, selected by the scene's osc type.
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OscillatorWaveform {
    Sine,
    #[default]
    Saw,
    Square,
    Noise,
}

impl OscillatorWaveform {
    pub fn from_osc_type(osc_type: usize) -> Self {
        match osc_type {
            0 => OscillatorWaveform::Sine,
            1 => OscillatorWaveform::Saw,
            2 => OscillatorWaveform::Square,
            _ => OscillatorWaveform::Noise,
        }
    }
}

/// PolyBLEP residual for a discontinuity at phase 0, `dt` = phase step.
#[inline]
fn poly_blep(t: f32, dt: f32) -> f32 {
    if t < dt {
        let x = t / dt;
        x + x - x * x - 1.0
    } else if t > 1.0 - dt {
        let x = (t - 1.0) / dt;
        x * x + x + x + 1.0
    } else {
        0.0
    }
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: OscillatorWaveform,
    phase: f32,
    noise: u32,
}

impl Default for Oscillator {
    fn default() -> Self {
        Self::new(OscillatorWaveform::default())
    }
}

impl Oscillator {
    pub fn new(waveform: OscillatorWaveform) -> Self {
        Self {
            waveform,
            phase: 0.0,
            noise: 0x1234_5678,
        }
    }

    pub fn set_waveform(&mut self, waveform: OscillatorWaveform) {
        self.waveform = waveform;
    }

    pub fn waveform(&self) -> OscillatorWaveform {
        self.waveform
    }

    pub fn reset(&mut self) {
        self.phase = 0.0;
    }

    /// Fill `buffer` at a fixed frequency.
    pub fn render(&mut self, buffer: &mut [f32], freq_hz: f32, sample_rate: f32) {
        let dt = (freq_hz / sample_rate).clamp(0.0, 0.5);
        for sample in buffer.iter_mut() {
            *sample = self.next(dt);
        }
    }

    #[inline]
    fn next(&mut self, dt: f32) -> f32 {
        let t = self.phase;
        let out = match self.waveform {
            OscillatorWaveform::Sine => (t * std::f32::consts::TAU).sin(),
            OscillatorWaveform::Saw => 2.0 * t - 1.0 - poly_blep(t, dt),
            OscillatorWaveform::Square => {
                let naive = if t < 0.5 { 1.0 } else { -1.0 };
                naive + poly_blep(t, dt) - poly_blep((t + 0.5).fract(), dt)
            }
            OscillatorWaveform::Noise => {
                let mut x = self.noise;
                x ^= x << 13;
                x ^= x >> 17;
                x ^= x << 5;
                self.noise = x;
                (x >> 8) as f32 / (1u32 << 23) as f32 - 1.0
            }
        };
        self.phase += dt;
        if self.phase >= 1.0 {
            self.phase -= 1.0;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(waveform: OscillatorWaveform) -> Vec<f32> {
        let mut osc = Oscillator::new(waveform);
        let mut buffer = vec![0.0; 4096];
        osc.render(&mut buffer, 440.0, 48_000.0);
        buffer
    }

    #[test]
    fn waveforms_stay_in_range() {
        for waveform in [
            OscillatorWaveform::Sine,
            OscillatorWaveform::Saw,
            OscillatorWaveform::Square,
            OscillatorWaveform::Noise,
        ] {
            let buffer = rendered(waveform);
            assert!(
                buffer.iter().all(|s| s.abs() <= 1.01),
                "{waveform:?} out of range"
            );
        }
    }

    #[test]
    fn periodic_waves_are_roughly_zero_mean() {
        for waveform in [OscillatorWaveform::Saw, OscillatorWaveform::Square] {
            let buffer = rendered(waveform);
            let mean = buffer.iter().sum::<f32>() / buffer.len() as f32;
            assert!(mean.abs() < 0.05, "{waveform:?} mean {mean}");
        }
    }

    #[test]
    fn osc_type_selects_waveform() {
        assert_eq!(OscillatorWaveform::from_osc_type(0), OscillatorWaveform::Sine);
        assert_eq!(OscillatorWaveform::from_osc_type(9), OscillatorWaveform::Noise);
    }
}
