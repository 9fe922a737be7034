use std::f32::consts::PI;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/*
Two jobs, one topology:

| response  | used by                 | passes       |
| --------- | ----------------------- | ------------ |
| low-pass  | reference voice filter  | below cutoff |
| high-pass | scene low cut           | above cutoff |

Trapezoidal (zero-delay feedback) state-variable filter. Cutoff and
resonance are block-rate controls: `render` derives the coefficients once
and runs the whole block on them.

    g = tan(pi * fc / fs)       k = 2 - 2 * resonance
    a = 1 / (1 + g * (g + k))
*/

/// Cutoff bounds. The upper one keeps `tan` well away from its pole.
const MIN_CUTOFF_HZ: f32 = 5.0;
const MAX_CUTOFF_RATIO: f32 = 0.49;
const MAX_RESONANCE: f32 = 0.98;

#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FilterType {
    #[default]
    LowPass,
    HighPass,
}

#[derive(Debug, Clone, Copy)]
struct Coefficients {
    g: f32,
    k: f32,
    a: f32,
}

impl Coefficients {
    fn new(cutoff_hz: f32, resonance: f32, sample_rate: f32) -> Self {
        let fc = cutoff_hz.clamp(MIN_CUTOFF_HZ, sample_rate * MAX_CUTOFF_RATIO);
        let g = (PI * fc / sample_rate).tan();
        let k = 2.0 - 2.0 * resonance.clamp(0.0, MAX_RESONANCE);
        Self {
            g,
            k,
            a: 1.0 / (1.0 + g * (g + k)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct SVFilter {
    s1: f32,
    s2: f32,
    cutoff_hz: f32,
    /// 0 is flat, values toward 1 ring at the cutoff.
    resonance: f32,
    filter_type: FilterType,
}

impl SVFilter {
    pub fn new(filter_type: FilterType, cutoff_hz: f32) -> Self {
        Self {
            s1: 0.0,
            s2: 0.0,
            cutoff_hz,
            resonance: 0.0,
            filter_type,
        }
    }

    pub fn lowpass(cutoff_hz: f32) -> Self {
        Self::new(FilterType::LowPass, cutoff_hz)
    }

    pub fn highpass(cutoff_hz: f32) -> Self {
        Self::new(FilterType::HighPass, cutoff_hz)
    }

    pub fn render(&mut self, buffer: &mut [f32], sample_rate: f32) {
        let Coefficients { g, k, a } = Coefficients::new(self.cutoff_hz, self.resonance, sample_rate);
        let high_pass = self.filter_type == FilterType::HighPass;

        for sample in buffer.iter_mut() {
            let band = a * (self.s1 + g * (*sample - self.s2));
            let low = self.s2 + g * band;
            self.s1 = 2.0 * band - self.s1;
            self.s2 = 2.0 * low - self.s2;

            *sample = if high_pass {
                *sample - k * band - low
            } else {
                low
            };
        }

        // denormals once the input goes quiet
        if self.s1.abs() < 1e-20 {
            self.s1 = 0.0;
        }
        if self.s2.abs() < 1e-20 {
            self.s2 = 0.0;
        }
    }

    pub fn reset(&mut self) {
        self.s1 = 0.0;
        self.s2 = 0.0;
    }

    pub fn cutoff(&self) -> f32 {
        self.cutoff_hz
    }

    pub fn set_cutoff(&mut self, cutoff_hz: f32) {
        self.cutoff_hz = cutoff_hz;
    }

    pub fn set_resonance(&mut self, resonance: f32) {
        self.resonance = resonance;
    }

    pub fn filter_type(&self) -> FilterType {
        self.filter_type
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::TAU;

    const SR: f32 = 96_000.0;

    fn sine(freq: f32, len: usize) -> Vec<f32> {
        (0..len).map(|n| (TAU * freq * n as f32 / SR).sin()).collect()
    }

    fn settled_peak(buffer: &[f32]) -> f32 {
        buffer[buffer.len() / 2..]
            .iter()
            .fold(0.0f32, |acc, &x| acc.max(x.abs()))
    }

    #[test]
    fn lowpass_passes_dc_highpass_blocks_it() {
        let mut low = SVFilter::lowpass(500.0);
        let mut high = SVFilter::highpass(500.0);
        let mut a = vec![1.0; 512];
        let mut b = vec![1.0; 512];
        low.render(&mut a, SR);
        high.render(&mut b, SR);
        assert!(a[511] > 0.99);
        assert!(b[511].abs() < 0.01);
    }

    #[test]
    fn low_cut_removes_rumble() {
        let mut filter = SVFilter::highpass(400.0);
        let mut rumble = sine(30.0, 16_384);
        filter.render(&mut rumble, SR);
        assert!(settled_peak(&rumble) < 0.05);
    }

    #[test]
    fn lowpass_attenuates_above_cutoff() {
        let mut filter = SVFilter::lowpass(500.0);
        let mut buffer = sine(10_000.0, 2048);
        filter.render(&mut buffer, SR);
        assert!(settled_peak(&buffer) < 0.05);
    }

    #[test]
    fn resonance_boosts_cutoff() {
        let mut filter = SVFilter::lowpass(1_000.0);
        filter.set_resonance(0.05);
        let mut flat = sine(1_000.0, 4096);
        filter.render(&mut flat, SR);

        filter.reset();
        filter.set_resonance(0.8);
        let mut peaky = sine(1_000.0, 4096);
        filter.render(&mut peaky, SR);

        assert!(settled_peak(&peaky) > settled_peak(&flat) * 1.2);
    }

    #[test]
    fn out_of_range_cutoff_stays_stable() {
        let mut filter = SVFilter::lowpass(1.0e6);
        filter.set_resonance(5.0);
        let mut buffer = sine(1_000.0, 512);
        filter.render(&mut buffer, SR);
        assert!(buffer.iter().all(|s| s.is_finite()));
    }
}
