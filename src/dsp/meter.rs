use std::f32::consts::TAU;

/// Largest value the meter will report.
const VU_CEILING: f32 = 2.0;

/// Block peak meter with exponential falloff. The falloff is applied once
/// per block.
#[derive(Debug, Clone)]
pub struct PeakMeter {
    peaks: [f32; 2],
    falloff: f32,
}

impl PeakMeter {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            peaks: [0.0; 2],
            falloff: (-TAU * 60.0 / sample_rate.max(1.0)).exp(),
        }
    }

    pub fn process(&mut self, left: &[f32], right: &[f32]) {
        for (peak, buffer) in self.peaks.iter_mut().zip([left, right]) {
            let block_max = buffer.iter().fold(0.0f32, |acc, s| acc.max(s.abs()));
            *peak = (self.falloff * *peak).max(block_max).min(VU_CEILING);
        }
    }

    pub fn peaks(&self) -> [f32; 2] {
        self.peaks
    }

    pub fn reset(&mut self) {
        self.peaks = [0.0; 2];
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn holds_peak_then_falls() {
        let mut meter = PeakMeter::new(48_000.0);
        meter.process(&[0.5, -0.9], &[0.1]);
        assert_eq!(meter.peaks(), [0.9, 0.1]);
        meter.process(&[0.0], &[0.0]);
        let [l, _] = meter.peaks();
        assert!(l < 0.9 && l > 0.8);
    }

    #[test]
    fn clamps_at_ceiling() {
        let mut meter = PeakMeter::new(48_000.0);
        meter.process(&[40.0], &[f32::MAX]);
        assert_eq!(meter.peaks(), [2.0, 2.0]);
    }
}
