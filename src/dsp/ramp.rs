/// Gain that moves linearly to a new target across one block. The first
/// target after construction or `reset` is taken instantly.
#[derive(Debug, Clone)]
pub struct LinearRamp {
    current: f32,
    target: f32,
    first_run: bool,
}

impl Default for LinearRamp {
    fn default() -> Self {
        Self {
            current: 0.0,
            target: 0.0,
            first_run: true,
        }
    }
}

impl LinearRamp {
    pub fn set_target(&mut self, target: f32) {
        if self.first_run {
            self.current = target;
            self.first_run = false;
        }
        self.target = target;
    }

    pub fn set_instantly(&mut self, value: f32) {
        self.current = value;
        self.target = value;
        self.first_run = false;
    }

    pub fn current(&self) -> f32 {
        self.current
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn step(&self, len: usize) -> f32 {
        if len == 0 {
            0.0
        } else {
            (self.target - self.current) / len as f32
        }
    }

    /// `buffer *= ramp`
    pub fn multiply_block(&mut self, buffer: &mut [f32]) {
        let step = self.step(buffer.len());
        let mut gain = self.current;
        for sample in buffer.iter_mut() {
            gain += step;
            *sample *= gain;
        }
        self.current = self.target;
    }

    /// Same ramp applied to both channels.
    pub fn multiply_stereo(&mut self, left: &mut [f32], right: &mut [f32]) {
        let step = self.step(left.len());
        let mut gain = self.current;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            gain += step;
            *l *= gain;
            *r *= gain;
        }
        self.current = self.target;
    }

    /// `dest += source * ramp`, for send busses.
    pub fn accumulate_into(&mut self, source: &[f32], dest: &mut [f32]) {
        let step = self.step(source.len());
        let mut gain = self.current;
        for (s, d) in source.iter().zip(dest.iter_mut()) {
            gain += step;
            *d += *s * gain;
        }
        self.current = self.target;
    }

    /// Stereo `accumulate_into` with one shared ramp.
    pub fn accumulate_stereo(&mut self, left: &[f32], right: &[f32], dest_left: &mut [f32], dest_right: &mut [f32]) {
        let step = self.step(left.len());
        let mut gain = self.current;
        let frames = left.iter().zip(right).zip(dest_left.iter_mut().zip(dest_right.iter_mut()));
        for ((l, r), (dl, dr)) in frames {
            gain += step;
            *dl += *l * gain;
            *dr += *r * gain;
        }
        self.current = self.target;
    }
}
