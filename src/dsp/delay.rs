use crate::{engine::fx::Effect, BLOCK_SIZE};

/// Longest delay the reference effect supports, in seconds.
const MAX_DELAY_SECONDS: f32 = 2.0;
/// Level at which a repeat counts as gone (-60 dB).
const TAIL_FLOOR: f32 = 0.001;

/// Circular buffer with a fixed capacity chosen at construction.
#[derive(Debug, Clone)]
pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub fn with_capacity(samples: usize) -> Self {
        Self {
            buffer: vec![0.0; samples.max(1)],
            write_pos: 0,
        }
    }

    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Sample written `delay_samples` writes ago. A delay of 0 reads the
    /// oldest sample in the buffer.
    pub fn tap(&self, delay_samples: usize) -> f32 {
        let len = self.buffer.len();
        let delay = delay_samples.clamp(1, len);
        self.buffer[(self.write_pos + len - delay) % len]
    }

    pub fn push(&mut self, sample: f32) {
        self.buffer[self.write_pos] = sample;
        self.write_pos = (self.write_pos + 1) % self.buffer.len();
    }

    pub fn next_sample(&mut self, sample: f32, delay_samples: usize) -> f32 {
        let delayed = self.tap(delay_samples);
        self.push(sample);
        delayed
    }

    pub fn render(&mut self, buffer: &mut [f32], delay_samples: usize) {
        for sample in buffer.iter_mut() {
            *sample = self.next_sample(*sample, delay_samples);
        }
    }

    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

/// Stereo feedback delay with cross-fed repeats.
///
/// Serves as the reference effect for insert, send and global slots. The
/// buffers are sized in `init`, which runs on the control thread before the
/// effect is handed to the audio thread.
#[derive(Debug, Clone)]
pub struct StereoDelay {
    time: f32,
    feedback: f32,
    mix: f32,
    sample_rate: f32,
    left: DelayLine,
    right: DelayLine,
}

impl StereoDelay {
    pub fn new(time: f32, feedback: f32, mix: f32) -> Self {
        Self {
            time: time.clamp(0.0, MAX_DELAY_SECONDS),
            feedback: feedback.clamp(0.0, 1.0),
            mix: mix.clamp(0.0, 1.0),
            sample_rate: 0.0,
            left: DelayLine::with_capacity(1),
            right: DelayLine::with_capacity(1),
        }
    }

    fn delay_samples(&self) -> usize {
        ((self.time * self.sample_rate) as usize).max(1)
    }

    pub fn time(&self) -> f32 {
        self.time
    }

    pub fn feedback(&self) -> f32 {
        self.feedback
    }
}

impl Effect for StereoDelay {
    fn name(&self) -> &'static str {
        "delay"
    }

    fn init(&mut self, sample_rate: f32) {
        self.sample_rate = sample_rate;
        let capacity = (MAX_DELAY_SECONDS * sample_rate) as usize + 1;
        self.left = DelayLine::with_capacity(capacity);
        self.right = DelayLine::with_capacity(capacity);
    }

    fn suspend(&mut self) {
        self.left.reset();
        self.right.reset();
    }

    fn process(&mut self, left: &mut [f32; BLOCK_SIZE], right: &mut [f32; BLOCK_SIZE]) {
        let delay = self.delay_samples();
        let wet = self.mix;
        let dry = 1.0 - self.mix;
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let tap_l = self.left.tap(delay);
            let tap_r = self.right.tap(delay);
            // repeats alternate sides
            self.left.push(*l + tap_r * self.feedback);
            self.right.push(*r + tap_l * self.feedback);
            *l = *l * dry + tap_l * wet;
            *r = *r * dry + tap_r * wet;
        }
    }

    fn ringout_blocks(&self) -> Option<u32> {
        if self.feedback >= 0.999 {
            return None;
        }
        let repeats = if self.feedback > 0.0 {
            TAIL_FLOOR.ln() / self.feedback.ln()
        } else {
            0.0
        };
        let tail_seconds = self.time * (repeats + 1.0);
        Some((tail_seconds * self.sample_rate / BLOCK_SIZE as f32).ceil() as u32 + 1)
    }
}
