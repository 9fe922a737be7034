use crate::MIN_TIME;

/*
Voice Envelopes
===============

Linear ADSR used for the amp and filter envelopes of the reference voice.
Times arrive once per block from the voice's parameter snapshot, so a
routing onto `AmpEg(Attack)` takes effect at the next block boundary.

  Level
    1.0 ┐     ╱╲
        │    ╱  ╲___________
    S   │   ╱               ╲        normal release
        │  ╱                 ╲___
    0.0 └─╱──────────────────┼───╲──→ Time
        Attack Decay  Sustain │
                              └─╲ uber release: fixed, very short

Two ways out of a note
----------------------

  release       note-off. Ramp from the current level to 0 over the
                patch's release time.

  uber release  the voice was stolen (polyphony limit, mono retrigger).
                Ramp from the current level to 0 over UBER_RELEASE_TIME no
                matter what the patch says, so the slot frees up quickly
                without a click.

Both snapshot the level they start from; releasing during the attack never
jumps to the sustain level first.

  ┌──────┐ note_on ┌────────┐ level=1 ┌───────┐ level=S ┌─────────┐
  │ Idle │ ──────► │ Attack │ ──────► │ Decay │ ──────► │ Sustain │
  └──────┘         └────────┘         └───────┘         └─────────┘
      ▲                 │ note_off / uber  │                   │
      │                 ▼                  ▼                   ▼
      │  level=0   ┌─────────────────────────────────────────────┐
      └─────────── │                  Release                    │
                   └─────────────────────────────────────────────┘
*/

/// Fade time of a stolen voice, in seconds.
pub const UBER_RELEASE_TIME: f32 = 0.004;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvelopeState {
    Idle,
    Attack,
    Decay,
    Sustain,
    Release,
}

#[derive(Debug, Clone)]
pub struct Envelope {
    attack: f32,
    decay: f32,
    sustain: f32,
    release: f32,
    sample_rate: f32,

    stage: EnvelopeState,
    level: f32,
    /// Per-sample level change of the running attack, decay or release.
    slope: f32,
    /// Samples left in the running release.
    release_left: u32,
}

impl Envelope {
    pub fn new(sample_rate: f32) -> Self {
        Self {
            attack: 0.005,
            decay: 0.2,
            sustain: 0.8,
            release: 0.25,
            sample_rate,
            stage: EnvelopeState::Idle,
            level: 0.0,
            slope: 0.0,
            release_left: 0,
        }
    }

    fn samples(&self, seconds: f32) -> f32 {
        (seconds * self.sample_rate).max(1.0)
    }

    /// Update the shape. A running release keeps the length it started with;
    /// a running attack or decay picks up the new time immediately.
    pub fn set_adsr(&mut self, attack: f32, decay: f32, sustain: f32, release: f32) {
        self.attack = attack.max(MIN_TIME);
        self.decay = decay.max(MIN_TIME);
        self.sustain = sustain.clamp(0.0, 1.0);
        self.release = release.max(MIN_TIME);
        match self.stage {
            EnvelopeState::Attack => self.slope = 1.0 / self.samples(self.attack),
            EnvelopeState::Decay => self.slope = -(1.0 - self.sustain) / self.samples(self.decay),
            _ => {}
        }
    }

    /// Gate high: restart the attack from zero.
    pub fn note_on(&mut self) {
        self.level = 0.0;
        self.stage = EnvelopeState::Attack;
        self.slope = 1.0 / self.samples(self.attack);
        self.release_left = 0;
    }

    pub fn note_off(&mut self) {
        self.start_release(self.release);
    }

    /// Forced fade used when the voice is stolen. Never lengthens a
    /// release that would already end sooner.
    pub fn uber_release(&mut self) {
        let uber = self.samples(UBER_RELEASE_TIME).round() as u32;
        if self.stage == EnvelopeState::Release && self.release_left <= uber {
            return;
        }
        self.start_release(UBER_RELEASE_TIME);
    }

    fn start_release(&mut self, seconds: f32) {
        if self.stage == EnvelopeState::Idle {
            return;
        }
        let samples = self.samples(seconds).round();
        self.release_left = samples as u32;
        self.slope = -self.level / samples;
        self.stage = EnvelopeState::Release;
    }

    /// Advance by one sample.
    pub fn next_sample(&mut self) -> f32 {
        match self.stage {
            EnvelopeState::Idle => self.level = 0.0,
            EnvelopeState::Attack => {
                self.level += self.slope;
                if self.level >= 1.0 {
                    self.level = 1.0;
                    self.stage = EnvelopeState::Decay;
                    self.slope = -(1.0 - self.sustain) / self.samples(self.decay);
                }
            }
            EnvelopeState::Decay => {
                self.level += self.slope;
                if self.level <= self.sustain {
                    self.level = self.sustain;
                    self.stage = EnvelopeState::Sustain;
                }
            }
            EnvelopeState::Sustain => self.level = self.sustain,
            EnvelopeState::Release => {
                self.release_left = self.release_left.saturating_sub(1);
                self.level = (self.level + self.slope).max(0.0);
                if self.release_left == 0 {
                    self.level = 0.0;
                    self.stage = EnvelopeState::Idle;
                }
            }
        }
        self.level
    }

    pub fn render(&mut self, buffer: &mut [f32]) {
        buffer.iter_mut().for_each(|s| *s = self.next_sample());
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeState::Idle
    }

    pub fn reset(&mut self) {
        self.stage = EnvelopeState::Idle;
        self.level = 0.0;
        self.slope = 0.0;
        self.release_left = 0;
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn state(&self) -> EnvelopeState {
        self.stage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_RATE: f32 = 1_000.0;

    fn run(env: &mut Envelope, samples: usize) {
        for _ in 0..samples {
            env.next_sample();
        }
    }

    #[test]
    fn attack_reaches_full_level() {
        let mut env = Envelope::new(SAMPLE_RATE);
        env.set_adsr(0.01, 0.1, 0.7, 0.2);
        env.note_on();
        run(&mut env, 11);
        assert!(env.level() > 0.99);
        assert_ne!(env.state(), EnvelopeState::Attack);
    }

    #[test]
    fn sustain_holds_target_level() {
        let mut env = Envelope::new(SAMPLE_RATE);
        env.set_adsr(0.01, 0.05, 0.6, 0.2);
        env.note_on();
        run(&mut env, 65);
        assert_eq!(env.state(), EnvelopeState::Sustain);
        assert!((env.level() - 0.6).abs() < 1e-4);
    }

    #[test]
    fn release_falls_back_to_idle() {
        let mut env = Envelope::new(SAMPLE_RATE);
        env.set_adsr(0.01, 0.05, 0.5, 0.03);
        env.note_on();
        run(&mut env, 20);
        env.note_off();
        run(&mut env, 32);
        assert_eq!(env.level(), 0.0);
        assert!(!env.is_active());
    }

    #[test]
    fn uber_release_cuts_a_long_release_short() {
        let mut env = Envelope::new(48_000.0);
        env.set_adsr(0.001, 0.01, 1.0, 10.0);
        env.note_on();
        run(&mut env, 1_000);
        env.note_off();
        run(&mut env, 10);
        env.uber_release();
        run(&mut env, (UBER_RELEASE_TIME * 48_000.0) as usize + 1);
        assert!(!env.is_active());
    }

    #[test]
    fn releasing_idle_envelope_is_a_no_op() {
        let mut env = Envelope::new(SAMPLE_RATE);
        env.note_off();
        env.uber_release();
        assert_eq!(env.state(), EnvelopeState::Idle);
    }
}
