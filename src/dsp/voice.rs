//! Reference voice unit: one oscillator through a resonant low-pass, with
//! amp and filter envelopes and six voice LFOs.

use crate::{
    dsp::{
        clip::soft_clip,
        envelope::Envelope,
        filter::SVFilter,
        lfo::{BlockLfo, LfoShape},
        oscillator::{Oscillator, OscillatorWaveform},
        ramp::LinearRamp,
    },
    error::DspError,
    io::converter::pitch_to_freq,
    modulation::source::ModulatorId,
    patch::params::{EnvStage, SceneParam, N_VOICE_LFOS},
    synth::voice::{NoteContext, StereoBlock, VoiceDsp, VoiceParams},
    BLOCK_SIZE, BLOCK_SIZE_OS, OVERSAMPLING,
};

/// Filter cutoff is stored in semitones relative to this frequency.
const CUTOFF_REFERENCE_HZ: f32 = 440.0;

#[derive(Debug, Clone)]
pub struct BasicVoice {
    sample_rate: f32,
    block_seconds: f32,
    osc: Oscillator,
    filter: SVFilter,
    amp_env: Envelope,
    filter_env: Envelope,
    lfos: Vec<BlockLfo>,
    gain: LinearRamp,
    pan_left: LinearRamp,
    pan_right: LinearRamp,
    velocity_gain: f32,
    pitch: f32,
    glide_pitch: f32,
    glide_step: f32,
    scratch: [f32; BLOCK_SIZE_OS],
    env_scratch: [f32; BLOCK_SIZE_OS],
}

impl BasicVoice {
    pub fn new(sample_rate: f32) -> Self {
        let os_rate = sample_rate * OVERSAMPLING as f32;
        Self {
            sample_rate,
            block_seconds: BLOCK_SIZE as f32 / sample_rate.max(1.0),
            osc: Oscillator::default(),
            filter: SVFilter::lowpass(1_000.0),
            amp_env: Envelope::new(os_rate),
            filter_env: Envelope::new(os_rate),
            lfos: (0..N_VOICE_LFOS)
                .map(|_| BlockLfo::new(LfoShape::Sine, sample_rate, BLOCK_SIZE))
                .collect(),
            gain: LinearRamp::default(),
            pan_left: LinearRamp::default(),
            pan_right: LinearRamp::default(),
            velocity_gain: 0.0,
            pitch: 60.0,
            glide_pitch: 60.0,
            glide_step: 0.0,
            scratch: [0.0; BLOCK_SIZE_OS],
            env_scratch: [0.0; BLOCK_SIZE_OS],
        }
    }

    fn start_glide(&mut self, from: f32, to: f32, seconds: f32) {
        self.pitch = to;
        if seconds <= 0.0 || from == to {
            self.glide_pitch = to;
            self.glide_step = 0.0;
        } else {
            self.glide_pitch = from;
            self.glide_step = (to - from) * self.block_seconds / seconds;
        }
    }

    fn advance_glide(&mut self) {
        if self.glide_step == 0.0 {
            return;
        }
        self.glide_pitch += self.glide_step;
        let arrived = (self.glide_step > 0.0 && self.glide_pitch >= self.pitch)
            || (self.glide_step < 0.0 && self.glide_pitch <= self.pitch);
        if arrived {
            self.glide_pitch = self.pitch;
            self.glide_step = 0.0;
        }
    }

    fn value(params: &VoiceParams, param: SceneParam) -> f32 {
        params.values[param.index()]
    }
}

impl VoiceDsp for BasicVoice {
    fn note_on(&mut self, note: &NoteContext) {
        self.osc.reset();
        self.filter.reset();
        self.amp_env.note_on();
        self.filter_env.note_on();
        self.lfos.iter_mut().for_each(BlockLfo::attack);
        self.gain.reset();
        self.pan_left.reset();
        self.pan_right.reset();
        self.velocity_gain = note.velocity as f32 / 127.0;
        self.start_glide(note.porta_from + note.detune, note.pitch + note.detune, note.portamento);
    }

    fn legato(&mut self, note: &NoteContext) {
        self.start_glide(self.glide_pitch, note.pitch + note.detune, note.portamento);
    }

    fn release(&mut self) {
        self.amp_env.note_off();
        self.filter_env.note_off();
        self.lfos.iter_mut().for_each(BlockLfo::release);
    }

    fn uber_release(&mut self) {
        self.amp_env.uber_release();
    }

    fn source_output(&self, id: ModulatorId) -> f32 {
        match id {
            ModulatorId::AmpEg => self.amp_env.level(),
            ModulatorId::FilterEg => self.filter_env.level(),
            other => other
                .as_voice_lfo()
                .and_then(|i| self.lfos.get(i))
                .map_or(0.0, BlockLfo::output),
        }
    }

    fn process_block(
        &mut self,
        params: &VoiceParams,
        out: &mut StereoBlock,
    ) -> Result<bool, DspError> {
        let os_rate = self.sample_rate * OVERSAMPLING as f32;

        for (i, lfo) in self.lfos.iter_mut().enumerate() {
            let rate = Self::value(params, SceneParam::LfoRate(i as u8));
            let amplitude = Self::value(params, SceneParam::LfoAmplitude(i as u8));
            lfo.process_block(rate, amplitude);
        }

        let stage = |eg: fn(EnvStage) -> SceneParam, s| Self::value(params, eg(s));
        self.amp_env.set_adsr(
            stage(SceneParam::AmpEg, EnvStage::Attack),
            stage(SceneParam::AmpEg, EnvStage::Decay),
            stage(SceneParam::AmpEg, EnvStage::Sustain),
            stage(SceneParam::AmpEg, EnvStage::Release),
        );
        self.filter_env.set_adsr(
            stage(SceneParam::FilterEg, EnvStage::Attack),
            stage(SceneParam::FilterEg, EnvStage::Decay),
            stage(SceneParam::FilterEg, EnvStage::Sustain),
            stage(SceneParam::FilterEg, EnvStage::Release),
        );

        self.advance_glide();
        let pitch = self.glide_pitch
            + Self::value(params, SceneParam::Pitch)
            + 12.0 * Self::value(params, SceneParam::Octave)
            + params.pitch_bend;
        let osc_type = Self::value(params, SceneParam::OscType).round().max(0.0) as usize;
        self.osc
            .set_waveform(OscillatorWaveform::from_osc_type(osc_type));
        self.osc
            .render(&mut self.scratch, pitch_to_freq(pitch), os_rate);

        // the filter envelope moves the cutoff once per block
        self.filter_env.render(&mut self.env_scratch);
        let cutoff = Self::value(params, SceneParam::FilterCutoff)
            + Self::value(params, SceneParam::FilterEgAmount) * self.filter_env.level();
        self.filter
            .set_cutoff(CUTOFF_REFERENCE_HZ * 2.0_f32.powf(cutoff / 12.0));
        self.filter
            .set_resonance(Self::value(params, SceneParam::FilterResonance));
        self.filter.render(&mut self.scratch, os_rate);

        self.amp_env.render(&mut self.env_scratch);
        for (sample, env) in self.scratch.iter_mut().zip(self.env_scratch.iter()) {
            *sample = soft_clip(*sample * env * self.velocity_gain, 1.0);
        }

        let volume = Self::value(params, SceneParam::Volume);
        let pan = Self::value(params, SceneParam::Pan).clamp(-1.0, 1.0);
        let angle = (pan + 1.0) * std::f32::consts::FRAC_PI_4;
        self.gain.set_target(volume);
        self.pan_left.set_target(angle.cos());
        self.pan_right.set_target(angle.sin());

        self.gain.multiply_block(&mut self.scratch);
        out.left.copy_from_slice(&self.scratch);
        out.right.copy_from_slice(&self.scratch);
        self.pan_left.multiply_block(&mut out.left);
        self.pan_right.multiply_block(&mut out.right);

        if !out.is_finite() {
            self.filter.reset();
            out.clear();
            return Err(DspError::NonFinite);
        }
        Ok(self.amp_env.is_active())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        modulation::bank::NoteDraw,
        patch::{params::ParamId, Patch},
    };

    const SR: f32 = 48_000.0;

    fn params() -> VoiceParams {
        let patch = Patch::default();
        let mut params = VoiceParams {
            active: true,
            ..VoiceParams::default()
        };
        for (i, value) in params.values.iter_mut().enumerate() {
            *value = patch.get(ParamId::scene(0, SceneParam::from_index(i).unwrap_or(SceneParam::Pitch)));
        }
        params
    }

    fn note(key: u8) -> NoteContext {
        NoteContext {
            sample_rate: SR,
            scene: 0,
            channel: 0,
            key,
            pitch: key as f32,
            velocity: 127,
            detune: 0.0,
            porta_from: key as f32,
            portamento: 0.0,
            draw: NoteDraw::default(),
        }
    }

    fn energy(block: &StereoBlock) -> f32 {
        block.left.iter().map(|s| s * s).sum()
    }

    #[test]
    fn sounds_until_released() {
        let mut voice = BasicVoice::new(SR);
        let params = params();
        let mut out = StereoBlock::default();
        voice.note_on(&note(60));

        let mut alive = true;
        for _ in 0..20 {
            alive = voice.process_block(&params, &mut out).expect("render");
        }
        assert!(alive);
        assert!(energy(&out) > 0.0);

        voice.release();
        for _ in 0..2_000 {
            alive = voice.process_block(&params, &mut out).expect("render");
            if !alive {
                break;
            }
        }
        assert!(!alive, "release should finish");
    }

    #[test]
    fn uber_release_ends_within_a_few_blocks() {
        let mut voice = BasicVoice::new(SR);
        let params = params();
        let mut out = StereoBlock::default();
        voice.note_on(&note(60));
        voice.process_block(&params, &mut out).expect("render");
        voice.uber_release();

        let mut blocks = 0;
        while voice.process_block(&params, &mut out).expect("render") {
            blocks += 1;
            assert!(blocks < 16);
        }
    }

    #[test]
    fn exposes_envelope_sources() {
        let mut voice = BasicVoice::new(SR);
        let mut out = StereoBlock::default();
        voice.note_on(&note(60));
        voice.process_block(&params(), &mut out).expect("render");
        assert!(voice.source_output(ModulatorId::AmpEg) > 0.0);
        assert_eq!(voice.source_output(ModulatorId::ModWheel), 0.0);
    }
}
