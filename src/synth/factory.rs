use crate::synth::voice::VoiceDsp;

/// Builds the DSP unit placed in every arena slot.
///
/// This is the "instrument design" layer: configure the sound once and the
/// engine asks the factory for one identical unit per slot up front, so no
/// voice is ever constructed on the audio thread.
pub trait VoiceFactory: Send {
    type Voice: VoiceDsp;

    fn create_voice(&self) -> Self::Voice;
}

impl<F, T> VoiceFactory for F
where
    F: Fn() -> T + Send,
    T: VoiceDsp,
{
    type Voice = T;

    fn create_voice(&self) -> Self::Voice {
        self()
    }
}
