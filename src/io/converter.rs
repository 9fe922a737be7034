use crate::{io::midi::MidiEvent, synth::message::EngineMessage};

/// Translate a port event into the engine's queue message. Note-on with
/// velocity 0 is a note-off.
pub fn midi_to_message(midi: MidiEvent) -> EngineMessage {
    match midi {
        MidiEvent::NoteOn {
            channel,
            key,
            velocity: 0,
        } => EngineMessage::NoteOff {
            channel,
            key,
            velocity: 0,
        },
        MidiEvent::NoteOn {
            channel,
            key,
            velocity,
        } => EngineMessage::NoteOn {
            channel,
            key,
            velocity,
            detune: 0.0,
        },
        MidiEvent::NoteOff {
            channel,
            key,
            velocity,
        } => EngineMessage::NoteOff {
            channel,
            key,
            velocity,
        },
        MidiEvent::PolyAftertouch {
            channel,
            key,
            value,
        } => EngineMessage::PolyAftertouch {
            channel,
            key,
            value,
        },
        MidiEvent::ControlChange {
            channel,
            controller,
            value,
        } => EngineMessage::ControlChange {
            channel,
            controller,
            value,
        },
        MidiEvent::ProgramChange { channel, program } => {
            EngineMessage::ProgramChange { channel, program }
        }
        MidiEvent::ChannelAftertouch { channel, value } => {
            EngineMessage::ChannelAftertouch { channel, value }
        }
        MidiEvent::PitchBend { channel, value } => EngineMessage::PitchBend { channel, value },
    }
}

pub fn midi_note_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Frequency of a fractional pitch in semitones, 69 being A440.
pub fn pitch_to_freq(pitch: f32) -> f32 {
    440.0 * 2.0_f32.powf((pitch - 69.0) / 12.0)
}

/// Map a 7-bit controller onto -1..1 with 64 exactly at the centre.
pub fn int7_to_bipolar(value: u8) -> f32 {
    let x = value.min(127) as f32 - 64.0;
    if x > 0.0 {
        x / 63.0
    } else {
        x / 64.0
    }
}

/// Join an MSB/LSB pair into a 14-bit value.
pub fn join14(msb: u8, lsb: u8) -> u16 {
    ((msb as u16 & 0x7F) << 7) | (lsb as u16 & 0x7F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_velocity_note_on_is_note_off() {
        let message = midi_to_message(MidiEvent::NoteOn {
            channel: 2,
            key: 60,
            velocity: 0,
        });
        assert_eq!(
            message,
            EngineMessage::NoteOff {
                channel: 2,
                key: 60,
                velocity: 0
            }
        );
    }

    #[test]
    fn bipolar_controller_has_exact_ends_and_centre() {
        assert_eq!(int7_to_bipolar(0), -1.0);
        assert_eq!(int7_to_bipolar(64), 0.0);
        assert_eq!(int7_to_bipolar(127), 1.0);
    }

    #[test]
    fn note_frequencies() {
        assert!((midi_note_to_freq(69) - 440.0).abs() < 1e-3);
        assert!((pitch_to_freq(81.0) - 880.0).abs() < 1e-2);
        assert_eq!(join14(0x7F, 0x7F), 16383);
    }
}
