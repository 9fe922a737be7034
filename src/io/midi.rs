/// Channel voice message as it arrives from a port, channels 0-based.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MidiEvent {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    PolyAftertouch { channel: u8, key: u8, value: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
    ProgramChange { channel: u8, program: u8 },
    ChannelAftertouch { channel: u8, value: u8 },
    /// Centred on zero, -8192 ..= 8191.
    PitchBend { channel: u8, value: i16 },
}

impl MidiEvent {
    /// Decode one short message. System and running-status bytes are not
    /// handled and give `None`.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let (&status, data) = bytes.split_first()?;
        if status < 0x80 || status >= 0xF0 {
            return None;
        }
        let channel = status & 0x0F;
        let d0 = data.first().map(|b| b & 0x7F);
        let d1 = data.get(1).map(|b| b & 0x7F);

        Some(match status & 0xF0 {
            0x80 => MidiEvent::NoteOff {
                channel,
                key: d0?,
                velocity: d1?,
            },
            0x90 => MidiEvent::NoteOn {
                channel,
                key: d0?,
                velocity: d1?,
            },
            0xA0 => MidiEvent::PolyAftertouch {
                channel,
                key: d0?,
                value: d1?,
            },
            0xB0 => MidiEvent::ControlChange {
                channel,
                controller: d0?,
                value: d1?,
            },
            0xC0 => MidiEvent::ProgramChange {
                channel,
                program: d0?,
            },
            0xD0 => MidiEvent::ChannelAftertouch {
                channel,
                value: d0?,
            },
            _ => {
                let raw = (d1? as i16) << 7 | d0? as i16;
                MidiEvent::PitchBend {
                    channel,
                    value: raw - 8192,
                }
            }
        })
    }

    pub fn channel(&self) -> u8 {
        match *self {
            MidiEvent::NoteOn { channel, .. }
            | MidiEvent::NoteOff { channel, .. }
            | MidiEvent::PolyAftertouch { channel, .. }
            | MidiEvent::ControlChange { channel, .. }
            | MidiEvent::ProgramChange { channel, .. }
            | MidiEvent::ChannelAftertouch { channel, .. }
            | MidiEvent::PitchBend { channel, .. } => channel,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_channel_messages() {
        assert_eq!(
            MidiEvent::from_bytes(&[0x93, 60, 100]),
            Some(MidiEvent::NoteOn {
                channel: 3,
                key: 60,
                velocity: 100
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xB0, 64, 127]),
            Some(MidiEvent::ControlChange {
                channel: 0,
                controller: 64,
                value: 127
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xE1, 0x00, 0x40]),
            Some(MidiEvent::PitchBend {
                channel: 1,
                value: 0
            })
        );
        assert_eq!(
            MidiEvent::from_bytes(&[0xE0, 0x7F, 0x7F]),
            Some(MidiEvent::PitchBend {
                channel: 0,
                value: 8191
            })
        );
    }

    #[test]
    fn rejects_truncated_and_system_bytes() {
        assert_eq!(MidiEvent::from_bytes(&[0x90, 60]), None);
        assert_eq!(MidiEvent::from_bytes(&[0xF8]), None);
        assert_eq!(MidiEvent::from_bytes(&[60, 100]), None);
        assert_eq!(MidiEvent::from_bytes(&[]), None);
    }
}
