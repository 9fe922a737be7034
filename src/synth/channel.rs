use crate::{N_CHANNELS, N_KEYS};

/// Per-key state of one MIDI channel. A key is down while `velocity > 0`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct KeyState {
    pub velocity: u8,
    pub last_detune: f32,
    /// Order of the most recent voice started for this key, used by the
    /// "latest" mono priority.
    pub voice_order: u64,
    pub poly_aftertouch: f32,
}

/// Registered/non-registered parameter accumulator. Index 0 is the LSB,
/// index 1 the MSB.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParamNumber {
    pub number: [u8; 2],
    pub value: [u8; 2],
}

#[derive(Debug, Clone)]
pub struct ChannelState {
    pub keys: [KeyState; N_KEYS],
    pub hold: bool,
    /// Raw bend, -8192 .. 8191.
    pub pitch_bend: i16,
    /// Per-note MPE bend range.
    pub pitch_bend_range: f32,
    pub pressure: f32,
    pub pan: f32,
    pub timbre: f32,
    pub rpn: ParamNumber,
    pub nrpn: ParamNumber,
    pub nrpn_last: bool,
}

impl Default for ChannelState {
    fn default() -> Self {
        Self {
            keys: [KeyState::default(); N_KEYS],
            hold: false,
            pitch_bend: 0,
            pitch_bend_range: 0.0,
            pressure: 0.0,
            pan: 0.0,
            timbre: 0.0,
            rpn: ParamNumber::default(),
            nrpn: ParamNumber::default(),
            nrpn_last: false,
        }
    }
}

impl ChannelState {
    pub fn key_down(&self, key: usize) -> bool {
        self.keys[key].velocity > 0
    }

    /// Bend in semitones, using the channel's own range.
    pub fn pitch_bend_semitones(&self) -> f32 {
        self.pitch_bend as f32 / 8192.0 * self.pitch_bend_range
    }

    pub fn reset_keys(&mut self) {
        for key in &mut self.keys {
            key.velocity = 0;
            key.poly_aftertouch = 0.0;
        }
    }
}

/// All sixteen channels.
#[derive(Debug, Clone)]
pub struct ChannelTable {
    channels: Vec<ChannelState>,
}

impl Default for ChannelTable {
    fn default() -> Self {
        Self {
            channels: vec![ChannelState::default(); N_CHANNELS],
        }
    }
}

impl ChannelTable {
    pub fn get(&self, channel: usize) -> &ChannelState {
        &self.channels[channel]
    }

    pub fn get_mut(&mut self, channel: usize) -> &mut ChannelState {
        &mut self.channels[channel]
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ChannelState> {
        self.channels.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ChannelState> {
        self.channels.iter_mut()
    }

    pub fn set_pitch_bend_range(&mut self, semitones: f32) {
        for channel in &mut self.channels {
            channel.pitch_bend_range = semitones;
        }
    }

    /// Drop every hold flag and key, as before a patch swap.
    pub fn clear_notes(&mut self) {
        for channel in &mut self.channels {
            channel.hold = false;
            channel.reset_keys();
        }
    }
}
