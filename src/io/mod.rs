// Purpose - external interfaces, format conversions

pub mod converter;
pub mod midi;

pub use converter::{int7_to_bipolar, midi_note_to_freq, midi_to_message};
pub use midi::MidiEvent;
