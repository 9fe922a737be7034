//! Voice bookkeeping: channels, arenas, sustain holds and the note lifecycle
//! that ties them together.

pub mod arena;
pub mod channel;
pub mod factory;
pub mod hold;
pub mod manager;
pub mod message;
pub mod voice;

pub use arena::VoiceArena;
pub use channel::{ChannelState, ChannelTable, KeyState};
pub use factory::VoiceFactory;
pub use hold::{HoldBuffer, HoldItem};
pub use manager::{NoteSettings, VoiceManager};
pub use message::{EngineMessage, ParamChange};
pub use voice::{NoteContext, StereoBlock, Voice, VoiceDsp, VoiceParams, VoiceState};
