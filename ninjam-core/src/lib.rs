//! NINJAM client protocol engine.
//! Host-driven: no I/O; host passes events and receives actions.

pub mod auth;
pub mod core;
pub mod download;
pub mod protocol;
pub mod reassembly;
pub mod registry;
pub mod timing;
pub mod wire;

pub use auth::{Credentials, PasswordHash};
pub use crate::core::{
    Action, AudioDecodeError, ConnectionState, DecodeJob, Event, LocalChannel, NinjamClient,
    SessionError,
};
pub use protocol::{ChatCommand, ChatMessage, Guid, Message, ProtocolError};
pub use registry::Playback;
pub use timing::{TimerHandle, TimerKind};
pub use wire::{decode_frame, encode_frame, Frame, FrameDecodeError};
