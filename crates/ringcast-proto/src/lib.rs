pub mod buffer;
pub mod census;
pub mod codec;
pub mod config;
pub mod control;
pub mod net;
pub mod receiver;
pub mod sender;

pub use buffer::{Accept, Buffer, Chunk};
pub use census::{pack_heartbeat, unpack_heartbeat, Census};
pub use codec::{Codec, RawMessage, CHUNK_SIZE, MESSAGE_SIZE};
pub use config::{ReceiverConfig, SenderConfig};
pub use control::ControlEvent;
pub use receiver::{Receiver, StatusHook};
pub use sender::Sender;

/// A required table could not be allocated. The binary maps this to its own
/// exit code, distinct from ordinary initialization failures.
#[derive(Debug)]
pub struct AllocError(pub &'static str);

impl std::fmt::Display for AllocError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "unable to allocate {}", self.0)
    }
}

impl std::error::Error for AllocError {}
