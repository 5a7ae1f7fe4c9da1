//! VTube Studio integration: the wire envelope and the supervised
//! websocket session that delivers expression changes.

pub mod protocol;
pub mod session;

pub use protocol::Envelope;
pub use session::{AvatarSession, SessionClient, SessionHandle, SessionState, RECONNECT_DELAY};
