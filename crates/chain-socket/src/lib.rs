//! Stateful socket layer: channels with join/in/out/leave handlers,
//! multiplexed over long-lived SSE sessions, backed by `chain-pubsub` for
//! cross-node fan-out.

pub mod channel;
pub mod error;
pub mod socket;
pub mod transport;

pub use channel::{Channel, JoinHandler, InHandler, LeaveHandler, LeaveReason, OutHandler};
pub use error::{SocketError, SocketResult};
pub use socket::{Session, Socket, SocketHandler, SocketStatus, DEFAULT_OUTBOUND_CAPACITY};
pub use transport::{ConnectHook, CorsConfig, SseTransport};
