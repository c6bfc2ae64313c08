//! Error type for channels, sockets, and the SSE transport.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum SocketError {
    #[error("wire codec error: {0}")]
    Wire(#[from] chain_core::ChainError),

    #[error("pub/sub error: {0}")]
    PubSub(String),

    #[error("no channel joined for topic '{0}'")]
    UnmatchedTopic(String),

    #[error("join handler panicked: {0}")]
    JoinCrashed(String),

    #[error("socket has not joined a topic")]
    SocketNotJoined,

    #[error("session is already closed")]
    SessionClosed,

    #[error("response writer does not support flushing")]
    FlushUnsupported,

    #[error("no session to resume")]
    NoSessionToResume,

    #[error("session store error: {0}")]
    SessionStore(String),

    #[error("handler error: {0}")]
    Handler(String),
}

pub type SocketResult<T> = Result<T, SocketError>;
