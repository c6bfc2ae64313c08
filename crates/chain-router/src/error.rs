//! Router-specific error type, layered on [`chain_core::ChainError`] for
//! path-parsing/registration failures.

use thiserror::Error;

#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum RouterError {
    #[error(transparent)]
    Path(#[from] chain_core::ChainError),

    /// A route registration conflicted with an existing one on the same
    /// method. A programmer error, surfaced by panicking at startup.
    #[error("route conflict on {method} {path}: {other}")]
    RouteConflict {
        method: String,
        path: String,
        other: String,
    },

    #[error("method must not be empty")]
    EmptyMethod,

    #[error("handler must not be nil")]
    NilHandler,

    #[error("invalid middleware shape at registration")]
    InvalidMiddlewareShape,

    /// Request-time handler/middleware failure, routed to the configured
    /// error handler.
    #[error("handler error: {0}")]
    Handler(String),

    /// A request panicked; routed to the configured panic handler.
    #[error("panic in request handler: {0}")]
    Panic(String),

    #[error("request body could not be read")]
    BodyReadFailure,

    #[error("response writer does not support flushing")]
    FlushUnsupported,

    #[error("no session for the resume cookie")]
    NoSessionToResume,
}

pub type RouterResult<T> = Result<T, RouterError>;
