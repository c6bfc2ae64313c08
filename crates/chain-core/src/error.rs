//! Shared error type for the `chain` crates.
//!
//! Registration-time failures (bad path syntax, route conflicts) are
//! programmer errors surfaced at startup; request-time failures are routed
//! through the caller's own error handling.

use thiserror::Error;

/// Errors shared across path parsing, the wildcard store, and the wire codec.
#[derive(Debug, Error, PartialEq, Eq, Clone)]
#[non_exhaustive]
pub enum ChainError {
    /// A `:name` segment had an empty name.
    #[error("parameter name cannot be empty in path '{0}'")]
    EmptyParamName(String),

    /// More than one wildcard segment appeared in a single path segment.
    #[error("only one wildcard per path segment is allowed")]
    MultipleWildcardsInSegment,

    /// A wildcard segment was not the last segment of the path.
    #[error("catch-all routes are only allowed at the end")]
    WildcardNotAtEnd,

    /// Two routes on the same method resolve to the same priority and token shape.
    #[error("routes conflict: '{0}' and '{1}'")]
    RouteConflict(String, String),

    /// A pattern registered into a [`crate::wildcard::WildcardStore`] already exists.
    #[error("duplicate key '{0}' in wildcard store")]
    DuplicateKey(String),

    /// A wildcard store pattern had a `*` that was not the final character.
    #[error("'*' may only appear as the final character of a pattern")]
    WildcardNotTerminal,

    /// A wildcard store pattern contained more than one `*`.
    #[error("only one '*' is allowed per pattern")]
    MultipleWildcards,

    /// The wire codec could not decode a message.
    #[error("malformed message: {0}")]
    DecodeError(String),

    /// A registered HTTP method string was empty.
    #[error("method must not be empty")]
    EmptyMethod,

    /// A registered path did not start with '/'.
    #[error("path must begin with '/', got '{0}'")]
    PathMissingLeadingSlash(String),
}

/// Convenience alias used throughout the `chain` crates.
pub type ChainResult<T> = Result<T, ChainError>;
