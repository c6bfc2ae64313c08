//! Error type for the pub/sub fabric.

use thiserror::Error;

#[derive(Debug, Clone, Error)]
#[non_exhaustive]
pub enum PubSubError {
    #[error("path error: {0}")]
    Path(#[from] chain_core::ChainError),

    #[error("no adapter configured for topic '{0}'")]
    NoAdapter(String),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("encryption required but keyring not configured")]
    EncryptionRequired,

    #[error("encryption disabled but frame carried an encrypt tag")]
    UnexpectedEncryption,

    #[error("keyring operation failed: {0}")]
    Keyring(String),

    #[error("adapter broadcast failed: {0}")]
    AdapterFailure(String),
}

pub type PubSubResult<T> = Result<T, PubSubError>;
