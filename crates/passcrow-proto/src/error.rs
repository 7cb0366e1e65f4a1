//! error types for passcrow-proto

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identity: {0}")]
    InvalidIdentity(String),

    #[error("unknown identity kind: {0}")]
    UnknownKind(String),

    #[error("unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    #[error("envelope is not sealed")]
    NotSealed,

    #[error("envelope is not plaintext")]
    NotPlain,

    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    #[error(transparent)]
    Crypto(#[from] passcrow_crypto::Error),

    #[error("serialization failed: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("invalid base64: {0}")]
    Base64(#[from] base64::DecodeError),
}
