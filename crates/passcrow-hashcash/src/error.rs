//! error types for passcrow-hashcash

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("scrypt probe failed: {0}")]
    KdfFailed(String),

    #[error("no collision found within the time budget")]
    MintTimeout,

    #[error("malformed payment token: {0}")]
    MalformedToken(String),

    #[error("unknown payment scheme: {0}")]
    UnknownScheme(String),
}
