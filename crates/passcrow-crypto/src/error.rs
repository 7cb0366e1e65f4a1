//! error types for passcrow-crypto

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("decryption failed")]
    DecryptError,

    #[error("encryption failed: {0}")]
    EncryptError(String),

    #[error("key derivation failed: {0}")]
    KdfFailed(String),

    #[error("invalid key length: expected {expected} bytes, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },
}
