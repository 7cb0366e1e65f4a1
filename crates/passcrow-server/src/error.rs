//! error types for passcrow-server

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Request too large")]
    RequestTooLarge,

    #[error("Bad request")]
    BadRequest,

    #[error("Not found")]
    NotFound,

    #[error("Sorry, rate limited.")]
    RateLimited,

    #[error("Unsupported kind of Identity: {0}")]
    UnsupportedKind(String),

    #[error("Insufficient payment")]
    InsufficientPayment,

    #[error("Incorrect verification code")]
    IncorrectCode,

    #[error("Internal Error")]
    Internal,

    #[error(transparent)]
    Storage(#[from] passcrow_storage::Error),

    #[error(transparent)]
    Proto(#[from] passcrow_proto::Error),
}
