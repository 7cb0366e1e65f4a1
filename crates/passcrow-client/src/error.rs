//! error types for passcrow-client

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// A server's response carried an `error` field.
    #[error("server error: {0}")]
    Server(String),

    /// A multi-server operation exhausted its retry budget.
    #[error("operation failed: {0}")]
    Incomplete(String),

    #[error("no server in policy advertises an escrow duration of at least {0} seconds")]
    NoSuitablePaymentScheme(u64),

    #[error("not enough verified shares: needed {needed}, got {got}")]
    NotEnoughShares { needed: usize, got: usize },

    #[error("pack not found: {0}")]
    PackNotFound(String),

    #[error("invalid policy line: {0}")]
    InvalidPolicyLine(String),

    #[error("ephemeral protection requires at least 2 identities")]
    NotEnoughIdentitiesForEphemeral,

    #[error("cannot handle more than {0} shares")]
    TooManyShares(usize),

    #[error(transparent)]
    Proto(#[from] passcrow_proto::Error),

    #[error(transparent)]
    Crypto(#[from] passcrow_crypto::Error),

    #[error(transparent)]
    Sharing(#[from] passcrow_sharing::Error),

    #[error(transparent)]
    Hashcash(#[from] passcrow_hashcash::Error),

    #[error("{0}")]
    Io(String),
}
