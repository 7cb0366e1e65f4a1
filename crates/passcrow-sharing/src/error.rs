//! error types for passcrow-sharing

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("threshold must be >= 3 and <= total shares (got n={n}, m={m})")]
    InvalidThreshold { n: usize, m: usize },

    #[error("malformed share: {0}")]
    InvalidShare(String),

    #[error("not enough shares: have {have}, need at least {need}")]
    NotEnoughShares { have: usize, need: usize },
}
