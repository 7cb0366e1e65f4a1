//! error types for passcrow-storage

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("row not found")]
    NotFound,

    #[error("malformed row id: {0}")]
    InvalidRowId(String),

    #[error("backend error: {0}")]
    Backend(String),
}
