//! Transport-agnostic server engine for Passcrow's escrow protocol (§4.6):
//! the five RPC handlers, shared preamble, and identity delivery seam. No
//! HTTP, no CLI - those are ambient concerns wired up by
//! `passcrow-serverd` (§10.4).

mod config;
mod engine;
mod error;
mod handler;

pub use config::{
    ServerConfig, DEFAULT_EXPIRATION_SECONDS, DEFAULT_FREE_TIME_SECONDS,
    DEFAULT_MAX_REQUEST_BYTES, DEFAULT_VRFY_TIMEOUT_SECONDS,
};
pub use engine::PasscrowServer;
pub use error::{Error, Result};
pub use handler::{IdentityHandler, NullHandler};

pub use passcrow_hashcash::{FreePayment, HashcashPayment, PaymentRegistry, PaymentScheme};
pub use passcrow_storage::{Storage, TABLE_ESCROW, TABLE_RLIMIT, TABLE_VCODES};
