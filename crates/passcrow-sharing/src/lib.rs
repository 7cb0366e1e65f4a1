//! Shamir's Secret Sharing over GF(2^521 - 1).
//!
//! A secret integer is split into `m` shares, any `n` of which reconstruct
//! it exactly; fewer than `n` shares do not. `n` must be at least 3 - below
//! that the client inflates the request and keeps the extra shares locally
//! (see `passcrow-client`).

mod error;
mod field;
mod share;

pub use error::{Error, Result};
pub use field::prime;
pub use share::{make_random_shares, recover_secret, MIN_THRESHOLD};
