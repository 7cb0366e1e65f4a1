//! Hashcash proof-of-work minting/verification and the payment-scheme
//! registry that gates how long a server keeps an escrow row alive (§4.3).

mod error;
mod mint;
mod scheme;

pub use error::{Error, Result};
pub use mint::{mint as mint_raw, verify as verify_raw, MAX_AGE_SECONDS, MAX_SKEW_SECONDS};
pub use scheme::{FreePayment, HashcashPayment, PaymentRegistry, PaymentScheme};
