//! AEAD encryption, scrypt key derivation, randomness and key<->integer
//! conversion: the cryptographic primitives every other passcrow crate
//! builds on.

mod aead;
mod error;
mod kdf;
mod keys;

pub use aead::{aead_decrypt, aead_encrypt, random_bytes, DEFAULT_AAD, NONCE_LEN};
pub use error::{Error, Result};
pub use kdf::{derive_key, random_key, N_FACTOR_FAST, N_FACTOR_HASHCASH, N_FACTOR_SLOW};
pub use keys::{key_from_int, key_to_int};
