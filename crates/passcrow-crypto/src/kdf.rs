//! scrypt-based key derivation, tuned via an `n_factor` (log2 of scrypt's N
//! parameter) the way this protocol expects: slow (20) for user-typed
//! passphrases, fast (14) for stretching random material, very fast (8) for
//! hashcash collision search.

use scrypt::{scrypt, Params};

use crate::aead::random_bytes;
use crate::error::{Error, Result};

/// Default `n_factor` for deriving a key from a user-typed passphrase.
pub const N_FACTOR_SLOW: u8 = 20;
/// `n_factor` used to stretch already-random key material.
pub const N_FACTOR_FAST: u8 = 14;
/// `n_factor` used inside the hashcash collision search (§4.3).
pub const N_FACTOR_HASHCASH: u8 = 8;

const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;

/// Derive `length_bits / 8` bytes of key material from the concatenation of
/// `inputs`, salted with `salt`, via scrypt(N = 2^n_factor, r = 8, p = 1).
pub fn derive_key(inputs: &[&[u8]], salt: &[u8], n_factor: u8, length_bits: usize) -> Result<Vec<u8>> {
    let mut password = Vec::new();
    for part in inputs {
        password.extend_from_slice(part);
    }
    let params = Params::new(n_factor, SCRYPT_R, SCRYPT_P, length_bits / 8)
        .map_err(|e| Error::KdfFailed(e.to_string()))?;
    let mut out = vec![0u8; length_bits / 8];
    scrypt(&password, salt, &params, &mut out).map_err(|e| Error::KdfFailed(e.to_string()))?;
    Ok(out)
}

/// A fresh 256-bit AES key, stretched from OS randomness plus process/time
/// jitter at [`N_FACTOR_FAST`] so two calls in the same process never
/// collide even on a broken RNG.
pub fn random_key(n_factor: u8) -> Result<[u8; 32]> {
    let mut seed = random_bytes::<32>().to_vec();
    seed.extend_from_slice(&std::process::id().to_be_bytes());
    let now = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    seed.extend_from_slice(&now.as_nanos().to_be_bytes());

    let derived = derive_key(&[&seed], b"", n_factor, 256)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&derived);
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn derive_key_is_deterministic() {
        let a = derive_key(&[b"hello"], b"salt", 4, 256).unwrap();
        let b = derive_key(&[b"hello"], b"salt", 4, 256).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn different_salt_differs() {
        let a = derive_key(&[b"hello"], b"salt-a", 4, 256).unwrap();
        let b = derive_key(&[b"hello"], b"salt-b", 4, 256).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn concatenates_multiple_inputs() {
        let joined = derive_key(&[b"hello", b"world"], b"s", 4, 256).unwrap();
        let separate = derive_key(&[b"helloworld"], b"s", 4, 256).unwrap();
        assert_eq!(joined, separate);
    }

    #[test]
    fn random_key_is_not_reused() {
        let a = random_key(N_FACTOR_FAST).unwrap();
        let b = random_key(N_FACTOR_FAST).unwrap();
        assert_ne!(a, b);
    }
}
