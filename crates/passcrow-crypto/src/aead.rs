//! AES-GCM-256 authenticated encryption with the fixed associated data this
//! protocol uses everywhere, plus the OS-random byte helper shares with it.

use aes_gcm::aead::consts::U16;
use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::aes::Aes256;
use aes_gcm::{AesGcm, Key};
use rand::RngCore;

use crate::error::{Error, Result};

/// Associated data stamped on every encrypted envelope in this protocol.
pub const DEFAULT_AAD: &[u8] = b"Passcrow Encrypted Data";

/// Nonces are 16 bytes here, not the usual 12 - a fixed protocol constant.
pub const NONCE_LEN: usize = 16;

type Aes256Gcm16 = AesGcm<Aes256, U16>;

/// Fill an array with OS-secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut buf = [0u8; N];
    rand::thread_rng().fill_bytes(&mut buf);
    buf
}

/// Encrypt `plaintext` under `key` (32 bytes) with a 16-byte `nonce`. `aad`
/// defaults to [`DEFAULT_AAD`] when `None`. Nonces must never repeat for the
/// same key - callers should draw them from [`random_bytes`].
pub fn aead_encrypt(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    plaintext: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    cipher
        .encrypt(
            nonce.into(),
            Payload {
                msg: plaintext,
                aad: aad.unwrap_or(DEFAULT_AAD),
            },
        )
        .map_err(|e| Error::EncryptError(e.to_string()))
}

/// Decrypt a ciphertext produced by [`aead_encrypt`]. Any mismatch in key,
/// nonce, ciphertext or `aad` yields [`Error::DecryptError`] - no fallback.
pub fn aead_decrypt(
    key: &[u8],
    nonce: &[u8; NONCE_LEN],
    ciphertext: &[u8],
    aad: Option<&[u8]>,
) -> Result<Vec<u8>> {
    let cipher = cipher_for(key)?;
    cipher
        .decrypt(
            nonce.into(),
            Payload {
                msg: ciphertext,
                aad: aad.unwrap_or(DEFAULT_AAD),
            },
        )
        .map_err(|_| Error::DecryptError)
}

fn cipher_for(key: &[u8]) -> Result<Aes256Gcm16> {
    if key.len() != 32 {
        return Err(Error::InvalidKeyLength {
            expected: 32,
            got: key.len(),
        });
    }
    Ok(Aes256Gcm16::new(Key::<Aes256Gcm16>::from_slice(key)))
}
