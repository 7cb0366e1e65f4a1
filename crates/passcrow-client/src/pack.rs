//! `RecoveryPack` and `EscrowRecord` (§3, §4.7): the client-local record of
//! a protected secret and the servers holding its shares, plus the
//! ephemeral-mode key derivations that let a pack be recovered with no
//! local state at all.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use passcrow_crypto::{aead_decrypt, aead_encrypt, random_bytes, N_FACTOR_SLOW, NONCE_LEN};
use passcrow_proto::EscrowResponse;

use crate::error::{Error, Result};

/// Confusables-free alphabet used both for per-share verification prefixes
/// and as the character set `generate_ephemeral_user_key` draws from.
pub const VERIFICATION_PREFIXES: &str = "ABCDEFGHJKLMNPQRSTUVWXYZ23456789";
pub const MAX_SHARES: usize = 32;

/// Bytes `generate_ephemeral_user_key` strips out of a base64 draw because
/// they're easily confused with one another when handwritten or read aloud.
const EPHEMERAL_KEY_EXCLUDE: &[u8] = b"/+1lO0";

/// One server's stake in a protected secret: which identity it challenges,
/// the escrow response it returned, and the per-share key (`K_ERD`) needed
/// to decrypt that share later.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRecord {
    pub kind: String,
    pub server: String,
    pub response: EscrowResponse,
    #[serde(rename = "recovery-key")]
    pub recovery_key: String,
}

/// The client-local record of a protected secret (§3). Mutated only to
/// attach ephemeral metadata after creation; destroyed by `delete`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryPack {
    pub name: String,
    /// base64(nonce || ciphertext) of the protected secret bytes under the
    /// AES key this pack's shares reconstruct.
    pub secret: String,
    #[serde(rename = "created-ts")]
    pub created_ts: u64,
    #[serde(rename = "is-ephemeral", default, skip_serializing_if = "is_false")]
    pub is_ephemeral: bool,
    #[serde(rename = "ephemeral-id", skip_serializing_if = "Option::is_none", default)]
    pub ephemeral_id: Option<String>,
    pub description: String,
    #[serde(rename = "min-shares")]
    pub min_shares: usize,
    /// Shares kept only locally - generated by the §4.2 inflation rule when
    /// fewer than 3 real servers are in play.
    pub shares: Vec<String>,
    pub escrow: Vec<EscrowRecord>,
}

fn is_false(b: &bool) -> bool {
    !*b
}

impl RecoveryPack {
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.escrow.iter().map(|e| e.kind.clone()).collect();
        kinds.sort();
        kinds
    }

    /// The earliest expiration among this pack's escrow records - the
    /// moment the pack as a whole can no longer be fully recovered.
    pub fn expires_ts(&self) -> u64 {
        self.escrow
            .iter()
            .filter_map(|e| e.response.expiration)
            .min()
            .unwrap_or(0)
    }

    /// Pair each escrow record with a stable one-character verification
    /// prefix, skipping the last record when it is the ephemeral pack
    /// upload (that one is recovered via `decrypt_ephemeral`, not a normal
    /// verification round).
    pub fn prefixed_escrow_list(&self) -> Vec<(char, &EscrowRecord)> {
        let escrowed: &[EscrowRecord] = if self.ephemeral_id.is_some() {
            &self.escrow[..self.escrow.len().saturating_sub(1)]
        } else {
            &self.escrow
        };
        VERIFICATION_PREFIXES.chars().zip(escrowed.iter()).collect()
    }
}

/// A fresh 16-character, dash-grouped key drawn from a confusables-free
/// alphabet, suitable for a user to write down or read aloud.
pub fn generate_ephemeral_user_key() -> String {
    let mut collected = String::new();
    while collected.len() < 16 {
        let raw = random_bytes::<32>();
        let encoded = BASE64.encode(raw);
        collected.extend(encoded.chars().filter(|c| !EPHEMERAL_KEY_EXCLUDE.contains(&(*c as u8))));
    }
    let k = &collected[..16];
    format!("{}-{}-{}-{}", &k[0..4], &k[4..8], &k[8..12], &k[12..16])
}

/// `base16(derive_key(user_key, salt="Escrow ID", length=128))` (§4.7): the
/// row id the ephemeral pack upload demands via `prefer-id`.
pub fn ephemeral_escrow_id(user_key: &str) -> Result<String> {
    let derived = passcrow_crypto::derive_key(&[user_key.as_bytes()], b"Escrow ID", N_FACTOR_SLOW, 128)?;
    Ok(hex::encode(derived))
}

/// `derive_key(user_key, salt="Escrow Key")`: the key the ephemeral upload's
/// outer escrow envelope (`K_ERD`) is sealed under. Deterministic so a
/// client with nothing but `user_key` can recompute it to ask a server for
/// the row back.
pub fn ephemeral_escrow_key(user_key: &str) -> Result<[u8; 32]> {
    let derived = passcrow_crypto::derive_key(&[user_key.as_bytes()], b"Escrow Key", N_FACTOR_SLOW, 256)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&derived);
    Ok(key)
}

/// `derive_key(user_key, salt="")`: the key the pack itself is sealed
/// under before being handed to the reserved identity as its escrowed
/// "secret" (§4.7) - distinct from [`ephemeral_escrow_key`] so that peeling
/// the server-side envelope doesn't also hand out the pack's own key.
pub fn ephemeral_pack_key(user_key: &str) -> Result<[u8; 32]> {
    let derived = passcrow_crypto::derive_key(&[user_key.as_bytes()], b"", N_FACTOR_SLOW, 256)?;
    let mut key = [0u8; 32];
    key.copy_from_slice(&derived);
    Ok(key)
}

/// Build the minimal pack a client with no local state needs to drive
/// `recover_ephemeral` from nothing but `server:user_key` (§4.7, §8
/// scenario: fresh client recovers by human-typed key alone). Every field
/// on it is a pure function of `user_key`; nothing here was ever sent to
/// or learned from a server.
pub fn ephemeral_stub_pack(server: &str, user_key: &str) -> Result<RecoveryPack> {
    let escrow_data_id = ephemeral_escrow_id(user_key)?;
    let recovery_key = BASE64.encode(ephemeral_escrow_key(user_key)?);
    Ok(RecoveryPack {
        name: format!("{server}:{user_key}"),
        secret: String::new(),
        created_ts: 0,
        is_ephemeral: true,
        ephemeral_id: Some(format!("{server}:{user_key}")),
        description: String::new(),
        min_shares: 1,
        shares: vec![],
        escrow: vec![EscrowRecord {
            kind: "ephemeral".to_string(),
            server: server.to_string(),
            response: EscrowResponse {
                version: passcrow_proto::PROTOCOL_VERSION.to_string(),
                escrow_data_id: Some(escrow_data_id),
                expiration: None,
                error: None,
            },
            recovery_key,
        }],
    })
}

/// Encrypt `secret` under `key`, producing the base64 blob stored in
/// [`RecoveryPack::secret`].
pub fn seal_secret(secret: &[u8], key: &[u8]) -> Result<String> {
    let nonce = random_bytes::<NONCE_LEN>();
    let ct = aead_encrypt(key, &nonce, secret, None)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ct.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ct);
    Ok(BASE64.encode(blob))
}

pub fn unseal_secret(blob: &str, key: &[u8]) -> Result<Vec<u8>> {
    let raw = BASE64.decode(blob.as_bytes()).map_err(|e| Error::Io(e.to_string()))?;
    split_and_decrypt(&raw, key)
}

/// Serialize and encrypt an entire pack - the ephemeral-mode upload: the
/// pack itself, rather than just its secret, becomes the thing escrowed.
pub fn seal_pack(pack: &RecoveryPack, key: &[u8]) -> Result<String> {
    let json = serde_json::to_vec(pack).map_err(|e| Error::Io(e.to_string()))?;
    let nonce = random_bytes::<NONCE_LEN>();
    let ct = aead_encrypt(key, &nonce, &json, None)?;
    let mut blob = Vec::with_capacity(NONCE_LEN + ct.len());
    blob.extend_from_slice(&nonce);
    blob.extend_from_slice(&ct);
    Ok(BASE64.encode(blob))
}

pub fn unseal_pack(blob: &str, key: &[u8]) -> Result<RecoveryPack> {
    let raw = BASE64.decode(blob.as_bytes()).map_err(|e| Error::Io(e.to_string()))?;
    let json = split_and_decrypt(&raw, key)?;
    serde_json::from_slice(&json).map_err(|e| Error::Io(e.to_string()))
}

fn split_and_decrypt(raw: &[u8], key: &[u8]) -> Result<Vec<u8>> {
    if raw.len() < NONCE_LEN {
        return Err(Error::Io("ciphertext shorter than nonce".to_string()));
    }
    let (nonce, body) = raw.split_at(NONCE_LEN);
    let nonce: [u8; NONCE_LEN] = nonce.try_into().unwrap();
    Ok(aead_decrypt(key, &nonce, body, None)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ephemeral_user_key_has_expected_shape() {
        let key = generate_ephemeral_user_key();
        assert_eq!(key.len(), 19); // 16 chars + 3 dashes
        let groups: Vec<&str> = key.split('-').collect();
        assert_eq!(groups.len(), 4);
        for g in groups {
            assert_eq!(g.len(), 4);
            assert!(g.chars().all(|c| !EPHEMERAL_KEY_EXCLUDE.contains(&(c as u8))));
        }
    }

    #[test]
    fn ephemeral_id_and_key_are_deterministic_per_user_key() {
        let key = "AbCd-2345-FfHi-Xyz7";
        assert_eq!(ephemeral_escrow_id(key).unwrap(), ephemeral_escrow_id(key).unwrap());
        assert_eq!(
            ephemeral_escrow_key(key).unwrap().to_vec(),
            ephemeral_escrow_key(key).unwrap().to_vec()
        );
        assert_ne!(ephemeral_escrow_id(key).unwrap(), ephemeral_escrow_id("different-key-here-x").unwrap());
    }

    #[test]
    fn secret_round_trips() {
        let key = random_bytes::<32>();
        let sealed = seal_secret(b"hunter2\n", &key).unwrap();
        assert_eq!(unseal_secret(&sealed, &key).unwrap(), b"hunter2\n");
    }

    #[test]
    fn prefixed_escrow_list_excludes_ephemeral_tail() {
        let pack = RecoveryPack {
            name: "x".to_string(),
            secret: "s".to_string(),
            created_ts: 0,
            is_ephemeral: true,
            ephemeral_id: Some("server.test:AbCd".to_string()),
            description: "d".to_string(),
            min_shares: 1,
            shares: vec![],
            escrow: vec![
                EscrowRecord {
                    kind: "mailto".to_string(),
                    server: "a.test".to_string(),
                    response: EscrowResponse::ok("id-1".to_string(), 1000),
                    recovery_key: "k1".to_string(),
                },
                EscrowRecord {
                    kind: "ephemeral".to_string(),
                    server: "a.test".to_string(),
                    response: EscrowResponse::ok("id-2".to_string(), 1000),
                    recovery_key: "k2".to_string(),
                },
            ],
        };
        let list = pack.prefixed_escrow_list();
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].0, 'A');
    }
}
