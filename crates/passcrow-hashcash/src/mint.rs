//! Raw hashcash collision search (§4.3): bind a counter and timestamp to the
//! caller-supplied `data` via scrypt, and accept whenever the low `bits`
//! bits of the result are zero.

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use scrypt::{scrypt, Params};

use crate::error::{Error, Result};

const SCRYPT_N_FACTOR: u8 = 8;
const SCRYPT_R: u32 = 8;
const SCRYPT_P: u32 = 1;
const SCRYPT_LEN: usize = 16;

/// Tokens whose timestamp is older than this (seconds) are rejected.
pub const MAX_AGE_SECONDS: i64 = 125;
/// Tokens may claim a timestamp up to this far in the future (clock skew).
pub const MAX_SKEW_SECONDS: i64 = 5;

fn probe(counter: u64, ts: u64, data: &[u8]) -> Result<[u8; SCRYPT_LEN]> {
    let mut input = Vec::with_capacity(data.len() * 2 + 32);
    input.extend_from_slice(data);
    input.extend_from_slice(format!("{counter:x}").as_bytes());
    input.extend_from_slice(format!("{ts:x}").as_bytes());
    input.extend_from_slice(data);

    let params = Params::new(SCRYPT_N_FACTOR, SCRYPT_R, SCRYPT_P, SCRYPT_LEN)
        .map_err(|e| Error::KdfFailed(e.to_string()))?;
    let mut out = [0u8; SCRYPT_LEN];
    scrypt(&input, b"", &params, &mut out).map_err(|e| Error::KdfFailed(e.to_string()))?;
    Ok(out)
}

fn bitmask_zero(hash: &[u8; SCRYPT_LEN], bits: u32) -> bool {
    let value = u128::from_be_bytes(*hash);
    let mask: u128 = if bits >= 128 { u128::MAX } else { (1u128 << bits) - 1 };
    value & mask == 0
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

/// Search for a `(counter, timestamp)` pair whose scrypt probe has its low
/// `bits` bits zero, spending at most `maxtime`. Returns the raw
/// `"hex(counter)-hex(ts)"` cash string - the scheme prefix is added by the
/// caller.
pub fn mint(bits: u32, data: &[u8], maxtime: Duration) -> Result<String> {
    let deadline = Instant::now() + maxtime;
    let mut counter: u64 = 1;
    loop {
        let ts = now_unix();
        let h = probe(counter, ts, data)?;
        if bitmask_zero(&h, bits) {
            return Ok(format!("{counter:x}-{ts:x}"));
        }
        if Instant::now() >= deadline {
            return Err(Error::MintTimeout);
        }
        counter += 1;
    }
}

/// Verify a `"hex(counter)-hex(ts)"` cash string against `data` at
/// difficulty `bits`, as of `now` (unix seconds). Returns whether it's
/// valid: both time-fresh (`now - 125 < ts < now + 5`) and a real collision.
pub fn verify(cash: &str, data: &[u8], bits: u32, now: u64) -> Result<bool> {
    let (counter_hex, ts_hex) = cash
        .split_once('-')
        .ok_or_else(|| Error::MalformedToken(cash.to_string()))?;
    let counter = u64::from_str_radix(counter_hex, 16)
        .map_err(|_| Error::MalformedToken(cash.to_string()))?;
    let ts = u64::from_str_radix(ts_hex, 16).map_err(|_| Error::MalformedToken(cash.to_string()))?;

    let now_i = now as i64;
    let ts_i = ts as i64;
    if !(ts_i > now_i - MAX_AGE_SECONDS && ts_i < now_i + MAX_SKEW_SECONDS) {
        return Ok(false);
    }

    let h = probe(counter, ts, data)?;
    Ok(bitmask_zero(&h, bits))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mints_and_verifies_at_low_difficulty() {
        let token = mint(4, b"request body", Duration::from_secs(5)).unwrap();
        assert!(verify(&token, b"request body", 4, now_unix()).unwrap());
    }

    #[test]
    fn rejects_mismatched_data() {
        let token = mint(4, b"request body", Duration::from_secs(5)).unwrap();
        assert!(!verify(&token, b"different body", 4, now_unix()).unwrap());
    }

    #[test]
    fn rejects_stale_timestamp() {
        let token = mint(4, b"request body", Duration::from_secs(5)).unwrap();
        assert!(!verify(&token, b"request body", 4, now_unix() + 1000).unwrap());
    }

    #[test]
    fn rejects_malformed_token() {
        assert!(verify("not-a-token-at-all", b"x", 4, now_unix()).is_err());
    }
}
