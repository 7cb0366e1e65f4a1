//! Canonical row id form `"<expiration_hex>-<id_hex>"` (§4.5): the leading
//! expiration is visible to the GC sweep without decoding the row itself.

use rand::RngCore;

/// Build the canonical id for a row with the given `expiration` (unix
/// seconds, 0 meaning "never expires") and `id` suffix.
pub fn canonical(expiration: u64, id: &str) -> String {
    format!("{expiration:x}-{id}")
}

/// A fresh random id suffix (not yet combined with an expiration).
pub fn random_id_part() -> String {
    let mut buf = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// `true` if `id` matches the canonical row-id grammar: one or more hex
/// groups joined by `-`, at least two groups.
pub fn is_valid(id: &str) -> bool {
    let parts: Vec<&str> = id.split('-').collect();
    parts.len() >= 2
        && parts
            .iter()
            .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_hexdigit()))
}

/// Parse the leading expiration field out of a canonical row id.
pub fn expiration_of(canonical_id: &str) -> Option<u64> {
    let (exp_hex, _) = canonical_id.split_once('-')?;
    u64::from_str_radix(exp_hex, 16).ok()
}

/// A row with this expiration, observed at `now`, is expired and must be
/// treated as nonexistent. `expiration == 0` means "never expires".
pub fn is_expired(expiration: u64, now: u64) -> bool {
    expiration > 0 && expiration <= now
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canonical_form_round_trips_expiration() {
        let id = canonical(0x5f3, "abcd1234");
        assert_eq!(id, "5f3-abcd1234");
        assert_eq!(expiration_of(&id), Some(0x5f3));
    }

    #[test]
    fn validates_hex_groups() {
        assert!(is_valid("5f3-abcd1234"));
        assert!(is_valid("0-ab-cd"));
        assert!(!is_valid("not-hex-zz"));
        assert!(!is_valid("onlyonegroup"));
        assert!(!is_valid("-leadingdash"));
    }

    #[test]
    fn expiration_semantics() {
        assert!(!is_expired(0, 1_000_000));
        assert!(is_expired(100, 200));
        assert!(!is_expired(300, 200));
        assert!(is_expired(200, 200));
    }
}
