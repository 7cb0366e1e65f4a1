//! Big-endian conversion between AES key bytes and the integer
//! representation the secret-sharing module splits and reconstructs.

use num_bigint::BigUint;

/// Interpret `key` as a big-endian unsigned integer.
pub fn key_to_int(key: &[u8]) -> BigUint {
    BigUint::from_bytes_be(key)
}

/// Render `value` as a big-endian byte string exactly `length_bytes` long,
/// left-padding with zeroes.
pub fn key_from_int(value: &BigUint, length_bytes: usize) -> Vec<u8> {
    let raw = value.to_bytes_be();
    if raw.len() >= length_bytes {
        return raw[raw.len() - length_bytes..].to_vec();
    }
    let mut out = vec![0u8; length_bytes - raw.len()];
    out.extend_from_slice(&raw);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips() {
        let key = [0xAAu8; 32];
        let i = key_to_int(&key);
        let back = key_from_int(&i, 32);
        assert_eq!(back, key);
    }

    #[test]
    fn pads_short_values() {
        let i = BigUint::from(1u8);
        let back = key_from_int(&i, 32);
        assert_eq!(back.len(), 32);
        assert_eq!(back[31], 1);
        assert!(back[..31].iter().all(|&b| b == 0));
    }
}
