//! Shamir share generation and recovery (§4.2): split a secret integer into
//! `m` shares of which any `n` reconstruct it, encoded as `"hex(x)-hex(y)"`.

use std::collections::HashSet;

use num_bigint::{BigInt, BigUint, RandBigInt, Sign};
use num_traits::Zero;
use rand::thread_rng;

use crate::error::{Error, Result};
use crate::field::{eval_at, lagrange_interpolate, prime};

/// A secret-sharing threshold must challenge at least this many parties -
/// below this the scheme degrades to "any one party recovers everything".
pub const MIN_THRESHOLD: usize = 3;

/// Split `secret` into `m` shares, any `n` of which reconstruct it.
/// Requires `3 <= n <= m`.
pub fn make_random_shares(secret: &BigUint, n: usize, m: usize) -> Result<Vec<String>> {
    if n < MIN_THRESHOLD || n > m {
        return Err(Error::InvalidThreshold { n, m });
    }
    let p = prime();
    let mut rng = thread_rng();

    let mut poly = Vec::with_capacity(n);
    poly.push(secret % &p);
    for _ in 1..n {
        poly.push(rng.gen_biguint_below(&p));
    }

    let mut shares = Vec::with_capacity(m);
    for x in 1..=m {
        let xb = BigUint::from(x as u64);
        let y = eval_at(&poly, &xb, &p);
        shares.push(format!("{:x}-{:x}", xb, y));
    }
    Ok(shares)
}

/// Parse one `"hex(x)-hex(y)"` share into its `(x, y)` pair.
fn parse_share(share: &str) -> Result<(BigInt, BigInt)> {
    let (x_hex, y_hex) = share
        .split_once('-')
        .ok_or_else(|| Error::InvalidShare(share.to_string()))?;
    let x = BigUint::parse_bytes(x_hex.as_bytes(), 16)
        .ok_or_else(|| Error::InvalidShare(share.to_string()))?;
    let y = BigUint::parse_bytes(y_hex.as_bytes(), 16)
        .ok_or_else(|| Error::InvalidShare(share.to_string()))?;
    Ok((
        BigInt::from_biguint(Sign::Plus, x),
        BigInt::from_biguint(Sign::Plus, y),
    ))
}

/// Reconstruct the secret from `shares`. Requires at least 3 shares with
/// distinct `x` coordinates; fewer or colliding shares fail outright rather
/// than silently return a wrong value.
pub fn recover_secret(shares: &[String]) -> Result<BigUint> {
    if shares.len() < MIN_THRESHOLD {
        return Err(Error::NotEnoughShares {
            have: shares.len(),
            need: MIN_THRESHOLD,
        });
    }

    let mut xs = Vec::with_capacity(shares.len());
    let mut ys = Vec::with_capacity(shares.len());
    let mut seen = HashSet::new();
    for share in shares {
        let (x, y) = parse_share(share)?;
        if !seen.insert(x.clone()) {
            return Err(Error::InvalidShare(format!("duplicate x in {}", share)));
        }
        xs.push(x);
        ys.push(y);
    }

    let p_u = prime();
    let p = BigInt::from_biguint(Sign::Plus, p_u);
    let secret = lagrange_interpolate(&BigInt::zero(), &xs, &ys, &p);
    let (_, bytes) = secret.to_bytes_be();
    Ok(BigUint::from_bytes_be(&bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_and_recover_threshold_of_total() {
        let secret = BigUint::from(123456789u64);
        let shares = make_random_shares(&secret, 3, 5).unwrap();
        assert_eq!(shares.len(), 5);

        let recovered = recover_secret(&shares[0..3]).unwrap();
        assert_eq!(recovered, secret);

        let recovered2 = recover_secret(&shares[2..5]).unwrap();
        assert_eq!(recovered2, secret);
    }

    #[test]
    fn any_n_of_m_recovers() {
        let secret = BigUint::from(987654321u64);
        let shares = make_random_shares(&secret, 4, 8).unwrap();
        for combo in [
            vec![0, 1, 2, 3],
            vec![4, 5, 6, 7],
            vec![0, 3, 5, 7],
        ] {
            let subset: Vec<String> = combo.iter().map(|&i| shares[i].clone()).collect();
            assert_eq!(recover_secret(&subset).unwrap(), secret);
        }
    }

    #[test]
    fn below_protocol_minimum_always_errors() {
        let secret = BigUint::from(42u64);
        let shares = make_random_shares(&secret, 3, 5).unwrap();
        assert!(matches!(
            recover_secret(&shares[0..2]),
            Err(Error::NotEnoughShares { .. })
        ));
    }

    #[test]
    fn below_share_threshold_but_above_minimum_yields_wrong_value() {
        // n=4 but only 3 of the 4 needed shares are supplied: the
        // interpolation still runs (3 >= MIN_THRESHOLD) but approximates the
        // wrong degree-2 polynomial, so it must not equal the real secret.
        let secret = BigUint::from(555555u64);
        let shares = make_random_shares(&secret, 4, 6).unwrap();
        let recovered = recover_secret(&shares[0..3]).unwrap();
        assert_ne!(recovered, secret);
    }

    #[test]
    fn rejects_threshold_below_three() {
        let secret = BigUint::from(1u64);
        assert!(matches!(
            make_random_shares(&secret, 2, 5),
            Err(Error::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn rejects_threshold_above_total() {
        let secret = BigUint::from(1u64);
        assert!(matches!(
            make_random_shares(&secret, 5, 3),
            Err(Error::InvalidThreshold { .. })
        ));
    }

    #[test]
    fn rejects_malformed_share() {
        assert!(parse_share("not-hex-at-all-zz").is_err());
    }

    #[test]
    fn max_share_count() {
        let secret = BigUint::from(7u64);
        let shares = make_random_shares(&secret, 3, 32).unwrap();
        assert_eq!(shares.len(), 32);
        assert_eq!(recover_secret(&shares[0..3]).unwrap(), secret);
    }
}
