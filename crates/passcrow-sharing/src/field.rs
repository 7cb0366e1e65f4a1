//! Modular arithmetic helpers over the fixed prime field this protocol's
//! Shamir scheme runs in. Kept separate from the share encoding so the
//! polynomial math reads the way the reference implementation's did.

use num_bigint::{BigInt, BigUint};
use num_traits::{One, Zero};

/// `p = 2^521 - 1`, the 13th Mersenne prime. A 256-bit AES key embeds in
/// this field with room to spare.
pub fn prime() -> BigUint {
    (BigUint::one() << 521u32) - BigUint::one()
}

/// Evaluate `poly` (constant term first) at `x` modulo `prime`, via
/// Horner's method.
pub fn eval_at(poly: &[BigUint], x: &BigUint, prime: &BigUint) -> BigUint {
    let mut acc = BigUint::zero();
    for coeff in poly.iter().rev() {
        acc = (acc * x + coeff) % prime;
    }
    acc
}

/// Reduce `a` into `[0, p)`, correcting for Rust's truncated-division
/// remainder (which may be negative when `a` is negative).
fn norm(a: &BigInt, p: &BigInt) -> BigInt {
    let r = a % p;
    if r < BigInt::zero() {
        r + p
    } else {
        r
    }
}

/// Extended Euclidean algorithm: returns `(gcd, x, y)` with `a*x + b*y = gcd`.
fn extended_gcd(a: &BigInt, b: &BigInt) -> (BigInt, BigInt, BigInt) {
    let (mut old_r, mut r) = (a.clone(), b.clone());
    let (mut old_s, mut s) = (BigInt::one(), BigInt::zero());
    let (mut old_t, mut t) = (BigInt::zero(), BigInt::one());

    while r != BigInt::zero() {
        let quotient = &old_r / &r;
        let new_r = &old_r - &quotient * &r;
        old_r = std::mem::replace(&mut r, new_r);
        let new_s = &old_s - &quotient * &s;
        old_s = std::mem::replace(&mut s, new_s);
        let new_t = &old_t - &quotient * &t;
        old_t = std::mem::replace(&mut t, new_t);
    }
    (old_r, old_s, old_t)
}

/// Compute `num / den (mod p)` via the modular inverse of `den`.
pub fn mod_div(num: &BigInt, den: &BigInt, p: &BigInt) -> BigInt {
    let (_, inv, _) = extended_gcd(den, p);
    norm(&(num * norm(&inv, p)), p)
}

/// Lagrange-interpolate the polynomial through `(x_s[i], y_s[i])` at `x`,
/// modulo `p`. `x_s` must be pairwise distinct.
pub fn lagrange_interpolate(x: &BigInt, x_s: &[BigInt], y_s: &[BigInt], p: &BigInt) -> BigInt {
    let k = x_s.len();
    let mut dens = Vec::with_capacity(k);
    for i in 0..k {
        let mut den = BigInt::one();
        for (j, xj) in x_s.iter().enumerate() {
            if j != i {
                den *= &x_s[i] - xj;
            }
        }
        dens.push(den);
    }
    let den_product = dens.iter().fold(BigInt::one(), |acc, d| acc * d);

    let mut num_sum = BigInt::zero();
    for i in 0..k {
        let mut num = BigInt::one();
        for (j, xj) in x_s.iter().enumerate() {
            if j != i {
                num *= x - xj;
            }
        }
        let term = mod_div(&norm(&(num * &den_product * &y_s[i]), p), &dens[i], p);
        num_sum += term;
    }
    norm(&mod_div(&num_sum, &den_product, p), p)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn eval_at_constant_poly_is_constant() {
        let p = prime();
        let poly = vec![BigUint::from(42u32)];
        assert_eq!(eval_at(&poly, &BigUint::from(7u32), &p), BigUint::from(42u32));
    }

    #[test]
    fn eval_at_linear_poly() {
        let p = prime();
        // f(x) = 3 + 2x
        let poly = vec![BigUint::from(3u32), BigUint::from(2u32)];
        assert_eq!(eval_at(&poly, &BigUint::from(5u32), &p), BigUint::from(13u32));
    }

    #[test]
    fn interpolate_recovers_linear_poly_at_zero() {
        let p_u = prime();
        let p = BigInt::from_biguint(num_bigint::Sign::Plus, p_u.clone());
        // f(x) = 3 + 2x, sampled at x=1,2,3 -> y=5,7,9
        let xs: Vec<BigInt> = [1, 2, 3].iter().map(|&x| BigInt::from(x)).collect();
        let ys: Vec<BigInt> = [5, 7, 9].iter().map(|&y| BigInt::from(y)).collect();
        let secret = lagrange_interpolate(&BigInt::zero(), &xs, &ys, &p);
        assert_eq!(secret, BigInt::from(3));
    }
}
