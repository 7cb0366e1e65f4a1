//! Payment schemes and the registry a server advertises in its policy
//! object (§4.3, §4.6 `policy`). A token is always `"<scheme_id>:<cash>"`;
//! the prefix alone selects which scheme parses and verifies the rest.

use std::time::Duration;

use crate::error::{Error, Result};
use crate::mint;

/// One server-advertised way to pay for escrow duration.
pub trait PaymentScheme: Send + Sync {
    /// Stable identifier used as the token's scheme prefix, e.g. `"free"`
    /// or `"hashcash-12"`.
    fn scheme_id(&self) -> String;

    /// Escrow duration (seconds) a valid payment under this scheme grants.
    fn expiration_seconds(&self) -> u64;

    /// Hashcash difficulty in bits, if this scheme is hashcash-based.
    fn hashcash_bits(&self) -> Option<u32> {
        None
    }

    /// Mint a payment token (without the scheme prefix) for `data`.
    fn make_payment(&self, data: &[u8]) -> Result<String>;

    /// Verify a payment token's `cash` half against `data` as of `now`.
    /// Returns the granted expiration in seconds, or 0 if invalid.
    fn process(&self, cash: &str, data: &[u8], now: u64) -> Result<u64>;
}

/// No proof of work: a short fixed grant, matching the Python original's
/// `PaymentFree` (default ~25 hours).
pub struct FreePayment {
    pub expiration_seconds: u64,
}

impl PaymentScheme for FreePayment {
    fn scheme_id(&self) -> String {
        "free".to_string()
    }

    fn expiration_seconds(&self) -> u64 {
        self.expiration_seconds
    }

    fn make_payment(&self, _data: &[u8]) -> Result<String> {
        Ok("0".to_string())
    }

    fn process(&self, _cash: &str, _data: &[u8], _now: u64) -> Result<u64> {
        Ok(self.expiration_seconds)
    }
}

/// A hashcash tier: proof of work at a fixed difficulty grants a fixed
/// (longer) escrow duration.
pub struct HashcashPayment {
    pub bits: u32,
    pub expiration_seconds: u64,
    pub maxtime: Duration,
}

impl PaymentScheme for HashcashPayment {
    fn scheme_id(&self) -> String {
        format!("hashcash-{}", self.bits)
    }

    fn expiration_seconds(&self) -> u64 {
        self.expiration_seconds
    }

    fn hashcash_bits(&self) -> Option<u32> {
        Some(self.bits)
    }

    fn make_payment(&self, data: &[u8]) -> Result<String> {
        mint::mint(self.bits, data, self.maxtime).map_err(|e| match e {
            crate::Error::MintTimeout => Error::MintTimeout,
            other => other,
        })
    }

    fn process(&self, cash: &str, data: &[u8], now: u64) -> Result<u64> {
        let ok = mint::verify(cash, data, self.bits, now)?;
        Ok(if ok { self.expiration_seconds } else { 0 })
    }
}

/// The ordered set of payment schemes a server accepts, keyed by
/// `scheme_id` for dispatch.
pub struct PaymentRegistry {
    schemes: Vec<Box<dyn PaymentScheme>>,
}

impl PaymentRegistry {
    pub fn new(schemes: Vec<Box<dyn PaymentScheme>>) -> Self {
        Self { schemes }
    }

    pub fn schemes(&self) -> &[Box<dyn PaymentScheme>] {
        &self.schemes
    }

    /// Mint a token (with scheme prefix) for `data` using the scheme
    /// identified by `scheme_id`.
    pub fn make_payment(&self, scheme_id: &str, data: &[u8]) -> Result<String> {
        let scheme = self
            .find(scheme_id)
            .ok_or_else(|| Error::UnknownScheme(scheme_id.to_string()))?;
        let cash = scheme.make_payment(data)?;
        Ok(format!("{scheme_id}:{cash}"))
    }

    /// Verify a full `"<scheme_id>:<cash>"` token against `data`, returning
    /// the granted expiration in seconds (0 if invalid or unknown).
    pub fn take_payment(&self, token: &str, data: &[u8], now: u64) -> u64 {
        let Some((scheme_id, cash)) = token.split_once(':') else {
            return 0;
        };
        match self.find(scheme_id) {
            Some(scheme) => scheme.process(cash, data, now).unwrap_or(0),
            None => 0,
        }
    }

    fn find(&self, scheme_id: &str) -> Option<&dyn PaymentScheme> {
        self.schemes
            .iter()
            .find(|s| s.scheme_id() == scheme_id)
            .map(|b| b.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    #[test]
    fn free_scheme_always_grants_its_fixed_duration() {
        let registry = PaymentRegistry::new(vec![Box::new(FreePayment {
            expiration_seconds: 25 * 3600,
        })]);
        let token = registry.make_payment("free", b"request").unwrap();
        assert_eq!(registry.take_payment(&token, b"request", now()), 25 * 3600);
        assert_eq!(registry.take_payment(&token, b"other data", now()), 25 * 3600);
    }

    #[test]
    fn hashcash_scheme_requires_matching_data() {
        let registry = PaymentRegistry::new(vec![Box::new(HashcashPayment {
            bits: 4,
            expiration_seconds: 183 * 86400,
            maxtime: Duration::from_secs(5),
        })]);
        let token = registry.make_payment("hashcash-4", b"request body").unwrap();
        assert_eq!(
            registry.take_payment(&token, b"request body", now()),
            183 * 86400
        );
        assert_eq!(registry.take_payment(&token, b"different body", now()), 0);
    }

    #[test]
    fn unknown_scheme_grants_nothing() {
        let registry = PaymentRegistry::new(vec![Box::new(FreePayment {
            expiration_seconds: 3600,
        })]);
        assert_eq!(registry.take_payment("bogus:0", b"x", now()), 0);
    }
}
