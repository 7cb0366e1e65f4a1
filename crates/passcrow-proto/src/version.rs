//! Protocol version negotiation (§4.4, §6). Every request/response carries
//! a `passcrow-*-version` field; any value outside [`SUPPORTED_VERSIONS`] is
//! rejected rather than interpreted leniently.

use crate::error::{Error, Result};

pub const PROTOCOL_VERSION: &str = "1.0";
pub const SUPPORTED_VERSIONS: &[&str] = &["1.0"];

pub fn check_version(version: &str) -> Result<()> {
    if SUPPORTED_VERSIONS.contains(&version) {
        Ok(())
    } else {
        Err(Error::UnsupportedVersion(version.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_version() {
        assert!(check_version(PROTOCOL_VERSION).is_ok());
    }

    #[test]
    fn rejects_unknown_version() {
        assert!(matches!(check_version("0.9"), Err(Error::UnsupportedVersion(_))));
        assert!(matches!(check_version("2.0"), Err(Error::UnsupportedVersion(_))));
    }
}
