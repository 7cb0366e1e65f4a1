//! Identities of the form `kind:address` (§3, §4.8): the contact points a
//! server challenges during verification. Validation and hint-masking are
//! pluggable per kind via an explicit [`IdentityRegistry`] built by the
//! caller - no process-global registration (§9's design note).

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A validated `kind:address` contact point, e.g. `mailto:a@example.org`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Parse `raw`, normalizing bare e-mail addresses and phone numbers by
    /// adding the `mailto:`/`tel:` prefix they're missing. Does not
    /// validate the address shape - pass the result to
    /// [`IdentityRegistry::validate`] for that.
    pub fn parse(raw: &str) -> Result<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(Error::InvalidIdentity(raw.to_string()));
        }
        let normalized = if let Some((kind, _)) = raw.split_once(':') {
            if kind.chars().all(|c| c.is_ascii_alphanumeric()) && !kind.is_empty() {
                raw.to_string()
            } else if raw.contains('@') {
                format!("mailto:{raw}")
            } else {
                return Err(Error::InvalidIdentity(raw.to_string()));
            }
        } else if raw.contains('@') {
            format!("mailto:{raw}")
        } else if raw.starts_with('+') {
            format!("tel:{raw}")
        } else {
            return Err(Error::InvalidIdentity(raw.to_string()));
        };
        Ok(Identity(normalized))
    }

    pub fn kind(&self) -> &str {
        self.0.split_once(':').map(|(k, _)| k).unwrap_or(&self.0)
    }

    pub fn address(&self) -> &str {
        self.0.split_once(':').map(|(_, a)| a).unwrap_or("")
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type ValidatorFn = Arc<dyn Fn(&str) -> Result<()> + Send + Sync>;
type HintFn = Arc<dyn Fn(&str) -> String + Send + Sync>;

struct KindHandlers {
    validate: ValidatorFn,
    hint: HintFn,
    human_phrase: String,
}

/// An explicit, constructed-at-startup set of identity kinds this process
/// understands, each with a validator and a hint-masking function. Threaded
/// through wherever identities are parsed or checked - no global state.
#[derive(Clone)]
pub struct IdentityRegistry {
    kinds: HashMap<String, Arc<KindHandlers>>,
}

impl Default for IdentityRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

impl IdentityRegistry {
    pub fn empty() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// The built-in `mailto`/`email`/`tel`/`sms` kinds (§4.8).
    pub fn with_defaults() -> Self {
        let mut reg = Self::empty();
        reg.register("mailto", validate_email, hint_email, "e-mail to");
        reg.register("email", validate_email, hint_email, "e-mail to");
        reg.register("tel", validate_phone, hint_phone, "call or text");
        reg.register("sms", validate_phone, hint_phone, "text message to");
        reg
    }

    pub fn register(
        &mut self,
        kind: &str,
        validate: impl Fn(&str) -> Result<()> + Send + Sync + 'static,
        hint: impl Fn(&str) -> String + Send + Sync + 'static,
        human_phrase: &str,
    ) {
        self.kinds.insert(
            kind.to_string(),
            Arc::new(KindHandlers {
                validate: Arc::new(validate),
                hint: Arc::new(hint),
                human_phrase: human_phrase.to_string(),
            }),
        );
    }

    pub fn is_supported(&self, kind: &str) -> bool {
        self.kinds.contains_key(kind)
    }

    /// Sorted list of registered kinds, as advertised in a server's
    /// [`crate::PolicyObject`].
    pub fn sorted_kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.kinds.keys().cloned().collect();
        kinds.sort();
        kinds
    }

    pub fn human_phrase(&self, kind: &str) -> Result<&str> {
        self.kinds
            .get(kind)
            .map(|h| h.human_phrase.as_str())
            .ok_or_else(|| Error::UnknownKind(kind.to_string()))
    }

    pub fn validate(&self, identity: &Identity) -> Result<()> {
        let handlers = self
            .kinds
            .get(identity.kind())
            .ok_or_else(|| Error::UnknownKind(identity.kind().to_string()))?;
        (handlers.validate)(identity.address())
    }

    /// Mask an identity's address for display, e.g. in a
    /// [`crate::VerificationResponse`]'s `hint` field.
    pub fn hint(&self, identity: &Identity) -> Result<String> {
        let handlers = self
            .kinds
            .get(identity.kind())
            .ok_or_else(|| Error::UnknownKind(identity.kind().to_string()))?;
        Ok((handlers.hint)(identity.address()))
    }
}

/// Domains popular enough that showing them in full isn't itself sensitive.
const WELL_KNOWN_EMAIL_DOMAINS: &[&str] = &["gmail.com", "hotmail.com", "outlook.com", "yahoo.com"];

fn validate_email(address: &str) -> Result<()> {
    let (local, domain) = address
        .split_once('@')
        .ok_or_else(|| Error::InvalidIdentity(address.to_string()))?;
    if local.is_empty() || domain.is_empty() || address.chars().any(char::is_whitespace) {
        return Err(Error::InvalidIdentity(address.to_string()));
    }
    if domain.contains('@') || !domain.contains('.') {
        return Err(Error::InvalidIdentity(address.to_string()));
    }
    Ok(())
}

fn hint_email(address: &str) -> String {
    let Some((local, domain)) = address.split_once('@') else {
        return "*".to_string();
    };
    let u1 = &local[..local.len().div_ceil(3).max(1).min(local.len())];
    if WELL_KNOWN_EMAIL_DOMAINS.contains(&domain) {
        return format!("{u1}*@{domain}");
    }
    let chars: Vec<char> = domain.chars().collect();
    let d1 = chars.first().map(|c| c.to_string()).unwrap_or_default();
    let tail_len = (2 * (chars.len().saturating_sub(1))) / 3;
    let d2: String = chars[chars.len().saturating_sub(tail_len)..].iter().collect();
    format!("{u1}*@{d1}*{d2}")
}

fn validate_phone(address: &str) -> Result<()> {
    let digits = address.strip_prefix('+').unwrap_or("");
    if digits.is_empty() || digits.len() < 7 || digits.len() > 15 || !digits.chars().all(|c| c.is_ascii_digit()) {
        return Err(Error::InvalidIdentity(address.to_string()));
    }
    Ok(())
}

fn hint_phone(address: &str) -> String {
    if address.len() <= 4 {
        return "*".repeat(address.len());
    }
    let (head, tail) = address.split_at(3);
    let visible_tail = &tail[tail.len().saturating_sub(2)..];
    format!("{head}{}{}", "*".repeat(tail.len() - 2), visible_tail)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_bare_email_and_phone() {
        assert_eq!(Identity::parse("a@x.test").unwrap().as_str(), "mailto:a@x.test");
        assert_eq!(Identity::parse("+15551234567").unwrap().as_str(), "tel:+15551234567");
        assert_eq!(Identity::parse("mailto:a@x.test").unwrap().as_str(), "mailto:a@x.test");
    }

    #[test]
    fn kind_and_address_split_correctly() {
        let id = Identity::parse("mailto:a@x.test").unwrap();
        assert_eq!(id.kind(), "mailto");
        assert_eq!(id.address(), "a@x.test");
    }

    #[test]
    fn rejects_garbage() {
        assert!(Identity::parse("").is_err());
        assert!(Identity::parse("not an identity").is_err());
    }

    #[test]
    fn default_registry_validates_known_kinds() {
        let reg = IdentityRegistry::with_defaults();
        assert!(reg.validate(&Identity::parse("mailto:a@x.test").unwrap()).is_ok());
        assert!(reg.validate(&Identity::parse("tel:+15551234567").unwrap()).is_ok());
        assert!(reg
            .validate(&Identity::parse("mailto:not-an-email").unwrap())
            .is_err());
    }

    #[test]
    fn unregistered_kind_is_unsupported() {
        let reg = IdentityRegistry::with_defaults();
        assert!(!reg.is_supported("carrier-pigeon"));
        assert!(matches!(
            reg.validate(&Identity("carrier-pigeon:loft-1".to_string())),
            Err(Error::UnknownKind(_))
        ));
    }

    #[test]
    fn sorted_kinds_lists_all_registered_kinds() {
        let reg = IdentityRegistry::with_defaults();
        assert_eq!(reg.sorted_kinds(), vec!["email", "mailto", "sms", "tel"]);
    }

    #[test]
    fn well_known_email_domain_is_not_masked() {
        let hint = hint_email("someone@gmail.com");
        assert!(hint.ends_with("@gmail.com"));
    }

    #[test]
    fn other_email_domain_is_masked() {
        let hint = hint_email("someone@example.org");
        assert!(!hint.contains("someone"));
        assert!(hint.starts_with('s'));
    }

    #[test]
    fn phone_hint_masks_middle_digits() {
        let hint = hint_phone("+15551234567");
        assert!(hint.starts_with("+15"));
        assert!(hint.contains('*'));
    }
}
