//! Text-grammar policies (§4.1, §9): which identities to escrow to, which
//! servers carry which identity kinds, and the n/m ratio to aim for. Parsed
//! from the same human-editable line grammar the default policy file uses.

use std::fmt;

use passcrow_proto::Identity;

use crate::error::{Error, Result};

pub const DEFAULT_N: usize = 3;
pub const DEFAULT_M: usize = 4;
pub const DEFAULT_EXPIRATION_DAYS: u64 = 365;
pub const DEFAULT_TIMEOUT_MINUTES: u64 = 30;

/// `<kinds> via <server>` - which identity kinds a server is trusted to
/// carry shares for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerPolicy {
    pub kinds: Vec<String>,
    pub server: String,
}

impl ServerPolicy {
    pub fn parse(text: &str) -> Result<Self> {
        let (kinds, server) = text
            .split_once(" via ")
            .ok_or_else(|| Error::InvalidPolicyLine(text.to_string()))?;
        let kinds: Vec<String> = kinds.split(',').map(|s| s.trim().to_string()).collect();
        if kinds.is_empty() || kinds.iter().any(|k| k.is_empty()) || server.trim().is_empty() {
            return Err(Error::InvalidPolicyLine(text.to_string()));
        }
        Ok(Self {
            kinds,
            server: server.trim().to_string(),
        })
    }

    pub fn carries(&self, kind: &str) -> bool {
        self.kinds.iter().any(|k| k == kind)
    }
}

impl fmt::Display for ServerPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} via {}", self.kinds.join(", "), self.server)
    }
}

/// `<id>[, warn=<id>][, notify=<id>][ via <server>]` - one identity this
/// client is willing to escrow shares to, with optional escalation
/// contacts and a pinned server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityPolicy {
    pub id: Identity,
    pub warn: Option<Identity>,
    pub notify: Option<Identity>,
    pub server: Option<String>,
    pub timeout_seconds: Option<u64>,
}

impl IdentityPolicy {
    pub fn parse(text: &str) -> Result<Self> {
        let collapsed: String = text.split_whitespace().collect::<Vec<_>>().join(" ");
        let (head, server) = match collapsed.rsplit_once(" via ") {
            Some((h, s)) => (h, Some(s.trim().to_string())),
            None => (collapsed.as_str(), None),
        };

        let mut id: Option<Identity> = None;
        let mut warn: Option<Identity> = None;
        let mut notify: Option<Identity> = None;

        for part in head.split(',') {
            let part = part.trim();
            if part.is_empty() {
                continue;
            }
            if let Some(v) = part.strip_prefix("warn=") {
                warn = Some(Identity::parse(v.trim())?);
            } else if let Some(v) = part.strip_prefix("notify=") {
                notify = Some(Identity::parse(v.trim())?);
            } else if id.is_none() {
                id = Some(Identity::parse(part)?);
            } else {
                return Err(Error::InvalidPolicyLine(text.to_string()));
            }
        }

        let id = id.ok_or_else(|| Error::InvalidPolicyLine(text.to_string()))?;
        Ok(Self {
            id,
            warn,
            notify,
            server,
            timeout_seconds: None,
        })
    }

    pub fn timeout_seconds_or(&self, default_seconds: u64) -> u64 {
        self.timeout_seconds.unwrap_or(default_seconds)
    }
}

impl fmt::Display for IdentityPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.id.as_str())?;
        if let Some(w) = &self.warn {
            write!(f, ", warn={}", w.as_str())?;
        }
        if let Some(n) = &self.notify {
            write!(f, ", notify={}", n.as_str())?;
        }
        if let Some(s) = &self.server {
            write!(f, " via {}", s)?;
        }
        Ok(())
    }
}

/// The full set of policies a `protect` call draws on: which identities to
/// escrow to, the n/m ratio to aim for, which server carries which kind,
/// and the defaults for pack expiration and verification timeout.
#[derive(Debug, Clone)]
pub struct ClientPolicy {
    pub identities: Vec<IdentityPolicy>,
    pub n: usize,
    pub m: usize,
    pub servers: Vec<ServerPolicy>,
    pub expiration_days: u64,
    pub timeout_minutes: u64,
}

impl Default for ClientPolicy {
    fn default() -> Self {
        Self {
            identities: Vec::new(),
            n: DEFAULT_N,
            m: DEFAULT_M,
            servers: Vec::new(),
            expiration_days: DEFAULT_EXPIRATION_DAYS,
            timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
        }
    }
}

impl ClientPolicy {
    /// Scale the configured n/m ratio down to however many identities are
    /// actually on hand, reserving `reserve` of them for other uses (e.g.
    /// the ephemeral pack upload, which consumes one identity's slot).
    ///
    /// `available == 1` always collapses to `(1, 1)` - a single identity
    /// can't meaningfully be split into shares. Otherwise the ratio is
    /// rounded to the nearest whole share count, never below 1.
    pub fn absolute_ratio(&self, reserve: usize) -> (usize, usize) {
        let available = self.identities.len().saturating_sub(reserve);
        if available == 1 {
            return (1, 1);
        }
        if self.m > 0 && self.n <= self.m && self.m == available {
            return (self.n, self.m);
        }
        let adjust = available as f64 / self.m.max(1) as f64;
        let rn = ((self.n as f64 * adjust).round() as usize).max(1);
        (rn, available)
    }

    /// Find a server policy advertising `kind`, if any default covers it.
    pub fn server_for_kind(&self, kind: &str) -> Option<&str> {
        self.servers
            .iter()
            .find(|s| s.carries(kind))
            .map(|s| s.server.as_str())
    }
}

/// Parse the directive-based default policy file format: one `ratio:`,
/// any number of `id:`/`server:` lines, and optional `expiration-days:` /
/// `timeout-minutes:` overrides. Blank lines and `#`-prefixed comments are
/// ignored.
pub fn parse_default_policy(text: &str) -> Result<ClientPolicy> {
    let mut policy = ClientPolicy {
        identities: Vec::new(),
        n: DEFAULT_N,
        m: DEFAULT_M,
        servers: Vec::new(),
        expiration_days: DEFAULT_EXPIRATION_DAYS,
        timeout_minutes: DEFAULT_TIMEOUT_MINUTES,
    };

    for raw_line in text.lines() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (directive, rest) = line
            .split_once(':')
            .ok_or_else(|| Error::InvalidPolicyLine(line.to_string()))?;
        let rest = rest.trim();
        match directive.trim() {
            "ratio" => {
                let (n, m) = rest
                    .split_once('/')
                    .ok_or_else(|| Error::InvalidPolicyLine(line.to_string()))?;
                policy.n = n
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidPolicyLine(line.to_string()))?;
                policy.m = m
                    .trim()
                    .parse()
                    .map_err(|_| Error::InvalidPolicyLine(line.to_string()))?;
            }
            "id" => policy.identities.push(IdentityPolicy::parse(rest)?),
            "server" => policy.servers.push(ServerPolicy::parse(rest)?),
            "expiration_days" => {
                policy.expiration_days = rest
                    .parse()
                    .map_err(|_| Error::InvalidPolicyLine(line.to_string()))?
            }
            "timeout_minutes" => {
                policy.timeout_minutes = rest
                    .parse()
                    .map_err(|_| Error::InvalidPolicyLine(line.to_string()))?
            }
            other => return Err(Error::InvalidPolicyLine(format!("unknown directive {other:?}"))),
        }
    }

    Ok(policy)
}

pub fn format_default_policy(policy: &ClientPolicy) -> String {
    let mut out = String::new();
    out.push_str(&format!("ratio: {}/{}\n", policy.n, policy.m));
    for id in &policy.identities {
        out.push_str(&format!("id: {id}\n"));
    }
    for server in &policy.servers {
        out.push_str(&format!("server: {server}\n"));
    }
    out.push_str(&format!("expiration_days: {}\n", policy.expiration_days));
    out.push_str(&format!("timeout_minutes: {}\n", policy.timeout_minutes));
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_policy_parses_full_grammar() {
        let p = IdentityPolicy::parse("mailto:a@example.org, notify=mailto:b@example.org, warn=tel:+15551234567 via escrow.example.org").unwrap();
        assert_eq!(p.id.as_str(), "mailto:a@example.org");
        assert_eq!(p.notify.unwrap().as_str(), "mailto:b@example.org");
        assert_eq!(p.warn.unwrap().as_str(), "tel:+15551234567");
        assert_eq!(p.server.unwrap(), "escrow.example.org");
    }

    #[test]
    fn identity_policy_parses_bare_id() {
        let p = IdentityPolicy::parse("mailto:a@example.org").unwrap();
        assert_eq!(p.id.as_str(), "mailto:a@example.org");
        assert!(p.warn.is_none());
        assert!(p.server.is_none());
    }

    #[test]
    fn server_policy_round_trips() {
        let s = ServerPolicy::parse("mailto, tel via escrow.example.org").unwrap();
        assert_eq!(s.kinds, vec!["mailto", "tel"]);
        assert!(s.carries("tel"));
        assert_eq!(s.to_string(), "mailto, tel via escrow.example.org");
    }

    #[test]
    fn absolute_ratio_collapses_single_identity() {
        let mut policy = ClientPolicy::default();
        policy.identities.push(IdentityPolicy::parse("mailto:a@example.org").unwrap());
        assert_eq!(policy.absolute_ratio(0), (1, 1));
    }

    #[test]
    fn absolute_ratio_scales_down_to_available() {
        let mut policy = ClientPolicy {
            n: 3,
            m: 4,
            ..ClientPolicy::default()
        };
        for addr in ["a@example.org", "b@example.org"] {
            policy
                .identities
                .push(IdentityPolicy::parse(&format!("mailto:{addr}")).unwrap());
        }
        assert_eq!(policy.absolute_ratio(0), (2, 2));
    }

    #[test]
    fn default_policy_round_trips_through_text() {
        let text = "ratio: 3/4\nid: mailto:a@example.org\nserver: mailto via escrow.example.org\nexpiration_days: 100\ntimeout_minutes: 15\n";
        let policy = parse_default_policy(text).unwrap();
        assert_eq!(policy.n, 3);
        assert_eq!(policy.expiration_days, 100);
        assert_eq!(policy.servers[0].server, "escrow.example.org");
        assert_eq!(format_default_policy(&policy), text);
    }
}
