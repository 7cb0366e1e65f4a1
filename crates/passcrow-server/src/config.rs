//! Server-wide tunables (§4.6). Grounded in the original server's
//! constructor defaults.

/// ~10 years, the original's "forever, for practical purposes" default.
pub const DEFAULT_EXPIRATION_SECONDS: u64 = 10 * 366 * 24 * 3600;
pub const DEFAULT_VRFY_TIMEOUT_SECONDS: u64 = 1800;
/// One disk block; comfortably fits an ephemeral-recovery-sized request.
pub const DEFAULT_MAX_REQUEST_BYTES: usize = 4096;
pub const DEFAULT_FREE_TIME_SECONDS: u64 = 25 * 3600;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub country_code: String,
    pub about_url: String,
    /// Cap on any escrow row's lifetime, regardless of what a client
    /// requests or pays for.
    pub max_expiration_seconds: u64,
    /// Cap on how long a verification round holds a decrypted share.
    pub max_timeout_seconds: u64,
    pub max_request_bytes: usize,
    /// §9 open question: the Python original never consumes a vcode on a
    /// successful recovery, tolerating client crashes between receiving and
    /// using a share at the cost of allowing replay within the code's
    /// window. Kept configurable rather than silently changed; default
    /// matches the original.
    pub consume_vcode_on_success: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            country_code: "??".to_string(),
            about_url: "https://passcrow.org/".to_string(),
            max_expiration_seconds: DEFAULT_EXPIRATION_SECONDS,
            max_timeout_seconds: DEFAULT_VRFY_TIMEOUT_SECONDS,
            max_request_bytes: DEFAULT_MAX_REQUEST_BYTES,
            consume_vcode_on_success: false,
        }
    }
}
