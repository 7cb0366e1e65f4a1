//! The delivery seam (§4.6, §1 Non-goals): a server knows how to decide
//! *that* a verification code must reach an identity, never *how* - actual
//! SMTP/SMS transmission is an external collaborator that implements this
//! trait.

use passcrow_proto::Identity;

/// Delivers a verification code to a single identity kind. Implementations
/// live outside this crate; running real SMTP/SMS infrastructure is out of
/// scope here (§1).
pub trait IdentityHandler: Send + Sync {
    /// Send `vcode` to `identity`, with `description` as a human hint about
    /// what it guards and `timeout_seconds` the window it remains valid
    /// for. Errors are logged server-side and surfaced to the caller as a
    /// generic internal error, never forwarded verbatim.
    fn send_code(
        &self,
        identity: &Identity,
        description: &str,
        vcode: &str,
        timeout_seconds: u64,
    ) -> std::result::Result<(), String>;
}

/// A handler that drops every code on the floor. Useful for tests and for
/// kinds an operator intentionally leaves undelivered (e.g. during a dry
/// run).
pub struct NullHandler;

impl IdentityHandler for NullHandler {
    fn send_code(
        &self,
        _identity: &Identity,
        _description: &str,
        _vcode: &str,
        _timeout_seconds: u64,
    ) -> std::result::Result<(), String> {
        Ok(())
    }
}
