//! Wire messages, encrypted envelopes, versioning and the identity model
//! for Passcrow (§3, §4.4, §4.8, §6).

mod envelope;
mod error;
mod identity;
mod messages;
mod version;

pub use envelope::Envelope;
pub use error::{Error, Result};
pub use identity::{Identity, IdentityRegistry};
pub use messages::{
    DeletionRequest, DeletionResponse, EscrowRequest, EscrowRequestData, EscrowRequestParameters,
    EscrowResponse, PaymentSchemeDescriptor, PolicyObject, RecoveryRequest, RecoveryResponse,
    VerificationRequest, VerificationResponse,
};
pub use version::{check_version, PROTOCOL_VERSION, SUPPORTED_VERSIONS};
