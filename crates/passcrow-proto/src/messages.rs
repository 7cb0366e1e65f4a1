//! Wire message types (§3, §6): one tagged record per message, exact
//! dash-separated field names, explicit (de)serialization via `serde` - no
//! dynamic typed-dict base class (§9).

use serde::{Deserialize, Serialize};

use crate::envelope::Envelope;
use crate::identity::Identity;
use crate::version::PROTOCOL_VERSION;

/// Per-request metadata (§3 ERP), always transported sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRequestParameters {
    /// Identity kind, exposed in clear to the server for a capability check
    /// even though the rest of this struct travels encrypted.
    pub kind: String,
    pub expiration: u64,
    pub payment: String,
    #[serde(rename = "warnings-to", skip_serializing_if = "Option::is_none", default)]
    pub warnings_to: Option<Identity>,
    #[serde(rename = "prefer-id", skip_serializing_if = "Option::is_none", default)]
    pub prefer_id: Option<String>,
}

/// Per-share secret capsule (§3 ERD), always transported sealed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRequestData {
    pub description: String,
    pub secret: String,
    pub verify: Identity,
    pub timeout: u64,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub notify: Option<Identity>,
}

/// Wire envelope for an escrow request: protocol version, the base64 key
/// the server needs to decrypt `parameters` right away, the sealed
/// parameters, and the list of sealed per-share ERDs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowRequest {
    #[serde(rename = "passcrow-escrow-request")]
    pub version: String,
    #[serde(rename = "parameters-key")]
    pub parameters_key: String,
    pub parameters: Envelope<EscrowRequestParameters>,
    #[serde(rename = "escrow-data")]
    pub escrow_data: Vec<Envelope<EscrowRequestData>>,
}

impl EscrowRequest {
    pub fn new(
        parameters_key_b64: String,
        parameters: Envelope<EscrowRequestParameters>,
        escrow_data: Vec<Envelope<EscrowRequestData>>,
    ) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            parameters_key: parameters_key_b64,
            parameters,
            escrow_data,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscrowResponse {
    #[serde(rename = "passcrow-escrow-response")]
    pub version: String,
    #[serde(rename = "escrow-data-id", skip_serializing_if = "Option::is_none", default)]
    pub escrow_data_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl EscrowResponse {
    pub fn ok(escrow_data_id: String, expiration: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_data_id: Some(escrow_data_id),
            expiration: Some(expiration),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_data_id: None,
            expiration: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRequest {
    #[serde(rename = "passcrow-verification-request")]
    pub version: String,
    #[serde(rename = "escrow-data-id")]
    pub escrow_data_id: String,
    #[serde(rename = "escrow-data-key")]
    pub escrow_data_key: String,
    pub prefix: String,
}

impl VerificationRequest {
    pub fn new(escrow_data_id: String, escrow_data_key: String, prefix: String) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_data_id,
            escrow_data_key,
            prefix,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VerificationResponse {
    #[serde(rename = "passcrow-verification-response")]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub hint: Option<String>,
    #[serde(rename = "action-url", skip_serializing_if = "Option::is_none", default)]
    pub action_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub expiration: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl VerificationResponse {
    pub fn ok(hint: String, expiration: u64) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            hint: Some(hint),
            action_url: None,
            expiration: Some(expiration),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            hint: None,
            action_url: None,
            expiration: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryRequest {
    #[serde(rename = "passcrow-recovery-request")]
    pub version: String,
    #[serde(rename = "escrow-data-id")]
    pub escrow_data_id: String,
    #[serde(rename = "escrow-data-key")]
    pub escrow_data_key: String,
    pub verification: String,
}

impl RecoveryRequest {
    pub fn new(escrow_data_id: String, escrow_data_key: String, verification: String) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_data_id,
            escrow_data_key,
            verification,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RecoveryResponse {
    #[serde(rename = "passcrow-recovery-response")]
    pub version: String,
    #[serde(rename = "escrow-secret", skip_serializing_if = "Option::is_none", default)]
    pub escrow_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl RecoveryResponse {
    pub fn ok(escrow_secret: String) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_secret: Some(escrow_secret),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_secret: None,
            error: Some(message.into()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeletionRequest {
    #[serde(rename = "passcrow-deletion-request")]
    pub version: String,
    #[serde(rename = "escrow-data-id")]
    pub escrow_data_id: String,
}

impl DeletionRequest {
    pub fn new(escrow_data_id: String) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            escrow_data_id,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeletionResponse {
    #[serde(rename = "passcrow-deletion-response")]
    pub version: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<String>,
}

impl DeletionResponse {
    pub fn ok() -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            error: None,
        }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self {
            version: PROTOCOL_VERSION.to_string(),
            error: Some(message.into()),
        }
    }
}

/// One server-advertised way to pay for escrow duration (§6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentSchemeDescriptor {
    pub scheme: String,
    #[serde(rename = "scheme-id")]
    pub scheme_id: String,
    pub description: String,
    #[serde(rename = "expiration-seconds")]
    pub expiration_seconds: u64,
    #[serde(rename = "hashcash-bits", skip_serializing_if = "Option::is_none", default)]
    pub hashcash_bits: Option<u32>,
}

/// A server's advertised capabilities (§3, §6), returned from the `policy`
/// endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PolicyObject {
    #[serde(rename = "passcrow-versions")]
    pub versions: Vec<String>,
    #[serde(rename = "country-code")]
    pub country_code: String,
    #[serde(rename = "about-url")]
    pub about_url: String,
    pub kinds: Vec<String>,
    #[serde(rename = "max-request-bytes")]
    pub max_request_bytes: usize,
    #[serde(rename = "max-expiration-seconds")]
    pub max_expiration_seconds: u64,
    #[serde(rename = "max-timeout-seconds")]
    pub max_timeout_seconds: u64,
    #[serde(rename = "payment-schemes")]
    pub payment_schemes: Vec<PaymentSchemeDescriptor>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn escrow_response_serializes_with_dashed_field_names() {
        let resp = EscrowResponse::ok("abc-def".to_string(), 1000);
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["escrow-data-id"], "abc-def");
        assert_eq!(json["passcrow-escrow-response"], PROTOCOL_VERSION);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn error_responses_omit_other_fields() {
        let resp = EscrowResponse::err("Insufficient payment");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["error"], "Insufficient payment");
        assert!(json.get("escrow-data-id").is_none());
    }

    #[test]
    fn policy_object_round_trips_through_json() {
        let policy = PolicyObject {
            versions: vec![PROTOCOL_VERSION.to_string()],
            country_code: "IS".to_string(),
            about_url: "https://passcrow.example.org/".to_string(),
            kinds: vec!["mailto".to_string()],
            max_request_bytes: 4096,
            max_expiration_seconds: 366 * 24 * 3600,
            max_timeout_seconds: 1800,
            payment_schemes: vec![PaymentSchemeDescriptor {
                scheme: "free".to_string(),
                scheme_id: "free".to_string(),
                description: "No payment required".to_string(),
                expiration_seconds: 25 * 3600,
                hashcash_bits: None,
            }],
        };
        let json = serde_json::to_string(&policy).unwrap();
        let back: PolicyObject = serde_json::from_str(&json).unwrap();
        assert_eq!(back.country_code, "IS");
        assert_eq!(back.payment_schemes[0].scheme_id, "free");
    }
}
