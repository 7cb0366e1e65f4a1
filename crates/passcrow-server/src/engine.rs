//! Transport-agnostic RPC handlers (§4.6): pure functions of
//! `(storage, handler registry, payment registry, request)`. Grounded in
//! `PasscrowServer` from the original server module, reshaped from one
//! `try/except`-per-endpoint style into typed `Result` plumbing with a
//! shared preamble.

use std::collections::HashMap;
use std::sync::Arc;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use rand::Rng;
use sha2::{Digest, Sha256};

use passcrow_hashcash::PaymentRegistry;
use passcrow_proto::{
    check_version, DeletionRequest, DeletionResponse, Envelope, EscrowRequest,
    EscrowRequestData, EscrowRequestParameters, EscrowResponse, IdentityRegistry,
    PaymentSchemeDescriptor, PolicyObject, RecoveryRequest, RecoveryResponse, VerificationRequest,
    VerificationResponse, SUPPORTED_VERSIONS,
};
use passcrow_storage::{Storage, TABLE_ESCROW, TABLE_RLIMIT, TABLE_VCODES};

use crate::config::ServerConfig;
use crate::error::{Error, Result};
use crate::handler::IdentityHandler;

/// The escrow protocol's server half: owns storage, the set of supported
/// identity kinds and their delivery handlers, accepted payment schemes,
/// and the tunables of [`ServerConfig`]. Carries no transport of its own -
/// callers push raw request bytes in and get a typed response back, with
/// an opaque `caller_id` for rate limiting (§4.6).
pub struct PasscrowServer {
    storage: Arc<dyn Storage>,
    identities: IdentityRegistry,
    handlers: HashMap<String, Arc<dyn IdentityHandler>>,
    payments: PaymentRegistry,
    config: ServerConfig,
}

impl PasscrowServer {
    pub fn new(
        storage: Arc<dyn Storage>,
        identities: IdentityRegistry,
        handlers: HashMap<String, Arc<dyn IdentityHandler>>,
        payments: PaymentRegistry,
        config: ServerConfig,
    ) -> Result<Self> {
        storage.prepare_table(TABLE_ESCROW)?;
        storage.prepare_table(TABLE_VCODES)?;
        storage.prepare_table(TABLE_RLIMIT)?;
        Ok(Self {
            storage,
            identities,
            handlers,
            payments,
            config,
        })
    }

    /// Sweep all three tables for expired rows. Intended to be called
    /// periodically by the host process (§10.4).
    pub fn expire_all(&self, now: u64) -> Result<usize> {
        let mut removed = 0;
        for table in [TABLE_ESCROW, TABLE_VCODES, TABLE_RLIMIT] {
            removed += self.storage.expire_table(table, now)?;
        }
        Ok(removed)
    }

    fn enforce_rate_limit(&self, caller_id: &[u8], now: u64) -> Result<()> {
        let key = hex::encode(Sha256::digest(caller_id));
        match self.storage.fetch(TABLE_RLIMIT, &key, now) {
            Ok(_) => Err(Error::RateLimited),
            Err(passcrow_storage::Error::NotFound) => {
                self.storage
                    .insert(TABLE_RLIMIT, &[b"1"], Some(&key), now + 1)?;
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// No preamble: `policy` carries no state and is never rate limited
    /// (§4.6 only lists it as an exception to the shared preamble).
    pub fn policy(&self) -> PolicyObject {
        let payment_schemes = self
            .payments
            .schemes()
            .iter()
            .map(|s| PaymentSchemeDescriptor {
                scheme: if s.hashcash_bits().is_some() {
                    "hashcash".to_string()
                } else {
                    "free".to_string()
                },
                scheme_id: s.scheme_id(),
                description: format!("grants {} seconds of escrow", s.expiration_seconds()),
                expiration_seconds: s.expiration_seconds(),
                hashcash_bits: s.hashcash_bits(),
            })
            .collect();
        PolicyObject {
            versions: SUPPORTED_VERSIONS.iter().map(|v| v.to_string()).collect(),
            country_code: self.config.country_code.clone(),
            about_url: self.config.about_url.clone(),
            kinds: self.identities.sorted_kinds(),
            max_request_bytes: self.config.max_request_bytes,
            max_expiration_seconds: self.config.max_expiration_seconds,
            max_timeout_seconds: self.config.max_timeout_seconds,
            payment_schemes,
        }
    }

    pub fn escrow(&self, caller_id: &[u8], now: u64, raw: &[u8]) -> EscrowResponse {
        if raw.len() > self.config.max_request_bytes {
            return EscrowResponse::err(Error::RequestTooLarge.to_string());
        }
        let req: EscrowRequest = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(_) => return EscrowResponse::err(Error::BadRequest.to_string()),
        };
        if let Err(e) = self.enforce_rate_limit(caller_id, now) {
            return EscrowResponse::err(e.to_string());
        }
        if let Err(e) = check_version(&req.version) {
            return EscrowResponse::err(e.to_string());
        }
        match self.process_escrow(req, now) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "escrow request failed");
                EscrowResponse::err(e.to_string())
            }
        }
    }

    fn process_escrow(&self, req: EscrowRequest, now: u64) -> Result<EscrowResponse> {
        let key = BASE64
            .decode(req.parameters_key.as_bytes())
            .map_err(|_| Error::BadRequest)?;
        // Decrypting here, before anything else, proves this client holds
        // a working cipher - important since the ERD ciphertexts cannot be
        // decrypted until much later, if ever.
        let params: EscrowRequestParameters = req
            .parameters
            .unseal(&key)
            .map_err(|_| Error::BadRequest)?
            .as_plain()
            .map_err(|_| Error::BadRequest)?
            .clone();

        if !self.identities.is_supported(&params.kind) {
            return Err(Error::UnsupportedKind(params.kind.clone()));
        }

        // The wire form allows several ERD ciphertexts per call; in
        // practice `protect` always sends exactly one and the join is a
        // no-op, but a multi-element request is stored and verified the
        // same way as a single concatenated blob (matching the original).
        let mut joined = String::new();
        for env in &req.escrow_data {
            joined.push_str(env.as_sealed().map_err(|_| Error::BadRequest)?);
        }

        let pay_exp = self
            .payments
            .take_payment(&params.payment, joined.as_bytes(), now);
        let granted = now + pay_exp.min(self.config.max_expiration_seconds);
        let expiration = params.expiration.min(granted);
        if expiration <= now {
            return Err(Error::InsufficientPayment);
        }

        let prefer_id: Option<&str> = match &params.prefer_id {
            Some(id)
                if matches!(
                    self.storage.fetch(TABLE_ESCROW, id.as_str(), now),
                    Err(passcrow_storage::Error::NotFound)
                ) =>
            {
                Some(id.as_str())
            }
            _ => None,
        };
        let honored = prefer_id.is_some();

        let row_id = self
            .storage
            .insert(TABLE_ESCROW, &[joined.as_bytes()], prefer_id, expiration)?;

        // Echo back the bare id the client asked for when we honored it,
        // rather than the full `expiration-id` canonical form.
        let escrow_data_id = if honored {
            params.prefer_id.clone().unwrap()
        } else {
            row_id
        };

        Ok(EscrowResponse::ok(escrow_data_id, expiration))
    }

    pub fn verification(&self, caller_id: &[u8], now: u64, raw: &[u8]) -> VerificationResponse {
        if raw.len() > self.config.max_request_bytes {
            return VerificationResponse::err(Error::RequestTooLarge.to_string());
        }
        let req: VerificationRequest = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(_) => return VerificationResponse::err(Error::BadRequest.to_string()),
        };
        if let Err(e) = self.enforce_rate_limit(caller_id, now) {
            return VerificationResponse::err(e.to_string());
        }
        if let Err(e) = check_version(&req.version) {
            return VerificationResponse::err(e.to_string());
        }
        match self.process_verification(req, now) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "verification request failed");
                VerificationResponse::err(e.to_string())
            }
        }
    }

    fn process_verification(&self, req: VerificationRequest, now: u64) -> Result<VerificationResponse> {
        if req.prefix.chars().count() != 1 {
            return Err(Error::BadRequest);
        }
        let key = BASE64
            .decode(req.escrow_data_key.as_bytes())
            .map_err(|_| Error::BadRequest)?;
        let esd = self.fetch_erd(&req.escrow_data_id, &key, now)?;

        let kind = esd.verify.kind().to_string();
        let handler = self
            .handlers
            .get(&kind)
            .ok_or_else(|| Error::UnsupportedKind(kind.clone()))?;

        let tmo = esd.timeout.min(self.config.max_timeout_seconds);
        let vcode = format!("{}-{:06}", req.prefix, rand::thread_rng().gen_range(0..1_000_000u32));
        let vcode_expiration = now + tmo;

        self.storage.delete(TABLE_VCODES, &req.escrow_data_id)?;
        self.storage.insert(
            TABLE_VCODES,
            &[vcode.as_bytes()],
            Some(&req.escrow_data_id),
            vcode_expiration,
        )?;

        handler
            .send_code(&esd.verify, &esd.description, &vcode, tmo)
            .map_err(|_| Error::Internal)?;

        let hint = self
            .identities
            .hint(&esd.verify)
            .map_err(|_| Error::Internal)?;
        Ok(VerificationResponse::ok(hint, vcode_expiration))
    }

    pub fn recovery(&self, caller_id: &[u8], now: u64, raw: &[u8]) -> RecoveryResponse {
        if raw.len() > self.config.max_request_bytes {
            return RecoveryResponse::err(Error::RequestTooLarge.to_string());
        }
        let req: RecoveryRequest = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(_) => return RecoveryResponse::err(Error::BadRequest.to_string()),
        };
        if let Err(e) = self.enforce_rate_limit(caller_id, now) {
            return RecoveryResponse::err(e.to_string());
        }
        if let Err(e) = check_version(&req.version) {
            return RecoveryResponse::err(e.to_string());
        }
        match self.process_recovery(req, now) {
            Ok(resp) => resp,
            Err(e) => {
                tracing::warn!(error = %e, "recovery request failed");
                RecoveryResponse::err(e.to_string())
            }
        }
    }

    fn process_recovery(&self, req: RecoveryRequest, now: u64) -> Result<RecoveryResponse> {
        // Deliberately indistinguishable from a missing code (§7): both
        // cases collapse onto `IncorrectCode` rather than leaking whether
        // `escrow_data_id` ever existed.
        let stored_vcode = self
            .storage
            .fetch(TABLE_VCODES, &req.escrow_data_id, now)
            .map_err(|_| Error::IncorrectCode)?;
        let stored_vcode = String::from_utf8_lossy(&stored_vcode[0]);
        if req.verification.trim().to_uppercase() != stored_vcode.trim().to_uppercase() {
            return Err(Error::IncorrectCode);
        }

        let key = BASE64
            .decode(req.escrow_data_key.as_bytes())
            .map_err(|_| Error::BadRequest)?;
        let esd = self.fetch_erd(&req.escrow_data_id, &key, now)?;

        if self.config.consume_vcode_on_success {
            self.storage.delete(TABLE_VCODES, &req.escrow_data_id)?;
        }

        Ok(RecoveryResponse::ok(esd.secret))
    }

    pub fn deletion(&self, caller_id: &[u8], now: u64, raw: &[u8]) -> DeletionResponse {
        if raw.len() > self.config.max_request_bytes {
            return DeletionResponse::err(Error::RequestTooLarge.to_string());
        }
        let req: DeletionRequest = match serde_json::from_slice(raw) {
            Ok(r) => r,
            Err(_) => return DeletionResponse::err(Error::BadRequest.to_string()),
        };
        if let Err(e) = self.enforce_rate_limit(caller_id, now) {
            return DeletionResponse::err(e.to_string());
        }
        if let Err(e) = check_version(&req.version) {
            return DeletionResponse::err(e.to_string());
        }
        match self.process_deletion(&req) {
            Ok(()) => DeletionResponse::ok(),
            Err(e) => {
                tracing::warn!(error = %e, "deletion request failed");
                DeletionResponse::err(Error::Internal.to_string())
            }
        }
    }

    fn process_deletion(&self, req: &DeletionRequest) -> Result<()> {
        self.storage.delete(TABLE_ESCROW, &req.escrow_data_id)?;
        self.storage.delete(TABLE_VCODES, &req.escrow_data_id)?;
        Ok(())
    }

    fn fetch_erd(&self, escrow_data_id: &str, key: &[u8], now: u64) -> Result<EscrowRequestData> {
        let columns = self.storage.fetch(TABLE_ESCROW, escrow_data_id, now).map_err(|e| match e {
            passcrow_storage::Error::NotFound => Error::NotFound,
            _ => Error::BadRequest,
        })?;
        let blob = String::from_utf8(columns[0].clone()).map_err(|_| Error::BadRequest)?;
        let esd = Envelope::<EscrowRequestData>::Sealed(blob)
            .unseal(key)
            .map_err(|_| Error::BadRequest)?
            .as_plain()
            .map_err(|_| Error::BadRequest)?
            .clone();
        Ok(esd)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::STANDARD as B64;
    use passcrow_crypto::random_bytes;
    use passcrow_hashcash::FreePayment;
    use passcrow_proto::{EscrowRequestParameters, Identity};
    use passcrow_storage::MemStorage;
    use std::time::{SystemTime, UNIX_EPOCH};

    fn now() -> u64 {
        SystemTime::now().duration_since(UNIX_EPOCH).unwrap().as_secs()
    }

    fn test_server() -> PasscrowServer {
        let storage: Arc<dyn Storage> = Arc::new(MemStorage::new());
        let identities = IdentityRegistry::with_defaults();
        let mut handlers: HashMap<String, Arc<dyn IdentityHandler>> = HashMap::new();
        handlers.insert("mailto".to_string(), Arc::new(crate::handler::NullHandler));
        let payments = PaymentRegistry::new(vec![Box::new(FreePayment {
            expiration_seconds: 3600,
        })]);
        PasscrowServer::new(storage, identities, handlers, payments, ServerConfig::default()).unwrap()
    }

    fn build_escrow_request(secret: &str, verify: &str) -> (EscrowRequest, Vec<u8>) {
        let k_erp = random_bytes::<32>();
        let k_erd = random_bytes::<32>();
        let params = Envelope::plain_value(EscrowRequestParameters {
            kind: "mailto".to_string(),
            expiration: now() + 3600,
            payment: "free:0".to_string(),
            warnings_to: None,
            prefer_id: None,
        })
        .seal(&k_erp)
        .unwrap();
        let erd = Envelope::plain_value(EscrowRequestData {
            description: "test".to_string(),
            secret: secret.to_string(),
            verify: Identity::parse(verify).unwrap(),
            timeout: 300,
            notify: None,
        })
        .seal(&k_erd)
        .unwrap();
        let req = EscrowRequest::new(B64.encode(k_erp), params, vec![erd]);
        (req, k_erd.to_vec())
    }

    #[test]
    fn escrow_then_verify_then_recover_round_trips() {
        let server = test_server();
        let (req, k_erd) = build_escrow_request("share-1-abcd", "mailto:a@x.test");
        let raw = serde_json::to_vec(&req).unwrap();
        let resp = server.escrow(b"client-a", now(), &raw);
        assert!(resp.error.is_none());
        let escrow_id = resp.escrow_data_id.unwrap();

        let vreq = VerificationRequest::new(escrow_id.clone(), B64.encode(&k_erd), "A".to_string());
        let vraw = serde_json::to_vec(&vreq).unwrap();
        let vresp = server.verification(b"client-b", now() + 2, &vraw);
        assert!(vresp.error.is_none(), "{:?}", vresp.error);

        // We can't observe the minted code directly (it only goes to the
        // handler), so fetch it back out of storage the way the handler
        // would have received it.
        let stored = server.storage.fetch(TABLE_VCODES, &escrow_id, now() + 2).unwrap();
        let vcode = String::from_utf8(stored[0].clone()).unwrap();

        let rreq = RecoveryRequest::new(escrow_id.clone(), B64.encode(&k_erd), vcode);
        let rraw = serde_json::to_vec(&rreq).unwrap();
        let rresp = server.recovery(b"client-c", now() + 3, &rraw);
        assert_eq!(rresp.escrow_secret.as_deref(), Some("share-1-abcd"));
    }

    #[test]
    fn recovery_with_wrong_code_fails_without_distinguishing_not_found() {
        let server = test_server();
        let (req, k_erd) = build_escrow_request("share-1", "mailto:a@x.test");
        let raw = serde_json::to_vec(&req).unwrap();
        let resp = server.escrow(b"client-a", now(), &raw);
        let escrow_id = resp.escrow_data_id.unwrap();

        let rreq = RecoveryRequest::new(escrow_id, B64.encode(&k_erd), "A-000000".to_string());
        let rraw = serde_json::to_vec(&rreq).unwrap();
        let rresp = server.recovery(b"client-b", now() + 1, &rraw);
        assert!(rresp.error.is_some());
        assert!(rresp.escrow_secret.is_none());
    }

    #[test]
    fn unsupported_kind_is_rejected_before_payment() {
        let server = test_server();
        let (req, _) = build_escrow_request("share-1", "tel:+15551234567");
        let raw = serde_json::to_vec(&req).unwrap();
        let resp = server.escrow(b"client-a", now(), &raw);
        assert!(resp.error.unwrap().contains("Unsupported kind"));
    }

    #[test]
    fn deletion_removes_escrow_and_vcode_idempotently() {
        let server = test_server();
        let (req, _) = build_escrow_request("share-1", "mailto:a@x.test");
        let raw = serde_json::to_vec(&req).unwrap();
        let resp = server.escrow(b"client-a", now(), &raw);
        let escrow_id = resp.escrow_data_id.unwrap();

        let dreq = DeletionRequest::new(escrow_id);
        let draw = serde_json::to_vec(&dreq).unwrap();
        let d1 = server.deletion(b"client-b", now() + 1, &draw);
        assert!(d1.error.is_none());
        let d2 = server.deletion(b"client-c", now() + 2, &draw);
        assert!(d2.error.is_none());
    }

    #[test]
    fn second_call_within_a_second_is_rate_limited() {
        let server = test_server();
        let policy_req = DeletionRequest::new("deadbeef".to_string());
        let raw = serde_json::to_vec(&policy_req).unwrap();
        let t = now();
        let first = server.deletion(b"same-caller", t, &raw);
        let second = server.deletion(b"same-caller", t, &raw);
        assert!(first.error.is_none());
        assert_eq!(second.error.as_deref(), Some("Sorry, rate limited."));
    }
}
