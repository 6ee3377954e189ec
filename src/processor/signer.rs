//! # Dispatch Signer
//!
//! Authenticates outbound calls to the action executor.
//!
//! Every dispatch carries an HMAC-SHA256 signature over
//! `"{timestamp}.{payload}"`, the timestamp itself, and the caller's
//! workspace identifier. The timestamp is part of the signed material, never
//! optional, so the receiver can enforce a replay window of its choosing.
//! Window policy is the receiver's concern; enforceability is ours.

use chrono::Utc;
use hmac::{Hmac, Mac};
use sha2::Sha256;

type HmacSha256 = Hmac<Sha256>;

/// Header names the signed dispatch carries.
pub const TIMESTAMP_HEADER: &str = "X-Mirror-Timestamp";
pub const SIGNATURE_HEADER: &str = "X-Mirror-Signature";
pub const WORKSPACE_HEADER: &str = "X-Mirror-Workspace";

/// Signature material for one outbound call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedHeaders {
    pub timestamp: i64,
    pub signature: String,
    pub workspace_id: String,
}

/// HMAC-SHA256 signer for outbound dispatch payloads.
#[derive(Clone)]
pub struct DispatchSigner {
    secret: String,
    workspace_id: String,
}

impl DispatchSigner {
    pub fn new(secret: impl Into<String>, workspace_id: impl Into<String>) -> Self {
        Self {
            secret: secret.into(),
            workspace_id: workspace_id.into(),
        }
    }

    /// Deterministic signature over `"{timestamp}.{payload}"`, hex-encoded.
    #[must_use]
    pub fn sign(&self, timestamp: i64, payload: &str) -> String {
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Sign a payload with the current unix time. Timestamp inclusion is
    /// mandatory by construction.
    #[must_use]
    pub fn signed_headers(&self, payload: &str) -> SignedHeaders {
        let timestamp = Utc::now().timestamp();
        SignedHeaders {
            timestamp,
            signature: self.sign(timestamp, payload),
            workspace_id: self.workspace_id.clone(),
        }
    }

    /// Constant-time verification, for receivers and tests.
    #[must_use]
    pub fn verify(&self, timestamp: i64, payload: &str, signature: &str) -> bool {
        let Ok(expected) = hex::decode(signature) else {
            return false;
        };
        let mut mac = HmacSha256::new_from_slice(self.secret.as_bytes())
            .expect("HMAC can take key of any size");
        mac.update(format!("{timestamp}.{payload}").as_bytes());
        mac.verify_slice(&expected).is_ok()
    }
}
