//! # Action Executor Boundary
//!
//! The outbound side of the engine: a signed call per (event, loop) pair to
//! the external service that performs the actual side effect.
//!
//! [`ActionExecutor`] is the seam. [`HttpActionExecutor`] is the production
//! implementation (signed POST, bounded per-call timeout);
//! [`InMemoryActionExecutor`] records dispatches for tests and embedded use.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

use crate::processor::signer::{
    DispatchSigner, SIGNATURE_HEADER, TIMESTAMP_HEADER, WORKSPACE_HEADER,
};

/// The payload an executor receives for one loop dispatch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DispatchRequest {
    pub event_id: i64,
    pub loop_key: String,
    pub idempotency_key: String,
    pub recipient: String,
    pub enriched_payload: Value,
    pub action_type: String,
    pub action_config: Value,
}

/// Executor acknowledgement of an accepted dispatch.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DispatchAck {
    /// Optional usage metering reported by the executor.
    pub tokens_used: Option<i64>,
    /// Free-form detail (message id, provider response).
    pub detail: Option<String>,
}

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("executor rejected dispatch (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("payload serialization failed: {0}")]
    Serialization(String),
}

impl From<reqwest::Error> for DispatchError {
    fn from(err: reqwest::Error) -> Self {
        DispatchError::Transport(err.to_string())
    }
}

/// External action executor. An `Err` marks the claimed execution `failed`;
/// it never fails the event's processing pass.
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError>;
}

/// Signed HTTP dispatch to the configured executor endpoint.
pub struct HttpActionExecutor {
    client: reqwest::Client,
    endpoint_url: String,
    signer: DispatchSigner,
}

impl HttpActionExecutor {
    pub fn new(endpoint_url: impl Into<String>, signer: DispatchSigner, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("Failed to build HTTP client");
        Self {
            client,
            endpoint_url: endpoint_url.into(),
            signer,
        }
    }
}

#[async_trait]
impl ActionExecutor for HttpActionExecutor {
    async fn execute(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError> {
        // Sign the exact bytes that go on the wire.
        let payload = serde_json::to_string(&request)
            .map_err(|e| DispatchError::Serialization(e.to_string()))?;
        let headers = self.signer.signed_headers(&payload);

        let response = self
            .client
            .post(&self.endpoint_url)
            .header("Content-Type", "application/json")
            .header(TIMESTAMP_HEADER, headers.timestamp.to_string())
            .header(SIGNATURE_HEADER, headers.signature)
            .header(WORKSPACE_HEADER, headers.workspace_id)
            .body(payload)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(DispatchError::Rejected {
                status: status.as_u16(),
                message,
            });
        }

        let body = response.bytes().await?;
        let ack = parse_ack(&body);
        debug!(
            event_id = request.event_id,
            loop_key = %request.loop_key,
            "dispatch accepted"
        );
        Ok(ack)
    }
}

/// Executors are not required to return a structured ack; an unparseable 2xx
/// body still counts as accepted, but any metering it carried is gone, so the
/// miss is logged.
fn parse_ack(body: &[u8]) -> DispatchAck {
    match serde_json::from_slice(body) {
        Ok(ack) => ack,
        Err(parse_err) => {
            debug!(
                error = %parse_err,
                "unstructured executor response, no token metering recorded"
            );
            DispatchAck::default()
        }
    }
}

/// Records dispatches instead of sending them. Recipients registered via
/// [`reject_recipient`](Self::reject_recipient) get a scripted rejection.
#[derive(Default)]
pub struct InMemoryActionExecutor {
    requests: Mutex<Vec<DispatchRequest>>,
    rejected_recipients: Mutex<HashSet<String>>,
    ack_tokens: Mutex<Option<i64>>,
}

impl InMemoryActionExecutor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script a rejection for every dispatch addressed to `recipient`.
    pub fn reject_recipient(&self, recipient: impl Into<String>) {
        self.rejected_recipients.lock().insert(recipient.into());
    }

    /// Report this token usage on every accepted dispatch.
    pub fn report_tokens(&self, tokens: i64) {
        *self.ack_tokens.lock() = Some(tokens);
    }

    /// Everything dispatched so far, in order.
    #[must_use]
    pub fn requests(&self) -> Vec<DispatchRequest> {
        self.requests.lock().clone()
    }

    #[must_use]
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl ActionExecutor for InMemoryActionExecutor {
    async fn execute(&self, request: DispatchRequest) -> Result<DispatchAck, DispatchError> {
        if self.rejected_recipients.lock().contains(&request.recipient) {
            return Err(DispatchError::Rejected {
                status: 422,
                message: format!("recipient {} rejected by script", request.recipient),
            });
        }
        self.requests.lock().push(request);
        Ok(DispatchAck {
            tokens_used: *self.ack_tokens.lock(),
            detail: None,
        })
    }
}
