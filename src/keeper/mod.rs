//! Keeper client: the capability set `{verify, report_usage}` this broker
//! needs from the external identity/credit service.
//!
//! The source couples the HTTP keeper directly into the broker; here it is
//! a trait so tests and multi-tenant deployments can swap in an
//! in-memory or always-affordable implementation without touching a real
//! service (spec §9 "Polymorphic keeper client").

mod cache;
pub mod fake;
mod http_client;

pub use cache::VerificationCache;
pub use http_client::HttpKeeperClient;

use crate::error::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The fixed service tag this broker sends to the keeper on every call.
pub const SERVICE_NAME: &str = "keyroute";

/// Outcome of a token verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerifyResponse {
    pub valid: bool,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub balance: Option<f64>,
    #[serde(default)]
    pub cost_per_unit: Option<f64>,
    #[serde(default)]
    pub can_afford: Option<bool>,
    #[serde(default)]
    pub error: Option<String>,
}

impl VerifyResponse {
    /// The canned response used for transport failures and timeouts
    /// (spec §4.5): `valid=false` with a fixed, user-facing message.
    pub fn unavailable() -> Self {
        Self {
            valid: false,
            agent_id: None,
            email: None,
            balance: None,
            cost_per_unit: None,
            can_afford: None,
            error: Some("Authentication service unavailable".to_string()),
        }
    }
}

/// A single unit of tunnel usage awaiting delivery to the keeper.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub agent_id: String,
    pub operation: String,
    /// Fractional hours.
    pub quantity: f64,
    pub timestamp: DateTime<Utc>,
    pub metadata: UsageMetadata,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageMetadata {
    pub region: String,
    pub tunnel_id: String,
    pub duration_seconds: i64,
}

/// Result of a `POST /v1/services/usage` call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReportResponse {
    pub processed: u64,
    pub total_credits_deducted: f64,
}

/// The capability set this broker needs of the keeper.
#[async_trait]
pub trait KeeperClient: Send + Sync {
    /// Verify a bearer token for the given metered operation and quantity.
    /// Never returns `Err` for a denied or unreachable keeper — those are
    /// represented in the `VerifyResponse` itself; `Err` is reserved for
    /// programmer errors such as request serialization failure.
    async fn verify(&self, token: &str, operation: &str, quantity: f64) -> Result<VerifyResponse>;

    /// Deliver a batch of usage records. `Err` means the whole batch
    /// should be re-enqueued by the caller.
    async fn report_usage(&self, region: &str, records: &[UsageRecord]) -> Result<UsageReportResponse>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unavailable_response_is_invalid_with_fixed_message() {
        let resp = VerifyResponse::unavailable();
        assert!(!resp.valid);
        assert_eq!(resp.error.as_deref(), Some("Authentication service unavailable"));
    }
}
