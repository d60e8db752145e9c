//! Test-only keeper implementations: in-memory fake and always-affordable
//! stub (spec §9 "Polymorphic keeper client").

use super::{KeeperClient, UsageRecord, UsageReportResponse, VerifyResponse};
use crate::error::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// An in-memory keeper: tokens map to a fixed agent identity and balance,
/// usage reports are recorded for assertions instead of sent anywhere.
pub struct FakeKeeperClient {
    agents: HashMap<String, FakeAgent>,
    reported: Mutex<Vec<UsageRecord>>,
    fail_next_report: Mutex<bool>,
}

#[derive(Clone)]
struct FakeAgent {
    agent_id: String,
    email: String,
    balance: f64,
    cost_per_unit: f64,
}

impl FakeKeeperClient {
    pub fn new() -> Self {
        Self {
            agents: HashMap::new(),
            reported: Mutex::new(Vec::new()),
            fail_next_report: Mutex::new(false),
        }
    }

    /// Register a token that verifies successfully as `agent_id` with the
    /// given balance and per-unit cost.
    pub fn with_agent(
        mut self,
        token: impl Into<String>,
        agent_id: impl Into<String>,
        balance: f64,
        cost_per_unit: f64,
    ) -> Self {
        self.agents.insert(
            token.into(),
            FakeAgent {
                agent_id: agent_id.into(),
                email: "agent@example.com".into(),
                balance,
                cost_per_unit,
            },
        );
        self
    }

    /// Make the next `report_usage` call return an error, simulating a
    /// downstream failure for retry tests (spec §8 scenario 6).
    pub fn fail_next_report(&self) {
        *self.fail_next_report.lock().expect("poisoned") = true;
    }

    /// Every usage record successfully reported so far.
    pub fn reported_records(&self) -> Vec<UsageRecord> {
        self.reported.lock().expect("poisoned").clone()
    }
}

impl Default for FakeKeeperClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeeperClient for FakeKeeperClient {
    async fn verify(&self, token: &str, _operation: &str, quantity: f64) -> Result<VerifyResponse> {
        let Some(agent) = self.agents.get(token) else {
            return Ok(VerifyResponse {
                valid: false,
                agent_id: None,
                email: None,
                balance: None,
                cost_per_unit: None,
                can_afford: None,
                error: Some("invalid token".to_string()),
            });
        };

        let estimated_cost = quantity * agent.cost_per_unit;
        Ok(VerifyResponse {
            valid: true,
            agent_id: Some(agent.agent_id.clone()),
            email: Some(agent.email.clone()),
            balance: Some(agent.balance),
            cost_per_unit: Some(agent.cost_per_unit),
            can_afford: Some(agent.balance >= estimated_cost),
            error: None,
        })
    }

    async fn report_usage(&self, _region: &str, records: &[UsageRecord]) -> Result<UsageReportResponse> {
        let mut should_fail = self.fail_next_report.lock().expect("poisoned");
        if *should_fail {
            *should_fail = false;
            return Err(crate::error::BrokerError::Keeper(
                "simulated keeper failure".to_string(),
            ));
        }
        drop(should_fail);

        let mut reported = self.reported.lock().expect("poisoned");
        reported.extend(records.iter().cloned());
        Ok(UsageReportResponse {
            processed: records.len() as u64,
            total_credits_deducted: records.iter().map(|r| r.quantity).sum(),
        })
    }
}

/// A keeper stub that treats every token as valid and every request as
/// affordable, for tests that only care about the tunnel lifecycle.
pub struct AlwaysAffordableKeeperClient;

#[async_trait]
impl KeeperClient for AlwaysAffordableKeeperClient {
    async fn verify(&self, token: &str, _operation: &str, _quantity: f64) -> Result<VerifyResponse> {
        Ok(VerifyResponse {
            valid: true,
            agent_id: Some(format!("agent-{token}")),
            email: Some("agent@example.com".to_string()),
            balance: Some(1_000.0),
            cost_per_unit: Some(0.10),
            can_afford: Some(true),
            error: None,
        })
    }

    async fn report_usage(&self, _region: &str, records: &[UsageRecord]) -> Result<UsageReportResponse> {
        Ok(UsageReportResponse {
            processed: records.len() as u64,
            total_credits_deducted: records.iter().map(|r| r.quantity).sum(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keeper::UsageMetadata;
    use chrono::Utc;

    #[tokio::test]
    async fn fake_verifies_known_token() {
        let keeper = FakeKeeperClient::new().with_agent("tok", "agent-1", 10.0, 0.10);
        let resp = keeper.verify("tok", "tunnel_hour", 1.0).await.unwrap();
        assert!(resp.valid);
        assert_eq!(resp.agent_id.as_deref(), Some("agent-1"));
        assert_eq!(resp.can_afford, Some(true));
    }

    #[tokio::test]
    async fn fake_rejects_unknown_token() {
        let keeper = FakeKeeperClient::new();
        let resp = keeper.verify("nope", "tunnel_hour", 1.0).await.unwrap();
        assert!(!resp.valid);
    }

    #[tokio::test]
    async fn fake_flags_unaffordable_request() {
        let keeper = FakeKeeperClient::new().with_agent("tok", "agent-1", 0.05, 0.10);
        let resp = keeper.verify("tok", "tunnel_hour", 1.0).await.unwrap();
        assert!(resp.valid);
        assert_eq!(resp.can_afford, Some(false));
    }

    #[tokio::test]
    async fn fake_report_failure_then_retry_succeeds() {
        let keeper = FakeKeeperClient::new();
        let record = UsageRecord {
            agent_id: "agent-1".into(),
            operation: "tunnel_hour".into(),
            quantity: 1.0,
            timestamp: Utc::now(),
            metadata: UsageMetadata {
                region: "us-east".into(),
                tunnel_id: "tun_0".into(),
                duration_seconds: 3600,
            },
        };

        keeper.fail_next_report();
        assert!(keeper.report_usage("us-east", &[record.clone()]).await.is_err());
        assert!(keeper.report_usage("us-east", &[record]).await.is_ok());
        assert_eq!(keeper.reported_records().len(), 1);
    }
}
