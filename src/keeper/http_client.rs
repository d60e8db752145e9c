//! HTTP implementation of [`super::KeeperClient`] against the real keeper
//! service.

use super::{KeeperClient, UsageRecord, UsageReportResponse, VerifyResponse, SERVICE_NAME};
use crate::error::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::time::Duration;
use tracing::warn;

const VERIFY_TIMEOUT: Duration = Duration::from_secs(5);
const REPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Talks to the keeper over HTTP using the shared-secret header scheme
/// described in spec §4.5/§6.
pub struct HttpKeeperClient {
    base_url: String,
    shared_secret: String,
    http: reqwest::Client,
}

#[derive(Serialize)]
struct VerifyRequest<'a> {
    token: &'a str,
    service: &'a str,
    operation: &'a str,
    quantity: f64,
}

#[derive(Serialize)]
struct UsageReportRequest<'a> {
    service: &'a str,
    region: &'a str,
    records: &'a [UsageRecord],
}

impl HttpKeeperClient {
    pub fn new(base_url: impl Into<String>, shared_secret: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            shared_secret: shared_secret.into(),
            http: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl KeeperClient for HttpKeeperClient {
    async fn verify(&self, token: &str, operation: &str, quantity: f64) -> Result<VerifyResponse> {
        let url = format!("{}/v1/services/verify", self.base_url);
        let body = VerifyRequest {
            token,
            service: SERVICE_NAME,
            operation,
            quantity,
        };

        let result = self
            .http
            .post(&url)
            .timeout(VERIFY_TIMEOUT)
            .header("X-Service-Secret", &self.shared_secret)
            .json(&body)
            .send()
            .await;

        let response = match result {
            Ok(r) => r,
            Err(e) => {
                warn!("keeper verify transport failure: {e}");
                return Ok(VerifyResponse::unavailable());
            }
        };

        if !response.status().is_success() {
            warn!("keeper verify returned {}", response.status());
            return Ok(VerifyResponse::unavailable());
        }

        match response.json::<VerifyResponse>().await {
            Ok(parsed) => Ok(parsed),
            Err(e) => {
                warn!("keeper verify returned unparseable body: {e}");
                Ok(VerifyResponse::unavailable())
            }
        }
    }

    async fn report_usage(&self, region: &str, records: &[UsageRecord]) -> Result<UsageReportResponse> {
        let url = format!("{}/v1/services/usage", self.base_url);
        let body = UsageReportRequest {
            service: SERVICE_NAME,
            region,
            records,
        };

        let response = self
            .http
            .post(&url)
            .timeout(REPORT_TIMEOUT)
            .header("X-Service-Secret", &self.shared_secret)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(crate::error::BrokerError::Keeper(format!(
                "usage report rejected with status {}",
                response.status()
            )));
        }

        Ok(response.json::<UsageReportResponse>().await?)
    }
}
