//! Request and response shapes for the five HTTP endpoints (spec §4.1).

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

/// `POST /v1/tunnel` request body. `duration` and `region` are both
/// optional; `region` is accepted but not validated (the edge already
/// chose this broker).
#[derive(Debug, Deserialize)]
pub struct CreateTunnelRequest {
    #[serde(default, deserialize_with = "lenient_duration")]
    pub duration: Option<i64>,
    #[serde(default)]
    pub region: Option<String>,
}

/// Accepts a present-but-unparseable `duration` (wrong JSON type, a
/// fractional number, a string) as `None` rather than failing the whole
/// body's deserialization, per spec §4.1: "a missing or unparseable
/// value defaults to 300". Only a structurally invalid *body* (bad JSON
/// syntax, not a JSON object) should still reject — see
/// `super::json::ApiJson` for that half of the behavior.
fn lenient_duration<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_i64(),
        _ => None,
    })
}

#[derive(Debug, Serialize)]
pub struct CreateTunnelResponse {
    pub tunnel_id: String,
    pub region: String,
    pub wireguard_config: String,
    pub endpoint: String,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub client_ip: String,
}

#[derive(Debug, Serialize)]
pub struct TunnelStatusResponse {
    pub tunnel_id: String,
    pub region: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub duration_seconds: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct CloseTunnelResponse {
    pub tunnel_id: String,
    pub status: String,
    pub duration_seconds: i64,
    pub cost_usd: f64,
}

#[derive(Debug, Serialize)]
pub struct TunnelSummary {
    pub tunnel_id: String,
    pub region: String,
    pub status: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub expires_at: chrono::DateTime<chrono::Utc>,
    pub client_ip: String,
}

#[derive(Debug, Serialize)]
pub struct ListTunnelsResponse {
    pub agent_id: String,
    pub email: String,
    pub balance: f64,
    pub tunnels: Vec<TunnelSummary>,
}

#[derive(Debug, Serialize)]
pub struct RegionsResponse {
    pub regions: Vec<String>,
    pub current: String,
}

/// Uniform error shape (spec §4.1, §7), with optional auxiliary fields
/// for the 402 affordability response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub balance: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub estimated_cost: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cost_per_hour: Option<f64>,
}

impl ErrorResponse {
    pub fn plain(message: impl Into<String>) -> Self {
        Self {
            error: message.into(),
            balance: None,
            estimated_cost: None,
            cost_per_hour: None,
        }
    }
}

/// Clamp a requested duration in seconds to `[30, 3600]`, defaulting
/// missing or unparseable values to 300 (spec §4.1, §8).
pub fn clamp_duration(duration: Option<i64>) -> i64 {
    match duration {
        Some(d) => d.clamp(30, 3600),
        None => 300,
    }
}
