//! Route handlers for the five HTTP endpoints (spec §4.1).

use super::auth::bearer_token;
use super::json::ApiJson;
use super::models::{
    clamp_duration, CloseTunnelResponse, CreateTunnelRequest, CreateTunnelResponse, ErrorResponse,
    ListTunnelsResponse, RegionsResponse, TunnelStatusResponse, TunnelSummary,
};
use super::AppState;
use crate::registry::TunnelStatus;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use chrono::Utc;
use std::sync::Arc;
use tracing::{info, warn};

const DNS_SERVER: &str = "1.1.1.1";
const COST_PER_HOUR_USD: f64 = 0.10;
const KNOWN_REGIONS: &[&str] = &["us-east", "us-west", "eu-west", "ap-south"];

type ApiResult<T> = Result<(StatusCode, Json<T>), (StatusCode, Json<ErrorResponse>)>;

fn unauthorized() -> (StatusCode, Json<ErrorResponse>) {
    (StatusCode::UNAUTHORIZED, Json(ErrorResponse::plain("missing or invalid bearer token")))
}

/// Verify the bearer token, preferring the verification cache, and fall
/// through to a 401 for anything invalid or unreachable (spec §4.5).
async fn verify_or_401(
    state: &AppState,
    headers: &HeaderMap,
    operation: &str,
    quantity: f64,
) -> Result<crate::keeper::VerifyResponse, (StatusCode, Json<ErrorResponse>)> {
    let token = bearer_token(headers).ok_or_else(unauthorized)?;

    let now = Utc::now();
    if let Some(cached) = state.verification_cache.get(token, now) {
        return Ok(cached);
    }

    let response = state
        .keeper
        .verify(token, operation, quantity)
        .await
        .map_err(|e| {
            warn!("keeper verify call errored: {e}");
            (StatusCode::UNAUTHORIZED, Json(ErrorResponse::plain("Authentication service unavailable")))
        })?;

    if !response.valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse::plain(
                response.error.clone().unwrap_or_else(|| "invalid token".to_string()),
            )),
        ));
    }

    state.verification_cache.put(token, response.clone(), now);
    Ok(response)
}

/// `POST /v1/tunnel`
pub async fn create_tunnel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    ApiJson(body): ApiJson<CreateTunnelRequest>,
) -> ApiResult<CreateTunnelResponse> {
    let duration = clamp_duration(body.duration);
    let quantity = duration as f64 / 3600.0;

    let verified = verify_or_401(&state, &headers, "tunnel_hour", quantity).await?;
    let agent_id = verified.agent_id.clone().unwrap_or_default();

    if verified.can_afford == Some(false) {
        return Err((
            StatusCode::PAYMENT_REQUIRED,
            Json(ErrorResponse {
                error: "insufficient credits".to_string(),
                balance: verified.balance,
                estimated_cost: verified.cost_per_unit.map(|c| c * quantity),
                cost_per_hour: verified.cost_per_unit,
            }),
        ));
    }

    let now = Utc::now();
    let expires_at = now + chrono::Duration::seconds(duration);
    let private_key = state.peer_controller.generate_key_pair().private;

    let record = state
        .registry
        .insert(agent_id, state.region.clone(), now, expires_at, private_key)
        .map_err(|e| {
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(ErrorResponse::plain(format!("could not allocate tunnel: {e}"))),
            )
        })?;

    if let Err(e) = state
        .peer_controller
        .add_peer(&record.client_public_key, record.client_ip.into())
        .await
    {
        // Atomic peer install (spec §9): roll back rather than serve a
        // tunnel record with no backing kernel peer.
        warn!("peer install failed for tunnel {}, rolling back: {e}", record.id);
        state.registry.rollback_insert(&record.id);
        return Err((
            StatusCode::SERVICE_UNAVAILABLE,
            Json(ErrorResponse::plain("failed to install WireGuard peer")),
        ));
    }

    let wireguard_config = crate::wireguard::render_client_config(
        &record.client_private_key,
        record.client_ip.into(),
        DNS_SERVER,
        &state.server_public_key,
        &state.endpoint,
    );

    info!(tunnel_id = %record.id, "tunnel created");

    Ok((
        StatusCode::CREATED,
        Json(CreateTunnelResponse {
            tunnel_id: record.id,
            region: state.region.clone(),
            wireguard_config,
            endpoint: state.endpoint.clone(),
            expires_at: record.expires_at,
            client_ip: record.client_ip.to_string(),
        }),
    ))
}

/// `GET /v1/tunnel/{id}`
pub async fn get_tunnel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<TunnelStatusResponse> {
    let verified = verify_or_401(&state, &headers, "tunnel_hour", 0.0).await?;
    let agent_id = verified.agent_id.unwrap_or_default();

    let mut record = state.registry.get(&id).ok_or_else(|| {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::plain("unknown tunnel")))
    })?;

    if record.agent_id != agent_id {
        return Err((StatusCode::FORBIDDEN, Json(ErrorResponse::plain("tunnel belongs to another agent"))));
    }

    let now = Utc::now();
    if record.status == TunnelStatus::Active && record.expires_at < now {
        if let Some(terminal) = state.registry.transition_to_expired(&id) {
            state.metering.accrue_terminal(&terminal, record.expires_at);
            if let Err(e) = state.peer_controller.remove_peer(&terminal.client_public_key).await {
                warn!("failed to remove kernel peer for expired tunnel {id}: {e}");
            }
            record = state.registry.get(&id).expect("just transitioned");
        }
    }

    let duration_seconds = record.duration_seconds_as_of(now);
    let cost_usd = duration_seconds as f64 / 3600.0 * COST_PER_HOUR_USD;

    Ok((
        StatusCode::OK,
        Json(TunnelStatusResponse {
            tunnel_id: record.id,
            region: record.region,
            status: record.status.to_string(),
            created_at: record.created_at,
            expires_at: record.expires_at,
            duration_seconds,
            cost_usd,
        }),
    ))
}

/// `DELETE /v1/tunnel/{id}`
pub async fn delete_tunnel(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(id): Path<String>,
) -> ApiResult<CloseTunnelResponse> {
    let verified = verify_or_401(&state, &headers, "tunnel_hour", 0.0).await?;
    let agent_id = verified.agent_id.unwrap_or_default();

    let record = state.registry.get(&id).ok_or_else(|| {
        (StatusCode::NOT_FOUND, Json(ErrorResponse::plain("unknown tunnel")))
    })?;

    if record.agent_id != agent_id {
        return Err((StatusCode::FORBIDDEN, Json(ErrorResponse::plain("tunnel belongs to another agent"))));
    }

    if record.status != TunnelStatus::Active {
        return Err((StatusCode::BAD_REQUEST, Json(ErrorResponse::plain("Tunnel already closed"))));
    }

    let now = Utc::now();
    let terminal = state.registry.transition_to_closed(&id, now).ok_or_else(|| {
        (StatusCode::BAD_REQUEST, Json(ErrorResponse::plain("Tunnel already closed")))
    })?;

    state.metering.accrue_terminal(&terminal, now);

    if let Err(e) = state.peer_controller.remove_peer(&terminal.client_public_key).await {
        warn!("failed to remove kernel peer for closed tunnel {id}: {e}");
    }

    let closed = state.registry.get(&id).expect("just transitioned");
    let duration_seconds = closed.duration_seconds_as_of(now);
    let cost_usd = duration_seconds as f64 / 3600.0 * COST_PER_HOUR_USD;

    info!(tunnel_id = %id, "tunnel closed");

    Ok((
        StatusCode::OK,
        Json(CloseTunnelResponse {
            tunnel_id: id,
            status: closed.status.to_string(),
            duration_seconds,
            cost_usd,
        }),
    ))
}

/// `GET /v1/tunnels`
pub async fn list_tunnels(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> ApiResult<ListTunnelsResponse> {
    let verified = verify_or_401(&state, &headers, "tunnel_hour", 0.0).await?;
    let agent_id = verified.agent_id.clone().unwrap_or_default();

    let tunnels = state
        .registry
        .iterate_by_agent(&agent_id)
        .into_iter()
        .map(|t| TunnelSummary {
            tunnel_id: t.id,
            region: t.region,
            status: t.status.to_string(),
            created_at: t.created_at,
            expires_at: t.expires_at,
            client_ip: t.client_ip.to_string(),
        })
        .collect();

    Ok((
        StatusCode::OK,
        Json(ListTunnelsResponse {
            agent_id,
            email: verified.email.unwrap_or_default(),
            balance: verified.balance.unwrap_or_default(),
            tunnels,
        }),
    ))
}

/// `GET /v1/regions`. No auth required.
pub async fn list_regions(State(state): State<Arc<AppState>>) -> Json<RegionsResponse> {
    Json(RegionsResponse {
        regions: KNOWN_REGIONS.iter().map(|r| r.to_string()).collect(),
        current: state.region.clone(),
    })
}

/// `GET /healthz`. Trivial liveness probe, no auth, not part of the
/// tunnel API proper (spec §1 out-of-scope glue).
pub async fn healthz() -> StatusCode {
    StatusCode::OK
}
