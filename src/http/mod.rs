//! HTTP surface: the five endpoints described in spec §4.1, plus the
//! trivial `/healthz` liveness glue (spec §1 out-of-scope).

mod auth;
mod handlers;
mod json;
mod models;

use crate::keeper::{KeeperClient, VerificationCache};
use crate::metering::MeteringEngine;
use crate::registry::TunnelRegistry;
use crate::wireguard::{PeerController, PublicKey};
use axum::routing::{delete, get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Shared state reachable from every handler.
pub struct AppState {
    pub registry: Arc<TunnelRegistry>,
    pub keeper: Arc<dyn KeeperClient>,
    pub peer_controller: Arc<PeerController>,
    pub metering: Arc<MeteringEngine>,
    pub verification_cache: VerificationCache,
    pub region: String,
    /// `host:port` advertised in issued client configs.
    pub endpoint: String,
    /// This broker's own WireGuard server public key.
    pub server_public_key: PublicKey,
}

/// Assemble the axum router. CORS is permissive and tracing is layered
/// on top, mirroring the ambient HTTP glue the teacher wires around its
/// own control surface.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/tunnel", post(handlers::create_tunnel))
        .route("/v1/tunnel/:id", get(handlers::get_tunnel))
        .route("/v1/tunnel/:id", delete(handlers::delete_tunnel))
        .route("/v1/tunnels", get(handlers::list_tunnels))
        .route("/v1/regions", get(handlers::list_regions))
        .route("/healthz", get(handlers::healthz))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
