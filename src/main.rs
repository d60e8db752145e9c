//! tunnel-broker binary entry point
//!
//! Starts the HTTP surface and the three periodic background tasks
//! (accrual, delivery, lifecycle scan) described in spec §5, and runs
//! until a terminate signal triggers the shutdown sequence.

use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use tunnel_broker::config::Config;
use tunnel_broker::http::{build_router, AppState};
use tunnel_broker::keeper::{HttpKeeperClient, VerificationCache};
use tunnel_broker::lifecycle::LifecycleSupervisor;
use tunnel_broker::metering::MeteringEngine;
use tunnel_broker::registry::TunnelRegistry;
use tunnel_broker::wireguard::PeerController;
use tunnel_broker::{APP_NAME, VERSION};

/// Regional WireGuard tunnel broker
#[derive(Parser, Debug)]
#[command(name = APP_NAME, version = VERSION, about, long_about = None)]
struct Cli {
    /// Enable verbose (debug) logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    info!("starting {APP_NAME} v{VERSION}");

    if let Err(e) = run().await {
        error!("fatal error: {e}");
        std::process::exit(1);
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn run() -> anyhow::Result<()> {
    let config = Config::from_env();
    config.validate()?;
    info!(region = %config.region, interface = %config.wg_interface, "loaded configuration");

    let registry = Arc::new(TunnelRegistry::new(&config.wg_subnet)?);
    let peer_controller = Arc::new(PeerController::new(config.wg_interface.clone()));
    let keeper = Arc::new(HttpKeeperClient::new(
        config.keeper_base_url.clone(),
        config.keeper_shared_secret.clone(),
    ));
    let metering = Arc::new(MeteringEngine::new(
        registry.clone(),
        keeper.clone(),
        config.region.clone(),
    ));
    let lifecycle = Arc::new(LifecycleSupervisor::new(
        registry.clone(),
        metering.clone(),
        peer_controller.clone(),
    ));

    if config.reconcile_orphans_on_start {
        match peer_controller.reconcile_orphans(&[]).await {
            Ok(removed) if removed > 0 => {
                info!("removed {removed} orphaned kernel peer(s) from a previous run")
            }
            Ok(_) => {}
            Err(e) => warn!("startup orphan reconciliation failed: {e}"),
        }
    }

    let server_public_key = match peer_controller.interface_public_key().await {
        Ok(key) => key,
        Err(e) => {
            warn!("could not read {} public key, generating a detached one: {e}", config.wg_interface);
            tunnel_broker::wireguard::PrivateKey::generate().public_key()
        }
    };

    let state = Arc::new(AppState {
        registry: registry.clone(),
        keeper: keeper.clone(),
        peer_controller: peer_controller.clone(),
        metering: metering.clone(),
        verification_cache: VerificationCache::new(),
        region: config.region.clone(),
        endpoint: format!("{}:{}", config.public_ip, config.wg_port),
        server_public_key,
    });

    let accrual_task = metering.spawn_accrual_task();
    let delivery_task = metering
        .spawn_delivery_task(Duration::from_millis(config.usage_report_interval_ms));
    let lifecycle_task = lifecycle.spawn();

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.listen_port)).await?;
    info!("listening on 0.0.0.0:{}", config.listen_port);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("shutting down: draining pending usage");
    accrual_task.abort();
    delivery_task.abort();
    lifecycle_task.abort();
    metering.run_shutdown_drain(Duration::from_secs(5)).await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received Ctrl+C signal"),
        _ = terminate => info!("received SIGTERM signal"),
    }
}
