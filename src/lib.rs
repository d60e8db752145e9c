//! tunnel-broker: regional HTTP control plane for on-demand WireGuard tunnels
//!
//! One broker process serves one geographic region. It authenticates
//! callers against an external identity/credit service, provisions
//! short-lived point-to-point WireGuard tunnels against an
//! already-configured kernel interface, and meters usage per second of
//! active tunnel time.
//!
//! # Modules
//!
//! - `config`: process-environment configuration
//! - `registry`: the in-memory tunnel store and client-IP allocator
//! - `wireguard`: key generation and kernel peer control
//! - `keeper`: the identity/credit service client
//! - `metering`: usage accrual and batched delivery
//! - `lifecycle`: periodic expiry of overdue tunnels
//! - `http`: the public HTTP surface
//! - `error`: error types

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod error;
pub mod http;
pub mod keeper;
pub mod lifecycle;
pub mod metering;
pub mod registry;
pub mod wireguard;

pub use error::{BrokerError, Result};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
