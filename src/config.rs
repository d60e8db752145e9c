//! Configuration management
//!
//! The broker is configured entirely from the process environment (no
//! config file), per the deployment model of one broker process per
//! region. Every variable is optional and falls back to a documented
//! default.

use crate::error::{BrokerError, Result};
use serde::{Deserialize, Serialize};

/// Broker configuration, loaded once at startup from the process environment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// This broker's region tag (e.g. "us-east")
    pub region: String,

    /// HTTP listen port
    pub listen_port: u16,

    /// This server's advertised public IP, embedded in issued WireGuard configs
    pub public_ip: String,

    /// WireGuard kernel interface name (already provisioned on the host)
    pub wg_interface: String,

    /// WireGuard UDP listen port
    pub wg_port: u16,

    /// Tunnel subnet in CIDR notation; addresses .2-.254 are assignable, .1 is reserved
    pub wg_subnet: String,

    /// Base URL of the keeper identity/credit service
    pub keeper_base_url: String,

    /// Shared secret sent as `X-Service-Secret` on every keeper request
    pub keeper_shared_secret: String,

    /// Interval between batched usage-report deliveries, in milliseconds
    pub usage_report_interval_ms: u64,

    /// Whether to remove unrecognized kernel peers on startup
    pub reconcile_orphans_on_start: bool,
}

impl Config {
    /// Load configuration from the process environment, applying defaults
    /// for anything unset or unparseable.
    pub fn from_env() -> Self {
        Self {
            region: env_or("REGION", "us-east"),
            listen_port: env_parsed_or("LISTEN_PORT", 3000),
            public_ip: env_or("PUBLIC_IP", "127.0.0.1"),
            wg_interface: env_or("WG_INTERFACE", "wg0"),
            wg_port: env_parsed_or("WG_PORT", 51820),
            wg_subnet: env_or("WG_SUBNET", "10.100.0.0/24"),
            keeper_base_url: env_or("KEEPER_BASE_URL", "http://localhost:8080"),
            keeper_shared_secret: env_or("KEEPER_SHARED_SECRET", ""),
            usage_report_interval_ms: env_parsed_or("USAGE_REPORT_INTERVAL_MS", 30_000),
            reconcile_orphans_on_start: env_parsed_or("RECONCILE_ORPHANS_ON_START", true),
        }
    }

    /// Sanity-check a loaded configuration before the broker starts
    /// serving traffic. Catches the kind of misconfiguration that would
    /// otherwise surface much later as a confusing runtime failure (e.g.
    /// an empty keeper URL failing every verify call, or a malformed
    /// subnet rejected deep inside the IP allocator).
    pub fn validate(&self) -> Result<()> {
        if self.listen_port == 0 {
            return Err(BrokerError::Config("LISTEN_PORT must not be 0".to_string()));
        }
        if self.wg_port == 0 {
            return Err(BrokerError::Config("WG_PORT must not be 0".to_string()));
        }
        if self.wg_interface.trim().is_empty() {
            return Err(BrokerError::Config("WG_INTERFACE must not be empty".to_string()));
        }
        if self.keeper_base_url.trim().is_empty() {
            return Err(BrokerError::Config("KEEPER_BASE_URL must not be empty".to_string()));
        }
        if self.usage_report_interval_ms == 0 {
            return Err(BrokerError::Config(
                "USAGE_REPORT_INTERVAL_MS must not be 0".to_string(),
            ));
        }
        validate_subnet_is_slash_24(&self.wg_subnet)?;
        Ok(())
    }
}

/// The region subnet must be a `/24` (spec §3's default and the
/// allocator's "only /24 subnets are supported" constraint,
/// `registry::ip_allocator::IpAllocator::new`).
fn validate_subnet_is_slash_24(subnet_cidr: &str) -> Result<()> {
    let (addr_part, prefix_part) = subnet_cidr
        .split_once('/')
        .ok_or_else(|| BrokerError::Config(format!("WG_SUBNET is not a CIDR: {subnet_cidr}")))?;

    addr_part
        .parse::<std::net::Ipv4Addr>()
        .map_err(|_| BrokerError::Config(format!("WG_SUBNET has an invalid address: {subnet_cidr}")))?;

    let prefix: u8 = prefix_part
        .parse()
        .map_err(|_| BrokerError::Config(format!("WG_SUBNET has an invalid prefix: {subnet_cidr}")))?;
    if prefix != 24 {
        return Err(BrokerError::Config(format!(
            "WG_SUBNET must be a /24, got /{prefix}"
        )));
    }
    Ok(())
}

fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parsed_or<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_with_no_env() {
        // SAFETY-equivalent: tests run in process isolation per-thread env is
        // not guaranteed, so we only assert on keys we don't touch elsewhere.
        let config = Config {
            region: env_or("REGION_UNSET_TEST_KEY", "us-east"),
            ..Config::from_env()
        };
        assert_eq!(config.region, "us-east");
    }

    #[test]
    fn env_parsed_or_falls_back_on_bad_value() {
        std::env::set_var("TUNNEL_BROKER_TEST_BAD_PORT", "not-a-number");
        let value: u16 = env_parsed_or("TUNNEL_BROKER_TEST_BAD_PORT", 3000);
        assert_eq!(value, 3000);
        std::env::remove_var("TUNNEL_BROKER_TEST_BAD_PORT");
    }

    #[test]
    fn env_parsed_or_uses_set_value() {
        std::env::set_var("TUNNEL_BROKER_TEST_PORT", "9999");
        let value: u16 = env_parsed_or("TUNNEL_BROKER_TEST_PORT", 3000);
        assert_eq!(value, 9999);
        std::env::remove_var("TUNNEL_BROKER_TEST_PORT");
    }

    fn valid_config() -> Config {
        Config {
            region: "us-east".to_string(),
            listen_port: 3000,
            public_ip: "127.0.0.1".to_string(),
            wg_interface: "wg0".to_string(),
            wg_port: 51820,
            wg_subnet: "10.100.0.0/24".to_string(),
            keeper_base_url: "http://localhost:8080".to_string(),
            keeper_shared_secret: "secret".to_string(),
            usage_report_interval_ms: 30_000,
            reconcile_orphans_on_start: true,
        }
    }

    #[test]
    fn validate_accepts_a_well_formed_config() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn validate_rejects_zero_listen_port() {
        let config = Config { listen_port: 0, ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_wg_port() {
        let config = Config { wg_port: 0, ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_empty_keeper_base_url() {
        let config = Config { keeper_base_url: String::new(), ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_non_24_subnet() {
        let config = Config { wg_subnet: "10.100.0.0/16".to_string(), ..valid_config() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_malformed_subnet() {
        let config = Config { wg_subnet: "not-a-cidr".to_string(), ..valid_config() };
        assert!(config.validate().is_err());
    }
}
