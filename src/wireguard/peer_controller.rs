//! Peer controller: the only component that touches the kernel WireGuard
//! interface.
//!
//! The interface itself (`wg0` by default) is provisioned once, out of
//! band, before the broker starts — see spec §1's "host-level WireGuard
//! installation" non-goal. This controller only ever issues `wg` commands
//! against an interface that already exists.

use crate::error::{BrokerError, Result};
use crate::wireguard::{KeyPair, PublicKey};
use std::net::IpAddr;
use std::process::Command;
use tracing::{debug, info, warn};

/// Generates key pairs and reconciles kernel WireGuard peers for one
/// interface.
pub struct PeerController {
    interface: String,
}

impl PeerController {
    /// Create a controller bound to the named kernel interface
    pub fn new(interface: impl Into<String>) -> Self {
        Self {
            interface: interface.into(),
        }
    }

    /// Generate a fresh client key pair. Pure, does not touch the kernel.
    pub fn generate_key_pair(&self) -> KeyPair {
        KeyPair::generate()
    }

    /// Add a peer to the kernel interface: `public_key` may reach the
    /// broker through `client_ip/32` once this returns `Ok`.
    pub async fn add_peer(&self, public_key: &PublicKey, client_ip: IpAddr) -> Result<()> {
        let allowed_ip = format!("{client_ip}/32");
        debug!(
            interface = %self.interface,
            peer = %public_key,
            %allowed_ip,
            "adding WireGuard peer"
        );

        self.run_wg(&[
            "set",
            &self.interface,
            "peer",
            &public_key.to_base64(),
            "allowed-ips",
            &allowed_ip,
        ])
        .await?;

        Ok(())
    }

    /// Remove a peer from the kernel interface. Idempotent: removing a
    /// peer that is not present is not an error.
    pub async fn remove_peer(&self, public_key: &PublicKey) -> Result<()> {
        debug!(interface = %self.interface, peer = %public_key, "removing WireGuard peer");

        match self
            .run_wg(&[
                "set",
                &self.interface,
                "peer",
                &public_key.to_base64(),
                "remove",
            ])
            .await
        {
            Ok(()) => Ok(()),
            Err(e) => {
                warn!("remove_peer for {public_key} reported an error (treating as not-found): {e}");
                Ok(())
            }
        }
    }

    /// Read the interface's own public key, used to render the `[Peer]`
    /// section of issued client configs.
    pub async fn interface_public_key(&self) -> Result<PublicKey> {
        let output = self
            .run_wg_capture(&["show", &self.interface, "public-key"])
            .await?;
        PublicKey::from_base64(output.trim())
    }

    /// List the public keys of peers currently configured on the kernel
    /// interface, used for startup orphan reconciliation (SPEC_FULL §10.6).
    pub async fn list_peers(&self) -> Result<Vec<PublicKey>> {
        let output = self
            .run_wg_capture(&["show", &self.interface, "peers"])
            .await?;

        let mut peers = Vec::new();
        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match PublicKey::from_base64(line) {
                Ok(key) => peers.push(key),
                Err(e) => warn!("skipping unparseable peer key from `wg show`: {e}"),
            }
        }
        Ok(peers)
    }

    /// Remove any kernel peer not present in `known`. Used once at startup
    /// when `RECONCILE_ORPHANS_ON_START` is enabled.
    pub async fn reconcile_orphans(&self, known: &[PublicKey]) -> Result<usize> {
        let existing = self.list_peers().await?;
        let mut removed = 0;
        for peer in existing {
            if !known.contains(&peer) {
                info!("removing orphaned kernel peer {peer} not backed by any tunnel record");
                self.remove_peer(&peer).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    async fn run_wg(&self, args: &[&str]) -> Result<()> {
        self.run_wg_capture(args).await.map(|_| ())
    }

    async fn run_wg_capture(&self, args: &[&str]) -> Result<String> {
        let args: Vec<String> = args.iter().map(|s| s.to_string()).collect();
        tokio::task::spawn_blocking(move || {
            let args_ref: Vec<&str> = args.iter().map(String::as_str).collect();
            run_command("wg", &args_ref)
        })
        .await
        .map_err(|e| BrokerError::WireGuard(format!("peer controller task panicked: {e}")))?
    }
}

fn run_command(program: &str, args: &[&str]) -> Result<String> {
    debug!("executing command: {} {:?}", program, args);

    let output = Command::new(program).args(args).output().map_err(|e| {
        BrokerError::WireGuard(format!(
            "failed to execute {program} {}: {e}",
            args.join(" ")
        ))
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(BrokerError::WireGuard(format!(
            "command failed: {program} {}: {stderr}",
            args.join(" ")
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generate_key_pair_produces_distinct_pairs() {
        let controller = PeerController::new("wg0");
        let a = controller.generate_key_pair();
        let b = controller.generate_key_pair();
        assert_ne!(a.public.to_base64(), b.public.to_base64());
    }

    #[tokio::test]
    async fn add_peer_against_missing_binary_reports_wireguard_error() {
        // In CI/sandbox environments `wg` is typically absent; add_peer
        // must surface that as a WireGuard error rather than panicking.
        let controller = PeerController::new("wg-nonexistent-test-iface");
        let key = PrivateKeyStub::generate_public();
        let result = controller
            .add_peer(&key, "10.100.0.2".parse().unwrap())
            .await;
        assert!(result.is_err());
    }

    struct PrivateKeyStub;
    impl PrivateKeyStub {
        fn generate_public() -> PublicKey {
            crate::wireguard::PrivateKey::generate().public_key()
        }
    }
}
