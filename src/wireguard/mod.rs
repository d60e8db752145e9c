//! WireGuard key management and kernel peer control
//!
//! This module owns everything that touches cryptographic key material or
//! the kernel WireGuard interface. It deliberately knows nothing about
//! tunnel records, billing, or HTTP — see [`crate::registry`] and
//! [`crate::metering`] for those.

mod keys;
mod peer_controller;

pub use keys::{KeyPair, PrivateKey, PublicKey};
pub use peer_controller::PeerController;

/// Render a plain-text WireGuard client configuration, per spec §4.1.
///
/// `client_ip` is rendered with a `/24` mask (the client sees the whole
/// regional subnet as directly attached), not `/32` — the `/32` allowed-ip
/// is a server-side peer restriction, not something the client config
/// advertises about itself.
pub fn render_client_config(
    private_key: &PrivateKey,
    client_ip: std::net::IpAddr,
    dns: &str,
    server_public_key: &PublicKey,
    server_endpoint: &str,
) -> String {
    format!(
        "[Interface]\n\
         PrivateKey = {}\n\
         Address = {client_ip}/24\n\
         DNS = {dns}\n\
         \n\
         [Peer]\n\
         PublicKey = {server_public_key}\n\
         Endpoint = {server_endpoint}\n\
         AllowedIPs = 0.0.0.0/0\n\
         PersistentKeepalive = 25\n",
        private_key.to_base64(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_client_config_contains_required_fields() {
        let private = PrivateKey::generate();
        let server = PrivateKey::generate().public_key();
        let config = render_client_config(
            &private,
            "10.100.0.2".parse().unwrap(),
            "1.1.1.1",
            &server,
            "203.0.113.5:51820",
        );

        assert!(config.contains("[Interface]"));
        assert!(config.contains("[Peer]"));
        assert!(config.contains("Address = 10.100.0.2/24"));
        assert!(config.contains("DNS = 1.1.1.1"));
        assert!(config.contains(&format!("PublicKey = {server}")));
        assert!(config.contains("Endpoint = 203.0.113.5:51820"));
        assert!(config.contains("AllowedIPs = 0.0.0.0/0"));
        assert!(config.contains("PersistentKeepalive = 25"));
        // private key must never leak verbatim via Display redaction... but
        // render_client_config needs the *actual* secret, so it must use
        // to_base64() explicitly rather than the redacted Display impl.
        assert!(!config.contains("REDACTED"));
    }
}
