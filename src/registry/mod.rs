//! Tunnel registry: the authoritative in-memory store of tunnel records
//!
//! There is no persistence across restarts (spec §1 Non-goals) — every
//! record lives only as long as the broker process. The registry is the
//! only writer of tunnel records; every mutation happens under the single
//! mutex documented in spec §5, with no external call (keeper, peer
//! controller) ever held under it.

mod ip_allocator;

pub use ip_allocator::IpAllocator;

use crate::error::{BrokerError, Result};
use crate::wireguard::{PrivateKey, PublicKey};
use chrono::{DateTime, Utc};
use rand::RngCore;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;

/// Lifecycle state of a tunnel record. Monotone: `Active -> {Expired,
/// Closed}`, never the reverse, and a terminal status never transitions
/// again (spec §3, §5).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelStatus {
    /// Serving traffic; has exactly one corresponding kernel peer.
    Active,
    /// Lifetime elapsed; kernel peer has been removed.
    Expired,
    /// Explicitly closed by the owner; kernel peer has been removed.
    Closed,
}

impl TunnelStatus {
    /// Whether this is a terminal status (no further transitions allowed).
    pub fn is_terminal(self) -> bool {
        !matches!(self, TunnelStatus::Active)
    }
}

impl std::fmt::Display for TunnelStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TunnelStatus::Active => "active",
            TunnelStatus::Expired => "expired",
            TunnelStatus::Closed => "closed",
        };
        f.write_str(s)
    }
}

/// A single broker-side tunnel record. See spec §3 for the full field
/// semantics and invariants.
#[derive(Debug, Clone)]
pub struct TunnelRecord {
    /// Opaque identifier, `tun_` followed by 16 hex digits.
    pub id: String,
    /// Owning agent, as reported by the keeper's verify response.
    pub agent_id: String,
    /// This broker's own region tag.
    pub region: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Expiry time. Immutable once set, except that closing early
    /// overwrites it to the close time.
    pub expires_at: DateTime<Utc>,
    /// Client-side private key (kept so GET can cheaply re-render config).
    pub client_private_key: PrivateKey,
    /// Client-side public key, the kernel-visible peer identity.
    pub client_public_key: PublicKey,
    /// The `/32` address drawn from the region's subnet.
    pub client_ip: Ipv4Addr,
    /// Current lifecycle state.
    pub status: TunnelStatus,
    /// Incremental-accrual cursor. Never moves backward.
    pub last_billed_at: DateTime<Utc>,
}

impl TunnelRecord {
    /// Duration from creation to `at` (or to the terminal time, once
    /// terminal), in whole seconds.
    pub fn duration_seconds_as_of(&self, at: DateTime<Utc>) -> i64 {
        let end = if self.status.is_terminal() {
            self.expires_at
        } else {
            at
        };
        (end - self.created_at).num_seconds().max(0)
    }
}

/// Generate a new tunnel id: `tun_` followed by 16 hex digits from a
/// cryptographic RNG.
pub fn generate_tunnel_id() -> String {
    let mut bytes = [0u8; 8];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    let mut id = String::with_capacity(20);
    id.push_str("tun_");
    for b in bytes {
        id.push_str(&format!("{b:02x}"));
    }
    id
}

/// The in-memory tunnel store plus its IP allocator, guarded by one mutex
/// per spec §5's locking discipline. Lock hold times are kept to plain
/// map/vec operations only — no `.await` ever happens while held.
pub struct TunnelRegistry {
    inner: Mutex<Inner>,
}

struct Inner {
    tunnels: HashMap<String, TunnelRecord>,
    allocator: IpAllocator,
}

impl TunnelRegistry {
    /// Create a new, empty registry over the given subnet.
    pub fn new(subnet_cidr: &str) -> Result<Self> {
        Ok(Self {
            inner: Mutex::new(Inner {
                tunnels: HashMap::new(),
                allocator: IpAllocator::new(subnet_cidr)?,
            }),
        })
    }

    /// Allocate a client IP and insert a new tunnel record. Fails if the
    /// id already exists (practically unreachable given the RNG) or the
    /// subnet is exhausted.
    pub fn insert(
        &self,
        agent_id: String,
        region: String,
        created_at: DateTime<Utc>,
        expires_at: DateTime<Utc>,
        client_private_key: PrivateKey,
    ) -> Result<TunnelRecord> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");

        let id = generate_tunnel_id();
        if inner.tunnels.contains_key(&id) {
            return Err(BrokerError::Registry(format!(
                "tunnel id collision for {id}"
            )));
        }

        let client_ip = inner.allocator.allocate()?;
        let client_public_key = client_private_key.public_key();

        let record = TunnelRecord {
            id: id.clone(),
            agent_id,
            region,
            created_at,
            expires_at,
            client_private_key,
            client_public_key,
            client_ip: client_ip.into(),
            status: TunnelStatus::Active,
            last_billed_at: created_at,
        };

        inner.tunnels.insert(id, record.clone());
        Ok(record)
    }

    /// Undo an `insert` whose peer installation failed — releases the IP
    /// and removes the record, per the redesigned atomic-install behavior
    /// (spec §9 "Atomic peer install").
    pub fn rollback_insert(&self, id: &str) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(record) = inner.tunnels.remove(id) {
            inner.allocator.release(record.client_ip);
        }
    }

    /// Look up a record by id.
    pub fn get(&self, id: &str) -> Option<TunnelRecord> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner.tunnels.get(id).cloned()
    }

    /// Transition an active tunnel to `Expired`, advancing `last_billed_at`
    /// to `expires_at` (the terminal time) so the cursor invariant holds.
    /// No-op (returns `None`) if the tunnel is not currently active. The
    /// returned snapshot carries the pre-transition cursor (mirroring
    /// [`Self::transition_to_closed`]) so the caller can bill the unbilled
    /// remainder before it is overwritten in the stored record.
    pub fn transition_to_expired(&self, id: &str) -> Option<TunnelRecord> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let record = inner.tunnels.get_mut(id)?;
        if record.status != TunnelStatus::Active {
            return None;
        }
        let pre_transition_cursor = record.last_billed_at;
        record.status = TunnelStatus::Expired;
        record.last_billed_at = record.expires_at;
        let mut terminal = record.clone();
        terminal.last_billed_at = pre_transition_cursor;
        inner.allocator.release(terminal.client_ip);
        Some(terminal)
    }

    /// Transition an active tunnel to `Closed` at `now`, overwriting
    /// `expires_at` to the close time. No-op (returns `None`) if the
    /// tunnel is not currently active.
    pub fn transition_to_closed(&self, id: &str, now: DateTime<Utc>) -> Option<TunnelRecord> {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        let record = inner.tunnels.get_mut(id)?;
        if record.status != TunnelStatus::Active {
            return None;
        }
        record.expires_at = now;
        record.status = TunnelStatus::Closed;
        let before_cursor = record.last_billed_at;
        record.last_billed_at = now;
        let mut terminal = record.clone();
        terminal.last_billed_at = before_cursor; // caller needs the pre-close cursor to bill the remainder
        inner.allocator.release(terminal.client_ip);
        Some(terminal)
    }

    /// Advance `last_billed_at` for an active tunnel by `whole_seconds`,
    /// used by periodic accrual. No-op if the tunnel is no longer active.
    pub fn advance_billed_cursor(&self, id: &str, whole_seconds: i64) {
        let mut inner = self.inner.lock().expect("registry mutex poisoned");
        if let Some(record) = inner.tunnels.get_mut(id) {
            if record.status == TunnelStatus::Active {
                record.last_billed_at += chrono::Duration::seconds(whole_seconds);
            }
        }
    }

    /// Snapshot of every currently-active record.
    pub fn iterate_active(&self) -> Vec<TunnelRecord> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner
            .tunnels
            .values()
            .filter(|t| t.status == TunnelStatus::Active)
            .cloned()
            .collect()
    }

    /// Snapshot of every record (any status) owned by `agent_id`.
    pub fn iterate_by_agent(&self, agent_id: &str) -> Vec<TunnelRecord> {
        let inner = self.inner.lock().expect("registry mutex poisoned");
        inner
            .tunnels
            .values()
            .filter(|t| t.agent_id == agent_id)
            .cloned()
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn insert_allocates_ip_and_sets_cursor() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();

        assert_eq!(record.status, TunnelStatus::Active);
        assert_eq!(record.last_billed_at, created);
        assert!(record.id.starts_with("tun_"));
        assert_eq!(record.id.len(), 20);
    }

    #[test]
    fn cursor_invariant_holds_at_insert() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let expires = created + Duration::seconds(120);
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                expires,
                PrivateKey::generate(),
            )
            .unwrap();
        assert!(record.created_at <= record.last_billed_at);
        assert!(record.last_billed_at <= expires);
    }

    #[test]
    fn transition_to_closed_preserves_pre_close_cursor_for_billing() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();

        registry.advance_billed_cursor(&record.id, 60);
        let close_time = created + Duration::seconds(90);
        let closed = registry
            .transition_to_closed(&record.id, close_time)
            .unwrap();

        // the returned snapshot carries the cursor as it stood *before*
        // the close overwrite, so the caller can bill the unbilled remainder
        assert_eq!(closed.last_billed_at, created + Duration::seconds(60));

        let stored = registry.get(&record.id).unwrap();
        assert_eq!(stored.status, TunnelStatus::Closed);
        assert_eq!(stored.expires_at, close_time);
        assert_eq!(stored.last_billed_at, close_time);
    }

    #[test]
    fn transition_to_closed_twice_is_noop_second_time() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();

        assert!(registry
            .transition_to_closed(&record.id, created + Duration::seconds(10))
            .is_some());
        assert!(registry
            .transition_to_closed(&record.id, created + Duration::seconds(20))
            .is_none());
    }

    #[test]
    fn released_ip_is_available_after_close() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();
        let ip = record.client_ip;
        registry.transition_to_closed(&record.id, created);

        // fill the rest of the subnet; the released address must be
        // available somewhere in there.
        let mut seen_released = false;
        for _ in 0..253 {
            if let Ok(rec) = registry.insert(
                "agent-2".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            ) {
                if rec.client_ip == ip {
                    seen_released = true;
                }
            }
        }
        assert!(seen_released);
    }

    #[test]
    fn iterate_by_agent_returns_all_statuses() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let r1 = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();
        registry.transition_to_closed(&r1.id, created);
        registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();

        let all = registry.iterate_by_agent("agent-1");
        assert_eq!(all.len(), 2);
    }

    #[test]
    fn rollback_insert_releases_ip_and_removes_record() {
        let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
        let created = now();
        let record = registry
            .insert(
                "agent-1".into(),
                "us-east".into(),
                created,
                created + Duration::seconds(300),
                PrivateKey::generate(),
            )
            .unwrap();

        registry.rollback_insert(&record.id);
        assert!(registry.get(&record.id).is_none());
    }

    proptest! {
        // `created_at <= last_billed_at <= min(now, expires_at)` must hold
        // after any sequence of periodic-accrual advances (spec §3, §8).
        #[test]
        fn cursor_invariant_holds_after_arbitrary_accrual_advances(advances in proptest::collection::vec(1i64..600, 0..20)) {
            let registry = TunnelRegistry::new("10.100.0.0/24").unwrap();
            let created = now();
            let expires_at = created + Duration::seconds(100_000);
            let record = registry
                .insert("agent-1".into(), "us-east".into(), created, expires_at, PrivateKey::generate())
                .unwrap();

            let mut simulated_now = created;
            for advance_seconds in advances {
                simulated_now += Duration::seconds(advance_seconds);
                let delta = (simulated_now - registry.get(&record.id).unwrap().last_billed_at).num_seconds();
                let whole_minutes = delta / 60;
                if whole_minutes > 0 {
                    registry.advance_billed_cursor(&record.id, whole_minutes * 60);
                }

                let stored = registry.get(&record.id).unwrap();
                prop_assert!(stored.created_at <= stored.last_billed_at);
                prop_assert!(stored.last_billed_at <= simulated_now.min(expires_at));
            }
        }
    }
}
