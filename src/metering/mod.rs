//! Metering engine: periodic accrual, terminal accrual, and batched
//! delivery of tunnel usage to the keeper (spec §4.4).

use crate::error::Result;
use crate::keeper::{KeeperClient, UsageMetadata, UsageRecord};
use crate::registry::{TunnelRecord, TunnelRegistry};
use chrono::{DateTime, Utc};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{error, info, warn};

const ACCRUAL_TICK: Duration = Duration::from_secs(60);
const SECONDS_PER_HOUR: f64 = 3600.0;

/// Build the usage record for `whole_minutes` of periodic accrual, and
/// return how far to advance the registry's billing cursor.
fn periodic_record(
    tunnel: &TunnelRecord,
    whole_minutes: i64,
    now: DateTime<Utc>,
) -> (UsageRecord, i64) {
    let duration_seconds = whole_minutes * 60;
    let record = UsageRecord {
        agent_id: tunnel.agent_id.clone(),
        operation: "tunnel_hour".to_string(),
        quantity: duration_seconds as f64 / SECONDS_PER_HOUR,
        timestamp: now,
        metadata: UsageMetadata {
            region: tunnel.region.clone(),
            tunnel_id: tunnel.id.clone(),
            duration_seconds,
        },
    };
    (record, duration_seconds)
}

/// Build the terminal usage record covering `[last_billed_at, terminal_time)`.
fn terminal_record(tunnel: &TunnelRecord, terminal_time: DateTime<Utc>) -> UsageRecord {
    let duration_seconds = (terminal_time - tunnel.last_billed_at).num_seconds().max(0);
    UsageRecord {
        agent_id: tunnel.agent_id.clone(),
        operation: "tunnel_hour".to_string(),
        quantity: duration_seconds as f64 / SECONDS_PER_HOUR,
        timestamp: terminal_time,
        metadata: UsageMetadata {
            region: tunnel.region.clone(),
            tunnel_id: tunnel.id.clone(),
            duration_seconds,
        },
    }
}

/// The append-mostly pending-usage queue, FIFO with retry-on-failure
/// appending to the tail (spec §3, §5).
struct PendingQueue {
    records: Mutex<VecDeque<UsageRecord>>,
}

impl PendingQueue {
    fn new() -> Self {
        Self {
            records: Mutex::new(VecDeque::new()),
        }
    }

    fn push(&self, record: UsageRecord) {
        self.records.lock().expect("pending queue poisoned").push_back(record);
    }

    fn push_all(&self, records: impl IntoIterator<Item = UsageRecord>) {
        let mut guard = self.records.lock().expect("pending queue poisoned");
        guard.extend(records);
    }

    /// Remove and return every record currently queued.
    fn drain(&self) -> Vec<UsageRecord> {
        let mut guard = self.records.lock().expect("pending queue poisoned");
        guard.drain(..).collect()
    }

    fn len(&self) -> usize {
        self.records.lock().expect("pending queue poisoned").len()
    }
}

/// Owns the pending-usage queue and the two periodic tasks that drive
/// accrual and delivery.
pub struct MeteringEngine {
    registry: Arc<TunnelRegistry>,
    keeper: Arc<dyn KeeperClient>,
    region: String,
    pending: PendingQueue,
}

impl MeteringEngine {
    pub fn new(registry: Arc<TunnelRegistry>, keeper: Arc<dyn KeeperClient>, region: String) -> Self {
        Self {
            registry,
            keeper,
            region,
            pending: PendingQueue::new(),
        }
    }

    /// Enqueue a terminal accrual record for a tunnel that just closed or
    /// expired. `terminal` must be the snapshot returned by the registry's
    /// transition call, whose `last_billed_at` reflects the cursor as it
    /// stood *before* the transition (spec §4.4).
    pub fn accrue_terminal(&self, terminal: &TunnelRecord, terminal_time: DateTime<Utc>) {
        let record = terminal_record(terminal, terminal_time);
        if record.metadata.duration_seconds > 0 || record.quantity > 0.0 {
            self.pending.push(record);
        }
    }

    /// One periodic-accrual pass over every active tunnel (spec §4.4).
    /// Exposed directly so the lifecycle supervisor's shutdown path and
    /// the periodic task share one implementation.
    pub fn run_periodic_accrual(&self, now: DateTime<Utc>) {
        for tunnel in self.registry.iterate_active() {
            let delta_seconds = (now - tunnel.last_billed_at).num_seconds();
            if delta_seconds < 60 {
                continue;
            }
            let whole_minutes = delta_seconds / 60;
            let (record, advanced_seconds) = periodic_record(&tunnel, whole_minutes, now);
            self.registry.advance_billed_cursor(&tunnel.id, advanced_seconds);
            self.pending.push(record);
        }
    }

    /// One delivery pass: drain the queue and report it in a single call,
    /// re-enqueueing the whole batch on failure (spec §4.4).
    pub async fn run_delivery(&self) {
        let batch = self.pending.drain();
        if batch.is_empty() {
            return;
        }

        match self.keeper.report_usage(&self.region, &batch).await {
            Ok(response) => {
                info!(
                    processed = response.processed,
                    credits = response.total_credits_deducted,
                    "delivered usage batch"
                );
            }
            Err(e) => {
                warn!("usage report failed, re-enqueuing {} records: {e}", batch.len());
                self.pending.push_all(batch);
            }
        }
    }

    /// Number of records currently awaiting delivery, for diagnostics.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Spawn the periodic accrual task (60 s tick). Returns its handle so
    /// the caller can abort it at shutdown.
    pub fn spawn_accrual_task(self: &Arc<Self>) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(ACCRUAL_TICK);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.run_periodic_accrual(Utc::now());
            }
        })
    }

    /// Spawn the periodic delivery task (interval configurable, default
    /// 30 s per spec §4.4 / SPEC_FULL §10.3).
    pub fn spawn_delivery_task(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let engine = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                engine.run_delivery().await;
            }
        })
    }

    /// Shutdown accrual (spec §5): treat `now` as the terminal time of
    /// every still-active tunnel and enqueue its full unbilled remainder,
    /// without transitioning status or touching the registry — the
    /// process is about to exit and the record is never persisted (spec
    /// §1 non-goal), so there is nothing left to keep consistent. Unlike
    /// [`Self::run_periodic_accrual`] this bills sub-minute remainders
    /// too, since there will be no later tick to catch them.
    fn run_shutdown_accrual(&self, now: DateTime<Utc>) {
        for tunnel in self.registry.iterate_active() {
            let record = terminal_record(&tunnel, now);
            if record.metadata.duration_seconds > 0 {
                self.pending.push(record);
            }
        }
    }

    /// Shutdown sequence (spec §5): one final accrual pass over all
    /// active tunnels to close out unbilled time, then one delivery
    /// attempt bounded by `timeout`.
    pub async fn run_shutdown_drain(&self, timeout: Duration) -> Result<()> {
        self.run_shutdown_accrual(Utc::now());
        match tokio::time::timeout(timeout, self.run_delivery()).await {
            Ok(()) => Ok(()),
            Err(_) => {
                error!("usage drain on shutdown timed out after {timeout:?}, records dropped");
                Ok(())
            }
        }
    }
}
