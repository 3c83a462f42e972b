//! # Neighbour Table
//!
//! Direct-neighbour records built from DISCOVERY broadcasts and kept alive
//! by HEARTBEATs. Per-record signal readings are EWMA-smoothed. A record
//! whose `last_seen` ages past the node timeout is deleted by the sweep;
//! between one missed refresh window and the timeout the record is merely
//! `Quiet` and stays fully routable.
//!
//! ```text
//!         seen DISCOVERY            timeout
//! NEW ───────────────────▶ ACTIVE ───────────▶ (deleted)
//!                           │  ▲
//!                           │  │ heartbeat
//!                           ▼  │
//!                          QUIET
//! ```

use quanta::Instant;
use std::collections::HashMap;
use std::time::Duration;

use aeromesh_link::stats::SignalSmoother;

use crate::envelope::NodeId;

/// Smoothing gain for per-neighbour RSSI/SNR.
const SIGNAL_GAIN: f64 = 0.3;

// ─── Record ─────────────────────────────────────────────────────────────────

/// Liveness classification of a neighbour record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NeighborState {
    /// Refreshed within the last heartbeat window.
    Active,
    /// No recent refresh, but still within the node timeout.
    Quiet,
}

/// One direct neighbour.
#[derive(Debug, Clone)]
pub struct NeighborRecord {
    pub id: NodeId,
    /// Monotonically non-decreasing per record.
    pub last_seen: Instant,
    pub rssi: SignalSmoother,
    pub snr: SignalSmoother,
    /// Always 1 for directly heard nodes.
    pub hop_count: u32,
    pub battery_level: f64,
    pub is_gateway: bool,
}

impl NeighborRecord {
    pub fn state(&self, now: Instant, quiet_after: Duration) -> NeighborState {
        if now.duration_since(self.last_seen) > quiet_after {
            NeighborState::Quiet
        } else {
            NeighborState::Active
        }
    }
}

// ─── Table ──────────────────────────────────────────────────────────────────

/// All known direct neighbours, owned by the routing task.
pub struct NeighborTable {
    records: HashMap<NodeId, NeighborRecord>,
    node_timeout: Duration,
}

impl NeighborTable {
    pub fn new(node_timeout: Duration) -> Self {
        NeighborTable {
            records: HashMap::new(),
            node_timeout,
        }
    }

    /// Create or refresh a record from a DISCOVERY broadcast.
    pub fn observe_discovery(
        &mut self,
        id: NodeId,
        is_gateway: bool,
        battery_level: f64,
        rssi: Option<i32>,
        snr: Option<f64>,
        now: Instant,
    ) -> &NeighborRecord {
        let record = self.records.entry(id.clone()).or_insert_with(|| NeighborRecord {
            id,
            last_seen: now,
            rssi: SignalSmoother::new(SIGNAL_GAIN),
            snr: SignalSmoother::new(SIGNAL_GAIN),
            hop_count: 1,
            battery_level,
            is_gateway,
        });
        if now > record.last_seen {
            record.last_seen = now;
        }
        record.battery_level = battery_level;
        record.is_gateway = is_gateway;
        if let Some(rssi) = rssi {
            record.rssi.observe(f64::from(rssi));
        }
        if let Some(snr) = snr {
            record.snr.observe(snr);
        }
        record
    }

    /// Refresh `last_seen` from a HEARTBEAT. Unknown senders are ignored
    /// until their next DISCOVERY. Returns whether the record existed.
    pub fn observe_heartbeat(&mut self, id: &NodeId, now: Instant) -> bool {
        match self.records.get_mut(id) {
            Some(record) => {
                if now > record.last_seen {
                    record.last_seen = now;
                }
                true
            }
            None => false,
        }
    }

    /// Delete records older than the node timeout; returns the removed ids.
    pub fn sweep(&mut self, now: Instant) -> Vec<NodeId> {
        let timeout = self.node_timeout;
        let expired: Vec<NodeId> = self
            .records
            .iter()
            .filter(|(_, r)| now.duration_since(r.last_seen) > timeout)
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.records.remove(id);
        }
        expired
    }

    pub fn get(&self, id: &NodeId) -> Option<&NeighborRecord> {
        self.records.get(id)
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.records.contains_key(id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &NeighborRecord> {
        self.records.values()
    }

    pub fn gateways(&self) -> impl Iterator<Item = &NeighborRecord> {
        self.records.values().filter(|r| r.is_gateway)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table(timeout_ms: u64) -> NeighborTable {
        NeighborTable::new(Duration::from_millis(timeout_ms))
    }

    #[test]
    fn discovery_registers_neighbor() {
        let mut t = table(1000);
        t.observe_discovery(NodeId::from("b"), false, 0.9, Some(-70), Some(8.0), Instant::now());

        let record = t.get(&NodeId::from("b")).unwrap();
        assert_eq!(record.hop_count, 1);
        assert_eq!(record.battery_level, 0.9);
        assert_eq!(record.rssi.value(), -70.0);
    }

    #[test]
    fn repeated_discovery_is_idempotent_modulo_last_seen() {
        let mut t = table(1000);
        let now = Instant::now();
        t.observe_discovery(NodeId::from("b"), true, 1.0, Some(-60), None, now);
        t.observe_discovery(NodeId::from("b"), true, 1.0, Some(-60), None, now);

        assert_eq!(t.len(), 1);
        let record = t.get(&NodeId::from("b")).unwrap();
        assert!(record.is_gateway);
        // Two identical readings leave the smoothed value at the reading.
        assert_eq!(record.rssi.value(), -60.0);
    }

    #[test]
    fn heartbeat_requires_prior_discovery() {
        let mut t = table(1000);
        assert!(!t.observe_heartbeat(&NodeId::from("ghost"), Instant::now()));
        assert!(t.is_empty());

        t.observe_discovery(NodeId::from("b"), false, 1.0, None, None, Instant::now());
        assert!(t.observe_heartbeat(&NodeId::from("b"), Instant::now()));
    }

    #[test]
    fn sweep_evicts_only_expired() {
        let mut t = table(30);
        t.observe_discovery(NodeId::from("old"), false, 1.0, None, None, Instant::now());

        std::thread::sleep(Duration::from_millis(40));
        t.observe_discovery(NodeId::from("fresh"), false, 1.0, None, None, Instant::now());

        let removed = t.sweep(Instant::now());
        assert_eq!(removed, vec![NodeId::from("old")]);
        assert!(t.contains(&NodeId::from("fresh")));
    }

    #[test]
    fn heartbeat_defers_eviction() {
        let mut t = table(30);
        t.observe_discovery(NodeId::from("b"), false, 1.0, None, None, Instant::now());

        std::thread::sleep(Duration::from_millis(20));
        t.observe_heartbeat(&NodeId::from("b"), Instant::now());
        std::thread::sleep(Duration::from_millis(20));

        assert!(t.sweep(Instant::now()).is_empty(), "refreshed record survives");
    }

    #[test]
    fn quiet_state_within_timeout() {
        let mut t = table(1000);
        t.observe_discovery(NodeId::from("b"), false, 1.0, None, None, Instant::now());

        std::thread::sleep(Duration::from_millis(15));
        let record = t.get(&NodeId::from("b")).unwrap();
        assert_eq!(record.state(Instant::now(), Duration::from_millis(5)), NeighborState::Quiet);
        assert_eq!(record.state(Instant::now(), Duration::from_secs(1)), NeighborState::Active);
    }

    #[test]
    fn gateways_are_filterable() {
        let mut t = table(1000);
        let now = Instant::now();
        t.observe_discovery(NodeId::from("gw"), true, 1.0, None, None, now);
        t.observe_discovery(NodeId::from("n1"), false, 1.0, None, None, now);
        let gateways: Vec<&str> = t.gateways().map(|r| r.id.as_str()).collect();
        assert_eq!(gateways, vec!["gw"]);
    }
}
