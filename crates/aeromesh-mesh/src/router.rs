//! # Mesh Router
//!
//! Pure logic — no I/O, no clocks of its own. Owns the neighbour table, the
//! network graph, the routing table, and the mesh statistics; everything it
//! wants transmitted comes back to the caller as [`RouterOutput`]s.
//!
//! Routing state is built two ways, mirroring the discovery protocol:
//!
//! - **Graph-derived**: DISCOVERY broadcasts create direct-neighbour edges;
//!   every rebuild replaces the routing table with shortest-path first hops.
//! - **Advertised**: a neighbour's ROUTE_UPDATE is merged on top, making
//!   that neighbour the next hop for destinations it can reach. Merged
//!   entries live until the next rebuild re-derives the table.
//!
//! A rebuild that changes the table emits a ROUTE_UPDATE broadcast of its
//! own, which is how reachability propagates hop by hop.

use quanta::Instant;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info, warn};

use aeromesh_link::wire::Priority;

use crate::envelope::{epoch_now, Envelope, NodeId, GATEWAY_SENTINEL};
use crate::graph::{link_weight, MeshGraph};
use crate::neighbor::{NeighborState, NeighborTable};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Router parameters, snapshotted at construction.
#[derive(Debug, Clone)]
pub struct RouterConfig {
    pub node_id: NodeId,
    pub is_gateway: bool,
    /// Battery level advertised in DISCOVERY broadcasts. A hardware monitor
    /// can feed this; defaults to full.
    pub battery_level: f64,
    /// Routing reach cap in edges.
    pub max_hops: u32,
    /// Neighbour eviction deadline.
    pub node_timeout: Duration,
    /// Window after which an unrefreshed neighbour counts as quiet.
    pub heartbeat_interval: Duration,
}

impl Default for RouterConfig {
    fn default() -> Self {
        RouterConfig {
            node_id: NodeId::from("node"),
            is_gateway: false,
            battery_level: 1.0,
            max_hops: 5,
            node_timeout: Duration::from_secs(180),
            heartbeat_interval: Duration::from_secs(30),
        }
    }
}

// ─── Errors ─────────────────────────────────────────────────────────────────

/// Routing-layer failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum MeshError {
    /// No routing-table entry for the destination. Never retried here.
    #[error("no route to {0}")]
    NoRoute(NodeId),
    /// No gateway is currently reachable for a sentinel destination.
    #[error("no gateway reachable")]
    NoGateway,
    #[error(transparent)]
    Link(#[from] aeromesh_link::engine::LinkError),
    /// The node runtime has shut down.
    #[error("mesh node stopped")]
    Stopped,
}

// ─── Outputs ────────────────────────────────────────────────────────────────

/// A DATA payload addressed to this node.
#[derive(Debug, Clone)]
pub struct Delivered {
    pub source: NodeId,
    pub payload: serde_json::Value,
}

/// What the router wants done after handling an envelope.
#[derive(Debug)]
pub enum RouterOutput {
    /// Hand the payload to the application inbox.
    Deliver(Delivered),
    /// Transmit this envelope over the link. `keep_id` carries the inbound
    /// link message id when forwarding, so the id survives the hop.
    Transmit {
        envelope: Envelope,
        priority: Priority,
        keep_id: Option<aeromesh_link::wire::MessageId>,
    },
}

/// Outcome of an application send.
#[derive(Debug)]
pub enum Dispatch {
    /// Route found: transmit this envelope.
    Transmit { envelope: Envelope, priority: Priority },
    /// The resolved destination is this node (e.g. a gateway broadcasting
    /// to itself); deliver locally.
    Local(Delivered),
}

// ─── Statistics ─────────────────────────────────────────────────────────────

/// Mesh-level counters; monotone.
#[derive(Debug, Clone, Default, Serialize)]
pub struct MeshStats {
    pub messages_forwarded: u64,
    pub route_updates: u64,
    /// Payload bytes originated or forwarded by this node.
    pub total_bandwidth: u64,
}

/// Operator-facing topology view.
#[derive(Debug, Clone, Serialize)]
pub struct TopologySnapshot {
    pub nodes: usize,
    pub active_nodes: usize,
    pub routes: usize,
    pub gateway_nodes: usize,
    pub stats: MeshStats,
}

// ─── Router ─────────────────────────────────────────────────────────────────

/// Signal context of one received envelope.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReceiveMeta {
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
}

/// The mesh routing state machine.
pub struct Router {
    config: RouterConfig,
    neighbors: NeighborTable,
    graph: MeshGraph,
    routes: HashMap<NodeId, NodeId>,
    stats: MeshStats,
}

impl Router {
    pub fn new(config: RouterConfig) -> Self {
        let mut graph = MeshGraph::new();
        graph.add_node(config.node_id.clone());
        info!(node_id = %config.node_id, is_gateway = config.is_gateway, "router started");
        Router {
            neighbors: NeighborTable::new(config.node_timeout),
            graph,
            routes: HashMap::new(),
            stats: MeshStats::default(),
            config,
        }
    }

    pub fn node_id(&self) -> &NodeId {
        &self.config.node_id
    }

    // ─── Application Sends ──────────────────────────────────────────────

    /// Wrap `payload` in a DATA envelope toward `destination`. The gateway
    /// sentinel resolves to the nearest reachable gateway (possibly this
    /// node). Fails fast with `NoRoute`; callers may resubmit later.
    pub fn send(
        &mut self,
        destination: &NodeId,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<Dispatch, MeshError> {
        let destination = if destination.as_str() == GATEWAY_SENTINEL {
            self.resolve_gateway()?
        } else {
            destination.clone()
        };

        if destination == self.config.node_id {
            return Ok(Dispatch::Local(Delivered {
                source: self.config.node_id.clone(),
                payload,
            }));
        }

        let next_hop = self
            .routes
            .get(&destination)
            .cloned()
            .ok_or_else(|| MeshError::NoRoute(destination.clone()))?;

        self.stats.total_bandwidth += payload_size(&payload);
        Ok(Dispatch::Transmit {
            envelope: Envelope::Data {
                source: self.config.node_id.clone(),
                destination,
                next_hop,
                payload,
            },
            priority,
        })
    }

    /// Nearest gateway: strongest smoothed RSSI wins, id order breaks ties.
    fn resolve_gateway(&self) -> Result<NodeId, MeshError> {
        if self.config.is_gateway {
            return Ok(self.config.node_id.clone());
        }
        self.neighbors
            .gateways()
            .filter(|r| self.routes.contains_key(&r.id))
            .max_by(|a, b| {
                a.rssi
                    .value()
                    .total_cmp(&b.rssi.value())
                    .then_with(|| b.id.cmp(&a.id))
            })
            .map(|r| r.id.clone())
            .ok_or(MeshError::NoGateway)
    }

    // ─── Periodic Broadcasts ────────────────────────────────────────────

    pub fn make_discovery(&self) -> Envelope {
        Envelope::Discovery {
            node_id: self.config.node_id.clone(),
            is_gateway: self.config.is_gateway,
            battery_level: self.config.battery_level,
            timestamp: epoch_now(),
        }
    }

    pub fn make_heartbeat(&self) -> Envelope {
        Envelope::Heartbeat {
            node_id: self.config.node_id.clone(),
            timestamp: epoch_now(),
        }
    }

    /// Evict timed-out neighbours. Any eviction forces a rebuild, which may
    /// emit a ROUTE_UPDATE broadcast.
    pub fn sweep_neighbors(&mut self, now: Instant) -> Vec<RouterOutput> {
        let removed = self.neighbors.sweep(now);
        if removed.is_empty() {
            return Vec::new();
        }
        for id in &removed {
            info!(node_id = %id, "neighbour timed out");
            self.graph.remove_node(id);
        }
        self.rebuild_routes()
            .map(|update| {
                vec![RouterOutput::Transmit {
                    envelope: update,
                    priority: Priority::Medium,
                    keep_id: None,
                }]
            })
            .unwrap_or_default()
    }

    // ─── Envelope Handling ──────────────────────────────────────────────

    /// Dispatch one inbound envelope by type.
    pub fn handle_envelope(
        &mut self,
        envelope: Envelope,
        meta: ReceiveMeta,
        link_id: Option<aeromesh_link::wire::MessageId>,
        now: Instant,
    ) -> Vec<RouterOutput> {
        match envelope {
            Envelope::Discovery {
                node_id,
                is_gateway,
                battery_level,
                ..
            } => self.on_discovery(node_id, is_gateway, battery_level, meta, now),
            Envelope::Heartbeat { node_id, .. } => {
                self.on_heartbeat(&node_id, now);
                Vec::new()
            }
            Envelope::RouteUpdate {
                node_id, routes, ..
            } => {
                self.on_route_update(&node_id, routes);
                Vec::new()
            }
            Envelope::Data {
                source,
                destination,
                next_hop,
                payload,
            } => self.on_data(source, destination, next_hop, payload, link_id),
        }
    }

    fn on_discovery(
        &mut self,
        node_id: NodeId,
        is_gateway: bool,
        battery_level: f64,
        meta: ReceiveMeta,
        now: Instant,
    ) -> Vec<RouterOutput> {
        if node_id == self.config.node_id {
            return Vec::new();
        }
        debug!(node_id = %node_id, rssi = ?meta.rssi, "discovery received");
        let record = self.neighbors.observe_discovery(
            node_id.clone(),
            is_gateway,
            battery_level,
            meta.rssi,
            meta.snr,
            now,
        );
        let rssi = meta.rssi.map(f64::from).unwrap_or_else(|| record.rssi.value());
        let weight = link_weight(rssi);
        self.graph.upsert_edge(&self.config.node_id, &node_id, weight);

        self.rebuild_routes()
            .map(|update| {
                vec![RouterOutput::Transmit {
                    envelope: update,
                    priority: Priority::Medium,
                    keep_id: None,
                }]
            })
            .unwrap_or_default()
    }

    fn on_heartbeat(&mut self, node_id: &NodeId, now: Instant) {
        if node_id == &self.config.node_id {
            return;
        }
        if !self.neighbors.observe_heartbeat(node_id, now) {
            debug!(node_id = %node_id, "heartbeat from unknown node, awaiting discovery");
        }
    }

    /// Strict merge of a neighbour's advertised routes: adopt `dest → X`
    /// only while X itself is within `max_hops − 1`, preferring the entry
    /// with the smaller first-hop edge weight and keeping the current entry
    /// on an exact tie.
    fn on_route_update(&mut self, advertiser: &NodeId, advertised: Vec<(NodeId, NodeId)>) {
        if advertiser == &self.config.node_id {
            return;
        }
        let paths = self
            .graph
            .shortest_paths(&self.config.node_id, self.config.max_hops);
        let Some(path_to_advertiser) = paths.get(advertiser) else {
            debug!(advertiser = %advertiser, "route update from unreachable node ignored");
            return;
        };
        if path_to_advertiser.hops > self.config.max_hops.saturating_sub(1) {
            return;
        }
        let candidate_weight = self
            .graph
            .edge_weight(&self.config.node_id, &path_to_advertiser.next_hop)
            .unwrap_or(f64::MAX);

        for (dest, _their_next_hop) in advertised {
            if dest == self.config.node_id {
                continue;
            }
            let adopt = match self.routes.get(&dest) {
                None => true,
                Some(current_next) => {
                    let current_weight = self
                        .graph
                        .edge_weight(&self.config.node_id, current_next)
                        .unwrap_or(f64::MAX);
                    // Smaller first-hop weight wins; exact tie keeps current.
                    candidate_weight < current_weight
                }
            };
            if adopt {
                self.routes
                    .insert(dest, path_to_advertiser.next_hop.clone());
            }
        }
    }

    fn on_data(
        &mut self,
        source: NodeId,
        destination: NodeId,
        next_hop: NodeId,
        payload: serde_json::Value,
        link_id: Option<aeromesh_link::wire::MessageId>,
    ) -> Vec<RouterOutput> {
        if destination == self.config.node_id {
            debug!(source = %source, "data delivered locally");
            return vec![RouterOutput::Deliver(Delivered { source, payload })];
        }

        if next_hop != self.config.node_id {
            // Overheard traffic for someone else.
            return Vec::new();
        }

        match self.routes.get(&destination) {
            Some(hop) => {
                self.stats.messages_forwarded += 1;
                self.stats.total_bandwidth += payload_size(&payload);
                debug!(destination = %destination, next_hop = %hop, "forwarding data");
                vec![RouterOutput::Transmit {
                    envelope: Envelope::Data {
                        source,
                        destination: destination.clone(),
                        next_hop: hop.clone(),
                        payload,
                    },
                    priority: Priority::Medium,
                    keep_id: link_id,
                }]
            }
            None => {
                warn!(destination = %destination, "no route for forwarded data, dropping");
                Vec::new()
            }
        }
    }

    // ─── Routing Table ──────────────────────────────────────────────────

    /// Replace the routing table with shortest-path first hops from the
    /// current graph. A changed table bumps `route_updates` and returns the
    /// announcement to broadcast.
    fn rebuild_routes(&mut self) -> Option<Envelope> {
        let paths = self
            .graph
            .shortest_paths(&self.config.node_id, self.config.max_hops);
        let new_table: HashMap<NodeId, NodeId> = paths
            .into_iter()
            .map(|(dest, info)| (dest, info.next_hop))
            .collect();

        if new_table == self.routes {
            return None;
        }
        self.routes = new_table;
        self.stats.route_updates += 1;

        let mut routes: Vec<(NodeId, NodeId)> = self
            .routes
            .iter()
            .map(|(d, n)| (d.clone(), n.clone()))
            .collect();
        routes.sort();
        debug!(routes = routes.len(), "routing table rebuilt");
        Some(Envelope::RouteUpdate {
            node_id: self.config.node_id.clone(),
            routes,
            timestamp: epoch_now(),
        })
    }

    /// Current next hop toward `destination`, if any.
    pub fn route_to(&self, destination: &NodeId) -> Option<&NodeId> {
        self.routes.get(destination)
    }

    pub fn route_count(&self) -> usize {
        self.routes.len()
    }

    pub fn neighbor_count(&self) -> usize {
        self.neighbors.len()
    }

    // ─── Operator Surface ───────────────────────────────────────────────

    pub fn topology(&self, now: Instant) -> TopologySnapshot {
        let active_neighbors = self
            .neighbors
            .iter()
            .filter(|r| r.state(now, self.config.node_timeout) == NeighborState::Active)
            .count();
        TopologySnapshot {
            nodes: 1 + self.neighbors.len(),
            active_nodes: 1 + active_neighbors,
            routes: self.routes.len(),
            gateway_nodes: self.neighbors.gateways().count()
                + usize::from(self.config.is_gateway),
            stats: self.stats.clone(),
        }
    }
}

fn payload_size(payload: &serde_json::Value) -> u64 {
    serde_json::to_vec(payload).map(|v| v.len() as u64).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn router(id: &str) -> Router {
        Router::new(RouterConfig {
            node_id: NodeId::from(id),
            ..RouterConfig::default()
        })
    }

    fn meta(rssi: i32) -> ReceiveMeta {
        ReceiveMeta {
            rssi: Some(rssi),
            snr: Some(8.0),
        }
    }

    fn discovery(id: &str) -> Envelope {
        Envelope::Discovery {
            node_id: NodeId::from(id),
            is_gateway: false,
            battery_level: 1.0,
            timestamp: 0.0,
        }
    }

    fn apply(r: &mut Router, env: Envelope, rssi: i32) -> Vec<RouterOutput> {
        r.handle_envelope(env, meta(rssi), None, Instant::now())
    }

    // ─── Discovery ──────────────────────────────────────────────────────

    #[test]
    fn discovery_installs_route_and_announces() {
        let mut a = router("a");
        let outputs = apply(&mut a, discovery("b"), -60);

        assert_eq!(a.route_to(&NodeId::from("b")), Some(&NodeId::from("b")));
        assert_eq!(outputs.len(), 1, "table change announces a route update");
        match &outputs[0] {
            RouterOutput::Transmit { envelope, .. } => {
                assert_eq!(envelope.kind(), "route_update");
            }
            other => panic!("expected transmit, got {other:?}"),
        }
    }

    #[test]
    fn own_discovery_is_ignored() {
        let mut a = router("a");
        let outputs = apply(&mut a, discovery("a"), -60);
        assert!(outputs.is_empty());
        assert_eq!(a.neighbor_count(), 0);
    }

    #[test]
    fn repeated_discovery_is_a_no_op_after_the_first() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);
        let outputs = apply(&mut a, discovery("b"), -60);
        assert!(outputs.is_empty(), "unchanged table must not re-announce");
        assert_eq!(a.neighbor_count(), 1);
        assert_eq!(a.route_count(), 1);
    }

    // ─── Route Updates ──────────────────────────────────────────────────

    #[test]
    fn route_update_merges_remote_destinations() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);

        let update = Envelope::RouteUpdate {
            node_id: NodeId::from("b"),
            routes: vec![(NodeId::from("c"), NodeId::from("c"))],
            timestamp: 0.0,
        };
        apply(&mut a, update, -60);

        assert_eq!(a.route_to(&NodeId::from("c")), Some(&NodeId::from("b")));
    }

    #[test]
    fn route_update_from_stranger_is_ignored() {
        let mut a = router("a");
        let update = Envelope::RouteUpdate {
            node_id: NodeId::from("ghost"),
            routes: vec![(NodeId::from("c"), NodeId::from("c"))],
            timestamp: 0.0,
        };
        apply(&mut a, update, -60);
        assert_eq!(a.route_count(), 0);
    }

    #[test]
    fn route_update_never_installs_self() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);
        let update = Envelope::RouteUpdate {
            node_id: NodeId::from("b"),
            routes: vec![(NodeId::from("a"), NodeId::from("a"))],
            timestamp: 0.0,
        };
        apply(&mut a, update, -60);
        assert!(a.route_to(&NodeId::from("a")).is_none());
    }

    #[test]
    fn route_update_with_known_entries_is_a_no_op() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);
        let before: HashMap<NodeId, NodeId> = a.routes.clone();
        let updates_before = a.stats.route_updates;

        // b advertises a route to b itself; a already routes there directly
        // with the same first hop, so the exact tie keeps the current entry.
        let update = Envelope::RouteUpdate {
            node_id: NodeId::from("b"),
            routes: vec![(NodeId::from("b"), NodeId::from("b"))],
            timestamp: 0.0,
        };
        apply(&mut a, update, -60);

        assert_eq!(a.routes, before);
        assert_eq!(a.stats.route_updates, updates_before);
    }

    #[test]
    fn larger_first_hop_weight_is_not_adopted() {
        let mut a = router("a");
        // Edge weights: 1/(|rssi|+1) — the -95 edge is the cheaper one.
        apply(&mut a, discovery("b"), -40);
        apply(&mut a, discovery("far"), -95);

        // The cheap-first-hop neighbour advertises c first.
        let via_far = Envelope::RouteUpdate {
            node_id: NodeId::from("far"),
            routes: vec![(NodeId::from("c"), NodeId::from("c"))],
            timestamp: 0.0,
        };
        apply(&mut a, via_far, -95);
        // b's first-hop edge costs more, so the current entry stands.
        let via_b = Envelope::RouteUpdate {
            node_id: NodeId::from("b"),
            routes: vec![(NodeId::from("c"), NodeId::from("c"))],
            timestamp: 0.0,
        };
        apply(&mut a, via_b, -40);

        assert_eq!(a.route_to(&NodeId::from("c")), Some(&NodeId::from("far")));
    }

    // ─── Data Handling ──────────────────────────────────────────────────

    #[test]
    fn data_for_self_is_delivered() {
        let mut a = router("a");
        let data = Envelope::Data {
            source: NodeId::from("b"),
            destination: NodeId::from("a"),
            next_hop: NodeId::from("a"),
            payload: json!("hello"),
        };
        let outputs = apply(&mut a, data, -60);
        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            RouterOutput::Deliver(d) => {
                assert_eq!(d.source, NodeId::from("b"));
                assert_eq!(d.payload, json!("hello"));
            }
            other => panic!("expected delivery, got {other:?}"),
        }
    }

    #[test]
    fn data_via_self_is_forwarded_with_rewritten_hop() {
        let mut b = router("b");
        apply(&mut b, discovery("a"), -60);
        apply(&mut b, discovery("c"), -60);

        let data = Envelope::Data {
            source: NodeId::from("a"),
            destination: NodeId::from("c"),
            next_hop: NodeId::from("b"),
            payload: json!({"n": 1}),
        };
        let link_id = aeromesh_link::wire::MessageId::from("a-42");
        let outputs = b.handle_envelope(data, meta(-60), Some(link_id.clone()), Instant::now());

        assert_eq!(outputs.len(), 1);
        match &outputs[0] {
            RouterOutput::Transmit {
                envelope: Envelope::Data { next_hop, .. },
                priority,
                keep_id,
            } => {
                assert_eq!(next_hop, &NodeId::from("c"));
                assert_eq!(*priority, Priority::Medium);
                assert_eq!(keep_id.as_ref(), Some(&link_id), "forward keeps the link id");
            }
            other => panic!("expected forward, got {other:?}"),
        }
        assert_eq!(b.stats.messages_forwarded, 1);
    }

    #[test]
    fn data_without_route_is_dropped() {
        let mut b = router("b");
        apply(&mut b, discovery("a"), -60);
        let data = Envelope::Data {
            source: NodeId::from("a"),
            destination: NodeId::from("nowhere"),
            next_hop: NodeId::from("b"),
            payload: json!(1),
        };
        assert!(apply(&mut b, data, -60).is_empty());
        assert_eq!(b.stats.messages_forwarded, 0);
    }

    #[test]
    fn overheard_data_is_ignored() {
        let mut x = router("x");
        apply(&mut x, discovery("a"), -60);
        let data = Envelope::Data {
            source: NodeId::from("a"),
            destination: NodeId::from("c"),
            next_hop: NodeId::from("b"),
            payload: json!(1),
        };
        assert!(apply(&mut x, data, -60).is_empty());
    }

    // ─── Sends ──────────────────────────────────────────────────────────

    #[test]
    fn send_without_route_fails_fast() {
        let mut a = router("a");
        let err = a.send(&NodeId::from("b"), json!(1), Priority::Medium);
        assert!(matches!(err, Err(MeshError::NoRoute(_))));
    }

    #[test]
    fn send_stamps_next_hop() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);

        match a.send(&NodeId::from("b"), json!("hi"), Priority::High).unwrap() {
            Dispatch::Transmit { envelope, priority } => {
                assert_eq!(priority, Priority::High);
                match envelope {
                    Envelope::Data {
                        source,
                        destination,
                        next_hop,
                        ..
                    } => {
                        assert_eq!(source, NodeId::from("a"));
                        assert_eq!(destination, NodeId::from("b"));
                        assert_eq!(next_hop, NodeId::from("b"));
                    }
                    other => panic!("expected data, got {other:?}"),
                }
            }
            other => panic!("expected transmit, got {other:?}"),
        }
        assert!(a.stats.total_bandwidth > 0);
    }

    #[test]
    fn gateway_sentinel_resolves_to_nearest_gateway() {
        let mut a = router("a");
        let near = Envelope::Discovery {
            node_id: NodeId::from("gw-near"),
            is_gateway: true,
            battery_level: 1.0,
            timestamp: 0.0,
        };
        let far = Envelope::Discovery {
            node_id: NodeId::from("gw-far"),
            is_gateway: true,
            battery_level: 1.0,
            timestamp: 0.0,
        };
        apply(&mut a, near, -40);
        apply(&mut a, far, -95);

        match a
            .send(&NodeId::from(GATEWAY_SENTINEL), json!(1), Priority::Medium)
            .unwrap()
        {
            Dispatch::Transmit { envelope, .. } => match envelope {
                Envelope::Data { destination, .. } => {
                    assert_eq!(destination, NodeId::from("gw-near"));
                }
                other => panic!("expected data, got {other:?}"),
            },
            other => panic!("expected transmit, got {other:?}"),
        }
    }

    #[test]
    fn gateway_sentinel_on_a_gateway_delivers_locally() {
        let mut gw = Router::new(RouterConfig {
            node_id: NodeId::from("gw"),
            is_gateway: true,
            ..RouterConfig::default()
        });
        match gw
            .send(&NodeId::from(GATEWAY_SENTINEL), json!("det"), Priority::High)
            .unwrap()
        {
            Dispatch::Local(d) => assert_eq!(d.payload, json!("det")),
            other => panic!("expected local delivery, got {other:?}"),
        }
    }

    #[test]
    fn gateway_sentinel_without_gateways_fails() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);
        let err = a.send(&NodeId::from(GATEWAY_SENTINEL), json!(1), Priority::Low);
        assert!(matches!(err, Err(MeshError::NoGateway)));
    }

    // ─── Eviction & Invariants ──────────────────────────────────────────

    #[test]
    fn sweep_evicts_and_rebuilds() {
        let mut a = Router::new(RouterConfig {
            node_id: NodeId::from("a"),
            node_timeout: Duration::from_millis(10),
            ..RouterConfig::default()
        });
        apply(&mut a, discovery("b"), -60);
        assert_eq!(a.route_count(), 1);

        std::thread::sleep(Duration::from_millis(20));
        let outputs = a.sweep_neighbors(Instant::now());

        assert_eq!(a.neighbor_count(), 0);
        assert_eq!(a.route_count(), 0, "empty neighbour table, empty routes");
        assert_eq!(outputs.len(), 1, "eviction announces the new table");
    }

    #[test]
    fn routing_table_values_are_live_neighbors() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);
        apply(&mut a, discovery("d"), -70);
        let update = Envelope::RouteUpdate {
            node_id: NodeId::from("b"),
            routes: vec![(NodeId::from("far"), NodeId::from("x"))],
            timestamp: 0.0,
        };
        apply(&mut a, update, -60);

        for next_hop in a.routes.values() {
            assert!(
                a.neighbors.contains(next_hop),
                "next hop {next_hop} must be a live neighbour"
            );
        }
        assert!(!a.routes.contains_key(&NodeId::from("a")));
    }

    #[test]
    fn topology_counts_self_and_neighbors() {
        let mut a = router("a");
        apply(&mut a, discovery("b"), -60);
        let gw = Envelope::Discovery {
            node_id: NodeId::from("gw"),
            is_gateway: true,
            battery_level: 0.5,
            timestamp: 0.0,
        };
        apply(&mut a, gw, -70);

        let topo = a.topology(Instant::now());
        assert_eq!(topo.nodes, 3);
        assert_eq!(topo.active_nodes, 3);
        assert_eq!(topo.routes, 2);
        assert_eq!(topo.gateway_nodes, 1);
    }
}
