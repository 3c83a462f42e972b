//! # Deterministic Mesh Harness
//!
//! Drives the pure state machines — one `LinkEngine` + `Router` pair per
//! node — over an in-memory ether with explicit, caller-controlled time.
//! No threads, no sleeps: tests shuttle frames with [`SimNet::pump`] and
//! move the clock by passing later instants into the sweep calls, so every
//! scenario is exactly reproducible.

use quanta::Instant;
use std::collections::HashMap;
use tracing::debug;

use aeromesh_link::engine::{LinkConfig, LinkEngine};
use aeromesh_link::radio::RawFrame;
use aeromesh_link::wire::{encode_line, MessageId, Priority};
use aeromesh_mesh::envelope::{Envelope, NodeId};
use aeromesh_mesh::router::{
    Delivered, Dispatch, MeshError, ReceiveMeta, Router, RouterConfig, RouterOutput,
};

use crate::airspace::{LinkQuality, LossPattern};

/// Shuttle rounds before `pump` declares the ether quiescent.
const MAX_PUMP_ROUNDS: usize = 64;

// ─── Sim Node ───────────────────────────────────────────────────────────────

/// One simulated node: link engine, router, and its collected deliveries.
pub struct SimNode {
    pub id: NodeId,
    pub link: LinkEngine,
    pub router: Router,
    /// Application-bound DATA deliveries, with the link id that carried them.
    pub inbox: Vec<(MessageId, Delivered)>,
}

impl SimNode {
    fn new(id: &str, is_gateway: bool) -> Self {
        let node_id = NodeId::from(id);
        SimNode {
            link: LinkEngine::new(LinkConfig {
                id_prefix: id.to_string(),
                ..LinkConfig::default()
            }),
            router: Router::new(RouterConfig {
                node_id: node_id.clone(),
                is_gateway,
                ..RouterConfig::default()
            }),
            id: node_id,
            inbox: Vec::new(),
        }
    }

    /// Payloads delivered to this node's application layer.
    pub fn delivered_payloads(&self) -> Vec<&serde_json::Value> {
        self.inbox.iter().map(|(_, d)| &d.payload).collect()
    }
}

// ─── Sim Net ────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct DirectedLink {
    quality: LinkQuality,
    counter: u32,
}

/// A deterministic multi-node mesh.
#[derive(Default)]
pub struct SimNet {
    nodes: Vec<SimNode>,
    links: HashMap<(NodeId, NodeId), DirectedLink>,
}

impl SimNet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_node(&mut self, id: &str, is_gateway: bool) {
        self.nodes.push(SimNode::new(id, is_gateway));
    }

    /// Symmetric link with independent per-direction loss counters.
    pub fn connect(&mut self, a: &str, b: &str, quality: LinkQuality) {
        for (src, dst) in [(a, b), (b, a)] {
            self.links.insert(
                (NodeId::from(src), NodeId::from(dst)),
                DirectedLink {
                    quality,
                    counter: 0,
                },
            );
        }
    }

    pub fn disconnect(&mut self, a: &str, b: &str) {
        self.links.remove(&(NodeId::from(a), NodeId::from(b)));
        self.links.remove(&(NodeId::from(b), NodeId::from(a)));
    }

    pub fn set_loss(&mut self, from: &str, to: &str, loss: LossPattern) {
        if let Some(link) = self
            .links
            .get_mut(&(NodeId::from(from), NodeId::from(to)))
        {
            link.quality.loss = loss;
        }
    }

    pub fn node(&self, id: &str) -> &SimNode {
        self.nodes
            .iter()
            .find(|n| n.id.as_str() == id)
            .expect("unknown sim node")
    }

    pub fn node_mut(&mut self, id: &str) -> &mut SimNode {
        self.nodes
            .iter_mut()
            .find(|n| n.id.as_str() == id)
            .expect("unknown sim node")
    }

    fn index_of(&self, id: &str) -> usize {
        self.nodes
            .iter()
            .position(|n| n.id.as_str() == id)
            .expect("unknown sim node")
    }

    // ─── Protocol Steps ─────────────────────────────────────────────────

    /// Every node broadcasts a DISCOVERY, then the ether drains.
    pub fn discovery_round(&mut self, now: Instant) {
        for node in &mut self.nodes {
            let envelope = node.router.make_discovery();
            let _ = node
                .link
                .send_message(envelope.to_bytes(), Priority::Low, now);
        }
        self.pump(now);
    }

    /// Every node broadcasts a HEARTBEAT, then the ether drains.
    pub fn heartbeat_round(&mut self, now: Instant) {
        for node in &mut self.nodes {
            let envelope = node.router.make_heartbeat();
            let _ = node
                .link
                .send_message(envelope.to_bytes(), Priority::Low, now);
        }
        self.pump(now);
    }

    /// Run every node's neighbour sweep at `now`, then drain.
    pub fn sweep_round(&mut self, now: Instant) {
        for i in 0..self.nodes.len() {
            let outputs = self.nodes[i].router.sweep_neighbors(now);
            self.apply_outputs(i, outputs, None, now);
        }
        self.pump(now);
    }

    /// Submit an application payload from one node. The resulting envelope
    /// is queued but not yet on the air — follow with [`pump`](Self::pump).
    pub fn send(
        &mut self,
        from: &str,
        destination: &str,
        payload: serde_json::Value,
        priority: Priority,
        now: Instant,
    ) -> Result<(), MeshError> {
        let i = self.index_of(from);
        let node = &mut self.nodes[i];
        match node.router.send(&NodeId::from(destination), payload, priority)? {
            Dispatch::Transmit { envelope, priority } => {
                node.link
                    .send_message(envelope.to_bytes(), priority, now)
                    .map_err(MeshError::from)?;
                Ok(())
            }
            Dispatch::Local(delivered) => {
                node.inbox.push((MessageId::from("local"), delivered));
                Ok(())
            }
        }
    }

    /// Shuttle frames between nodes until nothing moves.
    pub fn pump(&mut self, now: Instant) {
        for _ in 0..MAX_PUMP_ROUNDS {
            if !self.pump_once(now) {
                return;
            }
        }
        debug!("pump hit the round cap; ether may still be busy");
    }

    /// Fire every node's retransmission sweep at `now` (typically a future
    /// instant), then drain the ether.
    pub fn retry_round(&mut self, now: Instant) {
        for node in &mut self.nodes {
            let _ = node.link.sweep_acks(now);
        }
        self.pump(now);
    }

    fn pump_once(&mut self, now: Instant) -> bool {
        let mut activity = false;
        for i in 0..self.nodes.len() {
            let from = self.nodes[i].id.clone();
            let frames: Vec<_> = std::iter::from_fn(|| self.nodes[i].link.poll_transmit(now)).collect();
            for frame in frames {
                activity = true;
                let line = encode_line(&frame);
                for j in 0..self.nodes.len() {
                    if i == j {
                        continue;
                    }
                    let to = self.nodes[j].id.clone();
                    let Some(link) = self.links.get_mut(&(from.clone(), to)) else {
                        continue;
                    };
                    link.counter += 1;
                    if let LossPattern::EveryNth(n) = link.quality.loss {
                        if n > 0 && link.counter % n == 0 {
                            continue;
                        }
                    }
                    let raw =
                        RawFrame::with_signal(line.clone(), link.quality.rssi, link.quality.snr);
                    self.ingest(j, raw, now);
                }
            }
        }
        activity
    }

    fn ingest(&mut self, j: usize, raw: RawFrame, now: Instant) {
        let Some(msg) = self.nodes[j].link.handle_raw(raw, now) else {
            return;
        };
        let Ok(envelope) = Envelope::from_bytes(&msg.payload) else {
            return;
        };
        let meta = ReceiveMeta {
            rssi: msg.rssi,
            snr: msg.snr,
        };
        let link_id = msg.id.clone();
        let outputs =
            self.nodes[j]
                .router
                .handle_envelope(envelope, meta, Some(link_id.clone()), now);
        self.apply_outputs(j, outputs, Some(&link_id), now);
    }

    fn apply_outputs(
        &mut self,
        j: usize,
        outputs: Vec<RouterOutput>,
        link_id: Option<&MessageId>,
        now: Instant,
    ) {
        for output in outputs {
            match output {
                RouterOutput::Deliver(delivered) => {
                    // Record the id of the link message that carried the
                    // delivery, for end-to-end id assertions.
                    let id = link_id
                        .cloned()
                        .unwrap_or_else(|| MessageId::from("local"));
                    self.nodes[j].inbox.push((id, delivered));
                }
                RouterOutput::Transmit {
                    envelope,
                    priority,
                    keep_id,
                } => {
                    let bytes = envelope.to_bytes();
                    let node = &mut self.nodes[j];
                    let result = match keep_id {
                        Some(id) => node.link.send_with_id(id, bytes, priority, now),
                        None => node.link.send_message(bytes, priority, now),
                    };
                    if result.is_err() {
                        debug!(node = %node.id, "sim link refused envelope");
                    }
                }
            }
        }
    }
}
