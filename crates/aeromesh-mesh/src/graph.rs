//! # Mesh Graph
//!
//! Undirected weighted adjacency map over known nodes. Edge weight is
//! `1 / (|rssi_dBm| + 1)` from the observed RSSI. Shortest paths come from
//! an iterative Dijkstra; destinations whose chosen path exceeds the hop
//! cap are filtered from the result, matching the routing reach limit.
//!
//! Ties are broken by node-id order so the routing table is deterministic
//! for a given graph.

use std::collections::{BinaryHeap, HashMap};

use crate::envelope::NodeId;

/// Edge weight from an observed RSSI reading.
pub fn link_weight(rssi_dbm: f64) -> f64 {
    1.0 / (rssi_dbm.abs() + 1.0)
}

// ─── Path Info ──────────────────────────────────────────────────────────────

/// Shortest path summary from the origin to one destination.
#[derive(Debug, Clone, PartialEq)]
pub struct PathInfo {
    /// First hop on the chosen path (a direct neighbour of the origin).
    pub next_hop: NodeId,
    /// Edge count of the chosen path.
    pub hops: u32,
    /// Total weight of the chosen path.
    pub cost: f64,
}

// ─── Graph ──────────────────────────────────────────────────────────────────

/// The network graph, owned by the routing task.
#[derive(Debug, Default)]
pub struct MeshGraph {
    adjacency: HashMap<NodeId, HashMap<NodeId, f64>>,
}

impl MeshGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Ensure a node exists, with or without edges.
    pub fn add_node(&mut self, id: NodeId) {
        self.adjacency.entry(id).or_default();
    }

    /// Create or refresh the undirected edge `(a, b)`.
    pub fn upsert_edge(&mut self, a: &NodeId, b: &NodeId, weight: f64) {
        self.adjacency
            .entry(a.clone())
            .or_default()
            .insert(b.clone(), weight);
        self.adjacency
            .entry(b.clone())
            .or_default()
            .insert(a.clone(), weight);
    }

    /// Remove a node and every edge touching it.
    pub fn remove_node(&mut self, id: &NodeId) {
        self.adjacency.remove(id);
        for edges in self.adjacency.values_mut() {
            edges.remove(id);
        }
    }

    pub fn contains(&self, id: &NodeId) -> bool {
        self.adjacency.contains_key(id)
    }

    pub fn edge_weight(&self, a: &NodeId, b: &NodeId) -> Option<f64> {
        self.adjacency.get(a)?.get(b).copied()
    }

    pub fn node_count(&self) -> usize {
        self.adjacency.len()
    }

    /// Dijkstra from `origin`; destinations reachable only through more than
    /// `max_hops` edges are excluded. The origin itself is never a key.
    pub fn shortest_paths(&self, origin: &NodeId, max_hops: u32) -> HashMap<NodeId, PathInfo> {
        let mut best: HashMap<NodeId, (f64, u32, Option<NodeId>)> = HashMap::new();
        let mut heap: BinaryHeap<QueueEntry> = BinaryHeap::new();

        best.insert(origin.clone(), (0.0, 0, None));
        heap.push(QueueEntry {
            cost: 0.0,
            hops: 0,
            node: origin.clone(),
            first_hop: None,
        });

        while let Some(entry) = heap.pop() {
            match best.get(&entry.node) {
                Some(&(cost, _, _)) if entry.cost > cost => continue,
                _ => {}
            }

            let Some(edges) = self.adjacency.get(&entry.node) else {
                continue;
            };
            // Sorted neighbour order keeps equal-cost choices stable.
            let mut neighbors: Vec<(&NodeId, &f64)> = edges.iter().collect();
            neighbors.sort_by(|a, b| a.0.cmp(b.0));

            for (next, weight) in neighbors {
                let cost = entry.cost + weight;
                let hops = entry.hops + 1;
                let first_hop = entry.first_hop.clone().unwrap_or_else(|| next.clone());

                let improved = match best.get(next) {
                    None => true,
                    Some(&(best_cost, _, _)) => cost < best_cost,
                };
                if improved {
                    best.insert(next.clone(), (cost, hops, Some(first_hop.clone())));
                    heap.push(QueueEntry {
                        cost,
                        hops,
                        node: next.clone(),
                        first_hop: Some(first_hop),
                    });
                }
            }
        }

        best.into_iter()
            .filter(|(node, _)| node != origin)
            .filter(|(_, (_, hops, _))| *hops <= max_hops)
            .filter_map(|(node, (cost, hops, first_hop))| {
                first_hop.map(|next_hop| {
                    (
                        node,
                        PathInfo {
                            next_hop,
                            hops,
                            cost,
                        },
                    )
                })
            })
            .collect()
    }
}

// ─── Dijkstra Queue ─────────────────────────────────────────────────────────

struct QueueEntry {
    cost: f64,
    hops: u32,
    node: NodeId,
    first_hop: Option<NodeId>,
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cost == other.cost && self.node == other.node
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the cheapest first.
        // Node id as the secondary key keeps the pop order deterministic.
        other
            .cost
            .total_cmp(&self.cost)
            .then_with(|| other.node.cmp(&self.node))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}
