//! # aeromesh-mesh
//!
//! Self-organising LoRa mesh routing over the `aeromesh-link` transport.
//!
//! Neighbour discovery and heartbeats maintain a weighted network graph;
//! shortest-path first hops and advertised route updates build the routing
//! table; DATA envelopes are delivered locally or forwarded hop by hop; a
//! thin inbox dispatches delivered payloads to typed subscribers.
//!
//! ## Crate structure
//!
//! - [`envelope`] — Node ids and the tagged routing envelope
//! - [`neighbor`] — Neighbour table with EWMA signal smoothing
//! - [`graph`] — Weighted adjacency map and hop-bounded Dijkstra
//! - [`router`] — The routing state machine
//! - [`inbox`] — Typed application dispatch
//! - [`config`] — Startup configuration snapshot (TOML)
//! - [`runtime`] — The per-node worker thread and its public handle

pub mod config;
pub mod envelope;
pub mod graph;
pub mod inbox;
pub mod neighbor;
pub mod router;
pub mod runtime;
