//! # aeromesh-sim
//!
//! Simulation toolkit for integration-testing the Aeromesh stack.
//!
//! - [`airspace`] — an in-process radio fabric: `VirtualRadio` implements
//!   the link layer's `RadioPort`, so full threaded `MeshNode` runtimes can
//!   talk to each other with per-link RSSI/SNR and loss models.
//! - [`harness`] — a deterministic stepped mesh over the pure state
//!   machines, with caller-controlled time for exactly reproducible
//!   multi-hop scenarios.

pub mod airspace;
pub mod harness;
