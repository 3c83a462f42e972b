//! # aeromesh-link
//!
//! Aeromesh LoRa link protocol.
//!
//! Line-framed JSON wire format with CRC-32 payload validation,
//! fragmentation/reassembly, burst-bounded priority scheduling, and
//! implicit-ACK retransmission over a lossy serial radio.
//!
//! ## Crate structure
//!
//! - [`wire`] — Frame struct, hex payload codec, CRC, message ids
//! - [`radio`] — `RadioPort` trait and the blocking serial implementation
//! - [`scheduler`] — Priority transmit queues with burst discipline
//! - [`arq`] — Implicit-ACK tracking and retransmission sweeps
//! - [`reassembly`] — Per-message fragment buffers with idle-TTL eviction
//! - [`stats`] — Signal ring buffers, loss counters, signal smoothing
//! - [`engine`] — The pure link state machine
//! - [`runtime`] — Worker thread driving the engine over a radio

pub mod arq;
pub mod engine;
pub mod radio;
pub mod reassembly;
pub mod runtime;
pub mod scheduler;
pub mod stats;
pub mod wire;
