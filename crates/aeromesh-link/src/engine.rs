//! # Link Engine
//!
//! Pure logic — no I/O. Fragments outbound messages, schedules transmission
//! by priority, tracks implicit ACKs and retransmissions, validates and
//! reassembles inbound frames, and keeps signal statistics.
//!
//! The engine is stepped explicitly by its runtime (or a test harness):
//!
//! 1. `send_message` — fragment + enqueue + track
//! 2. `poll_transmit` — next frame for the radio
//! 3. `handle_raw` — one inbound line from the radio
//! 4. `sweep_acks` / `sweep_reassembly` — periodic maintenance
//!
//! All timing is caller-supplied, so behaviour is deterministic under test.

use bytes::Bytes;
use quanta::Instant;
use std::time::Duration;
use tracing::{debug, warn};

use crate::arq::{AckTracker, SweepAction, TrackerConfig};
use crate::radio::{RadioError, RawFrame};
use crate::reassembly::{InsertOutcome, ReassemblyStore, REASSEMBLY_TTL};
use crate::scheduler::{SchedulerConfig, TransmitScheduler};
use crate::stats::{SignalQuality, SignalStats};
use crate::wire::{
    decode_line, max_payload, LinkFrame, MessageId, MessageIdGenerator, Priority, MAX_FRAME_BYTES,
};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Link engine parameters, snapshotted at construction.
#[derive(Debug, Clone)]
pub struct LinkConfig {
    /// Prefix for generated message ids (the node id).
    pub id_prefix: String,
    /// Maximum on-wire frame size; payload chunks are this minus the header.
    pub max_frame_bytes: usize,
    /// Idle time before a tracked message is retransmitted.
    pub ack_timeout: Duration,
    /// Retransmission attempts per message.
    pub retry_limit: u32,
    /// Bound on simultaneously tracked outbound messages.
    pub max_in_flight: usize,
    /// Idle lifetime of partial reassembly buffers.
    pub reassembly_ttl: Duration,
    /// Transmit queue sizing and burst discipline.
    pub scheduler: SchedulerConfig,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            id_prefix: "node".to_string(),
            max_frame_bytes: MAX_FRAME_BYTES,
            ack_timeout: Duration::from_secs(2),
            retry_limit: 3,
            max_in_flight: 1024,
            reassembly_ttl: REASSEMBLY_TTL,
            scheduler: SchedulerConfig::default(),
        }
    }
}

// ─── Errors & Events ────────────────────────────────────────────────────────

/// Link-layer failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum LinkError {
    /// `max_in_flight` tracked messages already outstanding.
    #[error("outbox full: {in_flight} messages in flight")]
    OutboxFull { in_flight: usize },
    #[error(transparent)]
    Radio(#[from] RadioError),
}

/// A fully reassembled inbound message.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: MessageId,
    pub payload: Bytes,
    /// Signal hint from the fragment that completed reassembly.
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
}

/// Diagnostic events surfaced to observers; never blocks the data path.
#[derive(Debug, Clone)]
pub enum LinkEvent {
    /// A message ran out of retries and was dropped.
    RetransmissionExhausted { id: MessageId },
}

// ─── Engine ─────────────────────────────────────────────────────────────────

/// The link protocol state machine.
pub struct LinkEngine {
    config: LinkConfig,
    ids: MessageIdGenerator,
    scheduler: TransmitScheduler,
    tracker: AckTracker,
    reassembly: ReassemblyStore,
    stats: SignalStats,
}

impl LinkEngine {
    pub fn new(config: LinkConfig) -> Self {
        let tracker = AckTracker::new(TrackerConfig {
            ack_timeout: config.ack_timeout,
            retry_limit: config.retry_limit,
            max_in_flight: config.max_in_flight,
        });
        LinkEngine {
            ids: MessageIdGenerator::new(config.id_prefix.clone()),
            scheduler: TransmitScheduler::new(config.scheduler.clone()),
            tracker,
            reassembly: ReassemblyStore::new(config.reassembly_ttl),
            stats: SignalStats::new(),
            config,
        }
    }

    /// Fragment `payload` and queue it for transmission, returning the
    /// fresh message id. Fails only when the outbound tracker is at its
    /// in-flight bound; saturated transmit queues shed their oldest frames
    /// instead of refusing new traffic.
    pub fn send_message(
        &mut self,
        payload: Bytes,
        priority: Priority,
        now: Instant,
    ) -> Result<MessageId, LinkError> {
        let id = self.ids.next_id();
        self.send_with_id(id, payload, priority, now)
    }

    /// Like [`send_message`](Self::send_message) but under a caller-supplied
    /// id. Used when forwarding a message that must keep its originator's id
    /// across hops.
    pub fn send_with_id(
        &mut self,
        id: MessageId,
        payload: Bytes,
        priority: Priority,
        now: Instant,
    ) -> Result<MessageId, LinkError> {
        let frames = self.fragment(&id, payload, priority);

        self.tracker
            .track(id.clone(), frames.clone(), now)
            .map_err(|e| LinkError::OutboxFull { in_flight: e.0 })?;

        for frame in frames {
            if let Some(displaced) = self.scheduler.enqueue_displacing(frame) {
                debug!(id = %displaced.id, frag = displaced.frag, "queue full, displaced oldest frame");
            }
        }
        debug!(%id, "message queued for transmission");
        Ok(id)
    }

    /// Feed one raw line from the radio. Returns a completed message when
    /// this frame finished a reassembly. Malformed and corrupt frames are
    /// counted and swallowed.
    pub fn handle_raw(&mut self, raw: RawFrame, now: Instant) -> Option<ReceivedMessage> {
        let mut frame = match decode_line(&raw.line) {
            Ok(frame) => frame,
            Err(e) => {
                debug!(error = %e, "dropping malformed line");
                self.stats.count_malformed();
                return None;
            }
        };

        // Adapter-observed signal readings override frame-embedded ones.
        if raw.rssi.is_some() {
            frame.rssi = raw.rssi;
        }
        if raw.snr.is_some() {
            frame.snr = raw.snr;
        }

        if !frame.crc_ok() {
            warn!(id = %frame.id, frag = frame.frag, "CRC mismatch, dropping frame");
            self.stats.count_loss();
            return None;
        }

        self.stats.record_signal(frame.rssi, frame.snr);

        // Implicit ACK: a frame echoing a tracked id settles that message
        // and carries no data for us.
        if self.tracker.observe(&frame.id) {
            debug!(id = %frame.id, "implicit ack");
            return None;
        }

        match self.reassembly.insert(&frame, now) {
            InsertOutcome::Complete(payload) => Some(ReceivedMessage {
                id: frame.id,
                payload,
                rssi: frame.rssi,
                snr: frame.snr,
            }),
            InsertOutcome::Buffered | InsertOutcome::Duplicate => None,
            InsertOutcome::TotalMismatch => {
                warn!(id = %frame.id, "fragment total mismatch, buffer discarded");
                self.stats.count_loss();
                None
            }
            InsertOutcome::IndexOutOfRange => {
                warn!(id = %frame.id, frag = frame.frag, total = frame.total, "fragment index out of range");
                self.stats.count_loss();
                None
            }
        }
    }

    /// Next frame due on the radio, honouring the burst discipline.
    pub fn poll_transmit(&mut self, now: Instant) -> Option<LinkFrame> {
        let frame = self.scheduler.pop()?;
        self.tracker.mark_sent(&frame.id, now);
        Some(frame)
    }

    /// Retransmission sweep; call every `ACK_CHECK_PERIOD`.
    pub fn sweep_acks(&mut self, now: Instant) -> Vec<LinkEvent> {
        let mut events = Vec::new();
        for action in self.tracker.sweep(now) {
            match action {
                SweepAction::Retransmit { id, frames } => {
                    debug!(%id, "retransmitting at high priority");
                    self.stats.count_retransmission();
                    for frame in frames {
                        if let Some(displaced) = self.scheduler.enqueue_displacing(frame) {
                            debug!(id = %displaced.id, "displaced oldest frame on retransmit");
                        }
                    }
                }
                SweepAction::Exhausted { id } => {
                    warn!(%id, "retry budget exhausted, dropping message");
                    self.stats.count_loss();
                    events.push(LinkEvent::RetransmissionExhausted { id });
                }
            }
        }
        events
    }

    /// Reassembly garbage collection; call every few seconds.
    pub fn sweep_reassembly(&mut self, now: Instant) {
        let evicted = self.reassembly.gc(now);
        if evicted > 0 {
            warn!(evicted, "evicted stale reassembly buffers");
            self.stats.count_losses(evicted as u64);
        }
    }

    /// Put a polled frame back at the head of its queue after the radio
    /// declined it, preserving fragment order.
    pub fn requeue_front(&mut self, frame: LinkFrame) {
        self.scheduler.push_front(frame);
    }

    pub fn signal_quality(&self) -> SignalQuality {
        self.stats.quality()
    }

    /// Tracked outbound messages awaiting implicit ACK.
    pub fn in_flight(&self) -> usize {
        self.tracker.len()
    }

    /// Frames queued for transmission.
    pub fn pending_frames(&self) -> usize {
        self.scheduler.len()
    }

    fn fragment(&self, id: &MessageId, payload: Bytes, priority: Priority) -> Vec<LinkFrame> {
        let chunk = max_payload(self.config.max_frame_bytes).max(1);
        if payload.is_empty() {
            return vec![LinkFrame::new(id.clone(), 0, 1, priority, Bytes::new())];
        }
        let total = payload.len().div_ceil(chunk);
        (0..total)
            .map(|i| {
                let start = i * chunk;
                let end = usize::min(start + chunk, payload.len());
                LinkFrame::new(
                    id.clone(),
                    i as u32,
                    total as u32,
                    priority,
                    payload.slice(start..end),
                )
            })
            .collect()
    }
}
