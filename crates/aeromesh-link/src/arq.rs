//! # Implicit-ACK Retransmission Tracking
//!
//! No explicit ACK frame exists on this link: receipt of *any* frame whose
//! `message_id` matches a pending outbound message cancels the tracker
//! (reciprocal traffic or the higher layer's DATA acknowledgement closes the
//! loop). A periodic sweep finds messages idle past the ACK timeout and
//! re-enqueues their original fragments at HIGH priority, preserving the
//! message id, until the retry budget runs out.

use quanta::Instant;
use std::collections::HashMap;
use std::time::Duration;

use crate::wire::{LinkFrame, MessageId, Priority};

// ─── Configuration ──────────────────────────────────────────────────────────

/// Tracker parameters.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Idle time after the last transmission before a retry fires.
    pub ack_timeout: Duration,
    /// Retransmission attempts per message before giving up.
    pub retry_limit: u32,
    /// Upper bound on simultaneously tracked messages.
    pub max_in_flight: usize,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            ack_timeout: Duration::from_secs(2),
            retry_limit: 3,
            max_in_flight: 1024,
        }
    }
}

// ─── Tracker ────────────────────────────────────────────────────────────────

/// The tracker refused a new message: `max_in_flight` reached.
#[derive(Debug)]
pub struct OutboxFull(pub usize);

#[derive(Debug)]
struct PendingMessage {
    frames: Vec<LinkFrame>,
    last_sent: Instant,
    retry_count: u32,
}

/// What the sweep decided for one overdue message.
#[derive(Debug)]
pub enum SweepAction {
    /// Re-enqueue these fragments (already bumped to HIGH priority).
    Retransmit {
        id: MessageId,
        frames: Vec<LinkFrame>,
    },
    /// Retry budget exhausted; the message is gone.
    Exhausted { id: MessageId },
}

/// Outbound tracker keyed by message id.
pub struct AckTracker {
    config: TrackerConfig,
    pending: HashMap<MessageId, PendingMessage>,
}

impl AckTracker {
    pub fn new(config: TrackerConfig) -> Self {
        AckTracker {
            config,
            pending: HashMap::new(),
        }
    }

    /// Start tracking a freshly fragmented message.
    pub fn track(
        &mut self,
        id: MessageId,
        frames: Vec<LinkFrame>,
        now: Instant,
    ) -> Result<(), OutboxFull> {
        if self.pending.len() >= self.config.max_in_flight {
            return Err(OutboxFull(self.pending.len()));
        }
        self.pending.insert(
            id,
            PendingMessage {
                frames,
                last_sent: now,
                retry_count: 0,
            },
        );
        Ok(())
    }

    /// Record that a fragment of `id` just went out on the air.
    pub fn mark_sent(&mut self, id: &MessageId, now: Instant) {
        if let Some(entry) = self.pending.get_mut(id) {
            entry.last_sent = now;
        }
    }

    /// Implicit ACK: any inbound frame bearing a tracked id settles it.
    /// Returns true when a pending entry was cancelled.
    pub fn observe(&mut self, id: &MessageId) -> bool {
        self.pending.remove(id).is_some()
    }

    /// Find messages idle past the ACK timeout. Each overdue message either
    /// yields its fragments for re-enqueueing (at HIGH priority, retry count
    /// bumped, send clock reset) or is dropped once the budget is spent.
    pub fn sweep(&mut self, now: Instant) -> Vec<SweepAction> {
        let timeout = self.config.ack_timeout;
        let retry_limit = self.config.retry_limit;

        let overdue: Vec<MessageId> = self
            .pending
            .iter()
            .filter(|(_, entry)| now.duration_since(entry.last_sent) > timeout)
            .map(|(id, _)| id.clone())
            .collect();

        let mut actions = Vec::with_capacity(overdue.len());
        for id in overdue {
            let entry = self.pending.get_mut(&id).expect("overdue id present");
            if entry.retry_count >= retry_limit {
                self.pending.remove(&id);
                actions.push(SweepAction::Exhausted { id });
                continue;
            }
            entry.retry_count += 1;
            entry.last_sent = now;
            let frames = entry
                .frames
                .iter()
                .cloned()
                .map(|mut f| {
                    f.priority = Priority::High;
                    f
                })
                .collect();
            actions.push(SweepAction::Retransmit { id, frames });
        }
        actions
    }

    pub fn contains(&self, id: &MessageId) -> bool {
        self.pending.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}
