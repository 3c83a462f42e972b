//! # Fragment Reassembly
//!
//! Per-message sparse fragment buffers. A buffer completes when every index
//! in `{0..total-1}` has arrived, at which point the payload is concatenated
//! in ascending index order and the buffer is destroyed. Partial buffers are
//! garbage-collected after an idle TTL so a lost fragment cannot pin memory.

use bytes::{BufMut, Bytes, BytesMut};
use quanta::Instant;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::wire::{LinkFrame, MessageId};

/// Default idle lifetime of a partial reassembly buffer.
pub const REASSEMBLY_TTL: Duration = Duration::from_secs(30);

// ─── Outcomes ───────────────────────────────────────────────────────────────

/// Result of feeding one validated frame into the store.
#[derive(Debug)]
pub enum InsertOutcome {
    /// All fragments present; payload reassembled, buffer destroyed.
    Complete(Bytes),
    /// Fragment stored; more are outstanding.
    Buffered,
    /// This index was already present (idempotent, nothing changed).
    Duplicate,
    /// The frame's `total` disagrees with the buffer; buffer discarded.
    TotalMismatch,
    /// `frag >= total` or `total == 0`; frame dropped.
    IndexOutOfRange,
}

// ─── Store ──────────────────────────────────────────────────────────────────

#[derive(Debug)]
struct PartialMessage {
    fragments: BTreeMap<u32, Bytes>,
    total: u32,
    last_touched: Instant,
}

/// All in-progress reassemblies, keyed by message id.
pub struct ReassemblyStore {
    ttl: Duration,
    buffers: HashMap<MessageId, PartialMessage>,
}

impl ReassemblyStore {
    pub fn new(ttl: Duration) -> Self {
        ReassemblyStore {
            ttl,
            buffers: HashMap::new(),
        }
    }

    /// Insert one CRC-validated frame.
    pub fn insert(&mut self, frame: &LinkFrame, now: Instant) -> InsertOutcome {
        if frame.total == 0 || frame.frag >= frame.total {
            return InsertOutcome::IndexOutOfRange;
        }

        let entry = self
            .buffers
            .entry(frame.id.clone())
            .or_insert_with(|| PartialMessage {
                fragments: BTreeMap::new(),
                total: frame.total,
                last_touched: now,
            });

        if entry.total != frame.total {
            self.buffers.remove(&frame.id);
            return InsertOutcome::TotalMismatch;
        }

        entry.last_touched = now;
        if entry.fragments.contains_key(&frame.frag) {
            return InsertOutcome::Duplicate;
        }
        entry.fragments.insert(frame.frag, frame.payload.clone());

        if entry.fragments.len() as u32 == entry.total {
            let entry = self.buffers.remove(&frame.id).expect("buffer present");
            let size: usize = entry.fragments.values().map(|p| p.len()).sum();
            let mut payload = BytesMut::with_capacity(size);
            for fragment in entry.fragments.values() {
                payload.put_slice(fragment);
            }
            return InsertOutcome::Complete(payload.freeze());
        }
        InsertOutcome::Buffered
    }

    /// Evict buffers idle past the TTL. Returns how many were discarded.
    pub fn gc(&mut self, now: Instant) -> usize {
        let ttl = self.ttl;
        let before = self.buffers.len();
        self.buffers
            .retain(|_, entry| now.duration_since(entry.last_touched) <= ttl);
        before - self.buffers.len()
    }

    pub fn len(&self) -> usize {
        self.buffers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buffers.is_empty()
    }
}

impl Default for ReassemblyStore {
    fn default() -> Self {
        Self::new(REASSEMBLY_TTL)
    }
}
