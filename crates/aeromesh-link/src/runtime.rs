//! # Link Runtime
//!
//! Owns a background worker thread that drives the [`LinkEngine`] over a
//! [`RadioPort`]: inbound ingest, priority transmission, the ACK sweep and
//! the reassembly GC all run from one cooperative loop, so every piece of
//! mutable link state has a single owner. All public methods are
//! non-blocking apart from the bounded request/response round trip.
//!
//! Dropping the runtime triggers a graceful shutdown; the radio is closed
//! last so in-flight state stays coherent until the end.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, Sender, TryRecvError, TrySendError};
use quanta::Instant;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::engine::{LinkConfig, LinkEngine, LinkError, LinkEvent, ReceivedMessage};
use crate::radio::{RadioError, RadioPort};
use crate::stats::SignalQuality;
use crate::wire::{encode_line, MessageId, Priority};

// ─── Cadence ────────────────────────────────────────────────────────────────

/// Radio receive poll doubling as the idle sleep.
pub const IDLE_POLL: Duration = Duration::from_millis(10);

/// Retransmission sweep period.
pub const ACK_CHECK_PERIOD: Duration = Duration::from_millis(200);

/// Partial-reassembly garbage collection period.
pub const REASSEMBLY_GC_PERIOD: Duration = Duration::from_secs(5);

/// Bounded link-up queue toward the routing layer.
pub const DELIVERY_QUEUE_SLOTS: usize = 256;

/// Frames pushed to the radio per loop iteration.
const TRANSMIT_BATCH: usize = 4;

const BACKOFF_INITIAL: Duration = Duration::from_millis(100);
const BACKOFF_MAX: Duration = Duration::from_secs(5);

// ─── Commands ───────────────────────────────────────────────────────────────

enum Command {
    Send {
        id: Option<MessageId>,
        payload: Bytes,
        priority: Priority,
        reply: Sender<Result<MessageId, LinkError>>,
    },
    Quality {
        reply: Sender<SignalQuality>,
    },
    Shutdown,
}

// ─── Runtime Handle ─────────────────────────────────────────────────────────

/// Thread-safe handle to the link worker.
pub struct LinkRuntime {
    commands: Sender<Command>,
    delivered: Receiver<ReceivedMessage>,
    events: Receiver<LinkEvent>,
    handle: Option<thread::JoinHandle<()>>,
}

impl LinkRuntime {
    /// Start the worker over the given radio.
    pub fn spawn(config: LinkConfig, radio: Box<dyn RadioPort>) -> Self {
        let (cmd_tx, cmd_rx) = bounded(64);
        let (del_tx, del_rx) = bounded(DELIVERY_QUEUE_SLOTS);
        let (evt_tx, evt_rx) = bounded(64);

        let handle = thread::Builder::new()
            .name("aeromesh-link".into())
            .spawn(move || link_worker(config, radio, cmd_rx, del_tx, evt_tx))
            .expect("failed to spawn link worker");

        LinkRuntime {
            commands: cmd_tx,
            delivered: del_rx,
            events: evt_rx,
            handle: Some(handle),
        }
    }

    /// Fragment and queue a message. Bounded round trip to the worker.
    pub fn send(&self, payload: Bytes, priority: Priority) -> Result<MessageId, LinkError> {
        self.send_inner(None, payload, priority)
    }

    /// Queue a message under an existing id — the forwarding path, where the
    /// originator's id must survive the hop.
    pub fn forward(
        &self,
        id: MessageId,
        payload: Bytes,
        priority: Priority,
    ) -> Result<MessageId, LinkError> {
        self.send_inner(Some(id), payload, priority)
    }

    fn send_inner(
        &self,
        id: Option<MessageId>,
        payload: Bytes,
        priority: Priority,
    ) -> Result<MessageId, LinkError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(Command::Send {
                id,
                payload,
                priority,
                reply: reply_tx,
            })
            .map_err(|_| LinkError::Radio(RadioError::Closed))?;
        reply_rx
            .recv()
            .map_err(|_| LinkError::Radio(RadioError::Closed))?
    }

    /// The link-up queue of fully reassembled inbound messages.
    pub fn received(&self) -> &Receiver<ReceivedMessage> {
        &self.delivered
    }

    /// Diagnostic events (retry exhaustion and the like).
    pub fn events(&self) -> &Receiver<LinkEvent> {
        &self.events
    }

    /// Snapshot of the worker's signal statistics.
    pub fn signal_quality(&self) -> SignalQuality {
        let (reply_tx, reply_rx) = bounded(1);
        if self
            .commands
            .send(Command::Quality { reply: reply_tx })
            .is_err()
        {
            return SignalQuality::default();
        }
        reply_rx.recv().unwrap_or_default()
    }

    /// Stop the worker and wait for it to exit. Pending outbound frames are
    /// dropped; the radio closes last.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for LinkRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

fn link_worker(
    config: LinkConfig,
    mut radio: Box<dyn RadioPort>,
    commands: Receiver<Command>,
    delivered: Sender<ReceivedMessage>,
    events: Sender<LinkEvent>,
) {
    let mut engine = LinkEngine::new(config);
    let mut next_ack_sweep = Instant::now() + ACK_CHECK_PERIOD;
    let mut next_gc = Instant::now() + REASSEMBLY_GC_PERIOD;
    let mut backoff = BACKOFF_INITIAL;
    let mut backoff_until: Option<Instant> = None;

    info!("link worker started");
    'run: loop {
        // Commands first so sends are never starved by radio traffic.
        loop {
            match commands.try_recv() {
                Ok(Command::Send {
                    id,
                    payload,
                    priority,
                    reply,
                }) => {
                    let now = Instant::now();
                    let result = match id {
                        Some(id) => engine.send_with_id(id, payload, priority, now),
                        None => engine.send_message(payload, priority, now),
                    };
                    let _ = reply.send(result);
                }
                Ok(Command::Quality { reply }) => {
                    let _ = reply.send(engine.signal_quality());
                }
                Ok(Command::Shutdown) | Err(TryRecvError::Disconnected) => break 'run,
                Err(TryRecvError::Empty) => break,
            }
        }

        let radio_up = backoff_until.is_none_or(|until| Instant::now() >= until);

        // Inbound: the receive poll doubles as the idle sleep.
        if radio_up {
            match radio.recv_line(IDLE_POLL) {
                Ok(Some(raw)) => {
                    backoff = BACKOFF_INITIAL;
                    backoff_until = None;
                    if let Some(msg) = engine.handle_raw(raw, Instant::now()) {
                        offer_delivery(&delivered, msg);
                    }
                }
                Ok(None) => {
                    backoff = BACKOFF_INITIAL;
                    backoff_until = None;
                }
                Err(RadioError::Closed) => {
                    warn!("radio closed, stopping link worker");
                    break 'run;
                }
                Err(e) => {
                    warn!(error = %e, backoff_ms = backoff.as_millis() as u64, "radio receive failed");
                    backoff_until = Some(Instant::now() + backoff);
                    backoff = Duration::min(backoff * 2, BACKOFF_MAX);
                }
            }
        } else {
            thread::sleep(IDLE_POLL);
        }

        // Outbound: a bounded batch per iteration keeps ingest responsive.
        if radio_up {
            for _ in 0..TRANSMIT_BATCH {
                let Some(frame) = engine.poll_transmit(Instant::now()) else {
                    break;
                };
                match radio.send_line(&encode_line(&frame)) {
                    Ok(()) => {}
                    Err(RadioError::Busy) => {
                        debug!(id = %frame.id, "radio busy, requeueing frame");
                        engine.requeue_front(frame);
                        break;
                    }
                    Err(RadioError::Closed) => break 'run,
                    Err(e @ RadioError::Unavailable(_)) => {
                        warn!(error = %e, "radio unavailable, backing off");
                        engine.requeue_front(frame);
                        backoff_until = Some(Instant::now() + backoff);
                        backoff = Duration::min(backoff * 2, BACKOFF_MAX);
                        break;
                    }
                }
            }
        }

        // Periodic maintenance.
        let now = Instant::now();
        if now >= next_ack_sweep {
            for event in engine.sweep_acks(now) {
                if events.try_send(event).is_err() {
                    debug!("event queue full, dropping diagnostic");
                }
            }
            next_ack_sweep = now + ACK_CHECK_PERIOD;
        }
        if now >= next_gc {
            engine.sweep_reassembly(now);
            next_gc = now + REASSEMBLY_GC_PERIOD;
        }
    }
    info!("link worker stopped");
    // `radio` drops here, after all link state has settled.
}

/// Hand a reassembled message to the link-up queue. On overflow the newest
/// message is dropped and counted in the log; the queue never blocks the
/// radio path.
fn offer_delivery(queue: &Sender<ReceivedMessage>, msg: ReceivedMessage) {
    match queue.try_send(msg) {
        Ok(()) => {}
        Err(TrySendError::Full(msg)) => {
            warn!(id = %msg.id, "link-up queue full, dropping delivery");
        }
        Err(TrySendError::Disconnected(_)) => {}
    }
}
