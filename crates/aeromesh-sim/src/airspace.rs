//! # Virtual Airspace
//!
//! An in-process radio fabric. Each registered node gets a [`VirtualRadio`]
//! implementing the link layer's `RadioPort`; a transmitted line is copied
//! to every connected peer, stamped with the link's RSSI/SNR, after the
//! link's loss pattern has had its say. Links are symmetric in existence
//! but carry independent per-direction loss counters.
//!
//! This is the "real network" for threaded end-to-end tests — full
//! `MeshNode` runtimes talk to each other through it.

use bytes::Bytes;
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use aeromesh_link::radio::{RadioError, RadioPort, RawFrame};

/// Inbound buffer per virtual radio; overflow drops on the air.
const RADIO_QUEUE_SLOTS: usize = 256;

// ─── Link Model ─────────────────────────────────────────────────────────────

/// Deterministic frame-drop pattern on one directed link.
#[derive(Debug, Clone, Copy, Default)]
pub enum LossPattern {
    /// Perfect link.
    #[default]
    None,
    /// Drop every n-th frame (1-based: `EveryNth(3)` drops frames 3, 6, …).
    EveryNth(u32),
}

/// Signal model for one link.
#[derive(Debug, Clone, Copy)]
pub struct LinkQuality {
    pub rssi: i32,
    pub snr: f64,
    pub loss: LossPattern,
}

impl Default for LinkQuality {
    fn default() -> Self {
        LinkQuality {
            rssi: -60,
            snr: 9.0,
            loss: LossPattern::None,
        }
    }
}

#[derive(Debug)]
struct DirectedLink {
    quality: LinkQuality,
    counter: u32,
}

impl DirectedLink {
    /// Whether the next frame on this link survives.
    fn passes(&mut self) -> bool {
        self.counter += 1;
        match self.quality.loss {
            LossPattern::None => true,
            LossPattern::EveryNth(n) => n == 0 || self.counter % n != 0,
        }
    }
}

// ─── Airspace ───────────────────────────────────────────────────────────────

#[derive(Default)]
struct AirspaceCore {
    inboxes: HashMap<String, Sender<RawFrame>>,
    links: HashMap<(String, String), DirectedLink>,
}

impl AirspaceCore {
    fn broadcast(&mut self, from: &str, line: &[u8]) {
        for ((src, dst), link) in self.links.iter_mut() {
            if src != from {
                continue;
            }
            if !link.passes() {
                continue;
            }
            if let Some(inbox) = self.inboxes.get(dst) {
                let raw = RawFrame::with_signal(
                    Bytes::copy_from_slice(line),
                    link.quality.rssi,
                    link.quality.snr,
                );
                // A full inbox is indistinguishable from airwave loss.
                let _ = inbox.try_send(raw);
            }
        }
    }
}

/// Shared radio fabric handle.
#[derive(Clone, Default)]
pub struct Airspace {
    core: Arc<Mutex<AirspaceCore>>,
}

impl Airspace {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node and hand back its radio.
    pub fn radio(&self, node_id: &str) -> VirtualRadio {
        let (tx, rx) = bounded(RADIO_QUEUE_SLOTS);
        self.core
            .lock()
            .expect("airspace lock")
            .inboxes
            .insert(node_id.to_string(), tx);
        VirtualRadio {
            id: node_id.to_string(),
            core: self.core.clone(),
            inbound: rx,
        }
    }

    /// Put two nodes in range of each other with the given link model.
    pub fn connect(&self, a: &str, b: &str, quality: LinkQuality) {
        let mut core = self.core.lock().expect("airspace lock");
        for (src, dst) in [(a, b), (b, a)] {
            core.links.insert(
                (src.to_string(), dst.to_string()),
                DirectedLink {
                    quality,
                    counter: 0,
                },
            );
        }
    }

    /// Take two nodes out of range.
    pub fn disconnect(&self, a: &str, b: &str) {
        let mut core = self.core.lock().expect("airspace lock");
        core.links.remove(&(a.to_string(), b.to_string()));
        core.links.remove(&(b.to_string(), a.to_string()));
    }

    /// Change one direction's loss pattern in place.
    pub fn set_loss(&self, from: &str, to: &str, loss: LossPattern) {
        let mut core = self.core.lock().expect("airspace lock");
        if let Some(link) = core.links.get_mut(&(from.to_string(), to.to_string())) {
            link.quality.loss = loss;
        }
    }
}

// ─── Virtual Radio ──────────────────────────────────────────────────────────

/// One node's endpoint in the airspace.
pub struct VirtualRadio {
    id: String,
    core: Arc<Mutex<AirspaceCore>>,
    inbound: Receiver<RawFrame>,
}

impl RadioPort for VirtualRadio {
    fn send_line(&mut self, line: &[u8]) -> Result<(), RadioError> {
        self.core
            .lock()
            .map_err(|_| RadioError::Unavailable("airspace poisoned".into()))?
            .broadcast(&self.id, line);
        Ok(())
    }

    fn recv_line(&mut self, timeout: Duration) -> Result<Option<RawFrame>, RadioError> {
        match self.inbound.recv_timeout(timeout) {
            Ok(raw) => Ok(Some(raw)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(RadioError::Closed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_reach_connected_peers_with_signal() {
        let air = Airspace::new();
        let mut a = air.radio("a");
        let mut b = air.radio("b");
        air.connect(
            "a",
            "b",
            LinkQuality {
                rssi: -71,
                snr: 6.5,
                loss: LossPattern::None,
            },
        );

        a.send_line(b"frame-1\n").unwrap();
        let raw = b.recv_line(Duration::from_millis(100)).unwrap().unwrap();
        assert_eq!(raw.line, Bytes::from_static(b"frame-1\n"));
        assert_eq!(raw.rssi, Some(-71));
        assert_eq!(raw.snr, Some(6.5));
    }

    #[test]
    fn unconnected_nodes_hear_nothing() {
        let air = Airspace::new();
        let mut a = air.radio("a");
        let mut c = air.radio("c");

        a.send_line(b"frame\n").unwrap();
        assert!(c.recv_line(Duration::from_millis(20)).unwrap().is_none());
    }

    #[test]
    fn every_nth_pattern_drops_deterministically() {
        let air = Airspace::new();
        let mut a = air.radio("a");
        let mut b = air.radio("b");
        air.connect(
            "a",
            "b",
            LinkQuality {
                loss: LossPattern::EveryNth(3),
                ..LinkQuality::default()
            },
        );

        for i in 0..9 {
            a.send_line(format!("f{i}\n").as_bytes()).unwrap();
        }
        let mut received = Vec::new();
        while let Ok(Some(raw)) = b.recv_line(Duration::from_millis(20)) {
            received.push(String::from_utf8_lossy(&raw.line).trim().to_string());
        }
        // Frames 3, 6, 9 (1-based) are gone.
        assert_eq!(received, vec!["f0", "f1", "f3", "f4", "f6", "f7"]);
    }

    #[test]
    fn disconnect_cuts_both_directions() {
        let air = Airspace::new();
        let mut a = air.radio("a");
        let mut b = air.radio("b");
        air.connect("a", "b", LinkQuality::default());
        air.disconnect("a", "b");

        a.send_line(b"x\n").unwrap();
        b.send_line(b"y\n").unwrap();
        assert!(b.recv_line(Duration::from_millis(20)).unwrap().is_none());
        assert!(a.recv_line(Duration::from_millis(20)).unwrap().is_none());
    }
}
