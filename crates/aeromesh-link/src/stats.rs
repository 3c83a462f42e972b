//! # Signal Statistics
//!
//! Bounded ring buffers over recent RSSI/SNR readings plus monotone loss and
//! retransmission counters. Snapshots serialize to JSON for the operator
//! status surface.

use serde::Serialize;
use std::collections::VecDeque;

/// Samples retained in each signal ring buffer.
pub const SIGNAL_WINDOW: usize = 100;

// ─── Signal Stats ───────────────────────────────────────────────────────────

/// Link-engine-owned signal state. All counters are monotone.
pub struct SignalStats {
    rssi: VecDeque<i32>,
    snr: VecDeque<f64>,
    packet_loss: u64,
    retransmissions: u64,
    malformed_frames: u64,
}

impl SignalStats {
    pub fn new() -> Self {
        SignalStats {
            rssi: VecDeque::with_capacity(SIGNAL_WINDOW),
            snr: VecDeque::with_capacity(SIGNAL_WINDOW),
            packet_loss: 0,
            retransmissions: 0,
            malformed_frames: 0,
        }
    }

    /// Record the signal readings of one received frame.
    pub fn record_signal(&mut self, rssi: Option<i32>, snr: Option<f64>) {
        if let Some(rssi) = rssi {
            if self.rssi.len() == SIGNAL_WINDOW {
                self.rssi.pop_front();
            }
            self.rssi.push_back(rssi);
        }
        if let Some(snr) = snr {
            if self.snr.len() == SIGNAL_WINDOW {
                self.snr.pop_front();
            }
            self.snr.push_back(snr);
        }
    }

    pub fn count_loss(&mut self) {
        self.packet_loss += 1;
    }

    pub fn count_losses(&mut self, n: u64) {
        self.packet_loss += n;
    }

    pub fn count_retransmission(&mut self) {
        self.retransmissions += 1;
    }

    pub fn count_malformed(&mut self) {
        self.malformed_frames += 1;
    }

    pub fn packet_loss(&self) -> u64 {
        self.packet_loss
    }

    pub fn retransmissions(&self) -> u64 {
        self.retransmissions
    }

    /// Snapshot for the operator surface.
    pub fn quality(&self) -> SignalQuality {
        SignalQuality {
            rssi_mean: mean_i32(&self.rssi),
            snr_mean: mean_f64(&self.snr),
            packet_loss: self.packet_loss,
            retransmissions: self.retransmissions,
            malformed_frames: self.malformed_frames,
        }
    }
}

impl Default for SignalStats {
    fn default() -> Self {
        Self::new()
    }
}

fn mean_i32(samples: &VecDeque<i32>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().map(|&v| v as f64).sum::<f64>() / samples.len() as f64
    }
}

fn mean_f64(samples: &VecDeque<f64>) -> f64 {
    if samples.is_empty() {
        0.0
    } else {
        samples.iter().sum::<f64>() / samples.len() as f64
    }
}

// ─── Snapshot ───────────────────────────────────────────────────────────────

/// Point-in-time signal quality view.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SignalQuality {
    /// Mean RSSI over the sample window, dBm.
    pub rssi_mean: f64,
    /// Mean SNR over the sample window, dB.
    pub snr_mean: f64,
    /// Frames lost to CRC failure, reassembly timeout, or retry exhaustion.
    pub packet_loss: u64,
    /// Retransmission rounds triggered.
    pub retransmissions: u64,
    /// Undecodable lines dropped at ingest.
    pub malformed_frames: u64,
}

// ─── Signal Smoothing ───────────────────────────────────────────────────────

/// Exponentially smoothed signal reading (RSSI dBm or SNR dB).
///
/// Each new reading is folded toward the running value at a fixed gain, so
/// a neighbour's link quality follows recent frames without jumping on a
/// single fade or spike.
#[derive(Debug, Clone)]
pub struct SignalSmoother {
    current: Option<f64>,
    gain: f64,
}

impl SignalSmoother {
    /// `gain` is clamped to [0, 1]; higher tracks new readings faster.
    pub fn new(gain: f64) -> Self {
        SignalSmoother {
            current: None,
            gain: gain.clamp(0.0, 1.0),
        }
    }

    /// Fold in one reading and return the smoothed value. The first reading
    /// seeds the smoother directly.
    pub fn observe(&mut self, reading: f64) -> f64 {
        let next = match self.current {
            None => reading,
            Some(current) => current + self.gain * (reading - current),
        };
        self.current = Some(next);
        next
    }

    /// Smoothed reading, or 0.0 when nothing has been heard yet.
    pub fn value(&self) -> f64 {
        self.current.unwrap_or(0.0)
    }
}
