//! # Radio I/O Adapter
//!
//! Byte-oriented, line-framed access to the LoRa radio. The adapter knows
//! nothing about the frame JSON — it moves newline-terminated byte lines and
//! attaches per-frame signal readings when the hardware provides them.
//!
//! [`SerialRadio`] is the production implementation over a serial modem.
//! Tests substitute their own [`RadioPort`] (see the `aeromesh-sim` crate).

use bytes::Bytes;
use std::io::{Read, Write};
use std::time::Duration;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Maximum time `send_line` may block before failing with [`RadioError::Busy`].
pub const SEND_BACKPRESSURE: Duration = Duration::from_millis(100);

/// Sanity cap on a single inbound line; longer lines are treated as noise.
pub const MAX_LINE_BYTES: usize = 8 * 1024;

// ─── Errors ──────────────────────────────────────────────────────────────────

/// Radio adapter failure kinds.
#[derive(Debug, thiserror::Error)]
pub enum RadioError {
    /// The device is disconnected or the I/O path failed.
    #[error("radio unavailable: {0}")]
    Unavailable(String),
    /// The single in-flight transmit slot stayed occupied past
    /// [`SEND_BACKPRESSURE`].
    #[error("radio busy: transmit backpressure exceeded")]
    Busy,
    /// The adapter has been shut down; no further frames will arrive.
    #[error("radio closed")]
    Closed,
}

// ─── Raw Frame ───────────────────────────────────────────────────────────────

/// One inbound line with the signal readings observed by the radio.
///
/// `rssi`/`snr` are `None` when the hardware reports no per-frame signal
/// data; values embedded in the frame JSON itself (e.g. stamped by gateway
/// firmware) still apply downstream.
#[derive(Debug, Clone)]
pub struct RawFrame {
    pub line: Bytes,
    pub rssi: Option<i32>,
    pub snr: Option<f64>,
}

impl RawFrame {
    pub fn new(line: Bytes) -> Self {
        RawFrame {
            line,
            rssi: None,
            snr: None,
        }
    }

    pub fn with_signal(line: Bytes, rssi: i32, snr: f64) -> Self {
        RawFrame {
            line,
            rssi: Some(rssi),
            snr: Some(snr),
        }
    }
}

// ─── Radio Port ──────────────────────────────────────────────────────────────

/// A framed byte channel to the radio. At most one frame is in flight at a
/// time on the transmit side.
pub trait RadioPort: Send {
    /// Queue one line for transmission. Blocks up to [`SEND_BACKPRESSURE`].
    fn send_line(&mut self, line: &[u8]) -> Result<(), RadioError>;

    /// Wait up to `timeout` for the next inbound line. `Ok(None)` means no
    /// data arrived within the window; [`RadioError::Closed`] ends the
    /// sequence permanently.
    fn recv_line(&mut self, timeout: Duration) -> Result<Option<RawFrame>, RadioError>;
}

// ─── Serial Radio ────────────────────────────────────────────────────────────

/// Blocking serial-port radio. Lines are accumulated across reads in an
/// internal buffer and split on `\n`.
pub struct SerialRadio {
    port: Box<dyn serialport::SerialPort>,
    read_buf: Vec<u8>,
}

impl SerialRadio {
    /// Open the serial device. Fails with [`RadioError::Unavailable`] when
    /// the device cannot be opened.
    pub fn open(path: &str, baud_rate: u32) -> Result<Self, RadioError> {
        let port = serialport::new(path, baud_rate)
            .timeout(Duration::from_millis(50))
            .open()
            .map_err(|e| RadioError::Unavailable(format!("{path}: {e}")))?;
        tracing::info!(path, baud_rate, "serial radio opened");
        Ok(SerialRadio {
            port,
            read_buf: Vec::with_capacity(MAX_LINE_BYTES),
        })
    }
}

impl RadioPort for SerialRadio {
    fn send_line(&mut self, line: &[u8]) -> Result<(), RadioError> {
        self.port
            .set_timeout(SEND_BACKPRESSURE)
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;
        match self.port.write_all(line) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Err(RadioError::Busy),
            Err(e) => Err(RadioError::Unavailable(e.to_string())),
        }
    }

    fn recv_line(&mut self, timeout: Duration) -> Result<Option<RawFrame>, RadioError> {
        if let Some(line) = take_line(&mut self.read_buf) {
            return Ok(Some(RawFrame::new(line)));
        }

        self.port
            .set_timeout(timeout)
            .map_err(|e| RadioError::Unavailable(e.to_string()))?;

        let mut chunk = [0u8; 512];
        match self.port.read(&mut chunk) {
            Ok(0) => Err(RadioError::Closed),
            Ok(n) => {
                self.read_buf.extend_from_slice(&chunk[..n]);
                if self.read_buf.len() > MAX_LINE_BYTES {
                    tracing::warn!(len = self.read_buf.len(), "discarding oversize radio line");
                    self.read_buf.clear();
                }
                Ok(take_line(&mut self.read_buf).map(RawFrame::new))
            }
            Err(e) if e.kind() == std::io::ErrorKind::TimedOut => Ok(None),
            Err(e) => Err(RadioError::Unavailable(e.to_string())),
        }
    }
}

/// Split the first complete `\n`-terminated line off the front of `buf`.
fn take_line(buf: &mut Vec<u8>) -> Option<Bytes> {
    let pos = buf.iter().position(|&b| b == b'\n')?;
    let rest = buf.split_off(pos + 1);
    let line = std::mem::replace(buf, rest);
    Some(Bytes::from(line))
}
