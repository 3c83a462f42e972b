//! # Aeromesh Wire Format
//!
//! One frame per newline-terminated UTF-8 JSON line:
//!
//! ```text
//! {"id":"<message_id>","frag":<int>,"total":<int>,"priority":1|2|3,
//!  "payload":"<lowercase-hex>","crc":<uint32>,
//!  "rssi":<int, optional>,"snr":<float, optional>}
//! ```
//!
//! `crc` is CRC-32/ISO-HDLC (IEEE) over the raw payload bytes, not the hex
//! string. `rssi`/`snr` are omitted on send; the receiving radio populates
//! them before the frame reaches the link engine.

use bytes::{BufMut, Bytes, BytesMut};
use crc::{Crc, CRC_32_ISO_HDLC};
use serde::de::{self, Deserializer};
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};
use std::fmt;

// ─── Constants ───────────────────────────────────────────────────────────────

/// Default maximum on-wire frame size in bytes (LoRa radio packet limit).
pub const MAX_FRAME_BYTES: usize = 230;

/// Bytes reserved for the frame header within [`MAX_FRAME_BYTES`].
pub const HEADER_BYTES: usize = 20;

/// Maximum payload bytes per fragment for a given frame-size limit.
pub fn max_payload(max_frame_bytes: usize) -> usize {
    max_frame_bytes.saturating_sub(HEADER_BYTES)
}

const CRC32: Crc<u32> = Crc::<u32>::new(&CRC_32_ISO_HDLC);

/// CRC-32/ISO-HDLC over raw payload bytes.
pub fn payload_crc(payload: &[u8]) -> u32 {
    CRC32.checksum(payload)
}

// ─── Message Identity ────────────────────────────────────────────────────────

/// Globally unique id of an application message, shared by all its fragments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub String);

impl MessageId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<&str> for MessageId {
    fn from(s: &str) -> Self {
        MessageId(s.to_string())
    }
}

/// Produces `<sender>-<monotonic counter>` ids, unique per originating node.
#[derive(Debug)]
pub struct MessageIdGenerator {
    prefix: String,
    counter: u64,
}

impl MessageIdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        MessageIdGenerator {
            prefix: prefix.into(),
            counter: 0,
        }
    }

    pub fn next_id(&mut self) -> MessageId {
        self.counter += 1;
        MessageId(format!("{}-{}", self.prefix, self.counter))
    }
}

// ─── Priority ────────────────────────────────────────────────────────────────

/// Transmit priority class. Wire-encoded as its integer value.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
#[repr(u8)]
pub enum Priority {
    /// Control messages, emergency signals, retransmissions.
    High = 1,
    /// Regular telemetry and data traffic.
    #[default]
    Medium = 2,
    /// Bulk transfer, discovery and liveness broadcasts.
    Low = 3,
}

impl Priority {
    pub fn from_wire(value: u8) -> Option<Self> {
        match value {
            1 => Some(Priority::High),
            2 => Some(Priority::Medium),
            3 => Some(Priority::Low),
            _ => None,
        }
    }
}

impl Serialize for Priority {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for Priority {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = u8::deserialize(deserializer)?;
        Priority::from_wire(raw)
            .ok_or_else(|| de::Error::custom(format!("priority out of range: {raw}")))
    }
}

// ─── Link Frame ──────────────────────────────────────────────────────────────

/// One radio-level unit: a single fragment of a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkFrame {
    /// Message id shared by every fragment of the originating message.
    pub id: MessageId,
    /// 0-based fragment index.
    pub frag: u32,
    /// Total fragment count (>= 1).
    pub total: u32,
    /// Transmit priority.
    pub priority: Priority,
    /// Fragment payload bytes.
    #[serde(with = "hex_bytes")]
    pub payload: Bytes,
    /// CRC-32 of `payload`.
    pub crc: u32,
    /// Received signal strength in dBm, populated on receive only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i32>,
    /// Signal-to-noise ratio in dB, populated on receive only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub snr: Option<f64>,
}

impl LinkFrame {
    /// Build a fragment with a freshly computed payload CRC.
    pub fn new(id: MessageId, frag: u32, total: u32, priority: Priority, payload: Bytes) -> Self {
        let crc = payload_crc(&payload);
        LinkFrame {
            id,
            frag,
            total,
            priority,
            payload,
            crc,
            rssi: None,
            snr: None,
        }
    }

    /// Whether the declared CRC matches the payload bytes.
    pub fn crc_ok(&self) -> bool {
        payload_crc(&self.payload) == self.crc
    }
}

// ─── Line Codec ──────────────────────────────────────────────────────────────

/// Wire decode failure. Malformed lines are counted and dropped by the
/// link engine, never surfaced upward.
#[derive(Debug, thiserror::Error)]
pub enum WireError {
    #[error("malformed frame: {0}")]
    Json(#[from] serde_json::Error),
    #[error("empty line")]
    Empty,
}

/// Encode a frame as a newline-terminated JSON line.
pub fn encode_line(frame: &LinkFrame) -> Bytes {
    let json = serde_json::to_vec(frame).expect("frame serialization is infallible");
    let mut buf = BytesMut::with_capacity(json.len() + 1);
    buf.put_slice(&json);
    buf.put_u8(b'\n');
    buf.freeze()
}

/// Decode one line (with or without the trailing newline) into a frame.
pub fn decode_line(line: &[u8]) -> Result<LinkFrame, WireError> {
    let trimmed = line.strip_suffix(b"\n").unwrap_or(line);
    let trimmed = trimmed.strip_suffix(b"\r").unwrap_or(trimmed);
    if trimmed.is_empty() {
        return Err(WireError::Empty);
    }
    Ok(serde_json::from_slice(trimmed)?)
}

mod hex_bytes {
    use bytes::Bytes;
    use serde::de::{Deserialize, Deserializer, Error};
    use serde::Serializer;

    pub fn serialize<S: Serializer>(bytes: &Bytes, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Bytes, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(&raw).map(Bytes::from).map_err(Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(payload: &'static [u8]) -> LinkFrame {
        LinkFrame::new(
            MessageId::from("drone-a-1"),
            0,
            1,
            Priority::Medium,
            Bytes::from_static(payload),
        )
    }

    // ─── Codec Tests ────────────────────────────────────────────────────

    #[test]
    fn encode_decode_round_trip() {
        let original = frame(b"hello mesh");
        let line = encode_line(&original);
        assert_eq!(line.last(), Some(&b'\n'));

        let decoded = decode_line(&line).unwrap();
        assert_eq!(decoded, original);
    }

    #[test]
    fn encode_omits_absent_signal_fields() {
        let line = encode_line(&frame(b"x"));
        let text = std::str::from_utf8(&line).unwrap();
        assert!(!text.contains("rssi"));
        assert!(!text.contains("snr"));
    }

    #[test]
    fn decode_populated_signal_fields() {
        let line = br#"{"id":"n2-7","frag":0,"total":1,"priority":1,"payload":"ff00","crc":0,"rssi":-71,"snr":9.5}"#;
        let decoded = decode_line(line).unwrap();
        assert_eq!(decoded.rssi, Some(-71));
        assert_eq!(decoded.snr, Some(9.5));
        assert_eq!(decoded.payload, Bytes::from_static(&[0xff, 0x00]));
    }

    #[test]
    fn decode_rejects_garbage() {
        assert!(decode_line(b"not json\n").is_err());
        assert!(decode_line(b"\n").is_err());
        assert!(decode_line(b"{}").is_err());
    }

    #[test]
    fn decode_rejects_bad_hex() {
        let line = br#"{"id":"a-1","frag":0,"total":1,"priority":2,"payload":"zz","crc":0}"#;
        assert!(decode_line(line).is_err());
    }

    #[test]
    fn decode_rejects_priority_out_of_range() {
        let line = br#"{"id":"a-1","frag":0,"total":1,"priority":9,"payload":"00","crc":0}"#;
        assert!(decode_line(line).is_err());
    }

    #[test]
    fn decode_tolerates_crlf() {
        let mut line = encode_line(&frame(b"abc")).to_vec();
        line.insert(line.len() - 1, b'\r');
        assert!(decode_line(&line).is_ok());
    }

    // ─── CRC Tests ──────────────────────────────────────────────────────

    #[test]
    fn crc_matches_known_vector() {
        // IEEE CRC-32 of "123456789".
        assert_eq!(payload_crc(b"123456789"), 0xCBF4_3926);
    }

    #[test]
    fn crc_detects_payload_flip() {
        let mut f = frame(b"payload bytes");
        let mut corrupted = f.payload.to_vec();
        corrupted[0] ^= 0x10;
        f.payload = Bytes::from(corrupted);
        assert!(!f.crc_ok());
    }

    // ─── Id Generator Tests ─────────────────────────────────────────────

    #[test]
    fn id_generator_is_monotonic() {
        let mut gen = MessageIdGenerator::new("node-a");
        assert_eq!(gen.next_id().as_str(), "node-a-1");
        assert_eq!(gen.next_id().as_str(), "node-a-2");
        assert_eq!(gen.next_id().as_str(), "node-a-3");
    }

    #[test]
    fn max_payload_reserves_header() {
        assert_eq!(max_payload(MAX_FRAME_BYTES), 210);
        assert_eq!(max_payload(10), 0);
    }
}
