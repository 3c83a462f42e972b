//! # Application Inbox
//!
//! Typed dispatch of delivered DATA payloads to registered handlers. The
//! application-level payload convention is a small tagged JSON object:
//!
//! ```text
//! {"tag": "detection", "body": {...}}
//! ```
//!
//! Handlers are registered per tag and must be fast and non-blocking; long
//! work belongs on the caller's own thread. A failing handler is logged and
//! isolated — remaining subscribers still run.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::envelope::NodeId;
use crate::router::Delivered;

// ─── App Message ────────────────────────────────────────────────────────────

/// The tagged application payload carried inside DATA envelopes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppMessage {
    pub tag: String,
    pub body: serde_json::Value,
}

impl AppMessage {
    pub fn new(tag: impl Into<String>, body: serde_json::Value) -> Self {
        AppMessage {
            tag: tag.into(),
            body,
        }
    }

    pub fn to_value(&self) -> serde_json::Value {
        serde_json::to_value(self).expect("app message serialization is infallible")
    }
}

/// A delivered message as seen by subscribers.
#[derive(Debug, Clone)]
pub struct AppDelivered {
    pub source: NodeId,
    pub tag: String,
    pub body: serde_json::Value,
}

// ─── Inbox ──────────────────────────────────────────────────────────────────

/// A subscriber callback. Must be fast and non-blocking.
pub type Handler = Box<dyn Fn(&AppDelivered) -> anyhow::Result<()> + Send>;

/// Handler registry, owned by the node worker.
#[derive(Default)]
pub struct Inbox {
    handlers: HashMap<String, Vec<Handler>>,
}

impl Inbox {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for one message tag.
    pub fn subscribe(&mut self, tag: impl Into<String>, handler: Handler) {
        self.handlers.entry(tag.into()).or_default().push(handler);
    }

    /// Dispatch one delivered DATA payload. Returns how many handlers ran.
    pub fn dispatch(&self, delivered: &Delivered) -> usize {
        let msg: AppMessage = match serde_json::from_value(delivered.payload.clone()) {
            Ok(msg) => msg,
            Err(_) => {
                debug!(source = %delivered.source, "untagged data payload, no dispatch");
                return 0;
            }
        };

        let Some(handlers) = self.handlers.get(&msg.tag) else {
            debug!(tag = %msg.tag, "no subscribers for tag");
            return 0;
        };

        let event = AppDelivered {
            source: delivered.source.clone(),
            tag: msg.tag.clone(),
            body: msg.body,
        };
        let mut ran = 0;
        for handler in handlers {
            match handler(&event) {
                Ok(()) => ran += 1,
                Err(e) => {
                    // Isolated: one failing subscriber never blocks the rest.
                    warn!(tag = %event.tag, error = %e, "subscriber failed");
                    ran += 1;
                }
            }
        }
        ran
    }

    pub fn subscriber_count(&self, tag: &str) -> usize {
        self.handlers.get(tag).map_or(0, Vec::len)
    }
}
