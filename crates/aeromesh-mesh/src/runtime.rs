//! # Mesh Node Runtime
//!
//! One worker thread per node drives the [`Router`] over a [`LinkRuntime`]:
//! it consumes the link-up queue, fires the jittered discovery/heartbeat/
//! sweep timers, and serves application commands over a bounded channel.
//! Every piece of routing state stays inside the worker; callers only ever
//! see snapshots.
//!
//! Shutdown is cooperative: the worker finishes its current item, then the
//! link runtime (and with it the radio) is closed last.

use crossbeam_channel::{bounded, select, Receiver, Sender};
use quanta::Instant;
use rand::{Rng, RngExt};
use serde::Serialize;
use std::thread;
use std::time::Duration;
use tracing::{debug, info, warn};

use aeromesh_link::engine::ReceivedMessage;
use aeromesh_link::radio::{RadioPort, SerialRadio};
use aeromesh_link::runtime::LinkRuntime;
use aeromesh_link::stats::SignalQuality;
use aeromesh_link::wire::Priority;

use crate::config::{ConfigError, NodeConfig};
use crate::envelope::{Envelope, NodeId, GATEWAY_SENTINEL};
use crate::inbox::{AppDelivered, AppMessage, Handler, Inbox};
use crate::router::{Dispatch, MeshError, ReceiveMeta, Router, RouterOutput, TopologySnapshot};

/// Neighbour sweep cadence.
const SWEEP_INTERVAL: Duration = Duration::from_secs(10);

/// Uniform timer jitter bound (fraction of the period).
const TIMER_JITTER: f64 = 0.1;

// ─── Status ─────────────────────────────────────────────────────────────────

/// Operator status: topology plus link signal quality.
#[derive(Debug, Clone, Serialize)]
pub struct NodeStatus {
    pub topology: TopologySnapshot,
    pub signal: SignalQuality,
}

// ─── Commands ───────────────────────────────────────────────────────────────

enum NodeCommand {
    Send {
        destination: NodeId,
        payload: serde_json::Value,
        priority: Priority,
        reply: Sender<Result<(), MeshError>>,
    },
    Subscribe {
        tag: String,
        handler: Handler,
    },
    Status {
        reply: Sender<NodeStatus>,
    },
    Shutdown,
}

// ─── Node Handle ────────────────────────────────────────────────────────────

/// Thread-safe handle to one mesh node.
pub struct MeshNode {
    node_id: NodeId,
    commands: Sender<NodeCommand>,
    handle: Option<thread::JoinHandle<()>>,
}

impl MeshNode {
    /// Validate the configuration, open the link over `radio`, and start
    /// the node worker.
    pub fn spawn(config: NodeConfig, radio: Box<dyn RadioPort>) -> Result<Self, ConfigError> {
        config.validate()?;
        let node_id = config.node_id();
        let link = LinkRuntime::spawn(config.link_config(), radio);
        let (cmd_tx, cmd_rx) = bounded(64);

        let thread_name = format!("aeromesh-node-{node_id}");
        let handle = thread::Builder::new()
            .name(thread_name)
            .spawn(move || node_worker(config, link, cmd_rx))
            .expect("failed to spawn node worker");

        Ok(MeshNode {
            node_id,
            commands: cmd_tx,
            handle: Some(handle),
        })
    }

    /// Open the configured serial device and start the node on it.
    pub fn spawn_serial(config: NodeConfig) -> anyhow::Result<Self> {
        config.validate()?;
        let radio = SerialRadio::open(&config.lora.port, config.lora.baud_rate)?;
        Ok(Self::spawn(config, Box::new(radio))?)
    }

    pub fn node_id(&self) -> &NodeId {
        &self.node_id
    }

    /// Send raw JSON toward a destination node. `NoRoute` is returned
    /// synchronously and never retried internally.
    pub fn send(
        &self,
        destination: &NodeId,
        payload: serde_json::Value,
        priority: Priority,
    ) -> Result<(), MeshError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(NodeCommand::Send {
                destination: destination.clone(),
                payload,
                priority,
                reply: reply_tx,
            })
            .map_err(|_| MeshError::Stopped)?;
        reply_rx.recv().map_err(|_| MeshError::Stopped)?
    }

    /// Send a tagged application message.
    pub fn submit(
        &self,
        destination: &NodeId,
        tag: &str,
        body: serde_json::Value,
        priority: Priority,
    ) -> Result<(), MeshError> {
        self.send(destination, AppMessage::new(tag, body).to_value(), priority)
    }

    /// Ship a detection event to the nearest gateway.
    pub fn broadcast_detection(&self, body: serde_json::Value) -> Result<(), MeshError> {
        self.submit(&NodeId::from(GATEWAY_SENTINEL), "detection", body, Priority::High)
    }

    /// Ship a telemetry sample to the nearest gateway.
    pub fn broadcast_telemetry(&self, body: serde_json::Value) -> Result<(), MeshError> {
        self.submit(&NodeId::from(GATEWAY_SENTINEL), "telemetry", body, Priority::Medium)
    }

    /// Register a handler for delivered messages of one tag.
    pub fn subscribe<F>(&self, tag: &str, handler: F)
    where
        F: Fn(&AppDelivered) -> anyhow::Result<()> + Send + 'static,
    {
        let _ = self.commands.send(NodeCommand::Subscribe {
            tag: tag.to_string(),
            handler: Box::new(handler),
        });
    }

    /// Topology and signal snapshot for the operator surface.
    pub fn status(&self) -> Result<NodeStatus, MeshError> {
        let (reply_tx, reply_rx) = bounded(1);
        self.commands
            .send(NodeCommand::Status { reply: reply_tx })
            .map_err(|_| MeshError::Stopped)?;
        reply_rx.recv().map_err(|_| MeshError::Stopped)
    }

    /// Stop the worker; pending outbound messages are dropped.
    pub fn shutdown(&mut self) {
        let _ = self.commands.send(NodeCommand::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for MeshNode {
    fn drop(&mut self) {
        self.shutdown();
    }
}

// ─── Worker ─────────────────────────────────────────────────────────────────

fn node_worker(config: NodeConfig, link: LinkRuntime, commands: Receiver<NodeCommand>) {
    let mut router = Router::new(config.router_config());
    let mut inbox = Inbox::new();
    let mut rng = rand::rng();

    let discovery_interval = config.discovery_interval();
    let heartbeat_interval = config.heartbeat_interval();

    // First round goes out immediately so fresh nodes converge fast.
    transmit(&link, router.make_discovery(), Priority::Low, None);
    transmit(&link, router.make_heartbeat(), Priority::Low, None);

    let now = Instant::now();
    let mut next_discovery = now + jittered(&mut rng, discovery_interval);
    let mut next_heartbeat = now + jittered(&mut rng, heartbeat_interval);
    let mut next_sweep = now + jittered(&mut rng, SWEEP_INTERVAL);

    info!(node_id = %router.node_id(), "mesh node started");
    loop {
        let now = Instant::now();
        if now >= next_discovery {
            transmit(&link, router.make_discovery(), Priority::Low, None);
            next_discovery = now + jittered(&mut rng, discovery_interval);
        }
        if now >= next_heartbeat {
            transmit(&link, router.make_heartbeat(), Priority::Low, None);
            next_heartbeat = now + jittered(&mut rng, heartbeat_interval);
        }
        if now >= next_sweep {
            let outputs = router.sweep_neighbors(now);
            process_outputs(outputs, &inbox, &link);
            next_sweep = now + jittered(&mut rng, SWEEP_INTERVAL);
        }

        let next_deadline = next_discovery.min(next_heartbeat).min(next_sweep);
        let wait = if next_deadline > now {
            next_deadline - now
        } else {
            Duration::ZERO
        };

        select! {
            recv(commands) -> cmd => match cmd {
                Ok(NodeCommand::Send { destination, payload, priority, reply }) => {
                    let result = handle_send(&mut router, &inbox, &link, &destination, payload, priority);
                    let _ = reply.send(result);
                }
                Ok(NodeCommand::Subscribe { tag, handler }) => {
                    inbox.subscribe(tag, handler);
                }
                Ok(NodeCommand::Status { reply }) => {
                    let _ = reply.send(NodeStatus {
                        topology: router.topology(Instant::now()),
                        signal: link.signal_quality(),
                    });
                }
                Ok(NodeCommand::Shutdown) | Err(_) => break,
            },
            recv(link.received()) -> msg => match msg {
                Ok(msg) => on_link_up(&mut router, &inbox, &link, msg),
                Err(_) => {
                    warn!("link runtime stopped, shutting node down");
                    break;
                }
            },
            default(wait) => {}
        }
    }
    info!(node_id = %router.node_id(), "mesh node stopped");
    // `link` drops here: the radio closes after all routing work is done.
}

fn handle_send(
    router: &mut Router,
    inbox: &Inbox,
    link: &LinkRuntime,
    destination: &NodeId,
    payload: serde_json::Value,
    priority: Priority,
) -> Result<(), MeshError> {
    match router.send(destination, payload, priority)? {
        Dispatch::Transmit { envelope, priority } => {
            let bytes = envelope.to_bytes();
            link.send(bytes, priority)?;
            Ok(())
        }
        Dispatch::Local(delivered) => {
            inbox.dispatch(&delivered);
            Ok(())
        }
    }
}

fn on_link_up(router: &mut Router, inbox: &Inbox, link: &LinkRuntime, msg: ReceivedMessage) {
    let envelope = match Envelope::from_bytes(&msg.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            debug!(id = %msg.id, error = %e, "undecodable envelope dropped");
            return;
        }
    };
    let meta = ReceiveMeta {
        rssi: msg.rssi,
        snr: msg.snr,
    };
    let outputs = router.handle_envelope(envelope, meta, Some(msg.id), Instant::now());
    process_outputs(outputs, inbox, link);
}

fn process_outputs(outputs: Vec<RouterOutput>, inbox: &Inbox, link: &LinkRuntime) {
    for output in outputs {
        match output {
            RouterOutput::Deliver(delivered) => {
                inbox.dispatch(&delivered);
            }
            RouterOutput::Transmit {
                envelope,
                priority,
                keep_id,
            } => transmit(link, envelope, priority, keep_id),
        }
    }
}

fn transmit(
    link: &LinkRuntime,
    envelope: Envelope,
    priority: Priority,
    keep_id: Option<aeromesh_link::wire::MessageId>,
) {
    let kind = envelope.kind();
    let bytes = envelope.to_bytes();
    let result = match keep_id {
        Some(id) => link.forward(id, bytes, priority),
        None => link.send(bytes, priority),
    };
    if let Err(e) = result {
        warn!(kind, error = %e, "link refused envelope");
    }
}

/// Period with ±10 % uniform jitter, de-synchronising the fleet's timers.
fn jittered(rng: &mut impl Rng, period: Duration) -> Duration {
    period.mul_f64(rng.random_range(1.0 - TIMER_JITTER..1.0 + TIMER_JITTER))
}
