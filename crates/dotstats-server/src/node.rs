//! One connected node: handshake, derived telemetry and lifecycle.
//!
//! A connection only becomes a [`NodeSession`] once it has sent
//! `system.connected` within the handshake deadline. From then on the session
//! is `Active` until its connection closes, errors, or goes quiet for longer
//! than the node timeout, at which point it becomes `Disconnected` for good.

use std::sync::Arc;
use std::time::Duration;

use dotstats_core::ids::{IdGenerator, NodeId};
use dotstats_core::message::{self, Message, MessageKind, SystemConnected};
use dotstats_core::types::{
    self, BlockDetails, BlockHash, BlockNumber, Milliseconds, NodeDetails, NodeStats, Timestamp,
};
use dotstats_core::NodeSnapshot;
use tokio::sync::mpsc;

use crate::transport::{ConnectionEvent, Outbound};

pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
pub const NODE_TIMEOUT: Duration = Duration::from_secs(60);

const BLOCK_TIME_HISTORY: usize = 10;

#[derive(Debug, thiserror::Error)]
pub enum HandshakeError {
    #[error("no system.connected message within {0:?}")]
    Timeout(Duration),
    #[error("connection closed during handshake")]
    Closed,
    #[error("connection failed during handshake: {0}")]
    Transport(String),
}

impl HandshakeError {
    /// Short label for logs and metrics.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::Timeout(_) => "timeout",
            Self::Closed => "closed",
            Self::Transport(_) => "transport",
        }
    }
}

/// Lifecycle of a session that passed its handshake.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Active,
    Disconnected,
}

/// Domain events a session emits, in the order they happened.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum NodeEvent {
    /// A new best block was accepted.
    Block,
    /// Peer or transaction count changed.
    Stats,
    /// The session ended. Emitted exactly once.
    Disconnect,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DisconnectReason {
    Closed,
    Error(String),
    TimedOut,
}

pub struct NodeSession {
    id: NodeId,
    details: NodeDetails,
    config: String,
    outbound: Arc<dyn Outbound>,
    state: SessionState,
    best: BlockHash,
    height: BlockNumber,
    latency: Milliseconds,
    block_time: Milliseconds,
    block_observed_at: Timestamp,
    stats: NodeStats,
    last_message: Timestamp,
    block_times: [Option<Milliseconds>; BLOCK_TIME_HISTORY],
    last_block_at: Option<Timestamp>,
}

impl NodeSession {
    pub fn new(
        id: NodeId,
        connected: SystemConnected,
        outbound: Arc<dyn Outbound>,
        now: Timestamp,
    ) -> Self {
        let SystemConnected {
            name,
            config,
            implementation,
            version,
        } = connected;

        Self {
            id,
            details: NodeDetails {
                name,
                implementation,
                version,
            },
            config,
            outbound,
            state: SessionState::Active,
            best: BlockHash::new(),
            height: 0,
            latency: 0,
            block_time: 0,
            block_observed_at: 0,
            stats: NodeStats::default(),
            last_message: now,
            block_times: [None; BLOCK_TIME_HISTORY],
            last_block_at: None,
        }
    }

    /// Wait for `system.connected` on `inbound`, racing `deadline`.
    ///
    /// Anything else received before it is discarded. On failure the
    /// connection is closed and no identifier is consumed.
    pub async fn accept(
        inbound: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
        outbound: Arc<dyn Outbound>,
        ids: &IdGenerator<NodeId>,
        deadline: Duration,
    ) -> Result<Self, HandshakeError> {
        let outcome = match tokio::time::timeout(deadline, wait_for_connected(inbound)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(HandshakeError::Timeout(deadline)),
        };

        match outcome {
            Ok(connected) => Ok(Self::new(ids.next_id(), connected, outbound, types::now())),
            Err(err) => {
                outbound.close();
                Err(err)
            }
        }
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.details.name
    }

    pub fn config(&self) -> &str {
        &self.config
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn is_active(&self) -> bool {
        self.state == SessionState::Active
    }

    pub fn height(&self) -> BlockNumber {
        self.height
    }

    pub fn best(&self) -> &str {
        &self.best
    }

    /// Arrival time minus origination time of the last message. Negative
    /// when the node's clock runs ahead of ours.
    pub fn latency(&self) -> Milliseconds {
        self.latency
    }

    pub fn last_message(&self) -> Timestamp {
        self.last_message
    }

    pub fn block_observed_at(&self) -> Timestamp {
        self.block_observed_at
    }

    pub fn details(&self) -> &NodeDetails {
        &self.details
    }

    pub fn stats(&self) -> NodeStats {
        self.stats
    }

    pub fn block_details(&self) -> BlockDetails {
        BlockDetails {
            height: self.height,
            hash: self.best.clone(),
            block_time: self.block_time,
            observed_at: self.block_observed_at,
        }
    }

    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot {
            details: self.details.clone(),
            stats: self.stats,
            block: self.block_details(),
        }
    }

    /// Mean of the recorded block times, `0.0` before the first block.
    pub fn average(&self) -> f64 {
        let (sum, count) = self
            .block_times
            .iter()
            .flatten()
            .fold((0i64, 0u32), |(sum, count), time| (sum + time, count + 1));

        if count == 0 {
            return 0.0;
        }
        sum as f64 / f64::from(count)
    }

    /// Apply one parsed message received at `now`.
    pub fn on_message(&mut self, message: &Message, now: Timestamp) -> Vec<NodeEvent> {
        let mut events = Vec::new();
        if !self.is_active() {
            return events;
        }

        self.last_message = now;
        self.latency = now - message.ts;

        if let Some(update) = message::best_block(message) {
            if self.update_best_block(update, now) {
                events.push(NodeEvent::Block);
            }
        }

        if let MessageKind::SystemInterval(interval) = &message.kind {
            let stats = NodeStats {
                peers: interval.peers,
                txcount: interval.txcount,
            };
            if stats != self.stats {
                self.stats = stats;
                events.push(NodeEvent::Stats);
            }
        }

        events
    }

    fn update_best_block(&mut self, update: message::BestBlock, now: Timestamp) -> bool {
        if update.height <= self.height {
            return false;
        }

        let block_time = self.last_block_at.map_or(0, |last| update.ts - last);

        self.best = update.hash;
        self.height = update.height;
        self.block_observed_at = now;
        self.last_block_at = Some(update.ts);
        self.block_time = block_time;
        // heights ten apart share a slot
        self.block_times[(update.height % BLOCK_TIME_HISTORY as u64) as usize] = Some(block_time);

        true
    }

    /// Disconnect if nothing arrived for longer than `timeout`.
    pub fn timeout_check(&mut self, now: Timestamp, timeout: Duration) -> Option<NodeEvent> {
        let timeout = Milliseconds::try_from(timeout.as_millis()).unwrap_or(Milliseconds::MAX);
        if self.last_message.saturating_add(timeout) < now {
            self.disconnect(DisconnectReason::TimedOut)
        } else {
            None
        }
    }

    /// Enter `Disconnected`. Only the first call closes the connection and
    /// yields [`NodeEvent::Disconnect`].
    pub fn disconnect(&mut self, reason: DisconnectReason) -> Option<NodeEvent> {
        if self.state == SessionState::Disconnected {
            return None;
        }
        self.state = SessionState::Disconnected;
        self.outbound.close();

        match &reason {
            DisconnectReason::Closed => {
                tracing::info!(node_id = %self.id, name = %self.details.name, "node disconnected");
            }
            DisconnectReason::Error(error) => {
                tracing::warn!(node_id = %self.id, name = %self.details.name, %error, "node connection errored");
            }
            DisconnectReason::TimedOut => {
                tracing::info!(node_id = %self.id, name = %self.details.name, "node timed out");
            }
        }

        Some(NodeEvent::Disconnect)
    }
}

async fn wait_for_connected(
    inbound: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
) -> Result<SystemConnected, HandshakeError> {
    while let Some(event) = inbound.recv().await {
        match event {
            ConnectionEvent::Message(raw) => {
                if let Some(Message {
                    kind: MessageKind::SystemConnected(connected),
                    ..
                }) = message::parse(&raw)
                {
                    return Ok(connected);
                }
            }
            ConnectionEvent::Close => return Err(HandshakeError::Closed),
            ConnectionEvent::Error(error) => return Err(HandshakeError::Transport(error)),
        }
    }
    Err(HandshakeError::Closed)
}
