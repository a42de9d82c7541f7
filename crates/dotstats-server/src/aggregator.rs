//! Live node and feed collections, and the wiring between them.
//!
//! Every node event becomes a frame broadcast to every registered feed. A
//! feed that joins late first receives the current state of every live node,
//! so all feeds converge on the same view. A feed that cannot take a frame is
//! closed and unregistered; a registered feed never has gaps.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use dotstats_core::ids::{FeedId, NodeId};
use dotstats_core::message::Message;
use dotstats_core::types::{BlockNumber, Timestamp};
use dotstats_core::FeedMessage;
use dotstats_telemetry::MetricsRecorder;

use crate::feed::Feed;
use crate::node::{DisconnectReason, NodeEvent, NodeSession, NODE_TIMEOUT};
use crate::transport::ConnectionEvent;

/// Highest block reported by any node since startup. It never decreases,
/// even when the node that reported it disconnects.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ChainBest {
    pub height: BlockNumber,
    pub observed_at: Timestamp,
    pub average_block_time: f64,
}

impl ChainBest {
    fn frame(&self) -> FeedMessage {
        FeedMessage::BestBlock {
            height: self.height,
            observed_at: self.observed_at,
            average_block_time: self.average_block_time,
        }
    }
}

pub struct Aggregator {
    nodes: HashMap<NodeId, NodeSession>,
    feeds: HashMap<FeedId, Feed>,
    best: Option<ChainBest>,
    node_timeout: Duration,
    metrics: Arc<MetricsRecorder>,
}

impl Aggregator {
    pub fn new(metrics: Arc<MetricsRecorder>) -> Self {
        Self::with_node_timeout(metrics, NODE_TIMEOUT)
    }

    pub fn with_node_timeout(metrics: Arc<MetricsRecorder>, node_timeout: Duration) -> Self {
        Self {
            nodes: HashMap::new(),
            feeds: HashMap::new(),
            best: None,
            node_timeout,
            metrics,
        }
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn feed_count(&self) -> usize {
        self.feeds.len()
    }

    pub fn node(&self, id: NodeId) -> Option<&NodeSession> {
        self.nodes.get(&id)
    }

    pub fn chain_best(&self) -> Option<ChainBest> {
        self.best
    }

    /// Start tracking a session that completed its handshake.
    pub fn add_node(&mut self, session: NodeSession) {
        let id = session.id();
        tracing::info!(
            node_id = %id,
            name = %session.name(),
            config = %session.config(),
            "node connected"
        );

        self.broadcast(&FeedMessage::added(id, session.snapshot()));
        let _ = self.nodes.insert(id, session);
        self.update_node_gauge();
    }

    /// Feed one event from a node's connection into its session.
    ///
    /// Events for ids that are no longer live are dropped.
    pub fn node_input(&mut self, id: NodeId, event: ConnectionEvent, now: Timestamp) {
        let Some(session) = self.nodes.get_mut(&id) else {
            tracing::trace!(node_id = %id, "event for unknown node dropped");
            return;
        };

        let events = match event {
            ConnectionEvent::Message(raw) => match Message::decode(&raw) {
                Ok(message) => {
                    self.metrics
                        .counter_inc("telemetry.messages", &[("outcome", "accepted")], 1);
                    tracing::trace!(node_id = %id, kind = message.kind_name(), "message accepted");
                    session.on_message(&message, now)
                }
                Err(error) if error.is_ignored() => {
                    self.metrics
                        .counter_inc("telemetry.messages", &[("outcome", "ignored")], 1);
                    tracing::trace!(node_id = %id, %error, "message ignored");
                    return;
                }
                Err(error) => {
                    self.metrics
                        .counter_inc("telemetry.messages", &[("outcome", "malformed")], 1);
                    tracing::debug!(node_id = %id, %error, "malformed message dropped");
                    return;
                }
            },
            ConnectionEvent::Close => session.disconnect(DisconnectReason::Closed).into_iter().collect(),
            ConnectionEvent::Error(error) => session
                .disconnect(DisconnectReason::Error(error))
                .into_iter()
                .collect(),
        };

        for event in events {
            self.dispatch(id, event);
        }
    }

    /// Disconnect every node that has been silent past the node timeout.
    pub fn timeout_check(&mut self, now: Timestamp) {
        let timeout = self.node_timeout;
        let expired: Vec<NodeId> = self
            .nodes
            .iter_mut()
            .filter_map(|(id, session)| session.timeout_check(now, timeout).map(|_| *id))
            .collect();

        for id in expired {
            self.dispatch(id, NodeEvent::Disconnect);
        }
    }

    fn dispatch(&mut self, id: NodeId, event: NodeEvent) {
        match event {
            NodeEvent::Block => {
                let Some(session) = self.nodes.get(&id) else {
                    return;
                };
                let frame = FeedMessage::imported(id, session.snapshot());
                let raised = match self.best {
                    Some(best) => session.height() > best.height,
                    None => true,
                };
                let candidate = ChainBest {
                    height: session.height(),
                    observed_at: session.block_observed_at(),
                    average_block_time: session.average(),
                };

                self.broadcast(&frame);
                if raised {
                    self.best = Some(candidate);
                    self.broadcast(&candidate.frame());
                }
            }
            NodeEvent::Stats => {
                let Some(session) = self.nodes.get(&id) else {
                    return;
                };
                let frame = FeedMessage::stats(id, session.snapshot());
                self.broadcast(&frame);
            }
            NodeEvent::Disconnect => {
                if self.nodes.remove(&id).is_some() {
                    self.broadcast(&FeedMessage::removed(id));
                    self.update_node_gauge();
                }
            }
        }
    }

    /// Register a feed and bring it up to date with every live node.
    pub fn add_feed(&mut self, feed: Feed) {
        let best = self.best.map(|best| best.frame());
        let initial = best.into_iter().chain(
            self.nodes
                .iter()
                .map(|(id, session)| FeedMessage::added(*id, session.snapshot())),
        );
        for frame in initial {
            if !feed.send(&frame) {
                self.evict(&feed, frame.frame_type());
                return;
            }
        }

        tracing::info!(feed_id = %feed.id(), nodes = self.nodes.len(), "feed joined");
        let _ = self.feeds.insert(feed.id(), feed);
        self.update_feed_gauge();
    }

    pub fn remove_feed(&mut self, id: FeedId) -> bool {
        let removed = self.feeds.remove(&id).is_some();
        if removed {
            tracing::info!(feed_id = %id, "feed left");
            self.update_feed_gauge();
        }
        removed
    }

    /// Close every connection. Used on shutdown.
    pub fn close_all(&mut self) {
        for (_, mut session) in self.nodes.drain() {
            let _ = session.disconnect(DisconnectReason::Closed);
        }
        for (_, feed) in self.feeds.drain() {
            feed.close();
        }
        self.update_node_gauge();
        self.update_feed_gauge();
    }

    /// Send `frame` to every feed, evicting the ones that drop it.
    fn broadcast(&mut self, frame: &FeedMessage) {
        let json: Arc<str> = match frame.to_json() {
            Ok(json) => json.into(),
            Err(error) => {
                tracing::warn!(frame = frame.frame_type(), %error, "failed to serialize feed frame");
                return;
            }
        };

        let failed: Vec<FeedId> = self
            .feeds
            .values()
            .filter(|feed| !feed.send_raw(Arc::clone(&json)))
            .map(Feed::id)
            .collect();

        if failed.is_empty() {
            return;
        }
        for id in failed {
            if let Some(feed) = self.feeds.remove(&id) {
                self.evict(&feed, frame.frame_type());
            }
        }
        self.update_feed_gauge();
    }

    /// Close a feed that missed `frame_type`. It must not be in `feeds`.
    fn evict(&self, feed: &Feed, frame_type: &str) {
        feed.close();
        self.metrics.counter_inc("feed.frames_dropped", &[], 1);
        self.metrics.counter_inc("feeds.evicted", &[], 1);
        tracing::warn!(feed_id = %feed.id(), frame = frame_type, "feed fell behind, closing");
    }

    fn update_node_gauge(&self) {
        self.metrics
            .gauge_set("nodes.active", &[], self.nodes.len() as f64);
    }

    fn update_feed_gauge(&self) {
        self.metrics
            .gauge_set("feeds.active", &[], self.feeds.len() as f64);
    }
}
