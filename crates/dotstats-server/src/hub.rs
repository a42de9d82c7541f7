//! The task that owns the [`Aggregator`].
//!
//! Connection tasks never touch node or feed state directly. They send
//! [`HubCommand`]s to one task that applies them in arrival order, together
//! with the periodic liveness check, so every mutation and broadcast happens
//! on a single sequential path.

use std::sync::Arc;
use std::time::Duration;

use dotstats_core::ids::{FeedId, IdGenerator, NodeId};
use dotstats_core::types::{self, BlockNumber};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use crate::aggregator::Aggregator;
use crate::feed::Feed;
use crate::node::NodeSession;
use crate::transport::{ConnectionEvent, Outbound};

/// Identifier sources shared by every connection of one server.
#[derive(Debug, Default)]
pub struct Identifiers {
    pub nodes: IdGenerator<NodeId>,
    pub feeds: IdGenerator<FeedId>,
}

pub enum HubCommand {
    AddNode(NodeSession),
    NodeEvent { id: NodeId, event: ConnectionEvent },
    AddFeed(Feed),
    RemoveFeed(FeedId),
    Status(oneshot::Sender<HubStatus>),
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HubStatus {
    pub nodes: usize,
    pub feeds: usize,
    pub best_height: Option<BlockNumber>,
}

/// Cloneable front door to the hub task.
#[derive(Clone)]
pub struct HubHandle {
    tx: mpsc::UnboundedSender<HubCommand>,
    ids: Arc<Identifiers>,
}

impl HubHandle {
    pub fn ids(&self) -> &Identifiers {
        &self.ids
    }

    pub fn add_node(&self, session: NodeSession) {
        self.submit(HubCommand::AddNode(session));
    }

    pub fn node_event(&self, id: NodeId, event: ConnectionEvent) {
        self.submit(HubCommand::NodeEvent { id, event });
    }

    /// Register a feed writing to `outbound` and return its id.
    pub fn add_feed(&self, outbound: Arc<dyn Outbound>) -> FeedId {
        let id = self.ids.feeds.next_id();
        self.submit(HubCommand::AddFeed(Feed::new(id, outbound)));
        id
    }

    pub fn remove_feed(&self, id: FeedId) {
        self.submit(HubCommand::RemoveFeed(id));
    }

    /// Current counts, or `None` once the hub has stopped.
    pub async fn status(&self) -> Option<HubStatus> {
        let (tx, rx) = oneshot::channel();
        if self.tx.send(HubCommand::Status(tx)).is_err() {
            return None;
        }
        rx.await.ok()
    }

    fn submit(&self, command: HubCommand) {
        if self.tx.send(command).is_err() {
            tracing::debug!("hub stopped, command dropped");
        }
    }
}

/// Spawn the hub task. It runs until `cancel` fires, then closes every
/// remaining connection.
pub fn spawn(
    mut aggregator: Aggregator,
    ids: Arc<Identifiers>,
    liveness_interval: Duration,
    cancel: CancellationToken,
) -> (HubHandle, tokio::task::JoinHandle<()>) {
    let (tx, mut rx) = mpsc::unbounded_channel();

    let task = tokio::spawn(async move {
        let mut liveness = tokio::time::interval(liveness_interval);
        liveness.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                command = rx.recv() => match command {
                    Some(command) => apply(&mut aggregator, command),
                    None => break,
                },
                _ = liveness.tick() => aggregator.timeout_check(types::now()),
                () = cancel.cancelled() => break,
            }
        }

        aggregator.close_all();
        tracing::info!("hub stopped");
    });

    (HubHandle { tx, ids }, task)
}

fn apply(aggregator: &mut Aggregator, command: HubCommand) {
    match command {
        HubCommand::AddNode(session) => aggregator.add_node(session),
        HubCommand::NodeEvent { id, event } => aggregator.node_input(id, event, types::now()),
        HubCommand::AddFeed(feed) => aggregator.add_feed(feed),
        HubCommand::RemoveFeed(id) => {
            let _ = aggregator.remove_feed(id);
        }
        HubCommand::Status(reply) => {
            let _ = reply.send(HubStatus {
                nodes: aggregator.node_count(),
                feeds: aggregator.feed_count(),
                best_height: aggregator.chain_best().map(|best| best.height),
            });
        }
    }
}
