//! Outbound frames sent to feed subscribers.

use serde::{Deserialize, Serialize};

use crate::ids::NodeId;
use crate::types::{BlockDetails, BlockNumber, NodeDetails, NodeStats, Timestamp};

/// Everything a subscriber needs to render one node.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeSnapshot {
    pub details: NodeDetails,
    pub stats: NodeStats,
    pub block: BlockDetails,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FeedMessage {
    AddedNode {
        id: NodeId,
        details: NodeDetails,
        stats: NodeStats,
        block: BlockDetails,
    },
    ImportedBlock {
        id: NodeId,
        details: NodeDetails,
        stats: NodeStats,
        block: BlockDetails,
    },
    NodeStats {
        id: NodeId,
        details: NodeDetails,
        stats: NodeStats,
        block: BlockDetails,
    },
    RemovedNode {
        id: NodeId,
    },
    /// Highest block any live node has reported.
    BestBlock {
        height: BlockNumber,
        observed_at: Timestamp,
        /// Mean block time in milliseconds.
        average_block_time: f64,
    },
}

impl FeedMessage {
    pub fn added(id: NodeId, snapshot: NodeSnapshot) -> Self {
        let NodeSnapshot { details, stats, block } = snapshot;
        Self::AddedNode { id, details, stats, block }
    }

    pub fn imported(id: NodeId, snapshot: NodeSnapshot) -> Self {
        let NodeSnapshot { details, stats, block } = snapshot;
        Self::ImportedBlock { id, details, stats, block }
    }

    pub fn stats(id: NodeId, snapshot: NodeSnapshot) -> Self {
        let NodeSnapshot { details, stats, block } = snapshot;
        Self::NodeStats { id, details, stats, block }
    }

    pub fn removed(id: NodeId) -> Self {
        Self::RemovedNode { id }
    }

    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::AddedNode { .. } => "added_node",
            Self::ImportedBlock { .. } => "imported_block",
            Self::NodeStats { .. } => "node_stats",
            Self::RemovedNode { .. } => "removed_node",
            Self::BestBlock { .. } => "best_block",
        }
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}
