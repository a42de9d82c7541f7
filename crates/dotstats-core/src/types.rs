//! Value types shared by node sessions and the feed protocol.
//!
//! The three detail groups serialize as JSON arrays so a feed frame stays
//! compact: `[name, implementation, version]`, `[peers, txcount]` and
//! `[height, hash, block_time, block_observed_at]`.

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub type BlockNumber = u64;
pub type BlockHash = String;
/// Signed duration in milliseconds.
pub type Milliseconds = i64;
/// Milliseconds since the Unix epoch.
pub type Timestamp = i64;
pub type PeerCount = u64;
pub type TransactionCount = u64;

/// Current wall-clock time as a [`Timestamp`].
pub fn now() -> Timestamp {
    Utc::now().timestamp_millis()
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(String, String, String)", into = "(String, String, String)")]
pub struct NodeDetails {
    pub name: String,
    pub implementation: String,
    pub version: String,
}

impl From<(String, String, String)> for NodeDetails {
    fn from((name, implementation, version): (String, String, String)) -> Self {
        Self {
            name,
            implementation,
            version,
        }
    }
}

impl From<NodeDetails> for (String, String, String) {
    fn from(d: NodeDetails) -> Self {
        (d.name, d.implementation, d.version)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "(PeerCount, TransactionCount)", into = "(PeerCount, TransactionCount)")]
pub struct NodeStats {
    pub peers: PeerCount,
    pub txcount: TransactionCount,
}

impl From<(PeerCount, TransactionCount)> for NodeStats {
    fn from((peers, txcount): (PeerCount, TransactionCount)) -> Self {
        Self { peers, txcount }
    }
}

impl From<NodeStats> for (PeerCount, TransactionCount) {
    fn from(s: NodeStats) -> Self {
        (s.peers, s.txcount)
    }
}

type BlockTuple = (BlockNumber, BlockHash, Milliseconds, Timestamp);

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "BlockTuple", into = "BlockTuple")]
pub struct BlockDetails {
    pub height: BlockNumber,
    pub hash: BlockHash,
    pub block_time: Milliseconds,
    pub observed_at: Timestamp,
}

impl From<BlockTuple> for BlockDetails {
    fn from((height, hash, block_time, observed_at): BlockTuple) -> Self {
        Self {
            height,
            hash,
            block_time,
            observed_at,
        }
    }
}

impl From<BlockDetails> for BlockTuple {
    fn from(b: BlockDetails) -> Self {
        (b.height, b.hash, b.block_time, b.observed_at)
    }
}
