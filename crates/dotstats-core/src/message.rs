//! Inbound node telemetry messages.
//!
//! Nodes send JSON objects tagged by `msg` and stamped with an RFC 3339 `ts`:
//!
//! ```json
//! {"msg":"system.interval","level":"INFO","ts":"2018-06-21T10:00:00Z","peers":3,"txcount":0,"height":12,"best":"0xab"}
//! ```
//!
//! Fields outside the ones a kind needs are ignored.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::types::{BlockHash, BlockNumber, PeerCount, Timestamp, TransactionCount};

pub const SYSTEM_CONNECTED: &str = "system.connected";
pub const SYSTEM_INTERVAL: &str = "system.interval";
pub const NODE_START: &str = "node.start";
pub const BLOCK_IMPORT: &str = "block.import";

/// Why a payload did not produce a [`Message`].
#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error("malformed message: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("unknown message kind: {0}")]
    UnknownKind(String),
}

impl ParseError {
    /// Unknown kinds are skipped quietly; everything else is a protocol fault.
    pub fn is_ignored(&self) -> bool {
        matches!(self, Self::UnknownKind(_))
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    /// Origination time reported by the node.
    pub ts: Timestamp,
    pub kind: MessageKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageKind {
    SystemConnected(SystemConnected),
    SystemInterval(SystemInterval),
    NodeStart(BlockReport),
    BlockImport(BlockReport),
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SystemConnected {
    pub name: String,
    pub config: String,
    pub implementation: String,
    pub version: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct SystemInterval {
    pub peers: PeerCount,
    pub txcount: TransactionCount,
    pub height: Option<BlockNumber>,
    pub best: Option<BlockHash>,
}

#[derive(Clone, Debug, PartialEq, Eq, Deserialize)]
pub struct BlockReport {
    pub height: BlockNumber,
    pub best: BlockHash,
}

/// Block data carried by a message, stamped with the message's origin time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BestBlock {
    pub height: BlockNumber,
    pub hash: BlockHash,
    pub ts: Timestamp,
}

#[derive(Deserialize)]
struct Envelope {
    msg: String,
    ts: DateTime<Utc>,
    #[serde(flatten)]
    fields: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn decode(raw: &[u8]) -> Result<Self, ParseError> {
        let Envelope { msg, ts, fields } = serde_json::from_slice(raw)?;
        let fields = serde_json::Value::Object(fields);

        let kind = match msg.as_str() {
            SYSTEM_CONNECTED => MessageKind::SystemConnected(serde_json::from_value(fields)?),
            SYSTEM_INTERVAL => MessageKind::SystemInterval(serde_json::from_value(fields)?),
            NODE_START => MessageKind::NodeStart(serde_json::from_value(fields)?),
            BLOCK_IMPORT => MessageKind::BlockImport(serde_json::from_value(fields)?),
            _ => return Err(ParseError::UnknownKind(msg)),
        };

        Ok(Self {
            ts: ts.timestamp_millis(),
            kind,
        })
    }

    pub fn kind_name(&self) -> &'static str {
        match self.kind {
            MessageKind::SystemConnected(_) => SYSTEM_CONNECTED,
            MessageKind::SystemInterval(_) => SYSTEM_INTERVAL,
            MessageKind::NodeStart(_) => NODE_START,
            MessageKind::BlockImport(_) => BLOCK_IMPORT,
        }
    }
}

/// Decode a raw payload, discarding the reason on failure.
pub fn parse(raw: &[u8]) -> Option<Message> {
    Message::decode(raw).ok()
}

/// Block update carried by `message`, if its kind reports one.
///
/// Interval messages only count when they carry both `height` and `best`.
pub fn best_block(message: &Message) -> Option<BestBlock> {
    let (height, hash) = match &message.kind {
        MessageKind::NodeStart(report) | MessageKind::BlockImport(report) => {
            (report.height, report.best.clone())
        }
        MessageKind::SystemInterval(SystemInterval {
            height: Some(height),
            best: Some(best),
            ..
        }) => (*height, best.clone()),
        MessageKind::SystemInterval(_) | MessageKind::SystemConnected(_) => return None,
    };

    Some(BestBlock {
        height,
        hash,
        ts: message.ts,
    })
}
