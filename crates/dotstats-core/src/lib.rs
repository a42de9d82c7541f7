//! Shared vocabulary for the dotstats telemetry relay: identifiers, the
//! inbound node message envelope and the outbound feed protocol.

pub mod feed;
pub mod ids;
pub mod message;
pub mod types;

pub use feed::{FeedMessage, NodeSnapshot};
pub use ids::{FeedId, IdGenerator, NodeId};
pub use message::{best_block, parse, BestBlock, Message, MessageKind, ParseError};
