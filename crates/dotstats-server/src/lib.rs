pub mod aggregator;
pub mod connection;
pub mod feed;
pub mod hub;
pub mod node;
pub mod server;
pub mod transport;

#[cfg(test)]
mod testutil;

pub use aggregator::Aggregator;
pub use hub::{HubHandle, HubStatus, Identifiers};
pub use node::{HandshakeError, NodeEvent, NodeSession, SessionState};
pub use server::{start, ServerConfig, ServerError, ServerHandle};
