//! A dashboard subscriber. Feeds only receive frames; they carry no state
//! beyond their identity and the connection to write to.

use std::sync::Arc;

use dotstats_core::ids::FeedId;
use dotstats_core::FeedMessage;

use crate::transport::Outbound;

pub struct Feed {
    id: FeedId,
    outbound: Arc<dyn Outbound>,
}

impl Feed {
    pub fn new(id: FeedId, outbound: Arc<dyn Outbound>) -> Self {
        Self { id, outbound }
    }

    pub fn id(&self) -> FeedId {
        self.id
    }

    /// Serialize and queue one frame.
    pub fn send(&self, frame: &FeedMessage) -> bool {
        match frame.to_json() {
            Ok(json) => self.send_raw(json.into()),
            Err(error) => {
                tracing::warn!(feed_id = %self.id, frame = frame.frame_type(), %error, "failed to serialize feed frame");
                false
            }
        }
    }

    /// Queue an already serialized frame.
    pub fn send_raw(&self, json: Arc<str>) -> bool {
        self.outbound.send(json)
    }

    pub fn close(&self) {
        self.outbound.close();
    }
}
