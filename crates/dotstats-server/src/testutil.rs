use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::transport::Outbound;

/// Outbound that records frames and close calls.
#[derive(Default)]
pub struct RecordingOutbound {
    frames: Mutex<Vec<String>>,
    closes: AtomicUsize,
    refuse: AtomicBool,
}

impl RecordingOutbound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Make every subsequent send fail, like a saturated peer.
    pub fn refuse_sends(&self) {
        self.refuse.store(true, Ordering::Relaxed);
    }

    pub fn frames(&self) -> Vec<serde_json::Value> {
        self.frames
            .lock()
            .iter()
            .map(|f| serde_json::from_str(f).unwrap())
            .collect()
    }

    pub fn take_frames(&self) -> Vec<serde_json::Value> {
        let frames = std::mem::take(&mut *self.frames.lock());
        frames.iter().map(|f| serde_json::from_str(f).unwrap()).collect()
    }

    pub fn close_count(&self) -> usize {
        self.closes.load(Ordering::Relaxed)
    }
}

impl Outbound for RecordingOutbound {
    fn send(&self, text: Arc<str>) -> bool {
        if self.refuse.load(Ordering::Relaxed) {
            return false;
        }
        self.frames.lock().push(text.to_string());
        true
    }

    fn close(&self) {
        let _ = self.closes.fetch_add(1, Ordering::Relaxed);
    }
}

pub fn connected(name: &str) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "msg": "system.connected",
        "ts": "2018-06-21T10:00:00Z",
        "name": name,
        "config": "",
        "implementation": "parity-polkadot",
        "version": "0.2.1",
    }))
    .unwrap()
}

/// `ts` in milliseconds since the epoch.
pub fn block_import(height: u64, ts: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "msg": "block.import",
        "ts": rfc3339(ts),
        "height": height,
        "best": format!("0x{height:02x}"),
    }))
    .unwrap()
}

pub fn interval(peers: u64, txcount: u64, ts: i64) -> Vec<u8> {
    serde_json::to_vec(&serde_json::json!({
        "msg": "system.interval",
        "ts": rfc3339(ts),
        "peers": peers,
        "txcount": txcount,
    }))
    .unwrap()
}

pub fn rfc3339(ts: i64) -> String {
    chrono::DateTime::from_timestamp_millis(ts).unwrap().to_rfc3339()
}
