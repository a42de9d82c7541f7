//! End-to-end tests with real node and feed WebSocket clients.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use dotstats_server::{start, ServerConfig, ServerHandle};
use dotstats_telemetry::MetricsRecorder;
use futures::{SinkExt, StreamExt};
use serde_json::{json, Value};
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;

const TIMEOUT: Duration = Duration::from_secs(5);

type WsStream = tokio_tungstenite::WebSocketStream<
    tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>,
>;

fn local_config() -> ServerConfig {
    ServerConfig {
        telemetry_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        feed_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
        ..ServerConfig::default()
    }
}

async fn boot(config: ServerConfig) -> ServerHandle {
    start(config, Arc::new(MetricsRecorder::new())).await.unwrap()
}

async fn connect_node(handle: &ServerHandle) -> WsStream {
    let url = format!("ws://127.0.0.1:{}/submit", handle.telemetry_port);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn connect_feed(handle: &ServerHandle) -> WsStream {
    let url = format!("ws://127.0.0.1:{}/feed", handle.feed_port);
    let (ws, _) = connect_async(url).await.unwrap();
    ws
}

async fn health(handle: &ServerHandle) -> Value {
    let url = format!("http://127.0.0.1:{}/health", handle.feed_port);
    reqwest::get(&url).await.unwrap().json().await.unwrap()
}

/// Poll `/health` until `check` holds.
async fn wait_for_health(handle: &ServerHandle, check: impl Fn(&Value) -> bool) -> Value {
    timeout(TIMEOUT, async {
        loop {
            let body = health(handle).await;
            if check(&body) {
                return body;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("health condition never held")
}

/// Read the next text frame as JSON.
async fn read_json(ws: &mut WsStream) -> Value {
    loop {
        let msg = timeout(TIMEOUT, ws.next())
            .await
            .expect("timeout waiting for frame")
            .expect("stream closed")
            .expect("ws error");
        if let Message::Text(text) = msg {
            return serde_json::from_str(&text).unwrap();
        }
    }
}

fn now_rfc3339() -> String {
    chrono::Utc::now().to_rfc3339()
}

async fn send(ws: &mut WsStream, value: Value) {
    ws.send(Message::text(value.to_string())).await.unwrap();
}

async fn introduce(ws: &mut WsStream, name: &str) {
    send(
        ws,
        json!({
            "msg": "system.connected",
            "level": "INFO",
            "ts": now_rfc3339(),
            "name": name,
            "config": "",
            "implementation": "parity-polkadot",
            "version": "0.2.1",
        }),
    )
    .await;
}

#[tokio::test]
async fn e2e_feed_follows_node_lifecycle() {
    let handle = boot(local_config()).await;
    let mut feed = connect_feed(&handle).await;
    let _ = wait_for_health(&handle, |h| h["feeds"] == 1).await;

    let mut node = connect_node(&handle).await;
    introduce(&mut node, "alice").await;

    let added = read_json(&mut feed).await;
    assert_eq!(added["type"], "added_node");
    assert_eq!(added["details"], json!(["alice", "parity-polkadot", "0.2.1"]));
    assert_eq!(added["stats"], json!([0, 0]));
    let id = added["id"].clone();

    send(
        &mut node,
        json!({"msg": "block.import", "ts": now_rfc3339(), "height": 1, "best": "0x01"}),
    )
    .await;
    let imported = read_json(&mut feed).await;
    assert_eq!(imported["type"], "imported_block");
    assert_eq!(imported["id"], id);
    assert_eq!(imported["block"][0], 1);
    assert_eq!(imported["block"][1], "0x01");
    assert_eq!(imported["block"][2], 0);

    let best = read_json(&mut feed).await;
    assert_eq!(best["type"], "best_block");
    assert_eq!(best["height"], 1);

    send(
        &mut node,
        json!({"msg": "system.interval", "ts": now_rfc3339(), "peers": 7, "txcount": 2}),
    )
    .await;
    let stats = read_json(&mut feed).await;
    assert_eq!(stats["type"], "node_stats");
    assert_eq!(stats["stats"], json!([7, 2]));

    node.close(None).await.unwrap();
    let removed = read_json(&mut feed).await;
    assert_eq!(removed, json!({"type": "removed_node", "id": id}));

    handle.shutdown();
    handle.wait().await;
}

#[tokio::test]
async fn e2e_late_feed_receives_existing_nodes() {
    let handle = boot(local_config()).await;

    let mut alice = connect_node(&handle).await;
    introduce(&mut alice, "alice").await;
    let mut bob = connect_node(&handle).await;
    introduce(&mut bob, "bob").await;
    let _ = wait_for_health(&handle, |h| h["nodes"] == 2).await;

    let mut feed = connect_feed(&handle).await;
    let first = read_json(&mut feed).await;
    let second = read_json(&mut feed).await;
    assert_eq!(first["type"], "added_node");
    assert_eq!(second["type"], "added_node");
    let mut names = vec![
        first["details"][0].as_str().unwrap().to_string(),
        second["details"][0].as_str().unwrap().to_string(),
    ];
    names.sort();
    assert_eq!(names, vec!["alice", "bob"]);

    // incremental updates only follow the initial batch
    send(
        &mut bob,
        json!({"msg": "system.interval", "ts": now_rfc3339(), "peers": 3, "txcount": 0}),
    )
    .await;
    let update = read_json(&mut feed).await;
    assert_eq!(update["type"], "node_stats");
    assert_eq!(update["details"][0], "bob");

    handle.shutdown();
    handle.wait().await;
}

#[tokio::test]
async fn e2e_garbage_does_not_end_the_session() {
    let handle = boot(local_config()).await;
    let mut feed = connect_feed(&handle).await;
    let _ = wait_for_health(&handle, |h| h["feeds"] == 1).await;

    let mut node = connect_node(&handle).await;
    introduce(&mut node, "alice").await;
    assert_eq!(read_json(&mut feed).await["type"], "added_node");

    node.send(Message::text("not json")).await.unwrap();
    send(&mut node, json!({"msg": "txpool.import", "ts": now_rfc3339()})).await;
    send(
        &mut node,
        json!({"msg": "node.start", "ts": now_rfc3339(), "height": 4, "best": "0x04"}),
    )
    .await;

    let imported = read_json(&mut feed).await;
    assert_eq!(imported["type"], "imported_block");
    assert_eq!(imported["block"][0], 4);

    let body = wait_for_health(&handle, |h| h["nodes"] == 1).await;
    let samples = body["metrics"].as_array().unwrap();
    let outcome = |label: &str| {
        samples
            .iter()
            .find(|s| s["name"] == "telemetry.messages" && s["labels"] == json!([["outcome", label]]))
            .map(|s| s["value"].as_f64().unwrap())
    };
    assert_eq!(outcome("malformed"), Some(1.0));
    assert_eq!(outcome("ignored"), Some(1.0));

    handle.shutdown();
    handle.wait().await;
}

#[tokio::test]
async fn e2e_silent_node_is_dropped_after_handshake_timeout() {
    let handle = boot(ServerConfig {
        handshake_timeout: Duration::from_millis(200),
        ..local_config()
    })
    .await;
    let mut node = connect_node(&handle).await;

    // the server closes without ever registering the node
    let closed = timeout(TIMEOUT, async {
        loop {
            match node.next().await {
                Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
                Some(Ok(_)) => {}
            }
        }
    })
    .await;
    assert!(closed.is_ok());

    let body = wait_for_health(&handle, |h| {
        h["metrics"].as_array().is_some_and(|samples| {
            samples.iter().any(|s| s["name"] == "handshake.failures")
        })
    })
    .await;
    assert_eq!(body["nodes"], 0);
    let failure = body["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .find(|s| s["name"] == "handshake.failures")
        .unwrap();
    assert_eq!(failure["labels"], json!([["reason", "timeout"]]));

    handle.shutdown();
    handle.wait().await;
}
