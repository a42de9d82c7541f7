//! HTTP surface: the node telemetry listener and the feed listener.
//!
//! Nodes upgrade to WebSocket on `/` or `/submit` of the telemetry address.
//! Dashboards upgrade on `/` or `/feed` of the feed address, which also
//! serves `/health`. Both stop on [`ServerHandle::shutdown`].

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::State;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use dotstats_telemetry::MetricsRecorder;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::aggregator::Aggregator;
use crate::connection;
use crate::hub::{self, HubHandle, Identifiers};
use crate::node::{HANDSHAKE_TIMEOUT, NODE_TIMEOUT};

/// Server configuration.
#[derive(Clone, Debug)]
pub struct ServerConfig {
    /// Where nodes connect to report telemetry.
    pub telemetry_addr: SocketAddr,
    /// Where dashboards connect to receive the aggregate feed.
    pub feed_addr: SocketAddr,
    pub handshake_timeout: Duration,
    pub node_timeout: Duration,
    /// How often silent nodes are looked for.
    pub liveness_interval: Duration,
    /// Frames buffered per connection before new ones are dropped.
    pub max_send_queue: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            telemetry_addr: SocketAddr::from(([0, 0, 0, 0], 1024)),
            feed_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            handshake_timeout: HANDSHAKE_TIMEOUT,
            node_timeout: NODE_TIMEOUT,
            liveness_interval: Duration::from_secs(1),
            max_send_queue: 256,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Shared state passed to Axum handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: HubHandle,
    pub metrics: Arc<MetricsRecorder>,
    pub config: Arc<ServerConfig>,
}

/// Routes for reporting nodes.
pub fn telemetry_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(node_ws_handler))
        .route("/submit", get(node_ws_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

/// Routes for dashboards.
pub fn feed_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(feed_ws_handler))
        .route("/feed", get(feed_ws_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

async fn bind(addr: SocketAddr) -> Result<TcpListener, ServerError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })
}

/// Bind both listeners and start serving. Returns a handle to shut it down.
pub async fn start(
    config: ServerConfig,
    metrics: Arc<MetricsRecorder>,
) -> Result<ServerHandle, ServerError> {
    let telemetry_listener = bind(config.telemetry_addr).await?;
    let feed_listener = bind(config.feed_addr).await?;
    let telemetry_port = telemetry_listener.local_addr()?.port();
    let feed_port = feed_listener.local_addr()?.port();

    let cancel = CancellationToken::new();
    let aggregator = Aggregator::with_node_timeout(Arc::clone(&metrics), config.node_timeout);
    let (hub, hub_task) = hub::spawn(
        aggregator,
        Arc::new(Identifiers::default()),
        config.liveness_interval,
        cancel.clone(),
    );

    let state = AppState {
        hub,
        metrics,
        config: Arc::new(config),
    };

    let telemetry = serve(telemetry_listener, telemetry_router(state.clone()), cancel.clone());
    let feed = serve(feed_listener, feed_router(state), cancel.clone());

    tracing::info!(telemetry_port, feed_port, "dotstats server started");

    Ok(ServerHandle {
        telemetry_port,
        feed_port,
        cancel,
        tasks: vec![hub_task, telemetry, feed],
    })
}

fn serve(listener: TcpListener, router: Router, cancel: CancellationToken) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let shutdown = async move { cancel.cancelled().await };
        if let Err(error) = axum::serve(listener, router)
            .with_graceful_shutdown(shutdown)
            .await
        {
            tracing::error!(%error, "listener failed");
        }
    })
}

/// Handle returned by `start()`. Keeps background tasks alive.
pub struct ServerHandle {
    pub telemetry_port: u16,
    pub feed_port: u16,
    cancel: CancellationToken,
    tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ServerHandle {
    /// Stop accepting connections and close the live ones.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    /// Wait for every background task to finish.
    pub async fn wait(self) {
        for task in self.tasks {
            let _ = task.await;
        }
    }
}

async fn node_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| {
        connection::serve_node(
            socket,
            state.hub,
            state.metrics,
            state.config.handshake_timeout,
            state.config.max_send_queue,
        )
    })
}

async fn feed_ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| connection::serve_feed(socket, state.hub, state.config.max_send_queue))
}

/// Health check HTTP endpoint.
async fn health_handler(State(state): State<AppState>) -> impl IntoResponse {
    match state.hub.status().await {
        Some(status) => (
            axum::http::StatusCode::OK,
            Json(serde_json::json!({
                "status": "healthy",
                "nodes": status.nodes,
                "feeds": status.feeds,
                "best_height": status.best_height,
                "metrics": state.metrics.snapshot(),
            })),
        ),
        None => (
            axum::http::StatusCode::SERVICE_UNAVAILABLE,
            Json(serde_json::json!({ "status": "stopped" })),
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn local_config() -> ServerConfig {
        ServerConfig {
            telemetry_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            feed_addr: SocketAddr::from(([127, 0, 0, 1], 0)),
            ..Default::default()
        }
    }

    #[test]
    fn default_config_matches_protocol_constants() {
        let config = ServerConfig::default();
        assert_eq!(config.telemetry_addr.port(), 1024);
        assert_eq!(config.feed_addr.port(), 8080);
        assert_eq!(config.handshake_timeout, Duration::from_millis(5000));
        assert_eq!(config.node_timeout, Duration::from_secs(60));
    }

    #[tokio::test]
    async fn server_starts_and_serves_health() {
        let handle = start(local_config(), Arc::new(MetricsRecorder::new()))
            .await
            .unwrap();
        assert!(handle.telemetry_port > 0);
        assert!(handle.feed_port > 0);

        let url = format!("http://127.0.0.1:{}/health", handle.feed_port);
        let resp = reqwest::get(&url).await.unwrap();
        assert_eq!(resp.status(), 200);

        let body: serde_json::Value = resp.json().await.unwrap();
        assert_eq!(body["status"], "healthy");
        assert_eq!(body["nodes"], 0);
        assert_eq!(body["feeds"], 0);

        handle.shutdown();
        handle.wait().await;
    }

    #[tokio::test]
    async fn bind_conflict_is_reported() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap();
        let config = ServerConfig {
            telemetry_addr: addr,
            ..local_config()
        };

        let err = start(config, Arc::new(MetricsRecorder::new()))
            .await
            .err()
            .unwrap();
        assert!(matches!(err, ServerError::Bind { addr: a, .. } if a == addr));
    }
}
