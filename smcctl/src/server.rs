//! HTTP surface: viewer notifications (SSE and websocket), the join-now playlist and static files.

use std::path::Path;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::stream::{self, Stream};
use smc_core::{JoinNowPlaylist, StationHandle, Viewer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{debug, error};

pub const HLS_CONTENT_TYPE: &str = "application/vnd.apple.mpegurl";

#[derive(Clone)]
pub struct ServerState {
    handle: StationHandle,
    join_now: Arc<JoinNowPlaylist>,
}

impl ServerState {
    pub fn new(handle: StationHandle, join_now: Arc<JoinNowPlaylist>) -> Self {
        Self { handle, join_now }
    }
}

pub fn build_router(state: ServerState, static_dir: &Path) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/events", get(events))
        .route("/ws", get(websocket))
        .route("/program/now.m3u8", get(join_now))
        .fallback_service(ServeDir::new(static_dir))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok"
}

/// Deregisters the viewer when the client goes away and the stream is dropped.
struct ViewerStream {
    viewer: Viewer,
    handle: StationHandle,
}

impl Drop for ViewerStream {
    fn drop(&mut self) {
        debug!(viewer = %self.viewer.id(), "event stream closed");
        self.handle.disconnect(self.viewer.id());
    }
}

async fn events(
    State(state): State<ServerState>,
) -> Result<Sse<impl Stream<Item = Result<Event, axum::Error>>>, StatusCode> {
    let viewer = state
        .handle
        .connect()
        .await
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)?;
    debug!(viewer = %viewer.id(), "event stream opened");
    let session = ViewerStream {
        viewer,
        handle: state.handle.clone(),
    };
    let stream = stream::unfold(session, |mut session| async move {
        let action = session.viewer.next_action().await?;
        Some((Event::default().json_data(&action), session))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

async fn websocket(ws: WebSocketUpgrade, State(state): State<ServerState>) -> Response {
    ws.on_upgrade(move |socket| viewer_socket(socket, state.handle))
}

/// Pushes viewer actions as JSON text frames until either side goes away.
async fn viewer_socket(mut socket: WebSocket, handle: StationHandle) {
    let viewer = match handle.connect().await {
        Ok(viewer) => viewer,
        Err(err) => {
            debug!(error = %err, "websocket refused");
            let _ = socket.close().await;
            return;
        }
    };
    debug!(viewer = %viewer.id(), "websocket opened");
    let mut session = ViewerStream { viewer, handle };

    loop {
        tokio::select! {
            action = session.viewer.next_action() => {
                let Some(action) = action else { break };
                let text = match serde_json::to_string(&action) {
                    Ok(text) => text,
                    Err(err) => {
                        error!(error = %err, "viewer action not serializable");
                        break;
                    }
                };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
            incoming = socket.recv() => match incoming {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => break,
                Some(Ok(_)) => {}
            },
        }
    }
    let _ = socket.close().await;
}

async fn join_now(State(state): State<ServerState>) -> Response {
    match state.join_now.refresh().await {
        Ok(playlist) => (
            [
                (header::CONTENT_TYPE, HLS_CONTENT_TYPE),
                (header::CACHE_CONTROL, "no-cache"),
            ],
            playlist,
        )
            .into_response(),
        Err(err) => {
            error!(error = %err, "join-now playlist refresh failed");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
