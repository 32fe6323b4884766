//! Websocket push sessions held by this process.

use crate::notifier::{PushEndpoint, PushOutcome};
use crate::sessions::SessionRegistry;
use anyhow::Result;
use async_trait::async_trait;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures::{SinkExt, StreamExt};
use parking_lot::RwLock;
use serde::Deserialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const OUTBOUND_BUFFER: usize = 32;

/// Outbound channels of the sockets attached to this process
#[derive(Default)]
pub struct PushHub {
    sessions: RwLock<HashMap<String, mpsc::Sender<Vec<u8>>>>,
}

impl PushHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a session and return the receiving end of its channel
    pub fn attach(&self, session_id: &str) -> mpsc::Receiver<Vec<u8>> {
        let (tx, rx) = mpsc::channel(OUTBOUND_BUFFER);
        self.sessions.write().insert(session_id.to_string(), tx);
        rx
    }

    pub fn detach(&self, session_id: &str) {
        self.sessions.write().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }
}

#[async_trait]
impl PushEndpoint for PushHub {
    async fn send(&self, session_id: &str, payload: Vec<u8>) -> Result<PushOutcome> {
        let sender = self.sessions.read().get(session_id).cloned();
        let Some(sender) = sender else {
            return Ok(PushOutcome::Gone);
        };

        if sender.send(payload).await.is_err() {
            self.detach(session_id);
            return Ok(PushOutcome::Gone);
        }

        Ok(PushOutcome::Delivered)
    }
}

#[derive(Clone)]
struct GatewayState {
    hub: Arc<PushHub>,
    registry: Arc<dyn SessionRegistry>,
}

#[derive(Debug, Deserialize)]
struct ConnectParams {
    email: String,
}

/// `GET /ws?email=<owner>`
pub fn routes(hub: Arc<PushHub>, registry: Arc<dyn SessionRegistry>) -> Router {
    Router::new()
        .route("/ws", get(connect))
        .with_state(GatewayState { hub, registry })
}

async fn connect(
    ws: WebSocketUpgrade,
    Query(params): Query<ConnectParams>,
    State(state): State<GatewayState>,
) -> Response {
    ws.on_upgrade(move |socket| run_session(socket, params.email, state))
}

async fn run_session(socket: WebSocket, owner: String, state: GatewayState) {
    let session_id = Uuid::new_v4().to_string();

    if let Err(e) = state.registry.put(&session_id, &owner).await {
        warn!(owner = %owner, error = %e, "Failed to register push session, closing socket");
        return;
    }
    let mut outbound = state.hub.attach(&session_id);
    metrics::gauge!("photos.push.sessions").set(state.hub.session_count() as f64);
    info!(session_id = %session_id, owner = %owner, "Push session connected");

    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            payload = outbound.recv() => {
                let Some(payload) = payload else { break };
                let text = String::from_utf8_lossy(&payload).into_owned();
                if let Err(e) = sink.send(Message::Text(text)).await {
                    debug!(session_id = %session_id, error = %e, "Socket write failed");
                    break;
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(e)) => {
                        debug!(session_id = %session_id, error = %e, "Socket read failed");
                        break;
                    }
                    Some(Ok(_)) => {}
                }
            }
        }
    }

    state.hub.detach(&session_id);
    metrics::gauge!("photos.push.sessions").set(state.hub.session_count() as f64);

    if let Err(e) = state.registry.delete(&session_id).await {
        warn!(session_id = %session_id, error = %e, "Failed to remove push session");
    }
    info!(session_id = %session_id, "Push session disconnected");
}
