// Copyright (c) 2026 Blocknet
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//     http://www.apache.org/licenses/LICENSE-2.0
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! WebSocket push channel and the in-process presence map.
//!
//! `online` maps `lower(address)` to the push sender of the most recent
//! socket; a reconnect replaces the entry, and the entry is removed when
//! its socket closes or a send fails. Push is fire-and-forget: a lost
//! event is recovered by the recipient's pull path.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::api::AppState;
use crate::core::types::PushEvent;

/// Presence map: lowercase address -> push sender of the live socket.
pub type OnlineMap = Arc<Mutex<HashMap<String, mpsc::UnboundedSender<PushEvent>>>>;

/// Create an empty presence map.
pub fn new_online_map() -> OnlineMap {
    Arc::new(Mutex::new(HashMap::new()))
}

/// Queue an event for a recipient if a socket is connected. Returns true
/// when the event was handed to a live channel.
pub fn push_if_online(online: &OnlineMap, recipient: &str, event: PushEvent) -> bool {
    let Ok(guard) = online.lock() else { return false };
    match guard.get(&recipient.to_ascii_lowercase()) {
        Some(tx) => tx.send(event).is_ok(),
        None => false,
    }
}

/// `GET /ws/{address}` upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(address): Path<String>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| serve_socket(socket, address, state))
}

async fn serve_socket(mut socket: WebSocket, address: String, state: Arc<AppState>) {
    let key = address.to_ascii_lowercase();
    let (tx, mut rx) = mpsc::unbounded_channel::<PushEvent>();
    if let Ok(mut guard) = state.online.lock() {
        guard.insert(key.clone(), tx.clone());
    }
    state.metrics.ws_clients.inc();
    info!(address = %address, "ws connected");

    loop {
        tokio::select! {
            inbound = socket.recv() => {
                match inbound {
                    // Clients only send keepalives; content is ignored.
                    Some(Ok(_)) => {}
                    Some(Err(_)) | None => break,
                }
            }
            event = rx.recv() => {
                let Some(event) = event else { break };
                let Ok(text) = serde_json::to_string(&event) else { continue };
                if socket.send(Message::Text(text)).await.is_err() {
                    break;
                }
            }
        }
    }

    // Only drop the entry if it still belongs to this socket; a reconnect
    // may have replaced it while we were shutting down.
    if let Ok(mut guard) = state.online.lock() {
        if guard.get(&key).map(|cur| cur.same_channel(&tx)).unwrap_or(false) {
            guard.remove(&key);
        }
    }
    state.metrics.ws_clients.dec();
    debug!(address = %address, "ws disconnected");
}
