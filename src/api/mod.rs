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
#![warn(missing_docs)]

//! HTTP/WebSocket boundary: router, handlers, and shared node state.

pub mod error;
pub mod routes;
pub mod ws;

use serde_json::Value;
use std::sync::Arc;
use tokio::sync::mpsc;

use crate::core::security::keystore::NodeKeystore;
use crate::core::state::content::ContentStore;
use crate::core::state::store::Store;
use crate::core::types::RelayerConfig;
use crate::monitoring::metrics::Metrics;
use crate::networking::replication::PeerClient;

/// State shared by every handler and background loop.
pub struct AppState {
    /// Node configuration (read-only after startup).
    pub cfg: RelayerConfig,
    /// Durable tables.
    pub store: Store,
    /// Slot blob store.
    pub content: Arc<ContentStore>,
    /// Node signing identity.
    pub keystore: Arc<NodeKeystore>,
    /// Outbound peer HTTP client.
    pub peers: PeerClient,
    /// WebSocket presence map.
    pub online: ws::OnlineMap,
    /// Prometheus registry and instruments.
    pub metrics: Arc<Metrics>,
    /// Queue feeding the replication worker with `(cid, payload)`.
    pub replicate_tx: mpsc::Sender<(String, Value)>,
}
