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

//! Startup bootstrap: register with a seed node, pull its peer list.
//!
//! Both steps are best-effort; a missing or unreachable seed leaves the
//! node running on its configured peers. The seed URL comes from the
//! `BOOTSTRAP_NODE` environment variable, falling back to `node_url`
//! (which is skipped, since a node need not register with itself).

use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::api::AppState;
use crate::core::types::unix_now;

const BOOTSTRAP_TIMEOUT: Duration = Duration::from_secs(5);

/// Resolve the seed node URL for this process.
pub fn bootstrap_url(node_url: &str) -> Option<String> {
    let seed = std::env::var("BOOTSTRAP_NODE")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .unwrap_or_else(|| node_url.to_string());
    let seed = seed.trim_end_matches('/').to_string();
    if seed.is_empty() || seed == node_url.trim_end_matches('/') {
        return None;
    }
    Some(seed)
}

/// Register this node with the seed via a signed `register_peer` call.
/// Signed even when the seed does not require auth, so it works either way.
pub async fn register_with_bootstrap(state: &Arc<AppState>, seed: &str) {
    let node_url = state.cfg.node_url.trim_end_matches('/');
    let ts = unix_now();
    let address = state.keystore.address().to_string();
    let message = format!("register|{node_url}|{ts}|{address}");
    let signature = match state.keystore.sign_text(&message) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(err = %e, "bootstrap registration signing failed");
            return;
        }
    };

    let body = json!({
        "url": node_url,
        "address": address,
        "timestamp": ts,
        "signature": signature,
    });
    let (status, _) = state
        .peers
        .post_json(seed, "/api/register_peer", &body, BOOTSTRAP_TIMEOUT)
        .await;
    if status == 200 {
        info!(seed, "registered with bootstrap node");
    } else {
        warn!(seed, status, "bootstrap registration failed");
    }
}

/// Pull the seed's peer list and upsert every non-self entry.
pub async fn fetch_peer_list(state: &Arc<AppState>, seed: &str) {
    let url = format!("{}/api/peers", seed.trim_end_matches('/'));
    let resp = match reqwest::Client::new()
        .get(&url)
        .timeout(BOOTSTRAP_TIMEOUT)
        .send()
        .await
    {
        Ok(r) => r,
        Err(e) => {
            warn!(seed, err = %e, "peer list fetch failed");
            return;
        }
    };
    if resp.status().as_u16() != 200 {
        warn!(seed, status = resp.status().as_u16(), "peer list fetch non-200");
        return;
    }
    let body: Value = resp.json().await.unwrap_or_else(|_| json!({}));
    let peers = body
        .get("peers")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let node_url = state.cfg.node_url.trim_end_matches('/');
    let now = unix_now();
    let mut synced = 0usize;
    for peer in &peers {
        let Some(url) = peer.get("url").and_then(Value::as_str) else { continue };
        let url = url.trim_end_matches('/');
        if url.is_empty() || url == node_url {
            continue;
        }
        if state.store.upsert_peer(url, now).is_ok() {
            synced += 1;
        }
    }
    info!(seed, synced, "synced peers from bootstrap");
}
