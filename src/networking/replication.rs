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

//! Outbound peer HTTP: replication fan-out, proposal solicitation, and
//! committed-block broadcast.
//!
//! All calls are best-effort. A reply with status < 500 refreshes the
//! peer's `last_seen`; failures are reported as status 500 with an error
//! body and never propagate to the caller.

use futures::future::join_all;
use rand::seq::SliceRandom;
use serde::Serialize;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::core::state::store::Store;
use crate::core::types::{unix_now, Block, BlockProposal, RelayerConfig};
use crate::monitoring::metrics::Metrics;

/// Default per-request timeout for peer calls.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
/// Longer timeout for vote solicitation.
const PROPOSAL_TIMEOUT: Duration = Duration::from_secs(15);

/// Shared outbound HTTP client bound to the peer table.
#[derive(Clone)]
pub struct PeerClient {
    http: reqwest::Client,
    store: Store,
    node_url: String,
    seed_peers: Vec<String>,
    replication_factor: usize,
    stale_after_secs: u64,
}

impl PeerClient {
    /// Build a client from node configuration.
    pub fn new(store: Store, cfg: &RelayerConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            http,
            store,
            node_url: cfg.node_url.trim_end_matches('/').to_string(),
            seed_peers: cfg.peers.clone(),
            replication_factor: cfg.redundancy,
            stale_after_secs: cfg.peer_stale_after_secs,
        }
    }

    /// POST a JSON body to `{peer}{path}`. Returns `(status, body)`;
    /// transport failures come back as `(500, {error})`.
    pub async fn post_json<T: Serialize>(
        &self,
        peer: &str,
        path: &str,
        body: &T,
        timeout: Duration,
    ) -> (u16, Value) {
        let url = format!("{}{}", peer.trim_end_matches('/'), path);
        let res = self.http.post(&url).timeout(timeout).json(body).send().await;
        match res {
            Ok(resp) => {
                let status = resp.status().as_u16();
                if status < 500 {
                    let _ = self.store.upsert_peer(peer.trim_end_matches('/'), unix_now());
                }
                let body = resp.json::<Value>().await.unwrap_or_else(|_| json!({}));
                (status, body)
            }
            Err(e) => (500, json!({ "error": e.to_string() })),
        }
    }

    /// GET a peer's `/health`; true on a 200.
    pub async fn health_check(&self, peer: &str) -> Result<bool, reqwest::Error> {
        let url = format!("{}/health", peer.trim_end_matches('/'));
        let resp = self
            .http
            .get(&url)
            .timeout(Duration::from_secs(3))
            .send()
            .await?;
        Ok(resp.status().as_u16() == 200)
    }

    /// Active peer origins, deduplicated, excluding this node. Falls back
    /// to the configured seed list while the peer table is empty.
    fn targets(&self) -> Vec<String> {
        let cutoff = unix_now().saturating_sub(self.stale_after_secs);
        let db_peers: Vec<String> = self
            .store
            .list_peers(Some(cutoff))
            .map(|peers| peers.into_iter().map(|p| p.url).collect())
            .unwrap_or_default();
        let pool = if db_peers.is_empty() { self.seed_peers.clone() } else { db_peers };

        let mut cleaned: Vec<String> = Vec::new();
        for p in pool {
            let base = p.trim_end_matches('/').to_string();
            if base.is_empty() || base == self.node_url || cleaned.contains(&base) {
                continue;
            }
            cleaned.push(base);
        }
        cleaned
    }

    /// Fan a payload out to up to `min(redundancy, |peers|)` random active
    /// peers. Failures are logged and swallowed; durability rests on the
    /// origin node's local slots. Returns `(acknowledged, attempted)`.
    pub async fn replicate_to_peers(&self, cid: &str, payload: &Value) -> (usize, usize) {
        let mut pool = self.targets();
        let k = self.replication_factor.min(pool.len());
        if k == 0 {
            return (0, 0);
        }
        pool.shuffle(&mut rand::thread_rng());
        pool.truncate(k);
        debug!(cid = %&cid[..8.min(cid.len())], peers = ?pool, "replicating payload");

        let body = json!({ "cid": cid, "payload": payload });
        let calls = pool
            .iter()
            .map(|p| self.post_json(p, "/api/replicate", &body, DEFAULT_TIMEOUT));
        let results = join_all(calls).await;

        let ok = results.iter().filter(|(status, _)| *status == 200).count();
        if ok < k {
            warn!(cid = %&cid[..8.min(cid.len())], ok, attempted = k, "partial replication");
        }
        (ok, k)
    }

    /// Solicit votes on a proposal from every active peer concurrently.
    pub async fn send_proposal_to_peers(&self, proposal: &BlockProposal) -> Vec<(u16, Value)> {
        let pool = self.targets();
        let calls = pool
            .iter()
            .map(|p| self.post_json(p, "/api/proposal", proposal, PROPOSAL_TIMEOUT));
        join_all(calls).await
    }

    /// Broadcast a freshly committed block to every active peer.
    pub async fn broadcast_block(&self, block: &Block) {
        let pool = self.targets();
        if pool.is_empty() {
            return;
        }
        let calls = pool
            .iter()
            .map(|p| self.post_json(p, "/api/block", block, DEFAULT_TIMEOUT));
        let results = join_all(calls).await;
        let ok = results.iter().filter(|(status, _)| *status == 200).count();
        info!(idx = block.idx, ok, peers = pool.len(), "block broadcast");
    }
}

async fn fan_out_counted(client: &PeerClient, metrics: &Metrics, cid: &str, payload: &Value) {
    let (ok, attempted) = client.replicate_to_peers(cid, payload).await;
    metrics.replicate_out_total.inc_by(ok as u64);
    metrics
        .replicate_out_failed_total
        .inc_by(attempted.saturating_sub(ok) as u64);
}

/// Spawn the replication worker. Uploads enqueue `(cid, payload)`; the
/// worker fans each item out in turn, counting acknowledged and failed
/// peer copies. On shutdown it drains what is already queued, then exits,
/// so accepted uploads still get their peer copies before the node stops.
pub fn spawn_replicator(
    client: PeerClient,
    metrics: Arc<Metrics>,
    mut rx: mpsc::Receiver<(String, Value)>,
    mut shutdown: tokio::sync::watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                item = rx.recv() => match item {
                    Some((cid, payload)) => {
                        fan_out_counted(&client, &metrics, &cid, &payload).await;
                    }
                    None => break,
                },
                _ = shutdown.changed() => {
                    while let Ok((cid, payload)) = rx.try_recv() {
                        fan_out_counted(&client, &metrics, &cid, &payload).await;
                    }
                    break;
                }
            }
        }
        debug!("replication worker drained");
    })
}
