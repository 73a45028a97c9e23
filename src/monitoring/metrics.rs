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

use prometheus::{Encoder, IntCounter, IntGauge, Registry, TextEncoder};
use thiserror::Error;

/// Metrics errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("prometheus")]
    Prom,
}

/// Metrics container.
#[derive(Clone)]
pub struct Metrics {
    /// Registry.
    pub registry: Registry,

    /// Connected WebSocket clients.
    pub ws_clients: IntGauge,
    /// Known peers after the last heartbeat sweep.
    pub known_peers: IntGauge,
    /// Current chain height.
    pub block_height: IntGauge,

    /// Accepted uploads.
    pub uploads_total: IntCounter,
    /// Message rows created by `deliver`.
    pub messages_delivered_total: IntCounter,
    /// Rows acknowledged by recipients.
    pub messages_acked_total: IntCounter,
    /// Push events handed to live sockets.
    pub pushes_total: IntCounter,
    /// Peer-originated replicate writes accepted.
    pub replicate_in_total: IntCounter,
    /// Outbound replicate calls acknowledged by a peer.
    pub replicate_out_total: IntCounter,
    /// Outbound replicate calls that failed or were rejected.
    pub replicate_out_failed_total: IntCounter,
    /// Proposals sent by the local proposer.
    pub proposals_sent_total: IntCounter,
    /// Proposals received for voting.
    pub proposals_received_total: IntCounter,
    /// Blocks committed locally (own or broadcast).
    pub blocks_committed_total: IntCounter,
}

impl Metrics {
    /// Create and register metrics.
    pub fn new() -> Result<Self, MetricsError> {
        let registry = Registry::new();

        let ws_clients = IntGauge::new("blocknet_ws_clients", "Connected WebSocket clients")
            .map_err(|_| MetricsError::Prom)?;
        let known_peers =
            IntGauge::new("blocknet_known_peers", "Known peers").map_err(|_| MetricsError::Prom)?;
        let block_height = IntGauge::new("blocknet_block_height", "Current chain height")
            .map_err(|_| MetricsError::Prom)?;

        let uploads_total = IntCounter::new("blocknet_uploads_total", "Accepted uploads")
            .map_err(|_| MetricsError::Prom)?;
        let messages_delivered_total =
            IntCounter::new("blocknet_messages_delivered_total", "Message rows created")
                .map_err(|_| MetricsError::Prom)?;
        let messages_acked_total =
            IntCounter::new("blocknet_messages_acked_total", "Rows acknowledged")
                .map_err(|_| MetricsError::Prom)?;
        let pushes_total = IntCounter::new("blocknet_pushes_total", "Push events queued")
            .map_err(|_| MetricsError::Prom)?;
        let replicate_in_total =
            IntCounter::new("blocknet_replicate_in_total", "Peer replicate writes accepted")
                .map_err(|_| MetricsError::Prom)?;
        let replicate_out_total =
            IntCounter::new("blocknet_replicate_out_total", "Outbound replicate calls acknowledged")
                .map_err(|_| MetricsError::Prom)?;
        let replicate_out_failed_total = IntCounter::new(
            "blocknet_replicate_out_failed_total",
            "Outbound replicate calls failed",
        )
        .map_err(|_| MetricsError::Prom)?;
        let proposals_sent_total =
            IntCounter::new("blocknet_proposals_sent_total", "Proposals sent")
                .map_err(|_| MetricsError::Prom)?;
        let proposals_received_total =
            IntCounter::new("blocknet_proposals_received_total", "Proposals received")
                .map_err(|_| MetricsError::Prom)?;
        let blocks_committed_total =
            IntCounter::new("blocknet_blocks_committed_total", "Blocks committed locally")
                .map_err(|_| MetricsError::Prom)?;

        registry
            .register(Box::new(ws_clients.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(known_peers.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(block_height.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(uploads_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_delivered_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(messages_acked_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(pushes_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(replicate_in_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(replicate_out_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(replicate_out_failed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(proposals_sent_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(proposals_received_total.clone()))
            .map_err(|_| MetricsError::Prom)?;
        registry
            .register(Box::new(blocks_committed_total.clone()))
            .map_err(|_| MetricsError::Prom)?;

        Ok(Self {
            registry,
            ws_clients,
            known_peers,
            block_height,
            uploads_total,
            messages_delivered_total,
            messages_acked_total,
            pushes_total,
            replicate_in_total,
            replicate_out_total,
            replicate_out_failed_total,
            proposals_sent_total,
            proposals_received_total,
            blocks_committed_total,
        })
    }

    /// Render the registry in Prometheus text exposition format.
    pub fn render(&self) -> Result<String, MetricsError> {
        let mut buf = Vec::new();
        TextEncoder::new()
            .encode(&self.registry.gather(), &mut buf)
            .map_err(|_| MetricsError::Prom)?;
        String::from_utf8(buf).map_err(|_| MetricsError::Prom)
    }
}
