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

//! Blocknet - federated relayer node for end-to-end encrypted messaging.
//!
//! This repository provides:
//! - Signed deliver/ack relay flow with live WebSocket push
//! - Content-addressed blob storage with local slot redundancy and
//!   best-effort peer replication
//! - A round-based consensus loop appending batches of CIDs to a shared
//!   append-only chain
//! - Peer membership with signed admission, heartbeat, and staleness pruning
//! - Monitoring via Prometheus metrics and structured logging

/// HTTP/WebSocket boundary and shared node state.
pub mod api;
/// Core protocol primitives (types, crypto, consensus, state, security).
pub mod core;
/// Observability (metrics, structured logging helpers).
pub mod monitoring;
/// Peer-facing networking (membership, replication, bootstrap).
pub mod networking;
