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

//! Core data model and canonical JSON encoding helpers.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Canonical serialization error.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("serialization")]
    Serialize,
    #[error("deserialization")]
    Deserialize,
    #[error("size limit exceeded")]
    TooLarge,
}

/// Canonical JSON encoding: UTF-8, object keys sorted lexically at every
/// level, minimal separators. `serde_json` without `preserve_order` keeps
/// object maps in a `BTreeMap`, so plain compact serialization is canonical.
pub fn canonical_json(value: &Value) -> Result<String, CodecError> {
    serde_json::to_string(value).map_err(|_| CodecError::Serialize)
}

/// Decode a JSON document with a hard size cap on the raw bytes.
pub fn decode_json_limited(bytes: &[u8], max: usize) -> Result<Value, CodecError> {
    if bytes.len() > max {
        return Err(CodecError::TooLarge);
    }
    serde_json::from_slice(bytes).map_err(|_| CodecError::Deserialize)
}

/// A registered user. `address` is the hex-encoded Ethereum-style address
/// derived from the user's signing key and is the primary identity.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct User {
    /// 0x-hex address, stored lowercase.
    pub address: String,
    /// Base64 Curve25519 public encryption key.
    pub enc_pub: String,
    /// Signing public key (clients submit their address here).
    pub sign_pub: String,
    /// Unix seconds of first registration.
    pub created_at: u64,
}

/// One delivered-message row. `delivered` and `committed` are independent
/// one-way flags (`ack`/push flips the first, block commit the second).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MessageRecord {
    /// Monotonic row id.
    pub id: u64,
    /// Content id of the payload blob.
    pub cid: String,
    /// Sender address.
    pub sender: String,
    /// Recipient address.
    pub recipient: String,
    /// Sender-supplied unix timestamp (not validated for monotonicity).
    pub timestamp: u64,
    /// Best-effort delivery hint; `ack` is the authoritative transition.
    pub delivered: bool,
    /// Deterministic conversation root for the participant pair.
    pub root_id: String,
    /// Time-windowed session id within the root.
    pub session_id: String,
    /// Set once the cid is included in a committed block.
    #[serde(default)]
    pub committed: bool,
}

/// An appended chain block: an ordered batch of CIDs linked to the previous
/// block by hash and signed by its proposer.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Block {
    /// Monotonic chain index (1-based).
    pub idx: u64,
    /// Block hash of the predecessor, or the 64-zero genesis sentinel.
    pub previous_hash: String,
    /// Ordered-digest commitment over `cids`.
    pub merkle_root: String,
    /// CIDs included in this block, in proposal order.
    pub cids: Vec<String>,
    /// Proposer address.
    pub proposer: String,
    /// Proposer signature over the canonical proposal tuple.
    pub signature: String,
    /// Unix seconds at commit time.
    pub timestamp: u64,
}

/// A signed block proposal as sent to peers for voting.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BlockProposal {
    /// Chain head the proposer observed.
    pub previous_hash: String,
    /// Ordered-digest commitment over `cids`.
    pub merkle_root: String,
    /// Proposed batch.
    pub cids: Vec<String>,
    /// Proposer address.
    pub proposer: String,
    /// Unix seconds at proposal time.
    pub timestamp: u64,
    /// Proposer signature over the canonical proposal tuple.
    pub signature: String,
}

/// A known peer: canonical origin URL plus freshness stamp.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeerInfo {
    /// Canonical origin, `scheme://host[:port]`, no trailing slash.
    pub url: String,
    /// Unix seconds of the last successful contact.
    pub last_seen: u64,
}

/// WebSocket push event sent to an online recipient.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushEvent {
    /// Always `"new_message"`.
    pub event: String,
    /// Content id of the payload blob.
    pub cid: String,
    /// Sender address.
    pub sender: String,
    /// Recipient address.
    pub recipient: String,
    /// Sender-supplied unix timestamp.
    pub timestamp: u64,
    /// Conversation root.
    #[serde(rename = "rootId")]
    pub root_id: String,
    /// Session id.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// Message row id (what the recipient acks).
    pub id: u64,
}

/// Node configuration root. Every field has a default so a missing file
/// yields a runnable single-node configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayerConfig {
    /// This node's own canonical origin.
    pub node_url: String,
    /// Static seed peer list (also the majority denominator).
    pub peers: Vec<String>,
    /// Local slot count and peer replication factor.
    pub redundancy: usize,
    /// Proposer tick interval.
    pub proposal_interval_seconds: u64,
    /// Fraction of configured peers required for commit.
    pub majority_fraction: f64,
    /// Root directory of the slot content store.
    pub relayer_storage_path: String,
    /// Upload cap on the canonical payload encoding.
    pub max_payload_bytes: usize,
    /// Per-slot directory quota in bytes.
    pub slot_quota_bytes: u64,
    /// Peer heartbeat tick interval.
    pub peer_heartbeat_interval_secs: u64,
    /// Freshness window; peers older than this are pruned / inactive.
    pub peer_stale_after_secs: u64,
    /// Require signed, timestamped peer registration.
    pub require_peer_auth: bool,
    /// Allowed peer addresses when auth is required (empty => any).
    pub peer_allowlist: Vec<String>,
    /// Accept localhost / RFC1918 peer hosts.
    pub allow_local_peers: bool,
    /// Session id rotation window in seconds.
    pub session_window_secs: u64,
    /// Directory holding the node signing key.
    pub data_dir: String,
    /// Directory of the sled database.
    pub db_path: String,
    /// HTTP/WebSocket listen address.
    pub http_listen_addr: String,
    /// Emit JSON-formatted logs.
    pub log_json: bool,
}

impl Default for RelayerConfig {
    fn default() -> Self {
        Self {
            node_url: "http://127.0.0.1:3000".to_string(),
            peers: Vec::new(),
            redundancy: 3,
            proposal_interval_seconds: 20,
            majority_fraction: 0.51,
            relayer_storage_path: "relayer_storage".to_string(),
            max_payload_bytes: 10_485_760,
            slot_quota_bytes: 5 * 1024 * 1024 * 1024,
            peer_heartbeat_interval_secs: 60,
            peer_stale_after_secs: 300,
            require_peer_auth: false,
            peer_allowlist: Vec::new(),
            allow_local_peers: true,
            session_window_secs: 3600,
            data_dir: "data".to_string(),
            db_path: "data/db".to_string(),
            http_listen_addr: "0.0.0.0:3000".to_string(),
            log_json: false,
        }
    }
}

/// Config load error.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("read config: {0}")]
    Read(std::io::Error),
    #[error("parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

impl RelayerConfig {
    /// Load from a TOML file; a missing file yields the defaults.
    pub fn load(path: &str) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(raw) => Ok(toml::from_str(&raw)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(e) => Err(ConfigError::Read(e)),
        }
    }
}

/// Current unix time in whole seconds.
pub fn unix_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
