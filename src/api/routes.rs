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

//! HTTP surface of the relayer node.

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;
use tracing::warn;

use crate::api::error::ApiError;
use crate::api::ws;
use crate::api::AppState;
use crate::core::consensus::ledger::{self, LedgerError, VoteOutcome};
use crate::core::crypto::{conversation_root, is_valid_enc_pub, session_id, verify_personal};
use crate::core::types::{canonical_json, unix_now, Block, BlockProposal, MessageRecord, PushEvent, User};
use crate::networking::peer_registry::{admit_peer, RegisterPeerRequest};

/// Build the node router.
pub fn router(state: Arc<AppState>) -> Router {
    // Json extractors must admit payloads up to the configured cap; the
    // precise canonical-size check happens in the upload handler.
    let body_limit = state.cfg.max_payload_bytes + 64 * 1024;
    Router::new()
        .route("/api/register", post(register_user))
        .route("/api/user/:address", get(get_user))
        .route("/api/users", get(list_users))
        .route("/api/uploadEncrypted", post(upload_encrypted))
        .route("/api/replicate", post(replicate))
        .route("/api/deliver", post(deliver))
        .route("/api/ack", post(ack))
        .route("/api/messages/:address", get(undelivered))
        .route("/api/fetch/:cid", get(fetch))
        .route("/api/conversation/:root_id", get(conversation))
        .route("/api/proposal", post(receive_proposal))
        .route("/api/block", post(receive_block))
        .route("/api/register_peer", post(register_peer))
        .route("/api/peers", get(list_peers))
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws/:address", get(ws::ws_handler))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

fn message_json(rec: &MessageRecord) -> Value {
    json!({
        "id": rec.id,
        "cid": rec.cid,
        "sender": rec.sender,
        "recipient": rec.recipient,
        "timestamp": rec.timestamp,
        "rootId": rec.root_id,
        "sessionId": rec.session_id,
    })
}

// ---- users ----

#[derive(Deserialize)]
struct RegisterUserRequest {
    address: String,
    #[serde(rename = "encPub")]
    enc_pub: String,
    #[serde(rename = "signPub")]
    sign_pub: String,
}

async fn register_user(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterUserRequest>,
) -> Result<Json<Value>, ApiError> {
    if req.address.is_empty() || req.enc_pub.is_empty() || req.sign_pub.is_empty() {
        return Err(ApiError::BadRequest("missing fields".to_string()));
    }
    if !is_valid_enc_pub(&req.enc_pub) {
        return Err(ApiError::BadRequest("invalid encPub".to_string()));
    }
    let user = User {
        address: req.address.clone(),
        enc_pub: req.enc_pub,
        sign_pub: req.sign_pub,
        created_at: unix_now(),
    };
    state.store.upsert_user(&user)?;
    Ok(Json(json!({ "ok": true, "address": req.address })))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let user = state
        .store
        .get_user(&address)?
        .ok_or_else(|| ApiError::NotFound("User not found".to_string()))?;
    Ok(Json(json!({
        "address": user.address,
        "encPub": user.enc_pub,
        "signPub": user.sign_pub,
    })))
}

async fn list_users(State(state): State<Arc<AppState>>) -> Result<Json<Value>, ApiError> {
    let users: Vec<Value> = state
        .store
        .list_users()?
        .into_iter()
        .map(|u| json!({ "address": u.address, "encPub": u.enc_pub }))
        .collect();
    Ok(Json(json!({ "ok": true, "users": users })))
}

// ---- payloads ----

#[derive(Deserialize)]
struct UploadRequest {
    payload: Value,
}

async fn upload_encrypted(
    State(state): State<Arc<AppState>>,
    Json(req): Json<UploadRequest>,
) -> Result<Json<Value>, ApiError> {
    if !req.payload.is_object() {
        return Err(ApiError::BadRequest("payload must be an object".to_string()));
    }
    let canonical = canonical_json(&req.payload)
        .map_err(|_| ApiError::BadRequest("unencodable payload".to_string()))?;
    if canonical.len() > state.cfg.max_payload_bytes {
        return Err(ApiError::PayloadTooLarge);
    }

    let cid = state.content.store_local(&req.payload)?;
    state.metrics.uploads_total.inc();

    // Replication is best-effort and detached from the response; a full
    // queue only costs the peer copies, never the upload.
    if state.replicate_tx.try_send((cid.clone(), req.payload)).is_err() {
        warn!(cid = %cid, "replication queue full; skipping fan-out");
    }
    Ok(Json(json!({ "ok": true, "cid": cid })))
}

#[derive(Deserialize)]
struct ReplicateRequest {
    cid: String,
    payload: Value,
}

async fn replicate(
    State(state): State<Arc<AppState>>,
    Json(req): Json<ReplicateRequest>,
) -> Result<Json<Value>, ApiError> {
    state.content.store_to_slot(&req.cid, &req.payload, 0)?;
    state.metrics.replicate_in_total.inc();
    Ok(Json(json!({ "ok": true, "cid": req.cid })))
}

async fn fetch(
    State(state): State<Arc<AppState>>,
    Path(cid): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let payload = state
        .content
        .fetch_local(&cid)
        .ok_or_else(|| ApiError::NotFound("not found".to_string()))?;
    Ok(Json(json!({ "payload": payload })))
}

// ---- message flow ----

#[derive(Deserialize)]
struct DeliverRequest {
    #[serde(default)]
    cid: Option<String>,
    #[serde(default)]
    sender: Option<String>,
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default)]
    timestamp: Option<u64>,
    #[serde(default, rename = "ethSignature")]
    eth_signature: Option<String>,
    #[serde(default, rename = "sessionId")]
    session_id: Option<String>,
}

async fn deliver(
    State(state): State<Arc<AppState>>,
    Json(req): Json<DeliverRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(cid), Some(sender), Some(recipient), Some(timestamp), Some(signature)) = (
        req.cid.filter(|s| !s.is_empty()),
        req.sender.filter(|s| !s.is_empty()),
        req.recipient.filter(|s| !s.is_empty()),
        req.timestamp,
        req.eth_signature.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("missing fields".to_string()));
    };

    let text = format!("{cid}|{sender}|{recipient}|{timestamp}");
    if !verify_personal(&sender, &text, &signature) {
        return Err(ApiError::BadRequest("signature mismatch".to_string()));
    }

    let root_id = conversation_root(&sender, &recipient);
    let sid = req
        .session_id
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| session_id(&root_id, timestamp, state.cfg.session_window_secs));

    let rec = state
        .store
        .insert_message(&cid, &sender, &recipient, timestamp, &root_id, &sid)?;
    state.metrics.messages_delivered_total.inc();

    let event = PushEvent {
        event: "new_message".to_string(),
        cid,
        sender,
        recipient: recipient.clone(),
        timestamp,
        root_id,
        session_id: sid,
        id: rec.id,
    };
    if ws::push_if_online(&state.online, &recipient, event) {
        // Optimistic: the push was queued, not confirmed. `ack` remains the
        // authoritative transition; a lost socket is covered by the
        // recipient's pull path.
        state.store.set_delivered(&[rec.id])?;
        state.metrics.pushes_total.inc();
    }

    Ok(Json(json!({ "ok": true, "id": rec.id })))
}

#[derive(Deserialize)]
struct AckRequest {
    #[serde(default)]
    recipient: Option<String>,
    #[serde(default, rename = "messageIds")]
    message_ids: Vec<u64>,
    #[serde(default, rename = "ethSignature")]
    eth_signature: Option<String>,
}

async fn ack(
    State(state): State<Arc<AppState>>,
    Json(req): Json<AckRequest>,
) -> Result<Json<Value>, ApiError> {
    let (Some(recipient), Some(signature)) = (
        req.recipient.filter(|s| !s.is_empty()),
        req.eth_signature.filter(|s| !s.is_empty()),
    ) else {
        return Err(ApiError::BadRequest("missing fields".to_string()));
    };
    if req.message_ids.is_empty() {
        return Err(ApiError::BadRequest("missing fields".to_string()));
    }

    let ids_text = req
        .message_ids
        .iter()
        .map(|id| id.to_string())
        .collect::<Vec<_>>()
        .join(",");
    let text = format!("ack|{recipient}|{ids_text}");
    if !verify_personal(&recipient, &text, &signature) {
        return Err(ApiError::BadRequest("signature mismatch".to_string()));
    }

    state.store.set_delivered(&req.message_ids)?;
    state.metrics.messages_acked_total.inc_by(req.message_ids.len() as u64);
    Ok(Json(json!({ "ok": true, "acknowledged": req.message_ids })))
}

async fn undelivered(
    State(state): State<Arc<AppState>>,
    Path(address): Path<String>,
) -> Result<Json<Value>, ApiError> {
    let rows = state.store.undelivered_for(&address)?;
    let messages: Vec<Value> = rows.iter().map(message_json).collect();
    Ok(Json(json!({ "messages": messages })))
}

#[derive(Deserialize)]
struct ConversationQuery {
    #[serde(default)]
    limit: Option<i64>,
    #[serde(default)]
    before: Option<u64>,
}

async fn conversation(
    State(state): State<Arc<AppState>>,
    Path(root_id): Path<String>,
    Query(q): Query<ConversationQuery>,
) -> Result<Json<Value>, ApiError> {
    let limit = match q.limit {
        Some(l) if l > 0 => (l as usize).min(500),
        _ => 50,
    };
    let rows = state.store.conversation(&root_id, limit, q.before)?;
    let messages: Vec<Value> = rows.iter().map(message_json).collect();
    Ok(Json(json!({ "rootId": root_id, "messages": messages })))
}

// ---- consensus ----

async fn receive_proposal(
    State(state): State<Arc<AppState>>,
    Json(proposal): Json<BlockProposal>,
) -> Result<Json<Value>, ApiError> {
    state.metrics.proposals_received_total.inc();
    let outcome = ledger::evaluate_proposal(&state.store, &state.content, &proposal)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    // A rejected proposal is a vote, not an HTTP error.
    let body = match outcome {
        VoteOutcome::Yes { have_count } => json!({ "vote": true, "have_count": have_count }),
        VoteOutcome::No { reason } => json!({ "vote": false, "reason": reason }),
    };
    Ok(Json(body))
}

async fn receive_block(
    State(state): State<Arc<AppState>>,
    Json(block): Json<Block>,
) -> Result<Json<Value>, ApiError> {
    match ledger::accept_block(&state.store, &block) {
        Ok(idx) => {
            state.metrics.blocks_committed_total.inc();
            state.metrics.block_height.set(idx as i64);
            Ok(Json(json!({ "ok": true, "idx": idx })))
        }
        Err(LedgerError::InvalidBlock(reason)) => Err(ApiError::BadRequest(reason.to_string())),
        Err(e) => Err(ApiError::Internal(e.to_string())),
    }
}

// ---- peers ----

async fn register_peer(
    State(state): State<Arc<AppState>>,
    Json(req): Json<RegisterPeerRequest>,
) -> Result<Json<Value>, ApiError> {
    let canon = admit_peer(&state.cfg, &req, unix_now())?;
    state.store.upsert_peer(&canon, unix_now())?;
    tracing::info!(peer = %canon, "registered peer");
    Ok(Json(json!({ "ok": true, "peer": canon })))
}

#[derive(Deserialize)]
struct PeersQuery {
    #[serde(default, rename = "activeOnly")]
    active_only: Option<bool>,
    #[serde(default, rename = "staleSeconds")]
    stale_seconds: Option<u64>,
}

async fn list_peers(
    State(state): State<Arc<AppState>>,
    Query(q): Query<PeersQuery>,
) -> Result<Json<Value>, ApiError> {
    let cutoff = if q.active_only.unwrap_or(true) {
        let stale = q.stale_seconds.unwrap_or(state.cfg.peer_stale_after_secs);
        Some(unix_now().saturating_sub(stale))
    } else {
        None
    };
    let peers: Vec<Value> = state
        .store
        .list_peers(cutoff)?
        .into_iter()
        .map(|p| json!({ "url": p.url, "last_seen": p.last_seen }))
        .collect();
    Ok(Json(json!({ "ok": true, "peers": peers })))
}

// ---- node ----

async fn health(State(state): State<Arc<AppState>>) -> Json<Value> {
    Json(json!({ "ok": true, "node": state.keystore.address() }))
}

async fn metrics(State(state): State<Arc<AppState>>) -> Result<String, ApiError> {
    state
        .metrics
        .render()
        .map_err(|e| ApiError::Internal(e.to_string()))
}
