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

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use k256::ecdsa::SigningKey;
use serde_json::{json, Value};
use tower::ServiceExt;

use blocknet::api::{routes, ws, AppState};
use blocknet::core::consensus::signing::{
    merkle_root_from_cids, proposal_signing_text, GENESIS_HEAD,
};
use blocknet::core::crypto::{
    address_from_key, cid_from_payload, conversation_root, session_id, sign_personal,
};
use blocknet::core::security::keystore::NodeKeystore;
use blocknet::core::state::content::ContentStore;
use blocknet::core::state::store::Store;
use blocknet::core::types::RelayerConfig;
use blocknet::monitoring::metrics::Metrics;
use blocknet::networking::replication::PeerClient;

struct Harness {
    router: Router,
    state: Arc<AppState>,
    _dirs: (tempfile::TempDir, tempfile::TempDir, tempfile::TempDir),
    _replicate_rx: tokio::sync::mpsc::Receiver<(String, Value)>,
}

fn harness() -> Harness {
    let db_dir = tempfile::tempdir().unwrap();
    let blob_dir = tempfile::tempdir().unwrap();
    let key_dir = tempfile::tempdir().unwrap();

    let cfg = RelayerConfig::default();
    let store = Store::open(db_dir.path().to_str().unwrap()).unwrap();
    let content = Arc::new(
        ContentStore::open(blob_dir.path().to_str().unwrap(), cfg.redundancy, cfg.slot_quota_bytes)
            .unwrap(),
    );
    let keystore = Arc::new(NodeKeystore::open(key_dir.path().to_str().unwrap()).unwrap());
    let peers = PeerClient::new(store.clone(), &cfg);
    let (replicate_tx, replicate_rx) = tokio::sync::mpsc::channel(16);

    let state = Arc::new(AppState {
        cfg,
        store,
        content,
        keystore,
        peers,
        online: ws::new_online_map(),
        metrics: Arc::new(Metrics::new().unwrap()),
        replicate_tx,
    });
    Harness {
        router: routes::router(state.clone()),
        state,
        _dirs: (db_dir, blob_dir, key_dir),
        _replicate_rx: replicate_rx,
    }
}

async fn post(router: &Router, path: &str, body: Value) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(
            Request::builder()
                .method("POST")
                .uri(path)
                .header("content-type", "application/json")
                .body(Body::from(serde_json::to_vec(&body).unwrap()))
                .unwrap(),
        )
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

async fn get(router: &Router, path: &str) -> (StatusCode, Value) {
    let resp = router
        .clone()
        .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = resp.status();
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, value)
}

fn user_key(fill: u8) -> (SigningKey, String) {
    let key = SigningKey::from_slice(&[fill; 32]).unwrap();
    let addr = address_from_key(key.verifying_key());
    (key, addr)
}

// base64 of 32 bytes of 0x01 (a plausible Curve25519 public key).
const ENC_PUB: &str = "AQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQEBAQE=";

#[tokio::test]
async fn register_and_lookup_echoes_keys() {
    let h = harness();
    let (_, addr) = user_key(21);

    let (status, body) = post(
        &h.router,
        "/api/register",
        json!({ "address": addr, "encPub": ENC_PUB, "signPub": addr }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));

    let (status, body) = get(&h.router, &format!("/api/user/{addr}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["address"], json!(addr));
    assert_eq!(body["encPub"], json!(ENC_PUB));
    assert_eq!(body["signPub"], json!(addr));

    let (status, _) = get(&h.router, "/api/user/0xdeadbeef").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn register_rejects_undecodable_enc_pub() {
    let h = harness();
    let (_, addr) = user_key(22);

    for bad in ["not-base64!", "AQEB"] {
        let (status, body) = post(
            &h.router,
            "/api/register",
            json!({ "address": addr, "encPub": bad, "signPub": addr }),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["detail"], json!("invalid encPub"));
    }
    let (status, _) = get(&h.router, &format!("/api/user/{addr}")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn upload_round_trips_payload_under_its_cid() {
    let h = harness();
    let payload = json!({ "version": 1, "ciphertext": "X", "senderEncPub": "Y" });

    let (status, body) = post(&h.router, "/api/uploadEncrypted", json!({ "payload": payload })).await;
    assert_eq!(status, StatusCode::OK);
    let cid = body["cid"].as_str().unwrap().to_string();
    assert_eq!(cid, cid_from_payload(&payload).unwrap());

    let (status, body) = get(&h.router, &format!("/api/fetch/{cid}")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["payload"], payload);

    let (status, _) = get(&h.router, &format!("/api/fetch/{}", "0".repeat(64))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn oversized_upload_is_rejected_with_413() {
    let h = harness();
    let big = "x".repeat(h.state.cfg.max_payload_bytes);
    let (status, _) = post(
        &h.router,
        "/api/uploadEncrypted",
        json!({ "payload": { "version": 1, "ciphertext": big } }),
    )
    .await;
    assert_eq!(status, StatusCode::PAYLOAD_TOO_LARGE);
}

#[tokio::test]
async fn replicate_verifies_the_claimed_cid() {
    let h = harness();
    let payload = json!({ "version": 1, "ciphertext": "Z", "senderEncPub": "W" });
    let cid = cid_from_payload(&payload).unwrap();

    let (status, body) = post(&h.router, "/api/replicate", json!({ "cid": cid, "payload": payload })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["cid"], json!(cid));

    let (status, body) = post(
        &h.router,
        "/api/replicate",
        json!({ "cid": "f".repeat(64), "payload": payload }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("CID mismatch"));
}

fn deliver_body(key: &SigningKey, sender: &str, recipient: &str, cid: &str, ts: u64) -> Value {
    let text = format!("{cid}|{sender}|{recipient}|{ts}");
    json!({
        "cid": cid,
        "sender": sender,
        "recipient": recipient,
        "timestamp": ts,
        "ethSignature": sign_personal(key, &text).unwrap(),
    })
}

#[tokio::test]
async fn deliver_to_offline_recipient_queues_undelivered_row() {
    let h = harness();
    let (key, sender) = user_key(31);
    let (_, recipient) = user_key(32);
    let cid = "c".repeat(64);
    let ts = 1_700_000_000u64;

    let (status, body) = post(&h.router, "/api/deliver", deliver_body(&key, &sender, &recipient, &cid, ts)).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_u64().unwrap();

    let (status, body) = get(&h.router, &format!("/api/messages/{recipient}")).await;
    assert_eq!(status, StatusCode::OK);
    let messages = body["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    let row = &messages[0];
    assert_eq!(row["id"].as_u64().unwrap(), id);
    assert_eq!(row["cid"], json!(cid));
    let root = conversation_root(&sender, &recipient);
    assert_eq!(row["rootId"], json!(root));
    assert_eq!(row["sessionId"], json!(session_id(&root, ts, 3600)));
}

#[tokio::test]
async fn deliver_rejects_bad_signature_and_missing_fields() {
    let h = harness();
    let (key, sender) = user_key(33);
    let (_, recipient) = user_key(34);
    let cid = "a".repeat(64);

    // Signed text and submitted timestamp disagree.
    let mut body = deliver_body(&key, &sender, &recipient, &cid, 1_700_000_000);
    body["timestamp"] = json!(1_700_000_001);
    let (status, resp) = post(&h.router, "/api/deliver", body).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["detail"], json!("signature mismatch"));

    // Signature from a different key.
    let (other_key, _) = user_key(35);
    let forged = deliver_body(&other_key, &sender, &recipient, &cid, 1_700_000_000);
    let (status, resp) = post(&h.router, "/api/deliver", forged).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["detail"], json!("signature mismatch"));

    let (status, resp) = post(&h.router, "/api/deliver", json!({ "cid": cid, "sender": sender })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(resp["detail"], json!("missing fields"));

    let (_, body) = get(&h.router, &format!("/api/messages/{recipient}")).await;
    assert!(body["messages"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn push_then_ack_clears_the_queue() {
    let h = harness();
    let (sender_key, sender) = user_key(41);
    let (recipient_key, recipient) = user_key(42);
    let cid = "b".repeat(64);
    let ts = 1_700_001_234u64;

    // Simulate a connected recipient socket.
    let (tx, mut push_rx) = tokio::sync::mpsc::unbounded_channel();
    h.state
        .online
        .lock()
        .unwrap()
        .insert(recipient.to_ascii_lowercase(), tx);

    let (status, body) = post(&h.router, "/api/deliver", deliver_body(&sender_key, &sender, &recipient, &cid, ts)).await;
    assert_eq!(status, StatusCode::OK);
    let id = body["id"].as_u64().unwrap();

    let event = push_rx.recv().await.unwrap();
    assert_eq!(event.event, "new_message");
    assert_eq!(event.cid, cid);
    assert_eq!(event.sender, sender);
    assert_eq!(event.id, id);

    // Optimistically marked delivered: the pull queue is already empty.
    let (_, body) = get(&h.router, &format!("/api/messages/{recipient}")).await;
    assert!(body["messages"].as_array().unwrap().is_empty());

    // An explicit ack stays accepted (authoritative transition).
    let text = format!("ack|{recipient}|{id}");
    let (status, body) = post(
        &h.router,
        "/api/ack",
        json!({
            "recipient": recipient,
            "messageIds": [id],
            "ethSignature": sign_personal(&recipient_key, &text).unwrap(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["acknowledged"], json!([id]));
}

#[tokio::test]
async fn ack_requires_recipient_signature() {
    let h = harness();
    let (sender_key, sender) = user_key(43);
    let (_, recipient) = user_key(44);
    let cid = "e".repeat(64);

    let (_, body) = post(&h.router, "/api/deliver", deliver_body(&sender_key, &sender, &recipient, &cid, 1_700_002_000)).await;
    let id = body["id"].as_u64().unwrap();

    // Signed by the sender, not the recipient: rejected.
    let text = format!("ack|{recipient}|{id}");
    let (status, body) = post(
        &h.router,
        "/api/ack",
        json!({
            "recipient": recipient,
            "messageIds": [id],
            "ethSignature": sign_personal(&sender_key, &text).unwrap(),
        }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("signature mismatch"));

    let (_, body) = get(&h.router, &format!("/api/messages/{recipient}")).await;
    assert_eq!(body["messages"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn conversation_returns_newest_first_with_before_bound() {
    let h = harness();
    let (key, sender) = user_key(45);
    let (_, recipient) = user_key(46);
    let root = conversation_root(&sender, &recipient);

    for (i, ts) in [(1u8, 1000u64), (2, 2000), (3, 3000)] {
        let cid = hex::encode([i; 32]);
        post(&h.router, "/api/deliver", deliver_body(&key, &sender, &recipient, &cid, ts)).await;
    }

    let (status, body) = get(&h.router, &format!("/api/conversation/{root}")).await;
    assert_eq!(status, StatusCode::OK);
    let ts: Vec<u64> = body["messages"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["timestamp"].as_u64().unwrap())
        .collect();
    assert_eq!(ts, vec![3000, 2000, 1000]);

    let (_, body) = get(&h.router, &format!("/api/conversation/{root}?limit=1&before=3000")).await;
    let rows = body["messages"].as_array().unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["timestamp"].as_u64().unwrap(), 2000);
}

fn signed_proposal(node: &NodeKeystore, prev: &str, cids: Vec<String>, ts: u64) -> Value {
    let merkle = merkle_root_from_cids(&cids);
    let proposer = node.address().to_string();
    let text = proposal_signing_text(prev, &merkle, &cids, &proposer, ts);
    json!({
        "previous_hash": prev,
        "merkle_root": merkle,
        "cids": cids,
        "proposer": proposer,
        "timestamp": ts,
        "signature": node.sign_text(&text).unwrap(),
    })
}

#[tokio::test]
async fn proposal_voting_happy_path_and_rejections() {
    let h = harness();

    // Hold both proposed blobs locally.
    let p1 = json!({ "version": 1, "ciphertext": "one", "senderEncPub": "k" });
    let p2 = json!({ "version": 1, "ciphertext": "two", "senderEncPub": "k" });
    let c1 = h.state.content.store_local(&p1).unwrap();
    let c2 = h.state.content.store_local(&p2).unwrap();

    let proposal = signed_proposal(&h.state.keystore, GENESIS_HEAD, vec![c1.clone(), c2.clone()], 1_700_000_000);
    let (status, body) = post(&h.router, "/api/proposal", proposal).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vote"], json!(true));
    assert_eq!(body["have_count"], json!(2));

    // Head mismatch: rejected as a vote, not an HTTP error.
    let stale = signed_proposal(&h.state.keystore, &"1".repeat(64), vec![c1.clone()], 1_700_000_001);
    let (status, body) = post(&h.router, "/api/proposal", stale).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["vote"], json!(false));
    assert_eq!(body["reason"], json!("head_mismatch"));

    // Merkle mismatch.
    let mut bad = signed_proposal(&h.state.keystore, GENESIS_HEAD, vec![c1.clone()], 1_700_000_002);
    bad["merkle_root"] = json!("0".repeat(64));
    let (_, body) = post(&h.router, "/api/proposal", bad).await;
    assert_eq!(body["reason"], json!("merkle_mismatch"));

    // Tampered batch invalidates the signature.
    let mut forged = signed_proposal(&h.state.keystore, GENESIS_HEAD, vec![c1.clone()], 1_700_000_003);
    forged["cids"] = json!([c2.clone()]);
    forged["merkle_root"] = json!(merkle_root_from_cids(&[c2.clone()]));
    let (_, body) = post(&h.router, "/api/proposal", forged).await;
    assert_eq!(body["reason"], json!("invalid_signature"));

    // None of the proposed blobs held locally.
    let absent = signed_proposal(&h.state.keystore, GENESIS_HEAD, vec!["9".repeat(64)], 1_700_000_004);
    let (_, body) = post(&h.router, "/api/proposal", absent).await;
    assert_eq!(body["reason"], json!("no_local_data"));
}

#[tokio::test]
async fn broadcast_block_is_validated_and_applied() {
    let h = harness();
    let (key, sender) = user_key(51);
    let (_, recipient) = user_key(52);

    let payload = json!({ "version": 1, "ciphertext": "blk", "senderEncPub": "k" });
    let cid = h.state.content.store_local(&payload).unwrap();
    post(&h.router, "/api/deliver", deliver_body(&key, &sender, &recipient, &cid, 1_700_000_000)).await;

    let mut block = signed_proposal(&h.state.keystore, GENESIS_HEAD, vec![cid.clone()], 1_700_000_010);
    block["idx"] = json!(1);
    let (status, body) = post(&h.router, "/api/block", block.clone()).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["idx"], json!(1));

    // The cid left the pending set.
    assert!(h.state.store.pending_cids(200).unwrap().is_empty());

    // Replaying the same block no longer extends the head.
    let (status, body) = post(&h.router, "/api/block", block).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("head_mismatch"));
}

#[tokio::test]
async fn peer_registration_and_listing() {
    let h = harness();

    let (status, body) = post(&h.router, "/api/register_peer", json!({ "url": "http://peer.example:7000/" })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["peer"], json!("http://peer.example:7000"));

    let (status, body) = get(&h.router, "/api/peers?activeOnly=true").await;
    assert_eq!(status, StatusCode::OK);
    let peers = body["peers"].as_array().unwrap();
    assert_eq!(peers.len(), 1);
    assert_eq!(peers[0]["url"], json!("http://peer.example:7000"));

    let (status, body) = post(&h.router, "/api/register_peer", json!({ "url": "http://peer.example/api" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["detail"], json!("url must be base origin only"));
}

#[tokio::test]
async fn health_reports_node_address() {
    let h = harness();
    let (status, body) = get(&h.router, "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ok"], json!(true));
    assert_eq!(body["node"], json!(h.state.keystore.address()));
}
