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

use proptest::prelude::*;

use blocknet::core::crypto::cid_from_payload;
use blocknet::core::state::content::{ContentError, ContentStore};
use serde_json::json;

const QUOTA: u64 = 1024 * 1024;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]
    #[test]
    fn stored_blobs_round_trip_under_their_cid(ct in "[A-Za-z0-9+/=]{1,128}", pk in "[A-Za-z0-9+/=]{1,64}") {
        let dir = tempfile::tempdir().unwrap();
        let store = ContentStore::open(dir.path().to_str().unwrap(), 3, QUOTA).unwrap();

        let payload = json!({ "version": 1, "ciphertext": ct, "senderEncPub": pk });
        let cid = store.store_local(&payload).unwrap();
        prop_assert_eq!(&cid, &cid_from_payload(&payload).unwrap());

        // Redundancy: every slot holds a copy.
        prop_assert_eq!(store.copies_of(&cid), 3);

        let fetched = store.fetch_local(&cid).unwrap();
        prop_assert_eq!(fetched, payload);
    }
}

#[test]
fn replicate_write_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::open(dir.path().to_str().unwrap(), 2, QUOTA).unwrap();

    let payload = json!({ "version": 1, "ciphertext": "YmxvYg==", "senderEncPub": "cGs=" });
    let cid = cid_from_payload(&payload).unwrap();

    store.store_to_slot(&cid, &payload, 0).unwrap();
    store.store_to_slot(&cid, &payload, 0).unwrap();
    store.store_to_slot(&cid, &payload, 0).unwrap();

    assert_eq!(store.copies_of(&cid), 1);
    assert_eq!(store.fetch_local(&cid).unwrap(), payload);
}

#[test]
fn replicate_rejects_mismatching_cid() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::open(dir.path().to_str().unwrap(), 2, QUOTA).unwrap();

    let payload = json!({ "version": 1, "ciphertext": "YQ==", "senderEncPub": "Yg==" });
    let wrong = "a".repeat(64);
    match store.store_to_slot(&wrong, &payload, 0) {
        Err(ContentError::CidMismatch) => {}
        other => panic!("expected CidMismatch, got {other:?}"),
    }
    assert!(store.fetch_local(&wrong).is_none());
}

#[test]
fn replicate_rejects_non_hex_cid() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::open(dir.path().to_str().unwrap(), 1, QUOTA).unwrap();
    let payload = json!({ "version": 1 });
    match store.store_to_slot("../../etc/passwd", &payload, 0) {
        Err(ContentError::InvalidCid) => {}
        other => panic!("expected InvalidCid, got {other:?}"),
    }
}

#[test]
fn quota_exhaustion_on_every_slot_fails_upload() {
    let dir = tempfile::tempdir().unwrap();
    // Quota below the blob size: no slot can accept a fresh write.
    let store = ContentStore::open(dir.path().to_str().unwrap(), 3, 8).unwrap();

    let payload = json!({ "version": 1, "ciphertext": "YmlnIGJsb2IgY29udGVudA==", "senderEncPub": "cGs=" });
    match store.store_local(&payload) {
        Err(ContentError::StorageFull) => {}
        other => panic!("expected StorageFull, got {other:?}"),
    }
}

#[test]
fn partial_slot_acceptance_still_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::open(dir.path().to_str().unwrap(), 3, QUOTA).unwrap();

    // Pre-fill slot 0 close to a fresh store's quota by writing a filler
    // blob there only.
    let filler = json!({ "version": 1, "ciphertext": "x".repeat(512), "senderEncPub": "f" });
    let filler_cid = cid_from_payload(&filler).unwrap();
    store.store_to_slot(&filler_cid, &filler, 0).unwrap();

    // A tight quota that the filler already exceeds in slot 0.
    let tight = ContentStore::open(dir.path().to_str().unwrap(), 3, 256).unwrap();
    let payload = json!({ "version": 1, "ciphertext": "c21hbGw=", "senderEncPub": "cGs=" });
    let cid = tight.store_local(&payload).unwrap();

    // Slot 0 was over quota; the other slots took the blob.
    assert_eq!(tight.copies_of(&cid), 2);
    assert!(tight.fetch_local(&cid).is_some());
}

#[test]
fn corrupted_copy_is_skipped_on_fetch() {
    let dir = tempfile::tempdir().unwrap();
    let store = ContentStore::open(dir.path().to_str().unwrap(), 2, QUOTA).unwrap();

    let payload = json!({ "version": 1, "ciphertext": "Y29ycnVwdA==", "senderEncPub": "cGs=" });
    let cid = store.store_local(&payload).unwrap();

    // Tamper with the slot-0 copy; slot 1 still satisfies the read.
    let slot0 = dir.path().join("relayer_0").join(format!("{cid}.json"));
    std::fs::write(&slot0, b"{\"version\":2}").unwrap();

    assert_eq!(store.fetch_local(&cid).unwrap(), payload);
}
