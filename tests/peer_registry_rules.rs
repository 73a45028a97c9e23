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

use blocknet::core::crypto::{address_from_key, sign_personal};
use blocknet::core::types::RelayerConfig;
use blocknet::networking::peer_registry::{
    admit_peer, canonicalize_peer_url, is_local_host, PeerAdmissionError, RegisterPeerRequest,
};
use k256::ecdsa::SigningKey;

fn req(url: &str) -> RegisterPeerRequest {
    RegisterPeerRequest {
        url: url.to_string(),
        address: None,
        timestamp: None,
        signature: None,
    }
}

#[test]
fn canonicalization_keeps_bare_origins() {
    assert_eq!(canonicalize_peer_url("http://node.example:3000").unwrap(), "http://node.example:3000");
    assert_eq!(canonicalize_peer_url("https://node.example/").unwrap(), "https://node.example");
    // Hosts normalize to lowercase.
    assert_eq!(canonicalize_peer_url("http://Node.Example").unwrap(), "http://node.example");
}

#[test]
fn rejection_matrix() {
    use PeerAdmissionError::*;
    let cases = [
        ("", InvalidUrl),
        ("not a url", InvalidUrl),
        ("ftp://node.example", UnsupportedScheme),
        ("http://user:pw@node.example", InvalidHost),
        ("http://node.example?x=1", NonOriginUrl),
        ("http://node.example/#frag", NonOriginUrl),
        ("http://node.example/api", NonRootPath),
    ];
    for (url, expected) in cases {
        match canonicalize_peer_url(url) {
            Err(e) => assert_eq!(
                std::mem::discriminant(&e),
                std::mem::discriminant(&expected),
                "case {url}: got {e:?}"
            ),
            Ok(canon) => panic!("case {url}: unexpectedly accepted as {canon}"),
        }
    }
}

#[test]
fn local_host_detection_covers_rfc1918() {
    assert!(is_local_host("localhost"));
    assert!(is_local_host("127.0.0.1"));
    assert!(is_local_host("10.1.2.3"));
    assert!(is_local_host("192.168.0.44"));
    assert!(is_local_host("172.16.9.1"));
    assert!(!is_local_host("8.8.8.8"));
    assert!(!is_local_host("node.example"));
}

#[test]
fn unauthenticated_admission_upserts_canonical_origin() {
    let cfg = RelayerConfig::default();
    let canon = admit_peer(&cfg, &req("http://peer.example:8080/"), 1000).unwrap();
    assert_eq!(canon, "http://peer.example:8080");
}

#[test]
fn local_peers_can_be_disallowed() {
    let cfg = RelayerConfig { allow_local_peers: false, ..RelayerConfig::default() };
    match admit_peer(&cfg, &req("http://127.0.0.1:3000"), 1000) {
        Err(PeerAdmissionError::LocalDisallowed) => {}
        other => panic!("expected LocalDisallowed, got {other:?}"),
    }
    // Public hosts are still fine.
    admit_peer(&cfg, &req("http://peer.example"), 1000).unwrap();
}

fn signed_request(key: &SigningKey, url: &str, ts: u64) -> RegisterPeerRequest {
    let address = address_from_key(key.verifying_key());
    let canon = canonicalize_peer_url(url).unwrap();
    let message = format!("register|{canon}|{ts}|{address}");
    RegisterPeerRequest {
        url: url.to_string(),
        address: Some(address),
        timestamp: Some(ts),
        signature: Some(sign_personal(key, &message).unwrap()),
    }
}

fn auth_cfg(allowlist: Vec<String>) -> RelayerConfig {
    RelayerConfig {
        require_peer_auth: true,
        peer_allowlist: allowlist,
        ..RelayerConfig::default()
    }
}

#[test]
fn signed_admission_accepts_fresh_valid_requests() {
    let key = SigningKey::from_slice(&[7u8; 32]).unwrap();
    let now = 1_700_000_000u64;
    let request = signed_request(&key, "http://peer.example:9000", now - 120);
    let canon = admit_peer(&auth_cfg(vec![]), &request, now).unwrap();
    assert_eq!(canon, "http://peer.example:9000");
}

#[test]
fn signed_admission_rejects_missing_or_stale_auth() {
    let key = SigningKey::from_slice(&[8u8; 32]).unwrap();
    let now = 1_700_000_000u64;
    let cfg = auth_cfg(vec![]);

    match admit_peer(&cfg, &req("http://peer.example"), now) {
        Err(PeerAdmissionError::AuthRequired) => {}
        other => panic!("expected AuthRequired, got {other:?}"),
    }

    // Outside the ±300 s replay window.
    let stale = signed_request(&key, "http://peer.example", now - 301);
    match admit_peer(&cfg, &stale, now) {
        Err(PeerAdmissionError::StaleTimestamp) => {}
        other => panic!("expected StaleTimestamp, got {other:?}"),
    }
}

#[test]
fn signed_admission_rejects_bad_signature_and_enforces_allowlist() {
    let key = SigningKey::from_slice(&[9u8; 32]).unwrap();
    let now = 1_700_000_000u64;

    // Signature over a different URL.
    let mut forged = signed_request(&key, "http://peer.example", now);
    forged.url = "http://other.example".to_string();
    match admit_peer(&auth_cfg(vec![]), &forged, now) {
        Err(PeerAdmissionError::InvalidSignature) => {}
        other => panic!("expected InvalidSignature, got {other:?}"),
    }

    // Valid signature, address not on the allowlist.
    let request = signed_request(&key, "http://peer.example", now);
    let cfg = auth_cfg(vec!["0x0000000000000000000000000000000000000001".to_string()]);
    match admit_peer(&cfg, &request, now) {
        Err(PeerAdmissionError::NotAllowed) => {}
        other => panic!("expected NotAllowed, got {other:?}"),
    }

    // Allowlist comparison is case-insensitive.
    let addr = request.address.clone().unwrap().to_uppercase();
    let cfg = auth_cfg(vec![addr]);
    admit_peer(&cfg, &request, now).unwrap();
}
