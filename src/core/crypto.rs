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

//! Hashing and recoverable-ECDSA primitives.
//!
//! CIDs and conversation identifiers use SHA-256 over deterministic text.
//! Signatures use the Ethereum personal-message envelope:
//! `keccak256("\x19Ethereum Signed Message:\n" || len(text) || text)`,
//! producing 65-byte `r || s || v` signatures over secp256k1, with the
//! signer identified by the 20-byte address derived from its public key.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use k256::ecdsa::{RecoveryId, Signature as EcdsaSignature, SigningKey, VerifyingKey};
use ring::digest;
use serde_json::Value;
use sha3::{Digest, Keccak256};
use thiserror::Error;

use crate::core::types::{canonical_json, CodecError};

/// Crypto errors.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// Signature hex is malformed or has the wrong length.
    #[error("invalid signature encoding")]
    InvalidSignature,
    /// Recovery id is outside the accepted `{0,1,27,28}` range.
    #[error("invalid recovery id")]
    InvalidRecoveryId,
    /// Public key recovery failed.
    #[error("recovery failed")]
    Recovery,
    /// Canonical encoding failed.
    #[error("codec")]
    Codec,
}

impl From<CodecError> for CryptoError {
    fn from(_: CodecError) -> Self {
        CryptoError::Codec
    }
}

/// Lowercase SHA-256 hex digest.
pub fn sha256_hex(data: &[u8]) -> String {
    let d = digest::digest(&digest::SHA256, data);
    hex::encode(d.as_ref())
}

/// Keccak-256 digest as used by Ethereum.
pub fn keccak256(data: &[u8]) -> [u8; 32] {
    let mut out = [0u8; 32];
    out.copy_from_slice(&Keccak256::digest(data));
    out
}

/// Content id of a payload: SHA-256 hex of its canonical JSON encoding.
pub fn cid_from_payload(payload: &Value) -> Result<String, CryptoError> {
    let js = canonical_json(payload)?;
    Ok(sha256_hex(js.as_bytes()))
}

/// Keccak digest of the personal-message envelope for `text`.
fn personal_digest(text: &str) -> [u8; 32] {
    let mut buf = Vec::with_capacity(32 + text.len());
    buf.extend_from_slice(b"\x19Ethereum Signed Message:\n");
    buf.extend_from_slice(text.len().to_string().as_bytes());
    buf.extend_from_slice(text.as_bytes());
    keccak256(&buf)
}

/// Derive the lowercase `0x` address for a public key:
/// `keccak256(uncompressed_pubkey[1..])[12..]`.
pub fn address_from_key(key: &VerifyingKey) -> String {
    let point = key.to_encoded_point(false);
    let hash = keccak256(&point.as_bytes()[1..]);
    format!("0x{}", hex::encode(&hash[12..]))
}

/// Sign `text` under the personal-message envelope, returning the 0x-hex
/// encoding of `r || s || v` with `v = 27 + recovery_id`.
pub fn sign_personal(key: &SigningKey, text: &str) -> Result<String, CryptoError> {
    let digest = personal_digest(text);
    let (sig, recid) = key
        .sign_prehash_recoverable(&digest)
        .map_err(|_| CryptoError::Recovery)?;
    let mut out = [0u8; 65];
    out[..64].copy_from_slice(&sig.to_bytes());
    out[64] = 27 + recid.to_byte();
    Ok(format!("0x{}", hex::encode(out)))
}

/// Recover the signer address for `text` from a personal-message signature.
pub fn recover_personal(text: &str, sig_hex: &str) -> Result<String, CryptoError> {
    let raw = hex::decode(sig_hex.trim().trim_start_matches("0x"))
        .map_err(|_| CryptoError::InvalidSignature)?;
    if raw.len() != 65 {
        return Err(CryptoError::InvalidSignature);
    }
    let v = match raw[64] {
        b @ 0..=1 => b,
        b @ 27..=28 => b - 27,
        _ => return Err(CryptoError::InvalidRecoveryId),
    };
    let recid = RecoveryId::try_from(v).map_err(|_| CryptoError::InvalidRecoveryId)?;
    let sig = EcdsaSignature::from_slice(&raw[..64]).map_err(|_| CryptoError::InvalidSignature)?;
    let digest = personal_digest(text);
    let key = VerifyingKey::recover_from_prehash(&digest, &sig, recid)
        .map_err(|_| CryptoError::Recovery)?;
    Ok(address_from_key(&key))
}

/// Verify that a personal-message signature over `text` recovers to
/// `claimed_addr` (case-insensitive). Malformed input verifies as false.
pub fn verify_personal(claimed_addr: &str, text: &str, sig_hex: &str) -> bool {
    match recover_personal(text, sig_hex) {
        Ok(recovered) => recovered.eq_ignore_ascii_case(claimed_addr),
        Err(_) => false,
    }
}

/// Whether a string is a plausible encryption public key: the base64
/// encoding of exactly 32 bytes (a Curve25519 point).
pub fn is_valid_enc_pub(s: &str) -> bool {
    BASE64.decode(s).map(|raw| raw.len() == 32).unwrap_or(false)
}

/// Deterministic conversation root for an unordered address pair:
/// `sha256(lower(min) || "|" || lower(max))`.
pub fn conversation_root(a: &str, b: &str) -> String {
    let (a, b) = (a.to_ascii_lowercase(), b.to_ascii_lowercase());
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    sha256_hex(format!("{lo}|{hi}").as_bytes())
}

/// Time-windowed session id within a conversation root:
/// `sha256(root || "|" || (ts - ts % window))`.
pub fn session_id(root_id: &str, ts: u64, window_secs: u64) -> String {
    let window = window_secs.max(1);
    let window_start = ts - ts % window;
    sha256_hex(format!("{root_id}|{window_start}").as_bytes())
}
