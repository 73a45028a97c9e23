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

//! Signable text formats for blocks and proposals.
//!
//! Every node derives these strings from the same functions; the proposer
//! signs the canonical tuple text, voters and block receivers re-derive it
//! to verify. Encodings must stay byte-for-byte stable across versions.

use serde_json::json;

use crate::core::crypto::sha256_hex;
use crate::core::types::{Block, BlockProposal};

/// Chain head value when no block exists yet.
pub const GENESIS_HEAD: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Weak ordered-digest commitment over a cid batch: SHA-256 of the hex
/// strings concatenated in list order, no separator. CIDs are fixed-length
/// hex, so the concatenation is unambiguous.
pub fn merkle_root_from_cids(cids: &[String]) -> String {
    sha256_hex(cids.concat().as_bytes())
}

/// The signed proposal tuple: canonical JSON of
/// `[previous_hash, merkle_root, cids, proposer, timestamp]`.
pub fn proposal_signing_text(
    previous_hash: &str,
    merkle_root: &str,
    cids: &[String],
    proposer: &str,
    timestamp: u64,
) -> String {
    json!([previous_hash, merkle_root, cids, proposer, timestamp]).to_string()
}

/// Signing text of an existing proposal.
pub fn proposal_text(p: &BlockProposal) -> String {
    proposal_signing_text(&p.previous_hash, &p.merkle_root, &p.cids, &p.proposer, p.timestamp)
}

/// Block hash: SHA-256 of
/// `idx|previous_hash|merkle_root|join(cids,",")|proposer|timestamp`.
/// The proposer signature is deliberately excluded.
pub fn block_hash(block: &Block) -> String {
    let text = format!(
        "{}|{}|{}|{}|{}|{}",
        block.idx,
        block.previous_hash,
        block.merkle_root,
        block.cids.join(","),
        block.proposer,
        block.timestamp
    );
    sha256_hex(text.as_bytes())
}
