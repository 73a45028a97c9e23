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

//! Chain rules: proposal voting, local commit, and acceptance of
//! broadcast blocks from a committing proposer.

use thiserror::Error;
use tracing::info;

use crate::core::consensus::signing::{merkle_root_from_cids, proposal_signing_text, proposal_text};
use crate::core::crypto::verify_personal;
use crate::core::state::content::ContentStore;
use crate::core::state::store::{Store, StoreError};
use crate::core::types::{Block, BlockProposal};

/// Ledger errors.
#[derive(Debug, Error)]
pub enum LedgerError {
    /// The chain advanced under us; the proposal is abandoned.
    #[error("chain head mismatch")]
    HeadMismatch,
    /// A received block failed validation.
    #[error("invalid block: {0}")]
    InvalidBlock(&'static str),
    /// Underlying storage failure.
    #[error("store")]
    Store(#[from] StoreError),
}

/// A voter's reply to a proposal.
#[derive(Clone, Debug)]
pub enum VoteOutcome {
    /// All checks held; `have_count` of the batch is present locally.
    Yes {
        /// Number of proposed CIDs held locally.
        have_count: usize,
    },
    /// Some check failed.
    No {
        /// Stable machine-readable reason string.
        reason: &'static str,
    },
}

/// Evaluate an incoming proposal against local state. Checks run in order:
/// chain continuity, merkle commitment, proposer signature, local data
/// availability. Never mutates state; a yes-vote does not append anything.
pub fn evaluate_proposal(
    store: &Store,
    content: &ContentStore,
    proposal: &BlockProposal,
) -> Result<VoteOutcome, LedgerError> {
    let local_head = store.head_hash()?;
    if proposal.previous_hash != local_head {
        return Ok(VoteOutcome::No { reason: "head_mismatch" });
    }

    if merkle_root_from_cids(&proposal.cids) != proposal.merkle_root {
        return Ok(VoteOutcome::No { reason: "merkle_mismatch" });
    }

    let text = proposal_text(proposal);
    if !verify_personal(&proposal.proposer, &text, &proposal.signature) {
        return Ok(VoteOutcome::No { reason: "invalid_signature" });
    }

    let have_count = proposal
        .cids
        .iter()
        .filter(|c| content.fetch_local(c).is_some())
        .count();
    if have_count == 0 {
        return Ok(VoteOutcome::No { reason: "no_local_data" });
    }

    Ok(VoteOutcome::Yes { have_count })
}

/// Commit a proposal that reached majority: re-check the head, re-derive
/// the merkle root, append the block, and mark its rows committed. The
/// head check repeats inside the store transaction, so a racing commit
/// surfaces as [`LedgerError::HeadMismatch`] rather than a fork.
pub fn commit_proposal(store: &Store, proposal: &BlockProposal) -> Result<Block, LedgerError> {
    let local_head = store.head_hash()?;
    if proposal.previous_hash != local_head {
        return Err(LedgerError::HeadMismatch);
    }

    // The block keeps the proposal timestamp: it is part of the signed
    // tuple, so receivers of the broadcast can verify the signature from
    // block fields alone, and every node derives the same block hash.
    let merkle = merkle_root_from_cids(&proposal.cids);
    let block = store
        .commit_block(
            &proposal.previous_hash,
            &merkle,
            &proposal.cids,
            &proposal.proposer,
            &proposal.signature,
            proposal.timestamp,
        )
        .map_err(|e| match e {
            StoreError::HeadMismatch => LedgerError::HeadMismatch,
            other => LedgerError::Store(other),
        })?;

    info!(idx = block.idx, cids = block.cids.len(), "block committed");
    Ok(block)
}

/// Accept a committed block broadcast by its proposer. The block must
/// extend the local head, carry the merkle root of its cid list, and be
/// signed by its proposer over the canonical proposal tuple.
pub fn accept_block(store: &Store, block: &Block) -> Result<u64, LedgerError> {
    let local_head = store.head_hash()?;
    if block.previous_hash != local_head {
        return Err(LedgerError::InvalidBlock("head_mismatch"));
    }
    if merkle_root_from_cids(&block.cids) != block.merkle_root {
        return Err(LedgerError::InvalidBlock("merkle_mismatch"));
    }
    // The broadcast block re-uses the proposal signature; re-derive the
    // tuple from block fields to verify it.
    let text = proposal_signing_text(
        &block.previous_hash,
        &block.merkle_root,
        &block.cids,
        &block.proposer,
        block.timestamp,
    );
    if !verify_personal(&block.proposer, &text, &block.signature) {
        return Err(LedgerError::InvalidBlock("invalid_signature"));
    }
    let expected_idx = store.last_block()?.map(|b| b.idx + 1).unwrap_or(1);
    if block.idx != expected_idx {
        return Err(LedgerError::InvalidBlock("idx_mismatch"));
    }

    let appended = store
        .commit_block(
            &block.previous_hash,
            &block.merkle_root,
            &block.cids,
            &block.proposer,
            &block.signature,
            block.timestamp,
        )
        .map_err(|e| match e {
            StoreError::HeadMismatch => LedgerError::InvalidBlock("head_mismatch"),
            other => LedgerError::Store(other),
        })?;

    info!(idx = appended.idx, proposer = %block.proposer, "accepted broadcast block");
    Ok(appended.idx)
}
