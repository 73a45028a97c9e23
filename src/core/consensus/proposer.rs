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

//! Periodic block proposer.
//!
//! Every tick: batch uncommitted CIDs (200-row scan, 20-CID batch), sign a
//! proposal over the canonical tuple, solicit votes from every active peer,
//! and commit locally when the yes-count (self included) reaches majority
//! over the *configured* peer set. A successful commit is broadcast to
//! peers so non-proposers converge on the same chain.

use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::api::AppState;
use crate::core::consensus::ledger::{self, LedgerError};
use crate::core::consensus::signing::{merkle_root_from_cids, proposal_signing_text};
use crate::core::types::{unix_now, BlockProposal};

/// Pre-scan cap on uncommitted rows per tick.
const PENDING_SCAN_CAP: usize = 200;
/// Maximum CIDs per proposal.
const PROPOSAL_BATCH_CAP: usize = 20;
/// Fixed backoff after an unexpected tick error.
const ERROR_BACKOFF: Duration = Duration::from_secs(5);

/// Run the proposer loop until shutdown is signaled.
pub async fn run_proposer(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(state.cfg.proposal_interval_seconds.max(1));
    info!(interval_secs = interval.as_secs(), "proposer started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("proposer stopping");
                return;
            }
        }

        if let Err(e) = propose_once(&state).await {
            warn!(err = %e, "proposer tick failed; backing off");
            tokio::select! {
                _ = tokio::time::sleep(ERROR_BACKOFF) => {}
                _ = shutdown.changed() => return,
            }
        }
    }
}

/// One proposer tick. Skips silently when nothing is pending.
async fn propose_once(state: &AppState) -> Result<(), LedgerError> {
    let pending = state.store.pending_cids(PENDING_SCAN_CAP)?;
    if pending.is_empty() {
        return Ok(());
    }
    let cids: Vec<String> = pending.into_iter().take(PROPOSAL_BATCH_CAP).collect();

    let previous_hash = state.store.head_hash()?;
    let merkle_root = merkle_root_from_cids(&cids);
    let proposer = state.keystore.address().to_string();
    let timestamp = unix_now();
    let text = proposal_signing_text(&previous_hash, &merkle_root, &cids, &proposer, timestamp);
    let signature = match state.keystore.sign_text(&text) {
        Ok(sig) => sig,
        Err(e) => {
            warn!(err = %e, "proposal signing failed");
            return Ok(());
        }
    };
    let proposal = BlockProposal {
        previous_hash,
        merkle_root,
        cids,
        proposer,
        timestamp,
        signature,
    };

    state.metrics.proposals_sent_total.inc();
    let replies = state.peers.send_proposal_to_peers(&proposal).await;

    // Tally: self counts as one yes; a peer counts iff 200 + {vote:true}.
    let mut yes = 1usize;
    for (status, body) in &replies {
        if *status == 200 && body.get("vote").and_then(Value::as_bool) == Some(true) {
            yes += 1;
        }
    }

    let peers_count = state.cfg.peers.len().max(1);
    let majority_needed = (peers_count as f64 * state.cfg.majority_fraction) as usize + 1;
    if yes < majority_needed {
        info!(yes, majority_needed, batch = proposal.cids.len(), "proposal lacked majority");
        return Ok(());
    }

    match ledger::commit_proposal(&state.store, &proposal) {
        Ok(block) => {
            state.metrics.blocks_committed_total.inc();
            state.metrics.block_height.set(block.idx as i64);
            info!(idx = block.idx, yes, cids = block.cids.len(), "proposal committed");
            state.peers.broadcast_block(&block).await;
            Ok(())
        }
        Err(LedgerError::HeadMismatch) => {
            // Another writer advanced the chain mid-round; re-batch next tick.
            warn!("commit abandoned on head mismatch");
            Ok(())
        }
        Err(e) => Err(e),
    }
}
