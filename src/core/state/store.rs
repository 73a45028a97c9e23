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

//! Durable node state on sled: `users`, `messages`, `blocks`, `peers`
//! tables plus the secondary indexes the query paths need.
//!
//! Records are JSON documents. Index trees:
//! - `msg_recipient`: `lower(recipient) || 0x00 || id_be` -> id
//! - `msg_root`:      `root_id || ts_be || id_be` -> id (newest-first scans)
//! - `msg_cid`:       `cid || id_be` -> id
//! - `msg_pending`:   `ts_be || id_be` -> cid (uncommitted rows, oldest first)
//!
//! The chain head lives in `meta` under `chain_head`; the commit path reads
//! and advances it inside one sled transaction with the block insert, which
//! is the uniqueness guard against two commits racing on the same head.

use sled::transaction::ConflictableTransactionError;
use sled::Transactional;
use thiserror::Error;

use crate::core::consensus::signing::{block_hash, GENESIS_HEAD};
use crate::core::types::{Block, MessageRecord, PeerInfo, User};

const META_CHAIN_HEAD: &[u8] = b"chain_head";
const META_SCHEMA_VERSION: &[u8] = b"schema_version";
const SCHEMA_VERSION: &str = "2";

/// Store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("db open")]
    DbOpen,
    #[error("db io")]
    DbIo,
    #[error("record codec")]
    Codec,
    /// The chain advanced between proposal and commit.
    #[error("chain head mismatch")]
    HeadMismatch,
}

#[derive(Clone, Debug, serde::Serialize, serde::Deserialize)]
struct ChainHead {
    idx: u64,
    hash: String,
}

fn be(id: u64) -> [u8; 8] {
    id.to_be_bytes()
}

fn encode<T: serde::Serialize>(v: &T) -> Result<Vec<u8>, StoreError> {
    serde_json::to_vec(v).map_err(|_| StoreError::Codec)
}

fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StoreError> {
    serde_json::from_slice(bytes).map_err(|_| StoreError::Codec)
}

/// Durable relayer state.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
    users: sled::Tree,
    messages: sled::Tree,
    blocks: sled::Tree,
    peers: sled::Tree,
    msg_recipient: sled::Tree,
    msg_root: sled::Tree,
    msg_cid: sled::Tree,
    msg_pending: sled::Tree,
    meta: sled::Tree,
}

impl Store {
    /// Open (or create) the database at `path` and run migrations.
    pub fn open(path: &str) -> Result<Self, StoreError> {
        let db = sled::open(path).map_err(|_| StoreError::DbOpen)?;
        let store = Self {
            users: db.open_tree("users").map_err(|_| StoreError::DbOpen)?,
            messages: db.open_tree("messages").map_err(|_| StoreError::DbOpen)?,
            blocks: db.open_tree("blocks").map_err(|_| StoreError::DbOpen)?,
            peers: db.open_tree("peers").map_err(|_| StoreError::DbOpen)?,
            msg_recipient: db.open_tree("msg_recipient").map_err(|_| StoreError::DbOpen)?,
            msg_root: db.open_tree("msg_root").map_err(|_| StoreError::DbOpen)?,
            msg_cid: db.open_tree("msg_cid").map_err(|_| StoreError::DbOpen)?,
            msg_pending: db.open_tree("msg_pending").map_err(|_| StoreError::DbOpen)?,
            meta: db.open_tree("meta").map_err(|_| StoreError::DbOpen)?,
            db,
        };
        store.migrate()?;
        Ok(store)
    }

    /// Idempotent schema migration: backfill fields added after the first
    /// release (presence-checked per record) and rebuild derived state.
    fn migrate(&self) -> Result<(), StoreError> {
        // messages gained `committed` after the consensus layer landed.
        for item in self.messages.iter() {
            let (key, value) = item.map_err(|_| StoreError::DbIo)?;
            let mut doc: serde_json::Value = decode(&value)?;
            let Some(obj) = doc.as_object_mut() else {
                return Err(StoreError::Codec);
            };
            if !obj.contains_key("committed") {
                obj.insert("committed".to_string(), serde_json::Value::Bool(false));
                self.messages
                    .insert(key, encode(&doc)?)
                    .map_err(|_| StoreError::DbIo)?;
            }
        }

        // Chain head pointer is derived; rebuild it when absent.
        if self.meta.get(META_CHAIN_HEAD).map_err(|_| StoreError::DbIo)?.is_none() {
            if let Some(block) = self.last_block()? {
                let head = ChainHead { idx: block.idx, hash: block_hash(&block) };
                self.meta
                    .insert(META_CHAIN_HEAD, encode(&head)?)
                    .map_err(|_| StoreError::DbIo)?;
            }
        }

        // Pending index covers every uncommitted row.
        for item in self.messages.iter() {
            let (_, value) = item.map_err(|_| StoreError::DbIo)?;
            let rec: MessageRecord = decode(&value)?;
            if !rec.committed {
                let key = pending_key(rec.timestamp, rec.id);
                if self.msg_pending.get(&key).map_err(|_| StoreError::DbIo)?.is_none() {
                    self.msg_pending
                        .insert(key, rec.cid.as_bytes())
                        .map_err(|_| StoreError::DbIo)?;
                }
            }
        }

        self.meta
            .insert(META_SCHEMA_VERSION, SCHEMA_VERSION.as_bytes())
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    // ---- users ----

    /// Insert or replace a user row (trust-on-first-use identity).
    pub fn upsert_user(&self, user: &User) -> Result<(), StoreError> {
        self.users
            .insert(user.address.to_ascii_lowercase().as_bytes(), encode(user)?)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Look up a user by address, case-insensitively.
    pub fn get_user(&self, address: &str) -> Result<Option<User>, StoreError> {
        let v = self
            .users
            .get(address.to_ascii_lowercase().as_bytes())
            .map_err(|_| StoreError::DbIo)?;
        v.map(|iv| decode(&iv)).transpose()
    }

    /// All registered users.
    pub fn list_users(&self) -> Result<Vec<User>, StoreError> {
        let mut out = Vec::new();
        for item in self.users.iter() {
            let (_, v) = item.map_err(|_| StoreError::DbIo)?;
            out.push(decode(&v)?);
        }
        Ok(out)
    }

    // ---- messages ----

    /// Insert a new message row and its index entries, returning the row.
    pub fn insert_message(
        &self,
        cid: &str,
        sender: &str,
        recipient: &str,
        timestamp: u64,
        root_id: &str,
        session_id: &str,
    ) -> Result<MessageRecord, StoreError> {
        // ids start at 1; sled's generator is monotonic across restarts.
        let id = self.db.generate_id().map_err(|_| StoreError::DbIo)? + 1;
        let rec = MessageRecord {
            id,
            cid: cid.to_string(),
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            timestamp,
            delivered: false,
            root_id: root_id.to_string(),
            session_id: session_id.to_string(),
            committed: false,
        };

        self.messages
            .insert(be(id), encode(&rec)?)
            .map_err(|_| StoreError::DbIo)?;
        self.msg_recipient
            .insert(recipient_key(recipient, id), &be(id))
            .map_err(|_| StoreError::DbIo)?;
        self.msg_root
            .insert(root_key(root_id, timestamp, id), &be(id))
            .map_err(|_| StoreError::DbIo)?;
        self.msg_cid
            .insert(cid_key(cid, id), &be(id))
            .map_err(|_| StoreError::DbIo)?;
        self.msg_pending
            .insert(pending_key(timestamp, id), cid.as_bytes())
            .map_err(|_| StoreError::DbIo)?;
        Ok(rec)
    }

    /// Fetch one message row.
    pub fn get_message(&self, id: u64) -> Result<Option<MessageRecord>, StoreError> {
        let v = self.messages.get(be(id)).map_err(|_| StoreError::DbIo)?;
        v.map(|iv| decode(&iv)).transpose()
    }

    /// Set `delivered = 1` for the given row ids. The transition is one-way;
    /// already-delivered rows are left untouched. Returns the rows flipped.
    pub fn set_delivered(&self, ids: &[u64]) -> Result<usize, StoreError> {
        let mut flipped = 0;
        for &id in ids {
            let Some(mut rec) = self.get_message(id)? else { continue };
            if rec.delivered {
                continue;
            }
            rec.delivered = true;
            self.messages
                .insert(be(id), encode(&rec)?)
                .map_err(|_| StoreError::DbIo)?;
            flipped += 1;
        }
        Ok(flipped)
    }

    /// Undelivered rows for a recipient, in insertion order.
    pub fn undelivered_for(&self, recipient: &str) -> Result<Vec<MessageRecord>, StoreError> {
        let prefix = recipient_prefix(recipient);
        let mut out = Vec::new();
        for item in self.msg_recipient.scan_prefix(&prefix) {
            let (_, idv) = item.map_err(|_| StoreError::DbIo)?;
            let id = id_from_value(&idv)?;
            if let Some(rec) = self.get_message(id)? {
                if !rec.delivered {
                    out.push(rec);
                }
            }
        }
        Ok(out)
    }

    /// Conversation history for a root, newest first (`timestamp DESC, id
    /// DESC`), optionally bounded to `timestamp < before`.
    pub fn conversation(
        &self,
        root_id: &str,
        limit: usize,
        before: Option<u64>,
    ) -> Result<Vec<MessageRecord>, StoreError> {
        let start = root_id.as_bytes().to_vec();
        let end = match before {
            // Keys sort by timestamp after the root prefix, so an exclusive
            // upper bound at `before` implements `timestamp < before`.
            Some(b) => {
                let mut k = root_id.as_bytes().to_vec();
                k.extend_from_slice(&be(b));
                k
            }
            None => prefix_successor(root_id.as_bytes()),
        };
        let mut out = Vec::new();
        for item in self.msg_root.range(start..end).rev() {
            let (_, idv) = item.map_err(|_| StoreError::DbIo)?;
            let id = id_from_value(&idv)?;
            if let Some(rec) = self.get_message(id)? {
                out.push(rec);
            }
            if out.len() >= limit {
                break;
            }
        }
        Ok(out)
    }

    /// Distinct CIDs of uncommitted rows in ascending timestamp order,
    /// scanning at most `scan_cap` rows.
    pub fn pending_cids(&self, scan_cap: usize) -> Result<Vec<String>, StoreError> {
        let mut out: Vec<String> = Vec::new();
        for item in self.msg_pending.iter().take(scan_cap) {
            let (_, cidv) = item.map_err(|_| StoreError::DbIo)?;
            let cid = String::from_utf8(cidv.to_vec()).map_err(|_| StoreError::Codec)?;
            if !out.contains(&cid) {
                out.push(cid);
            }
        }
        Ok(out)
    }

    /// Row ids carrying a given cid.
    fn message_ids_for_cid(&self, cid: &str) -> Result<Vec<u64>, StoreError> {
        let mut out = Vec::new();
        for item in self.msg_cid.scan_prefix(cid.as_bytes()) {
            let (_, idv) = item.map_err(|_| StoreError::DbIo)?;
            out.push(id_from_value(&idv)?);
        }
        Ok(out)
    }

    // ---- chain ----

    /// Current chain head hash, or the genesis sentinel when empty.
    pub fn head_hash(&self) -> Result<String, StoreError> {
        let v = self.meta.get(META_CHAIN_HEAD).map_err(|_| StoreError::DbIo)?;
        match v {
            Some(iv) => {
                let head: ChainHead = decode(&iv)?;
                Ok(head.hash)
            }
            None => Ok(GENESIS_HEAD.to_string()),
        }
    }

    /// Highest-idx block, if any.
    pub fn last_block(&self) -> Result<Option<Block>, StoreError> {
        let v = self.blocks.last().map_err(|_| StoreError::DbIo)?;
        v.map(|(_, iv)| decode(&iv)).transpose()
    }

    /// Block at a given index.
    pub fn block_at(&self, idx: u64) -> Result<Option<Block>, StoreError> {
        let v = self.blocks.get(be(idx)).map_err(|_| StoreError::DbIo)?;
        v.map(|iv| decode(&iv)).transpose()
    }

    /// Number of committed blocks.
    pub fn block_count(&self) -> usize {
        self.blocks.len()
    }

    /// Append a block extending `previous_hash` and mark its CIDs committed.
    ///
    /// The head re-check, index assignment, block insert, and head advance
    /// happen in one transaction; a racing writer aborts with
    /// [`StoreError::HeadMismatch`]. Flag flips on message rows follow
    /// outside the transaction (best-effort, re-applied by a later commit of
    /// the same cid if interrupted).
    pub fn commit_block(
        &self,
        previous_hash: &str,
        merkle_root: &str,
        cids: &[String],
        proposer: &str,
        signature: &str,
        timestamp: u64,
    ) -> Result<Block, StoreError> {
        let res = (&self.blocks, &self.meta).transaction(|(blocks, meta)| {
            let head = match meta
                .get(META_CHAIN_HEAD)?
                .map(|iv| decode::<ChainHead>(&iv))
                .transpose()
                .map_err(ConflictableTransactionError::Abort)?
            {
                Some(h) => h,
                None => ChainHead { idx: 0, hash: GENESIS_HEAD.to_string() },
            };
            if head.hash != previous_hash {
                return Err(ConflictableTransactionError::Abort(StoreError::HeadMismatch));
            }

            let block = Block {
                idx: head.idx + 1,
                previous_hash: previous_hash.to_string(),
                merkle_root: merkle_root.to_string(),
                cids: cids.to_vec(),
                proposer: proposer.to_string(),
                signature: signature.to_string(),
                timestamp,
            };
            let encoded = encode(&block).map_err(ConflictableTransactionError::Abort)?;
            blocks.insert(be(block.idx).to_vec(), encoded)?;

            let next = ChainHead { idx: block.idx, hash: block_hash(&block) };
            let encoded = encode(&next).map_err(ConflictableTransactionError::Abort)?;
            meta.insert(META_CHAIN_HEAD.to_vec(), encoded)?;
            Ok(block)
        });

        let block = match res {
            Ok(b) => b,
            Err(sled::transaction::TransactionError::Abort(e)) => return Err(e),
            Err(sled::transaction::TransactionError::Storage(_)) => return Err(StoreError::DbIo),
        };

        for cid in cids {
            for id in self.message_ids_for_cid(cid)? {
                let Some(mut rec) = self.get_message(id)? else { continue };
                if rec.committed {
                    continue;
                }
                rec.committed = true;
                self.messages
                    .insert(be(id), encode(&rec)?)
                    .map_err(|_| StoreError::DbIo)?;
                self.msg_pending
                    .remove(pending_key(rec.timestamp, rec.id))
                    .map_err(|_| StoreError::DbIo)?;
            }
        }
        Ok(block)
    }

    // ---- peers ----

    /// Insert or refresh a peer row.
    pub fn upsert_peer(&self, url: &str, last_seen: u64) -> Result<(), StoreError> {
        let info = PeerInfo { url: url.to_string(), last_seen };
        self.peers
            .insert(url.as_bytes(), encode(&info)?)
            .map_err(|_| StoreError::DbIo)?;
        Ok(())
    }

    /// Known peers; with a cutoff, only those seen at or after it.
    pub fn list_peers(&self, seen_since: Option<u64>) -> Result<Vec<PeerInfo>, StoreError> {
        let mut out = Vec::new();
        for item in self.peers.iter() {
            let (_, v) = item.map_err(|_| StoreError::DbIo)?;
            let info: PeerInfo = decode(&v)?;
            if seen_since.map_or(true, |cutoff| info.last_seen >= cutoff) {
                out.push(info);
            }
        }
        Ok(out)
    }

    /// Drop peers last seen before `cutoff`. Returns the number removed.
    pub fn prune_stale_peers(&self, cutoff: u64) -> Result<usize, StoreError> {
        let mut removed = 0;
        for peer in self.list_peers(None)? {
            if peer.last_seen < cutoff {
                self.peers
                    .remove(peer.url.as_bytes())
                    .map_err(|_| StoreError::DbIo)?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn recipient_prefix(recipient: &str) -> Vec<u8> {
    let mut k = recipient.to_ascii_lowercase().into_bytes();
    k.push(0);
    k
}

fn recipient_key(recipient: &str, id: u64) -> Vec<u8> {
    let mut k = recipient_prefix(recipient);
    k.extend_from_slice(&be(id));
    k
}

fn root_key(root_id: &str, timestamp: u64, id: u64) -> Vec<u8> {
    let mut k = root_id.as_bytes().to_vec();
    k.extend_from_slice(&be(timestamp));
    k.extend_from_slice(&be(id));
    k
}

fn cid_key(cid: &str, id: u64) -> Vec<u8> {
    let mut k = cid.as_bytes().to_vec();
    k.extend_from_slice(&be(id));
    k
}

fn pending_key(timestamp: u64, id: u64) -> Vec<u8> {
    let mut k = be(timestamp).to_vec();
    k.extend_from_slice(&be(id));
    k
}

fn id_from_value(v: &[u8]) -> Result<u64, StoreError> {
    let arr: [u8; 8] = v.try_into().map_err(|_| StoreError::Codec)?;
    Ok(u64::from_be_bytes(arr))
}

/// Smallest byte string strictly greater than every string with `prefix`.
fn prefix_successor(prefix: &[u8]) -> Vec<u8> {
    let mut end = prefix.to_vec();
    while let Some(last) = end.last_mut() {
        if *last < 0xff {
            *last += 1;
            return end;
        }
        end.pop();
    }
    // All-0xff prefix: unbounded in practice for hex-string roots.
    vec![0xff; prefix.len() + 9]
}
