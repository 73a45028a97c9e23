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

//! CID-addressed blob storage across N redundant local slot directories
//! (`relayer_0 .. relayer_{N-1}`).
//!
//! Blobs are canonical-JSON files named `{cid}.json`, written to a temp
//! sibling and atomically renamed into place. Each slot enforces a byte
//! quota on fresh writes; reads re-derive the CID before trusting a file.

use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::crypto::cid_from_payload;
use crate::core::types::{canonical_json, decode_json_limited};

/// Hard cap on a blob file read back from disk, above any accepted upload.
const MAX_BLOB_BYTES: usize = 16 * 1024 * 1024;

/// Content store errors.
#[derive(Debug, Error)]
pub enum ContentError {
    /// Every slot rejected the write (quota or I/O).
    #[error("insufficient storage across all slots")]
    StorageFull,
    /// Claimed cid does not match the payload.
    #[error("cid mismatch")]
    CidMismatch,
    /// Key is not a 64-char lowercase hex digest.
    #[error("invalid cid")]
    InvalidCid,
    /// Slot index outside `0..redundancy`.
    #[error("invalid slot")]
    InvalidSlot,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("codec")]
    Codec,
}

/// Multi-slot local blob store.
pub struct ContentStore {
    base: PathBuf,
    redundancy: usize,
    quota_bytes: u64,
}

/// A cid is a lowercase SHA-256 hex string; anything else is rejected
/// before it can touch a file path.
pub fn is_valid_cid(cid: &str) -> bool {
    cid.len() == 64 && cid.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}

impl ContentStore {
    /// Open the store rooted at `base`, creating the slot directories.
    pub fn open(base: &str, redundancy: usize, quota_bytes: u64) -> Result<Self, ContentError> {
        let store = Self {
            base: PathBuf::from(base),
            redundancy: redundancy.max(1),
            quota_bytes,
        };
        for i in 0..store.redundancy {
            fs::create_dir_all(store.slot_dir(i))?;
        }
        Ok(store)
    }

    fn slot_dir(&self, idx: usize) -> PathBuf {
        self.base.join(format!("relayer_{idx}"))
    }

    /// Store `payload` into every slot that has room, returning its CID.
    ///
    /// A slot already holding `{cid}.json` counts as written. Fails with
    /// [`ContentError::StorageFull`] only when no slot accepted the blob.
    pub fn store_local(&self, payload: &Value) -> Result<String, ContentError> {
        let cid = cid_from_payload(payload).map_err(|_| ContentError::Codec)?;
        let bytes = canonical_json(payload).map_err(|_| ContentError::Codec)?.into_bytes();

        let mut written = 0;
        for i in 0..self.redundancy {
            if self.write_slot(&cid, &bytes, i)? {
                written += 1;
            }
        }
        if written == 0 {
            return Err(ContentError::StorageFull);
        }
        Ok(cid)
    }

    /// Fetch a blob by cid from the first slot holding an intact copy.
    /// Corrupted or mismatching files are skipped, not errors.
    pub fn fetch_local(&self, cid: &str) -> Option<Value> {
        if !is_valid_cid(cid) {
            return None;
        }
        for i in 0..self.redundancy {
            let path = self.slot_dir(i).join(format!("{cid}.json"));
            let Ok(bytes) = fs::read(&path) else { continue };
            let Ok(payload) = decode_json_limited(&bytes, MAX_BLOB_BYTES) else { continue };
            match cid_from_payload(&payload) {
                Ok(derived) if derived == cid => return Some(payload),
                _ => continue,
            }
        }
        None
    }

    /// Peer-originated write into one slot. The claimed cid is re-derived
    /// from the payload before anything is persisted.
    pub fn store_to_slot(&self, cid: &str, payload: &Value, idx: usize) -> Result<(), ContentError> {
        if !is_valid_cid(cid) {
            return Err(ContentError::InvalidCid);
        }
        if idx >= self.redundancy {
            return Err(ContentError::InvalidSlot);
        }
        let derived = cid_from_payload(payload).map_err(|_| ContentError::Codec)?;
        if derived != cid {
            return Err(ContentError::CidMismatch);
        }
        let bytes = canonical_json(payload).map_err(|_| ContentError::Codec)?.into_bytes();
        if !self.write_slot(cid, &bytes, idx)? {
            return Err(ContentError::StorageFull);
        }
        Ok(())
    }

    /// Number of slots currently holding `{cid}.json`.
    pub fn copies_of(&self, cid: &str) -> usize {
        if !is_valid_cid(cid) {
            return 0;
        }
        (0..self.redundancy)
            .filter(|&i| self.slot_dir(i).join(format!("{cid}.json")).exists())
            .count()
    }

    /// Write one slot; `Ok(false)` means the quota rejected a fresh write.
    fn write_slot(&self, cid: &str, bytes: &[u8], idx: usize) -> Result<bool, ContentError> {
        let dir = self.slot_dir(idx);
        let dst = dir.join(format!("{cid}.json"));
        if dst.exists() {
            return Ok(true);
        }

        let projected = dir_size_bytes(&dir)? + bytes.len() as u64;
        if projected > self.quota_bytes {
            return Ok(false);
        }

        let tmp = dir.join(format!(".{cid}.json.tmp"));
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, &dst)?;
        Ok(true)
    }
}

fn dir_size_bytes(dir: &Path) -> Result<u64, ContentError> {
    let mut total = 0u64;
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        // Files can vanish between listing and stat; ignore those.
        if let Ok(md) = entry.metadata() {
            if md.is_file() {
                total += md.len();
            }
        }
    }
    Ok(total)
}
