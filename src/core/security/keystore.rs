#![forbid(unsafe_code)]
#![deny(missing_docs)]
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

//! Node keystore: the secp256k1 signing key persisted at startup.
//!
//! ## Production hardening
//! - **Atomic writes** for private key material.
//! - **Key-at-rest encryption** (optional) via `BLOCKNET_KEY_PASSPHRASE`.
//! - **Best-effort zeroization** of sensitive buffers.
//!
//! ### Key encryption format
//! If `BLOCKNET_KEY_PASSPHRASE` is set, `node.key` is stored as:
//! `MAGIC(8) || SALT(16) || NONCE(12) || CIPHERTEXT+TAG(..)`
//! where the ciphertext is AES-256-GCM over the 32-byte secret scalar.
//! Without a passphrase the file holds the scalar as plain hex, matching
//! what external tooling expects of a relayer key file.

use k256::ecdsa::SigningKey;
use ring::{
    aead, pbkdf2,
    rand::{SecureRandom, SystemRandom},
};
use std::{
    fs,
    io::Write,
    num::NonZeroU32,
    path::{Path, PathBuf},
};
use thiserror::Error;
use zeroize::Zeroize;

use crate::core::crypto::{self, CryptoError};

const KEY_FILE_MAGIC: &[u8] = b"BNETKEY1"; // 8 bytes
const KEY_SALT_LEN: usize = 16;
const KEY_NONCE_LEN: usize = 12;

const PBKDF2_ITERS_DEFAULT: u32 = 100_000;

fn env_passphrase() -> Option<String> {
    match std::env::var("BLOCKNET_KEY_PASSPHRASE") {
        Ok(v) if !v.trim().is_empty() => Some(v),
        _ => None,
    }
}

fn pbkdf2_iters() -> NonZeroU32 {
    // Optional override via env; clamp to a practical range.
    let iters = std::env::var("BLOCKNET_PBKDF2_ITERS")
        .ok()
        .and_then(|v| v.parse::<u32>().ok())
        .unwrap_or(PBKDF2_ITERS_DEFAULT)
        .clamp(10_000, 10_000_000);
    NonZeroU32::new(iters).unwrap_or_else(|| NonZeroU32::new(PBKDF2_ITERS_DEFAULT).expect("nonzero"))
}

/// Keystore errors.
#[derive(Debug, Error)]
pub enum KeystoreError {
    /// Key file read/write failed.
    #[error("io")]
    Io,
    /// Key file holds neither hex nor a valid encrypted container.
    #[error("invalid key encoding")]
    InvalidKey,
    /// Encrypted key file without a configured passphrase.
    #[error("missing passphrase (set BLOCKNET_KEY_PASSPHRASE)")]
    MissingPassphrase,
    /// Key derivation, encryption, or signing failed.
    #[error("crypto")]
    Crypto,
}

impl From<CryptoError> for KeystoreError {
    fn from(_: CryptoError) -> Self {
        KeystoreError::Crypto
    }
}

#[cfg(unix)]
fn restrict_key_perms(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    // Owner-only; failure is tolerated on filesystems without modes.
    let _ = fs::set_permissions(path, fs::Permissions::from_mode(0o600));
}

#[cfg(not(unix))]
fn restrict_key_perms(_path: &Path) {}

/// Key material reaches disk through a temp sibling and a rename, so a
/// crash never leaves a truncated `node.key` behind.
fn persist_key_file(path: &Path, bytes: &[u8]) -> Result<(), KeystoreError> {
    let dir = path.parent().ok_or(KeystoreError::Io)?;
    fs::create_dir_all(dir).map_err(|_| KeystoreError::Io)?;

    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or(KeystoreError::Io)?;
    let tmp = dir.join(format!("{name}.tmp"));

    let mut f = fs::File::create(&tmp).map_err(|_| KeystoreError::Io)?;
    f.write_all(bytes).map_err(|_| KeystoreError::Io)?;
    let _ = f.sync_all();
    drop(f);
    restrict_key_perms(&tmp);

    fs::rename(&tmp, path).map_err(|_| KeystoreError::Io)?;
    restrict_key_perms(path);
    Ok(())
}

fn derive_aes256gcm_key(
    passphrase: &[u8],
    salt: &[u8; KEY_SALT_LEN],
) -> Result<[u8; 32], KeystoreError> {
    let mut out = [0u8; 32];
    pbkdf2::derive(pbkdf2::PBKDF2_HMAC_SHA256, pbkdf2_iters(), salt, passphrase, &mut out);
    Ok(out)
}

fn encrypt_scalar(passphrase: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    let rng = SystemRandom::new();

    let mut salt = [0u8; KEY_SALT_LEN];
    rng.fill(&mut salt).map_err(|_| KeystoreError::Crypto)?;

    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    rng.fill(&mut nonce_bytes).map_err(|_| KeystoreError::Crypto)?;
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt)?;
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = plaintext.to_vec();
    less_safe
        .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;

    key.zeroize();

    let mut out = Vec::with_capacity(KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + in_out.len());
    out.extend_from_slice(KEY_FILE_MAGIC);
    out.extend_from_slice(&salt);
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&in_out);
    Ok(out)
}

fn decrypt_scalar(passphrase: &[u8], bytes: &[u8]) -> Result<Vec<u8>, KeystoreError> {
    if bytes.len() < KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN + 16 {
        return Err(KeystoreError::InvalidKey);
    }

    let mut salt = [0u8; KEY_SALT_LEN];
    salt.copy_from_slice(&bytes[KEY_FILE_MAGIC.len()..KEY_FILE_MAGIC.len() + KEY_SALT_LEN]);
    let mut nonce_bytes = [0u8; KEY_NONCE_LEN];
    nonce_bytes.copy_from_slice(
        &bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN..KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN],
    );
    let nonce = aead::Nonce::assume_unique_for_key(nonce_bytes);

    let mut key = derive_aes256gcm_key(passphrase, &salt)?;
    let unbound = aead::UnboundKey::new(&aead::AES_256_GCM, &key).map_err(|_| KeystoreError::Crypto)?;
    let less_safe = aead::LessSafeKey::new(unbound);

    let mut in_out = bytes[KEY_FILE_MAGIC.len() + KEY_SALT_LEN + KEY_NONCE_LEN..].to_vec();
    let plain = less_safe
        .open_in_place(nonce, aead::Aad::empty(), &mut in_out)
        .map_err(|_| KeystoreError::Crypto)?;

    key.zeroize();
    Ok(plain.to_vec())
}

/// The node's signing identity: a secp256k1 key loaded (or created) once at
/// startup, read-only thereafter.
pub struct NodeKeystore {
    signing_key: SigningKey,
    address: String,
}

impl NodeKeystore {
    /// Load or create the key at `data_dir/node.key`.
    pub fn open(data_dir: &str) -> Result<Self, KeystoreError> {
        let mut key_path = PathBuf::from(data_dir);
        key_path.push("node.key");
        Self::open_path(&key_path)
    }

    /// Load or create the key at an explicit path.
    pub fn open_path(path: &Path) -> Result<Self, KeystoreError> {
        let pass = env_passphrase();

        if path.exists() {
            let bytes = fs::read(path).map_err(|_| KeystoreError::Io)?;
            let mut scalar = if bytes.starts_with(KEY_FILE_MAGIC) {
                let Some(p) = pass.as_deref() else {
                    return Err(KeystoreError::MissingPassphrase);
                };
                decrypt_scalar(p.as_bytes(), &bytes)?
            } else {
                let text = String::from_utf8(bytes).map_err(|_| KeystoreError::InvalidKey)?;
                hex::decode(text.trim().trim_start_matches("0x"))
                    .map_err(|_| KeystoreError::InvalidKey)?
            };
            let key = SigningKey::from_slice(&scalar).map_err(|_| KeystoreError::InvalidKey)?;
            scalar.zeroize();
            return Ok(Self::from_signing_key(key));
        }

        let key = SigningKey::random(&mut rand::rngs::OsRng);
        let mut scalar = key.to_bytes().to_vec();
        let on_disk = if let Some(p) = pass.as_deref() {
            encrypt_scalar(p.as_bytes(), &scalar)?
        } else {
            hex::encode(&scalar).into_bytes()
        };
        scalar.zeroize();
        persist_key_file(path, &on_disk)?;

        Ok(Self::from_signing_key(key))
    }

    fn from_signing_key(signing_key: SigningKey) -> Self {
        let address = crypto::address_from_key(signing_key.verifying_key());
        Self { signing_key, address }
    }

    /// The node's lowercase 0x-hex address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Sign `text` under the personal-message envelope.
    pub fn sign_text(&self, text: &str) -> Result<String, KeystoreError> {
        Ok(crypto::sign_personal(&self.signing_key, text)?)
    }
}
