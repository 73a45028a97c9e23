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

//! Peer membership: admission of `register_peer` requests and the
//! heartbeat/staleness loop.
//!
//! ## Admission
//! A peer is identified by its canonical origin (`scheme://host[:port]`,
//! no trailing slash). Registration URLs must be bare origins: no
//! credentials, query, fragment, or non-root path. When `require_peer_auth`
//! is on, the request must carry `{address, timestamp, signature}` where
//! the signature covers `register|{canonical_url}|{ts}|{address}` and the
//! timestamp is within ±300 s of local time; an allowlist, when set,
//! additionally gates the address.
//!
//! ## Liveness
//! The heartbeat loop GETs `/health` on every known peer, bumps
//! `last_seen` on a 200, and prunes rows older than the staleness window.

use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::{debug, info, warn};
use url::Url;

use crate::api::AppState;
use crate::core::crypto::verify_personal;
use crate::core::types::{unix_now, RelayerConfig};

/// Maximum accepted URL length.
const MAX_URL_LEN: usize = 2048;
/// Replay window for signed registrations.
const AUTH_WINDOW_SECS: u64 = 300;

/// Peer admission errors. The API layer maps these onto 400/401/403.
#[derive(Debug, Error)]
pub enum PeerAdmissionError {
    /// Unparseable, empty, or oversized URL.
    #[error("invalid url")]
    InvalidUrl,
    /// Scheme outside http/https.
    #[error("unsupported scheme")]
    UnsupportedScheme,
    /// Missing host or embedded credentials.
    #[error("invalid host")]
    InvalidHost,
    /// Query or fragment present.
    #[error("url must not contain query or fragment")]
    NonOriginUrl,
    /// Path other than `/`.
    #[error("url must be base origin only")]
    NonRootPath,
    /// Signed registration required but fields are missing.
    #[error("auth required")]
    AuthRequired,
    /// Timestamp outside the replay window.
    #[error("stale timestamp")]
    StaleTimestamp,
    /// Signature does not recover to the claimed address.
    #[error("invalid signature")]
    InvalidSignature,
    /// Address not on the configured allowlist.
    #[error("peer not allowed")]
    NotAllowed,
    /// Localhost/RFC1918 host with `allow_local_peers` off.
    #[error("local peers not allowed")]
    LocalDisallowed,
}

/// A `register_peer` request body.
#[derive(Clone, Debug, Deserialize)]
pub struct RegisterPeerRequest {
    /// Peer origin URL.
    pub url: String,
    /// Signer address (required under peer auth).
    #[serde(default)]
    pub address: Option<String>,
    /// Unix seconds (required under peer auth).
    #[serde(default)]
    pub timestamp: Option<u64>,
    /// Signature over `register|{canonical_url}|{ts}|{address}`.
    #[serde(default)]
    pub signature: Option<String>,
}

/// Parse and canonicalize a peer URL to its bare origin.
pub fn canonicalize_peer_url(raw: &str) -> Result<String, PeerAdmissionError> {
    if raw.is_empty() || raw.len() > MAX_URL_LEN {
        return Err(PeerAdmissionError::InvalidUrl);
    }
    let parsed = Url::parse(raw).map_err(|_| PeerAdmissionError::InvalidUrl)?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(PeerAdmissionError::UnsupportedScheme);
    }
    if !parsed.username().is_empty() || parsed.password().is_some() {
        return Err(PeerAdmissionError::InvalidHost);
    }
    let Some(host) = parsed.host_str() else {
        return Err(PeerAdmissionError::InvalidHost);
    };
    if parsed.query().is_some() || parsed.fragment().is_some() {
        return Err(PeerAdmissionError::NonOriginUrl);
    }
    if !matches!(parsed.path(), "" | "/") {
        return Err(PeerAdmissionError::NonRootPath);
    }
    let canon = match parsed.port() {
        Some(port) => format!("{}://{}:{}", parsed.scheme(), host, port),
        None => format!("{}://{}", parsed.scheme(), host),
    };
    Ok(canon)
}

/// Whether a host names this machine or a private (RFC1918) network.
pub fn is_local_host(host: &str) -> bool {
    if host.eq_ignore_ascii_case("localhost") {
        return true;
    }
    match host.parse::<std::net::Ipv4Addr>() {
        Ok(ip) => ip.is_loopback() || ip.is_private(),
        Err(_) => false,
    }
}

/// Validate a registration request and return the canonical peer URL.
/// Pure policy; the caller upserts the peer row on success.
pub fn admit_peer(
    cfg: &RelayerConfig,
    req: &RegisterPeerRequest,
    now: u64,
) -> Result<String, PeerAdmissionError> {
    let canon = canonicalize_peer_url(&req.url)?;

    if cfg.require_peer_auth {
        let (Some(address), Some(ts), Some(signature)) =
            (req.address.as_deref(), req.timestamp, req.signature.as_deref())
        else {
            return Err(PeerAdmissionError::AuthRequired);
        };
        if now.abs_diff(ts) > AUTH_WINDOW_SECS {
            return Err(PeerAdmissionError::StaleTimestamp);
        }
        let message = format!("register|{canon}|{ts}|{address}");
        if !verify_personal(address, &message, signature) {
            return Err(PeerAdmissionError::InvalidSignature);
        }
        if !cfg.peer_allowlist.is_empty()
            && !cfg
                .peer_allowlist
                .iter()
                .any(|a| a.eq_ignore_ascii_case(address))
        {
            return Err(PeerAdmissionError::NotAllowed);
        }
    }

    if !cfg.allow_local_peers {
        let parsed = Url::parse(&canon).map_err(|_| PeerAdmissionError::InvalidUrl)?;
        if parsed.host_str().map(is_local_host).unwrap_or(true) {
            return Err(PeerAdmissionError::LocalDisallowed);
        }
    }

    Ok(canon)
}

/// Run the heartbeat loop until shutdown: ping every known peer's
/// `/health`, refresh `last_seen` on success, prune rows past staleness.
pub async fn run_heartbeat(state: Arc<AppState>, mut shutdown: watch::Receiver<bool>) {
    let interval = Duration::from_secs(state.cfg.peer_heartbeat_interval_secs.max(1));
    let stale_after = state.cfg.peer_stale_after_secs;
    info!(interval_secs = interval.as_secs(), "peer heartbeat started");
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => {
                info!("peer heartbeat stopping");
                return;
            }
        }

        let peers = match state.store.list_peers(None) {
            Ok(p) => p,
            Err(e) => {
                warn!(err = %e, "heartbeat peer listing failed");
                continue;
            }
        };

        for peer in &peers {
            match state.peers.health_check(&peer.url).await {
                Ok(true) => {
                    let _ = state.store.upsert_peer(&peer.url, unix_now());
                }
                Ok(false) => debug!(peer = %peer.url, "health check non-200"),
                Err(e) => debug!(peer = %peer.url, err = %e, "health check failed"),
            }
        }

        let cutoff = unix_now().saturating_sub(stale_after);
        match state.store.prune_stale_peers(cutoff) {
            Ok(0) => {}
            Ok(removed) => info!(removed, "pruned stale peers"),
            Err(e) => warn!(err = %e, "peer pruning failed"),
        }
        state
            .metrics
            .known_peers
            .set(state.store.list_peers(None).map(|p| p.len()).unwrap_or(0) as i64);
    }
}
