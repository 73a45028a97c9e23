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

//! Boundary error envelope. Every handler failure becomes
//! `{"detail": <short message>}` with the matching status code.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::core::state::content::ContentError;
use crate::core::state::store::StoreError;
use crate::networking::peer_registry::PeerAdmissionError;

/// API-boundary errors.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Missing/ill-typed fields, URL validation, CID mismatch.
    #[error("{0}")]
    BadRequest(String),
    /// Missing or stale signed peer registration.
    #[error("{0}")]
    Unauthorized(String),
    /// Peer not on allowlist; local peer disallowed.
    #[error("{0}")]
    Forbidden(String),
    /// Unknown user or CID.
    #[error("{0}")]
    NotFound(String),
    /// Canonical payload encoding exceeds `max_payload_bytes`.
    #[error("payload too large")]
    PayloadTooLarge,
    /// Storage exhausted, DB write failure.
    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::Unauthorized(m) => (StatusCode::UNAUTHORIZED, m.clone()),
            ApiError::Forbidden(m) => (StatusCode::FORBIDDEN, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::PayloadTooLarge => {
                (StatusCode::PAYLOAD_TOO_LARGE, "Payload too large".to_string())
            }
            ApiError::Internal(m) => (StatusCode::INTERNAL_SERVER_ERROR, m.clone()),
        };
        (status, Json(json!({ "detail": detail }))).into_response()
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<ContentError> for ApiError {
    fn from(e: ContentError) -> Self {
        match e {
            ContentError::CidMismatch => ApiError::BadRequest("CID mismatch".to_string()),
            ContentError::InvalidCid => ApiError::BadRequest("invalid cid".to_string()),
            ContentError::InvalidSlot => ApiError::BadRequest("invalid slot".to_string()),
            ContentError::StorageFull => ApiError::Internal(e.to_string()),
            ContentError::Io(_) | ContentError::Codec => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<PeerAdmissionError> for ApiError {
    fn from(e: PeerAdmissionError) -> Self {
        use PeerAdmissionError::*;
        match e {
            InvalidUrl | UnsupportedScheme | InvalidHost | NonOriginUrl | NonRootPath => {
                ApiError::BadRequest(e.to_string())
            }
            AuthRequired | StaleTimestamp | InvalidSignature => {
                ApiError::Unauthorized(e.to_string())
            }
            NotAllowed | LocalDisallowed => ApiError::Forbidden(e.to_string()),
        }
    }
}
