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

//! Core protocol primitives (types, crypto, consensus, state, security).

/// Block proposal, voting, and chain rules.
pub mod consensus;
/// Hashing and recoverable-ECDSA primitives.
pub mod crypto;
/// Node key management.
pub mod security;
/// Durable tables and blob slots.
pub mod state;
/// Data model and canonical encoding.
pub mod types;
