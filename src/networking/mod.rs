#![forbid(unsafe_code)]
#![warn(missing_docs)]

//! Networking: peer membership, outbound peer HTTP, bootstrap.

/// Startup seed registration and peer sync.
pub mod bootstrap;
/// Peer admission, heartbeat, and pruning.
pub mod peer_registry;
/// Replication fan-out, vote solicitation, block broadcast.
pub mod replication;
