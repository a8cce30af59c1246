//! Protocol engine for a peer-to-peer group file-sharing node.
//!
//! Modules are public so integration tests and `main.rs` can drive
//! the wire codec, inventory, and transfer workers directly.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod inventory;
pub mod lifecycle;
pub mod multicast;
pub mod pending;
pub mod transfer;
pub mod wire;
