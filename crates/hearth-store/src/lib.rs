//! # hearth-store
//!
//! Local persistence for one community replica.
//!
//! A [`LogStore`] keeps the replicated collections (certificates, channels,
//! messages, hosted files and the direct-message directory) in SQLite and
//! mirrors each of them in an in-memory merge log that decides whether an
//! incoming entry is new, a duplicate or rejected. Content bytes live in a
//! [`BlockStore`] addressed by BLAKE3 content id.

pub mod blocks;
pub mod channels;
pub mod certificates;
pub mod database;
pub mod directory;
pub mod files;
pub mod log;
pub mod membership;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod store;

mod error;

pub use blocks::{BlockStore, FsBlockStore, MemoryBlockStore};
pub use database::Database;
pub use error::{Result, StoreError};
pub use log::{GrowOnlyLog, LogEntry, Merge};
pub use membership::MembershipRegistry;
pub use models::*;
pub use store::LogStore;
