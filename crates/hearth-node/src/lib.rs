//! # hearth-node
//!
//! The community storage engine. A [`Storage`] owns one community replica:
//! it opens the replicated log store and block store under the community's
//! root directory, joins the community's pub/sub topics and exposes the
//! membership, messaging and file operations. A [`Node`] runs several
//! communities side by side and routes transport traffic to them.

pub mod bridge;
pub mod config;
pub mod error;
pub mod events;
pub mod files;
pub mod node;
pub mod registrar;
pub mod storage;
pub mod sync;

pub use config::{NodeConfig, StorageOptions};
pub use error::{EngineError, Result};
pub use events::EngineEvent;
pub use files::FileTransferManager;
pub use node::Node;
pub use registrar::{Registrar, RegistrationOutcome};
pub use storage::{Storage, StoragePaths};
pub use sync::ReconcileReport;
