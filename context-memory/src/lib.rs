//! # Context Memory
//!
//! Per-project, per-AI conversation memory for stateless AI APIs.
//!
//! Each (project, AI) pair owns a bounded, chronologically ordered message
//! history. Projects are identified by a digest of their absolute directory
//! path, so the same checkout always finds its own history and two checkouts
//! never see each other's.
//!
//! ## Features
//!
//! - **Isolation**: histories are keyed by project and AI, nothing is shared
//! - **Bounded retention**: the oldest messages are dropped past the limit
//! - **Atomic updates**: readers see the old or the new history, never a mix
//! - **Pluggable storage**: JSON files, SQLite, or SQLite behind a front cache
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use context_memory::{AiName, ContextManager, Message, ProjectKey, StorageConfig};
//!
//! #[tokio::main]
//! async fn main() -> context_memory::Result<()> {
//!     let manager = ContextManager::builder()
//!         .storage(StorageConfig::File { root: "/tmp/contexts".into() })
//!         .retention_limit(20)
//!         .build()
//!         .await?;
//!
//!     let project = ProjectKey::from_current_dir()?;
//!     let gemini = AiName::parse("gemini")?;
//!
//!     manager
//!         .append_and_persist(&project, &gemini, vec![Message::user("Hello")])
//!         .await?;
//!     let history = manager.get_context(&project, &gemini).await?;
//!     println!("{} messages remembered", history.len());
//!     Ok(())
//! }
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

mod errors;
mod locks;
mod manager;
mod message;
mod project;

/// Storage backends
pub mod store;

pub use errors::{ContextError, Result};
pub use locks::KeyLocks;
pub use manager::{
    ContextConfig, ContextManager, ContextManagerBuilder, DEFAULT_RETENTION_LIMIT,
    DEFAULT_SEARCH_LIMIT,
};
pub use message::{ContextRecord, Message, ParseRoleError, Role, retain_recent};
pub use project::{AiName, ClearTarget, ContextKey, KNOWN_AIS, Project, ProjectKey};
pub use store::{
    AiSummary, BackendKind, CacheConfig, CacheStats, ContextStore, StorageConfig, open_store,
};
