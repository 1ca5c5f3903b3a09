//! Durable cluster state for k3sctl
//!
//! Every known cluster is stored as one record keyed by its identity
//! `{name}.{region}.{provider}`. The crate provides:
//!
//! - the data model ([`ClusterDescriptor`], [`ClusterState`], [`Node`])
//! - [`merge_into`], which layers a partial descriptor over a stored record
//! - the [`StateStore`] trait with a file-backed and an in-memory store
//! - [`StateWatcher`], which reports record changes in a state directory
//!
//! Everything is runtime agnostic; file I/O goes through `async-fs`.
//!
//! # Example
//!
//! ```no_run
//! use cluster_state::{ClusterDescriptor, ClusterState, FileStore, StateStore, Status};
//!
//! # async fn example() -> cluster_state::Result<()> {
//! let store = FileStore::new("/tmp/k3sctl-state").await?;
//!
//! let mut descriptor = ClusterDescriptor::new("dev", "demo");
//! descriptor.master = 1;
//! let state = ClusterState::new(descriptor, Status::Creating);
//! store.create(&state).await?;
//!
//! for cluster in store.list().await? {
//!     println!("{} {}", cluster.id(), cluster.status);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod merge;
pub mod models;
pub mod store;
pub mod watch;

pub use error::{Error, Result};
pub use merge::merge_into;
pub use models::*;
pub use store::{FileStore, MemoryStore, StateStore};
pub use watch::{StateEvent, StateWatcher};
