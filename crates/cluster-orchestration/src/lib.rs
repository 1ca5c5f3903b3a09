//! # Cluster orchestration
//!
//! Drives the lifecycle of k3s clusters across provider backends.
//!
//! The [`Orchestrator`] resolves a [`Provider`] by name, persists intent in a
//! [`cluster_state::StateStore`] before touching any infrastructure, installs
//! k3s on masters and then workers through an [`Installer`], and records the
//! outcome. Failed workflows leave a `Failed` record behind and ask the
//! provider to roll back what it allocated.
//!
//! ## Example
//!
//! ```no_run
//! use cluster_orchestration::{Orchestrator, OrchestratorConfig, ProviderRegistry, SshInstaller};
//! use cluster_state::{ClusterDescriptor, FileStore};
//! use std::sync::Arc;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let config = OrchestratorConfig::default_location()?;
//! let store = FileStore::new(&config.state_dir).await?;
//! let orchestrator = Orchestrator::new(
//!     config,
//!     ProviderRegistry::with_defaults(),
//!     Arc::new(store),
//!     Arc::new(SshInstaller::new()),
//! );
//!
//! let mut descriptor = ClusterDescriptor::new("dev", "demo");
//! descriptor.master = 1;
//! let summary = orchestrator.create(descriptor).await?;
//! println!("{summary}");
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(unsafe_code)]

mod config;
mod events;
pub mod install;
pub mod kubeconfig;
mod orchestrator;
pub mod provider;
#[cfg(any(test, feature = "test-utils"))]
pub mod testing;

pub use config::{HOME_DIR_NAME, OrchestratorConfig};
pub use events::{ClusterEvent, ClusterWatch, RESOURCE_CHANGE, RESOURCE_CREATE, RESOURCE_REMOVE};
pub use install::{InstallContext, Installer, JoinInfo, Manifest, SshInstaller};
pub use orchestrator::{
    Confirm, CreateSummary, DeleteOutcome, Orchestrator, PendingCreate, PendingJoin,
};
pub use provider::{
    FlagSpec, PrepareFailure, Provider, ProviderFactory, ProviderRegistry, Provisioned,
};

/// Error types for orchestration operations
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Bad or missing input; nothing was persisted
    #[error("Invalid option: {0}")]
    InvalidOption(String),

    /// Unknown provider or cluster
    #[error("Not found: {0}")]
    NotFound(String),

    /// Failure reported by a provider backend or the remote install
    #[error("Provider error: {0:#}")]
    Provider(#[from] anyhow::Error),

    /// Reading or writing persisted state failed
    #[error("State error: {0}")]
    State(#[source] cluster_state::Error),

    /// Another record or workflow already owns the identity
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Updating the kubeconfig file failed
    #[error("Kubeconfig error: {0}")]
    Kubeconfig(String),
}

impl Error {
    /// Stable name of the error class, used by API responses
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidOption(_) => "InvalidOption",
            Error::NotFound(_) => "NotFound",
            Error::Provider(_) => "ProviderError",
            Error::State(_) => "StateError",
            Error::Conflict(_) => "ConflictError",
            Error::Kubeconfig(_) => "KubeconfigError",
        }
    }
}

impl From<cluster_state::Error> for Error {
    fn from(err: cluster_state::Error) -> Self {
        use cluster_state::Error as StateError;
        match err {
            StateError::NotFound(id) => Error::NotFound(id),
            StateError::Conflict(id) => Error::Conflict(id),
            e @ (StateError::Ambiguous { .. } | StateError::InvalidIdentity(_)) => {
                Error::InvalidOption(e.to_string())
            }
            other => Error::State(other),
        }
    }
}

/// Result type alias
pub type Result<T> = std::result::Result<T, Error>;
