//! # k3sctl
//!
//! Command-line tool and WebSocket API for provisioning k3s clusters.
//!
//! The binary wires a [`cluster_state::FileStore`] and the registered
//! providers into a [`cluster_orchestration::Orchestrator`] and exposes it
//! two ways: one-shot subcommands (`create`, `join`, `delete`, `list`,
//! `describe`) and `serve`, a long-running API server speaking the JSON
//! messages in [`protocol`].

#![warn(missing_docs)]
#![warn(unsafe_code)]

pub mod app;
pub mod client;
pub mod config;
pub mod daemon;
pub mod flags;
pub mod logging;
pub mod protocol;

pub use app::App;
pub use client::ApiClient;
pub use config::Config;
