//! API server exposing the orchestrator over WebSocket

pub mod handlers;
pub mod server;

pub use server::{run, serve};
