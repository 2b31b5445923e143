//! REST API server module.
//!
//! Provides HTTP endpoints for triggering scans, streaming their output,
//! managing trigger intervals, and reading logs.

pub mod error;
pub mod models;
pub mod routes;
pub mod server;

pub use server::{ApiServer, ApiServerConfig, AppState};
