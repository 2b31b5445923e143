//! atlas-server library crate.
//!
//! This module exposes the scan engine and API for integration testing.

pub mod api;
pub mod config;
pub mod error;
pub mod logging;
pub mod scan;

pub use error::{Error, Result};
