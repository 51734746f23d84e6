//! `ez2boot` Core Library
//!
//! Shared functionality for `ez2boot` components:
//! - `SQLite` pool helpers and the `define_database!` macro
//! - Layered configuration (defaults, settings file, environment)
//! - Common error types
//! - Tracing initialisation

pub mod config;
pub mod db;
pub mod error;
pub mod tracing_init;

pub use config::Config;
pub use error::{Error, Result};
