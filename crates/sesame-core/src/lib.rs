//! # sesame-core
//!
//! Core types, configuration, and utilities for Sesame.
//!
//! This crate provides shared functionality used across all Sesame crates:
//!
//! - **Configuration**: Loading, validation, and environment overrides
//! - **Secrets**: Zeroizing byte buffers for secret material
//! - **Utilities**: Path resolution, environment handling, logging setup

pub mod config;
pub mod env;
pub mod error;
pub mod logging;
pub mod paths;
pub mod secret;

// Re-exports for convenience
pub use config::Config;
pub use error::{ConfigError, Error, Result};
pub use secret::SecretBytes;
