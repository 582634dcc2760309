//! # Playpen Common Crate
//!
//! Shared utilities for the network core.
//!
//! ## Modules
//! - `auth`: HMAC-SHA3-256 message authentication (`AuthCodec`, `SharedKey`)
//! - `config`: TOML configuration loading
//! - `logging`: tracing subscriber setup

pub mod auth;
pub mod config;
pub mod logging;

pub use auth::{AuthCodec, AuthError, SharedKey, TAG_LEN};
pub use config::{load_from_file, load_from_str, Config, ConfigError, CoordinatorEntry};
pub use logging::init_tracing;
