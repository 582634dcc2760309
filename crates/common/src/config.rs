//! Config loader using TOML and serde.
//!
//! Every field has a default so an empty file is a valid configuration.
//!
//! ```toml
//! server_id = "net"
//! transaction_timeout_ms = 60000
//! sweep_interval_ms = 5000
//! scheduler_threads = 4
//! log_level = "info"
//!
//! [[coordinators]]
//! id = "node-1"
//! key = "8f1e...c0"
//! ```

use std::collections::HashSet;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;
use tracing::debug;

use crate::auth::SharedKey;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

/// A coordinator known ahead of time, with its shared key in hex.
#[derive(Debug, Deserialize, Clone, PartialEq, Eq)]
pub struct CoordinatorEntry {
    pub id: String,
    pub key: String,
}

impl CoordinatorEntry {
    pub fn shared_key(&self) -> Result<SharedKey, ConfigError> {
        let key = SharedKey::from_hex(&self.key)
            .map_err(|e| ConfigError::Invalid(format!("coordinator {}: {}", self.id, e)))?;
        if key.is_empty() {
            return Err(ConfigError::Invalid(format!(
                "coordinator {}: empty key",
                self.id
            )));
        }
        Ok(key)
    }
}

#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct Config {
    /// Prefix of every id generated by this process (`<server_id>-<uuid>`).
    pub server_id: String,

    /// A transaction idle for longer than this is abandoned.
    pub transaction_timeout_ms: u64,

    /// Period of the background transaction sweep.
    pub sweep_interval_ms: u64,

    /// Worker threads of the background runtime.
    pub scheduler_threads: usize,

    /// Default log filter; `RUST_LOG` takes precedence.
    pub log_level: String,

    pub coordinators: Vec<CoordinatorEntry>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            server_id: "net".to_string(),
            transaction_timeout_ms: 60_000,
            sweep_interval_ms: 5_000,
            scheduler_threads: 4,
            log_level: "info".to_string(),
            coordinators: Vec::new(),
        }
    }
}

impl Config {
    /// Reject values the service cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server_id.trim().is_empty() {
            return Err(ConfigError::Invalid("server_id must not be empty".to_string()));
        }
        if self.transaction_timeout_ms == 0 {
            return Err(ConfigError::Invalid(
                "transaction_timeout_ms must be > 0".to_string(),
            ));
        }
        if self.sweep_interval_ms == 0 {
            return Err(ConfigError::Invalid("sweep_interval_ms must be > 0".to_string()));
        }
        if self.scheduler_threads == 0 {
            return Err(ConfigError::Invalid("scheduler_threads must be > 0".to_string()));
        }

        let mut seen = HashSet::new();
        for entry in &self.coordinators {
            if !seen.insert(entry.id.as_str()) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate coordinator id {}",
                    entry.id
                )));
            }
            entry.shared_key()?;
        }
        Ok(())
    }
}

/// Load and validate config from a TOML file path.
pub fn load_from_file(path: impl AsRef<Path>) -> Result<Config, ConfigError> {
    let s = fs::read_to_string(path.as_ref())?;
    let cfg = load_from_str(&s)?;
    debug!(
        path = %path.as_ref().display(),
        coordinators = cfg.coordinators.len(),
        "config loaded"
    );
    Ok(cfg)
}

pub fn load_from_str(s: &str) -> Result<Config, ConfigError> {
    let cfg: Config = toml::from_str(s)?;
    cfg.validate()?;
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let def = Config::default();
        assert_eq!(def.server_id, "net");
        assert_eq!(def.scheduler_threads, 4);
        assert!(def.validate().is_ok());
    }

    #[test]
    fn test_empty_file_is_default() {
        let cfg = load_from_str("").expect("empty config");
        assert_eq!(cfg.transaction_timeout_ms, 60_000);
        assert!(cfg.coordinators.is_empty());
    }

    #[test]
    fn test_load_from_file_roundtrip() {
        use std::io::Write;
        let tmp = tempfile::NamedTempFile::new().expect("temp file");
        let toml = r#"
            server_id = "hub"
            transaction_timeout_ms = 1500
            sweep_interval_ms = 250

            [[coordinators]]
            id = "node-1"
            key = "0a0b0c0d"
        "#;
        let mut f = tmp.reopen().expect("reopen");
        write!(f, "{}", toml).expect("write");
        let cfg = load_from_file(tmp.path()).expect("load");
        assert_eq!(cfg.server_id, "hub");
        assert_eq!(cfg.transaction_timeout_ms, 1500);
        assert_eq!(cfg.sweep_interval_ms, 250);
        assert_eq!(cfg.scheduler_threads, 4);
        assert_eq!(cfg.coordinators.len(), 1);
        let key = cfg.coordinators[0].shared_key().expect("key");
        assert_eq!(key.as_bytes(), &[0x0a, 0x0b, 0x0c, 0x0d]);
    }

    #[test]
    fn test_missing_file() {
        let result = load_from_file("/definitely/not/here.toml");
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let result = load_from_str("transaction_timeout_ms = 0");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_bad_hex_key_rejected() {
        let toml = r#"
            [[coordinators]]
            id = "node-1"
            key = "not-hex"
        "#;
        assert!(matches!(load_from_str(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_coordinator_rejected() {
        let toml = r#"
            [[coordinators]]
            id = "node-1"
            key = "01"

            [[coordinators]]
            id = "node-1"
            key = "02"
        "#;
        assert!(matches!(load_from_str(toml), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            load_from_str("server_id = [1, 2"),
            Err(ConfigError::Parse(_))
        ));
    }
}
