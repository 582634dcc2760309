//! Id generation for transactions and servers.

use uuid::Uuid;

/// Generates `<prefix>-<uuid-v4>` identifiers.
#[derive(Debug, Clone)]
pub struct IdGenerator {
    prefix: String,
}

impl IdGenerator {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn generate(&self) -> String {
        format!("{}-{}", self.prefix, Uuid::new_v4())
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new("net")
    }
}
