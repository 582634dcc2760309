//! Transaction Envelope
//!
//! A [`Transaction`] correlates a request with its eventual response(s). The
//! [`TransactionMode`] tells the receiver what to do with the id afterwards.
//!
//! | Mode | Meaning |
//! |------|---------|
//! | `Create` | opens the id; a later `Continue` or `Complete` is expected |
//! | `Continue` | multi-step exchange continues on an open id |
//! | `Complete` | terminal; the id is closed after dispatch |
//! | `Single` | one-shot; dispatched and closed, no reply expected |

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::command::BaseCommand;

/// Lifecycle mode of a transaction message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TransactionMode {
    Create,
    Continue,
    Complete,
    Single,
}

impl TransactionMode {
    /// `true` for modes after which the transaction id is closed.
    #[must_use]
    #[inline]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, TransactionMode::Complete | TransactionMode::Single)
    }

    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            TransactionMode::Create => "CREATE",
            TransactionMode::Continue => "CONTINUE",
            TransactionMode::Complete => "COMPLETE",
            TransactionMode::Single => "SINGLE",
        }
    }
}

impl fmt::Display for TransactionMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Fully formed transaction message, ready to be encoded and signed.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: String,
    pub mode: TransactionMode,
    pub command: BaseCommand,
}

impl Transaction {
    pub fn new(id: impl Into<String>, mode: TransactionMode, command: BaseCommand) -> Self {
        Self {
            id: id.into(),
            mode,
            command,
        }
    }
}
