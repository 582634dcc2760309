//! Transaction Store
//!
//! Tracks in-flight transactions by id so that a response can be matched to
//! the request that caused it.
//!
//! # Lifecycle
//!
//! ```text
//!  begin() / inbound CREATE        record() / inbound CONTINUE
//! ─────────────────────────▶ open ◀───────────────────────────┐
//!                             │  └────────────────────────────┘
//!                             │ COMPLETE / SINGLE dispatched or sent,
//!                             │ cancel(), or swept as abandoned
//!                             ▼
//!                           closed (removed)
//! ```
//!
//! # Invariants
//!
//! - At most one open entry per id.
//! - All opens and closes go through one mutex, so two closes of the same
//!   id never race.
//! - The context handed to a handler is the entry as it was *before* the
//!   inbound command was recorded, i.e. it carries the previous command.
//! - A failed dispatch leaves the store as it was before the message.
//! - An inbound SINGLE needs no prior entry: nodes use it for one-shot
//!   reports (SYNC, SERVER_SHUTDOWN) that nothing on this side opened.

use std::collections::HashMap;

use parking_lot::Mutex;
use playpen_proto::{BaseCommand, Transaction, TransactionMode};
use tracing::debug;

use crate::error::NetworkError;
use crate::ids::IdGenerator;

/// Milliseconds since the Unix epoch; 0 if the clock is unavailable.
#[inline]
pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSACTION INFO
// ════════════════════════════════════════════════════════════════════════════

/// Stored state of one open transaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransactionInfo {
    pub id: String,
    /// Coordinator on the other end of the exchange, once known.
    pub peer: Option<String>,
    /// Most recently sent or received message on this id.
    pub transaction: Option<Transaction>,
    pub created_at_ms: u64,
    pub last_activity_ms: u64,
}

impl TransactionInfo {
    fn new(id: String, now: u64) -> Self {
        Self {
            id,
            peer: None,
            transaction: None,
            created_at_ms: now,
            last_activity_ms: now,
        }
    }

    /// The command carried by the stored transaction, if any.
    pub fn command(&self) -> Option<&BaseCommand> {
        self.transaction.as_ref().map(|t| &t.command)
    }
}

// ════════════════════════════════════════════════════════════════════════════
// TRANSACTION STORE
// ════════════════════════════════════════════════════════════════════════════

pub struct TransactionStore {
    ids: IdGenerator,
    open: Mutex<HashMap<String, TransactionInfo>>,
}

impl TransactionStore {
    pub fn new(ids: IdGenerator) -> Self {
        Self {
            ids,
            open: Mutex::new(HashMap::new()),
        }
    }

    /// Open an empty transaction under a fresh id.
    pub fn begin(&self) -> TransactionInfo {
        let mut open = self.open.lock();
        let mut id = self.ids.generate();
        while open.contains_key(&id) {
            id = self.ids.generate();
        }
        let info = TransactionInfo::new(id.clone(), now_ms());
        open.insert(id, info.clone());
        info
    }

    /// Attach `mode` and `command` to the open transaction `id`.
    ///
    /// The result is not stored; [`record`](Self::record) does that once the
    /// message is about to leave.
    pub fn build(
        &self,
        id: &str,
        mode: TransactionMode,
        command: BaseCommand,
    ) -> Result<Transaction, NetworkError> {
        if !self.open.lock().contains_key(id) {
            return Err(NetworkError::UnknownTransaction(id.to_string()));
        }
        Ok(Transaction::new(id, mode, command))
    }

    /// Store `transaction`, about to be sent to `peer`, as the latest
    /// context of its open id.
    pub fn record(&self, transaction: &Transaction, peer: &str) -> Result<(), NetworkError> {
        let mut open = self.open.lock();
        let info = open
            .get_mut(&transaction.id)
            .ok_or_else(|| NetworkError::UnknownTransaction(transaction.id.clone()))?;
        info.peer = Some(peer.to_string());
        info.transaction = Some(transaction.clone());
        info.last_activity_ms = now_ms();
        Ok(())
    }

    /// Correlate an inbound transaction and hand it to `handler`.
    ///
    /// - unknown id with `Create` or `Single`: a new entry is opened
    /// - unknown id otherwise: `UnknownTransaction`, handler not called
    /// - known id with `Create`: `DuplicateTransaction`, handler not called
    ///
    /// The handler receives the command, the context *before* this message
    /// was recorded, and `origin`. For `Complete`/`Single` the entry is
    /// closed afterwards whatever the handler returned. When the handler
    /// fails on a `Create` the entry is dropped, on a `Continue` its
    /// previous context is restored.
    pub fn receive<T, F>(
        &self,
        transaction: Transaction,
        origin: &str,
        handler: F,
    ) -> Result<T, NetworkError>
    where
        F: FnOnce(&BaseCommand, &TransactionInfo, &str) -> Result<T, NetworkError>,
    {
        let (context, existed) = {
            let mut open = self.open.lock();
            let now = now_ms();
            let existed = open.contains_key(&transaction.id);
            let previous = match open.get(&transaction.id) {
                Some(_) if transaction.mode == TransactionMode::Create => {
                    return Err(NetworkError::DuplicateTransaction(transaction.id));
                }
                Some(info) => info.clone(),
                None if matches!(
                    transaction.mode,
                    TransactionMode::Create | TransactionMode::Single
                ) =>
                {
                    TransactionInfo::new(transaction.id.clone(), now)
                }
                None => return Err(NetworkError::UnknownTransaction(transaction.id)),
            };

            let mut current = previous.clone();
            current.peer = Some(origin.to_string());
            current.transaction = Some(transaction.clone());
            current.last_activity_ms = now;
            open.insert(transaction.id.clone(), current);
            (previous, existed)
        };

        debug!(
            transaction_id = %transaction.id,
            mode = %transaction.mode,
            command = %transaction.command.command_type(),
            origin,
            "dispatching inbound transaction"
        );

        let result = handler(&transaction.command, &context, origin);

        if transaction.mode.is_terminal() {
            self.close(&transaction.id);
        } else if result.is_err() {
            self.drop_failed(&transaction, context, existed);
        }
        result
    }

    /// Undo what `receive` recorded for a message whose dispatch failed:
    /// an entry it opened is removed, an entry it continued gets its
    /// previous context back. Entries the handler already moved on from
    /// are left alone.
    fn drop_failed(&self, transaction: &Transaction, previous: TransactionInfo, existed: bool) {
        let mut open = self.open.lock();
        let untouched = open
            .get(&transaction.id)
            .map_or(false, |info| info.transaction.as_ref() == Some(transaction));
        if !untouched {
            return;
        }
        if existed {
            open.insert(transaction.id.clone(), previous);
        } else {
            open.remove(&transaction.id);
        }
        debug!(transaction_id = %transaction.id, "failed inbound transaction dropped");
    }

    /// Remove the transaction without any network effect.
    pub fn cancel(&self, id: &str) -> bool {
        self.open.lock().remove(id).is_some()
    }

    /// Remove a transaction that reached a terminal mode.
    pub fn close(&self, id: &str) -> bool {
        self.open.lock().remove(id).is_some()
    }

    pub fn get_info(&self, id: &str) -> Option<TransactionInfo> {
        self.open.lock().get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.open.lock().contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.open.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.open.lock().is_empty()
    }

    /// Remove and return every entry idle for more than `timeout_ms`.
    pub fn sweep_expired(&self, now_ms: u64, timeout_ms: u64) -> Vec<TransactionInfo> {
        let mut open = self.open.lock();
        let expired: Vec<String> = open
            .values()
            .filter(|info| now_ms.saturating_sub(info.last_activity_ms) > timeout_ms)
            .map(|info| info.id.clone())
            .collect();
        expired
            .iter()
            .filter_map(|id| open.remove(id))
            .collect()
    }
}
