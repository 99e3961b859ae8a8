//! Transaction contexts.
//!
//! Sessions are bound to a transaction explicitly: callers pass a
//! [`TransactionContext`] to `get_session`. A context accepts
//! [`Synchronization`] callbacks that run around completion, and may expose
//! a data source shared by every directory taking part in the transaction.
//!
//! [`LocalTransaction`] is an in-process implementation that tracks status
//! and drives the callbacks on `commit_or_rollback`.

use crate::db::DataSource;
use crate::error::{DirectoryError, DirectoryResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Transaction status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionStatus {
    Active,
    /// Still running, but can only roll back
    MarkedRollback,
    Committed,
    RolledBack,
}

/// Transaction seen from a directory.
pub trait TransactionContext: Send + Sync {
    /// Check if the transaction is running and may still commit.
    fn is_active(&self) -> bool;

    /// Check if the transaction is running, even if marked for rollback.
    fn is_active_or_marked_rollback(&self) -> bool;

    /// Attach a completion callback.
    fn register_synchronization(&self, sync: Arc<dyn Synchronization>) -> DirectoryResult<()>;

    /// Mark the transaction so that completion rolls back.
    fn set_rollback_only(&self);

    /// Data source shared by the transaction for `name`, if any.
    fn shared_data_source(&self, _name: &str) -> Option<Arc<dyn DataSource>> {
        None
    }
}

/// Callback run when a transaction completes.
#[async_trait]
pub trait Synchronization: Send + Sync {
    /// Runs before the outcome is decided.
    async fn before_completion(&self, tx: &dyn TransactionContext);

    /// Runs once the outcome is known.
    async fn after_completion(&self, tx: &dyn TransactionContext, status: TransactionStatus);
}

struct TransactionState {
    status: TransactionStatus,
    synchronizations: Vec<Arc<dyn Synchronization>>,
    data_sources: HashMap<String, Arc<dyn DataSource>>,
}

/// In-process transaction.
pub struct LocalTransaction {
    id: Uuid,
    started_at: DateTime<Utc>,
    state: Mutex<TransactionState>,
}

impl std::fmt::Debug for LocalTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("LocalTransaction")
            .field("id", &self.id)
            .field("status", &state.status)
            .field("synchronizations", &state.synchronizations.len())
            .finish()
    }
}

impl Default for LocalTransaction {
    fn default() -> Self {
        Self::begin()
    }
}

impl LocalTransaction {
    /// Start a new active transaction.
    pub fn begin() -> Self {
        let id = Uuid::new_v4();
        debug!(transaction_id = %id, "Transaction started");
        Self {
            id,
            started_at: Utc::now(),
            state: Mutex::new(TransactionState {
                status: TransactionStatus::Active,
                synchronizations: Vec::new(),
                data_sources: HashMap::new(),
            }),
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn status(&self) -> TransactionStatus {
        self.state.lock().status
    }

    /// Share `source` with every directory using data source `name`.
    pub fn bind_data_source(&self, name: impl Into<String>, source: Arc<dyn DataSource>) {
        self.state.lock().data_sources.insert(name.into(), source);
    }

    /// Complete the transaction: commit, or roll back if it was marked so.
    ///
    /// Runs every synchronization's `before_completion`, settles the status,
    /// then runs `after_completion`. Completing an already finished
    /// transaction returns its status and runs nothing.
    pub async fn commit_or_rollback(&self) -> TransactionStatus {
        let before = {
            let state = self.state.lock();
            match state.status {
                TransactionStatus::Active | TransactionStatus::MarkedRollback => {}
                done => return done,
            }
            state.synchronizations.clone()
        };
        for sync in &before {
            sync.before_completion(self).await;
        }

        let (status, after) = {
            let mut state = self.state.lock();
            state.status = match state.status {
                TransactionStatus::MarkedRollback => TransactionStatus::RolledBack,
                _ => TransactionStatus::Committed,
            };
            (state.status, std::mem::take(&mut state.synchronizations))
        };
        for sync in &after {
            sync.after_completion(self, status).await;
        }

        debug!(transaction_id = %self.id, status = ?status, "Transaction completed");
        status
    }

    /// Roll the transaction back.
    pub async fn rollback(&self) -> TransactionStatus {
        self.set_rollback_only();
        self.commit_or_rollback().await
    }
}

impl TransactionContext for LocalTransaction {
    fn is_active(&self) -> bool {
        self.status() == TransactionStatus::Active
    }

    fn is_active_or_marked_rollback(&self) -> bool {
        matches!(
            self.status(),
            TransactionStatus::Active | TransactionStatus::MarkedRollback
        )
    }

    fn register_synchronization(&self, sync: Arc<dyn Synchronization>) -> DirectoryResult<()> {
        let mut state = self.state.lock();
        if state.status != TransactionStatus::Active {
            return Err(DirectoryError::transaction(format!(
                "transaction {} is {:?}, cannot register synchronization",
                self.id, state.status
            )));
        }
        state.synchronizations.push(sync);
        Ok(())
    }

    fn set_rollback_only(&self) {
        let mut state = self.state.lock();
        if state.status == TransactionStatus::Active {
            state.status = TransactionStatus::MarkedRollback;
        }
    }

    fn shared_data_source(&self, name: &str) -> Option<Arc<dyn DataSource>> {
        self.state.lock().data_sources.get(name).cloned()
    }
}
