//! Closes sessions left open when their transaction completes.

use crate::directory::Session;
use crate::transaction::{Synchronization, TransactionContext, TransactionStatus};
use async_trait::async_trait;
use std::backtrace::Backtrace;
use tracing::{Level, error, warn};

/// Transaction callback bound to one session.
pub(crate) struct TxSessionCleaner {
    session: Session,
    /// Where the session was opened, kept when debug logging is on
    init_context: Option<Backtrace>,
}

impl TxSessionCleaner {
    pub fn new(session: Session) -> Self {
        let init_context = tracing::enabled!(Level::DEBUG).then(Backtrace::force_capture);
        Self {
            session,
            init_context,
        }
    }

    async fn close_if_live(&self, tx: &dyn TransactionContext) {
        if !self.session.is_live() {
            return;
        }
        let directory = self.session.directory().name().to_string();
        let session_id = self.session.id();
        match &self.init_context {
            Some(context) => warn!(
                directory = %directory,
                session_id = %session_id,
                init_context = %context,
                "Closing a sql directory session for you"
            ),
            None => warn!(
                directory = %directory,
                session_id = %session_id,
                "Closing a sql directory session for you"
            ),
        }
        if !tx.is_active_or_marked_rollback() {
            warn!(
                directory = %directory,
                session_id = %session_id,
                "Closing sql directory session outside a transaction"
            );
        }
        if let Err(e) = self.session.close().await {
            error!(
                directory = %directory,
                session_id = %session_id,
                error = %e,
                "Cannot close sql directory session"
            );
        }
    }
}

#[async_trait]
impl Synchronization for TxSessionCleaner {
    async fn before_completion(&self, tx: &dyn TransactionContext) {
        self.close_if_live(tx).await;
    }

    async fn after_completion(&self, tx: &dyn TransactionContext, _status: TransactionStatus) {
        self.close_if_live(tx).await;
    }
}
