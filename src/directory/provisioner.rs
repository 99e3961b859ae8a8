//! Connection acquisition for a directory.
//!
//! A directory either names a pooled data source (managed mode) or carries a
//! driver URL from which an unpooled data source is built once (unmanaged
//! mode). A data source shared by the caller's transaction always wins.
//!
//! Acquisition retries while the server reports overload, waiting
//! `attempt` seconds after each failed attempt. [`ConnectionProvisioner::interrupt`]
//! aborts a pending wait.

use crate::config::DirectoryDescriptor;
use crate::db::{DataSource, DataSourceRegistry, DbConnection, RetryDecision, RetryPolicy, SimpleDataSource, Sleeper};
use crate::error::{DirectoryError, DirectoryResult};
use crate::transaction::TransactionContext;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, trace, warn};

enum Binding {
    /// Data source registered under a name
    Named {
        name: String,
        registry: DataSourceRegistry,
    },
    /// Driver settings for an unpooled data source
    Driver {
        url: String,
        driver: Option<String>,
        user: Option<String>,
        password: Option<String>,
    },
}

/// Hands out connections for one directory.
pub struct ConnectionProvisioner {
    directory: String,
    binding: Binding,
    source: OnceLock<Arc<dyn DataSource>>,
    managed: AtomicBool,
    policy: RetryPolicy,
    sleeper: Arc<dyn Sleeper>,
    interrupt: watch::Sender<bool>,
}

impl std::fmt::Debug for ConnectionProvisioner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvisioner")
            .field("directory", &self.directory)
            .field("data_source", &self.data_source_name())
            .field("managed", &self.is_managed())
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl ConnectionProvisioner {
    /// Create the provisioner described by `descriptor`.
    pub fn new(
        descriptor: &DirectoryDescriptor,
        registry: &DataSourceRegistry,
        sleeper: Arc<dyn Sleeper>,
    ) -> DirectoryResult<Self> {
        let binding = match (&descriptor.data_source, &descriptor.db_url) {
            (Some(name), None) => Binding::Named {
                name: name.clone(),
                registry: registry.clone(),
            },
            (None, Some(url)) => Binding::Driver {
                url: url.clone(),
                driver: descriptor.db_driver.clone(),
                user: descriptor.db_user.clone(),
                password: descriptor.db_password.clone(),
            },
            _ => {
                return Err(DirectoryError::configuration(
                    &descriptor.name,
                    "exactly one of dataSource or dbUrl must be set",
                ));
            }
        };
        let (interrupt, _) = watch::channel(false);
        Ok(Self {
            directory: descriptor.name.clone(),
            binding,
            source: OnceLock::new(),
            managed: AtomicBool::new(false),
            policy: descriptor.retry.to_policy(),
            sleeper,
            interrupt,
        })
    }

    /// Name of the bound data source, if the directory uses one.
    pub fn data_source_name(&self) -> Option<&str> {
        match &self.binding {
            Binding::Named { name, .. } => Some(name),
            Binding::Driver { .. } => None,
        }
    }

    /// Check if connections come from a managed (pooled or shared) source.
    pub fn is_managed(&self) -> bool {
        self.managed.load(Ordering::Acquire)
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Data source the transaction shares for this directory, if any.
    pub fn shared_source(&self, tx: &dyn TransactionContext) -> Option<Arc<dyn DataSource>> {
        tx.shared_data_source(self.data_source_name()?)
    }

    /// Get a connection, preferring the transaction's shared data source.
    pub async fn acquire(&self, tx: Option<&dyn TransactionContext>) -> DirectoryResult<DbConnection> {
        let shared = tx.and_then(|tx| self.shared_source(tx));
        self.acquire_with(shared.as_ref()).await
    }

    /// Get a connection from `shared` if given, otherwise from the directory's
    /// own data source with overload retries.
    pub async fn acquire_with(
        &self,
        shared: Option<&Arc<dyn DataSource>>,
    ) -> DirectoryResult<DbConnection> {
        if let Some(source) = shared {
            self.managed.store(true, Ordering::Release);
            trace!(directory = %self.directory, "Using transaction data source");
            return source
                .get_connection()
                .await
                .map_err(|e| e.into_connection(&self.directory));
        }
        let source = self.data_source()?;
        self.connect_with_retry(source.as_ref()).await
    }

    /// Abort pending and future retry waits.
    pub fn interrupt(&self) {
        self.interrupt.send_replace(true);
    }

    fn data_source(&self) -> DirectoryResult<Arc<dyn DataSource>> {
        if let Some(source) = self.source.get() {
            return Ok(source.clone());
        }
        let built: Arc<dyn DataSource> = match &self.binding {
            Binding::Named { name, registry } => {
                let source = registry.lookup(name).ok_or_else(|| {
                    DirectoryError::configuration(
                        &self.directory,
                        format!("dataSource lookup failed: {}", name),
                    )
                })?;
                self.managed.store(true, Ordering::Release);
                source
            }
            Binding::Driver {
                url,
                driver,
                user,
                password,
            } => {
                debug!(directory = %self.directory, "Building unpooled data source");
                Arc::new(SimpleDataSource::new(
                    url.clone(),
                    driver.as_deref(),
                    user.clone(),
                    password.clone(),
                )?)
            }
        };
        Ok(self.source.get_or_init(|| built).clone())
    }

    async fn connect_with_retry(&self, source: &dyn DataSource) -> DirectoryResult<DbConnection> {
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match source.get_connection().await {
                Ok(conn) => return Ok(conn),
                Err(err) => err,
            };
            match self.policy.decide(attempt, &err) {
                RetryDecision::Retry(delay) => {
                    debug!(
                        directory = %self.directory,
                        attempt,
                        error = %err,
                        "Connections open too fast, retrying in {}s",
                        delay.as_secs()
                    );
                    self.wait(delay).await?;
                }
                RetryDecision::GiveUp => {
                    if self.policy.is_overload(&err) {
                        warn!(directory = %self.directory, attempts = attempt, "Giving up on overloaded server");
                    }
                    return Err(err.into_connection(&self.directory));
                }
            }
        }
    }

    async fn wait(&self, delay: Duration) -> DirectoryResult<()> {
        let mut interrupted = self.interrupt.subscribe();
        tokio::select! {
            _ = interrupted.wait_for(|raised| *raised) => {
                debug!(directory = %self.directory, "Connection retry interrupted");
                Err(DirectoryError::interrupted(&self.directory))
            }
            _ = self.sleeper.sleep(delay) => Ok(()),
        }
    }
}
