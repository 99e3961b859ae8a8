//! Integration tests for directory sessions.
//!
//! Tests verify that:
//! - Concurrent sessions are counted, and the peak is kept
//! - Sessions opened while the directory shuts down never stay live
//! - Sessions left open are closed when their transaction completes
//! - A failed cleanup registration fails `get_session`
//! - Shutdown closes every session even when one fails to close
//! - Entry operations work against a real SQLite table

use async_trait::async_trait;
use futures_util::FutureExt;
use futures_util::future::join_all;
use parking_lot::Mutex;
use indexmap::IndexMap;
use serde_json::{Value as JsonValue, json};
use sql_directory::config::{CreateTablePolicy, DirectoryDescriptor, ReferenceDescriptor};
use sql_directory::db::{
    Connection, DataSource, DataSourceRegistry, DatabaseType, DbConnection, ExecuteOutcome,
    TypeCategory,
};
use sql_directory::directory::{
    DirectoryEnvironment, InMemoryMetrics, MetricsSink, SESSION_COUNT, SESSION_MAX_COUNT,
    SqlDirectory,
};
use sql_directory::error::{DirectoryError, DirectoryResult};
use sql_directory::models::{Entry, Field, FieldType, Schema, SchemaRegistry, SqlValue};
use sql_directory::transaction::{
    LocalTransaction, Synchronization, TransactionContext, TransactionStatus,
};
use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;
use tokio::sync::Barrier;
use tracing_subscriber::fmt::MakeWriter;

// =============================================================================
// Fakes
// =============================================================================

#[derive(Debug)]
struct FakeConnection {
    fail_close: bool,
    closes: Arc<AtomicUsize>,
}

#[async_trait]
impl Connection for FakeConnection {
    fn database_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    async fn execute(&mut self, _sql: &str, _params: &[SqlValue]) -> DirectoryResult<ExecuteOutcome> {
        Ok(ExecuteOutcome::default())
    }

    async fn fetch_all(
        &mut self,
        _sql: &str,
        _params: &[SqlValue],
        _categories: &[TypeCategory],
    ) -> DirectoryResult<Vec<Vec<JsonValue>>> {
        Ok(vec![vec![json!(0)]])
    }

    async fn close(self: Box<Self>) -> DirectoryResult<()> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        if self.fail_close {
            return Err(DirectoryError::database("connection reset", None));
        }
        Ok(())
    }
}

/// Hands out fake connections; those with an index in `fail_close` fail
/// to close. Index 0 is the directory's setup connection.
#[derive(Debug, Default)]
struct FakeDataSource {
    handed_out: AtomicUsize,
    fail_close: HashSet<usize>,
    closes: Arc<AtomicUsize>,
}

impl FakeDataSource {
    fn handed_out(&self) -> usize {
        self.handed_out.load(Ordering::SeqCst)
    }

    fn closes(&self) -> usize {
        self.closes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DataSource for FakeDataSource {
    async fn get_connection(&self) -> DirectoryResult<DbConnection> {
        let index = self.handed_out.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeConnection {
            fail_close: self.fail_close.contains(&index),
            closes: self.closes.clone(),
        }))
    }
}

/// Active transaction that refuses synchronizations.
struct RefusingTransaction;

impl TransactionContext for RefusingTransaction {
    fn is_active(&self) -> bool {
        true
    }

    fn is_active_or_marked_rollback(&self) -> bool {
        true
    }

    fn register_synchronization(&self, _sync: Arc<dyn Synchronization>) -> DirectoryResult<()> {
        Err(DirectoryError::transaction("transaction manager unavailable"))
    }

    fn set_rollback_only(&self) {}
}

/// Active transaction that reports neither active nor marked-rollback at
/// cleanup time, and keeps registered synchronizations for the test to fire.
#[derive(Default)]
struct DetachedTransaction {
    syncs: Mutex<Vec<Arc<dyn Synchronization>>>,
}

impl DetachedTransaction {
    fn syncs(&self) -> Vec<Arc<dyn Synchronization>> {
        self.syncs.lock().clone()
    }
}

impl TransactionContext for DetachedTransaction {
    fn is_active(&self) -> bool {
        true
    }

    fn is_active_or_marked_rollback(&self) -> bool {
        false
    }

    fn register_synchronization(&self, sync: Arc<dyn Synchronization>) -> DirectoryResult<()> {
        self.syncs.lock().push(sync);
        Ok(())
    }

    fn set_rollback_only(&self) {}
}

/// Collects formatted log output.
#[derive(Clone, Default)]
struct LogBuffer(Arc<Mutex<Vec<u8>>>);

impl LogBuffer {
    fn contents(&self) -> String {
        String::from_utf8_lossy(&self.0.lock()).into_owned()
    }
}

impl std::io::Write for LogBuffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl<'a> MakeWriter<'a> for LogBuffer {
    type Writer = LogBuffer;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

// =============================================================================
// Helpers
// =============================================================================

fn schemas() -> Arc<SchemaRegistry> {
    let schemas = SchemaRegistry::new();
    schemas.register(Schema::new(
        "user",
        vec![
            Field::new("username", FieldType::String),
            Field::new("password", FieldType::String),
            Field::new("email", FieldType::String),
            Field::new("quota", FieldType::Integer).with_default("10"),
            Field::new("groups", FieldType::String),
        ],
    ));
    Arc::new(schemas)
}

fn user_descriptor() -> DirectoryDescriptor {
    DirectoryDescriptor {
        password_field: Some("password".to_string()),
        references: vec![ReferenceDescriptor::InverseReference {
            field_name: "groups".to_string(),
            directory: "groupDirectory".to_string(),
            dual_reference_field: "members".to_string(),
        }],
        ..DirectoryDescriptor::new("userDirectory", "user", "username")
    }
}

/// Directory over a fake named data source; table setup is skipped.
async fn fake_directory(
    source: Arc<FakeDataSource>,
    metrics: Arc<InMemoryMetrics>,
) -> Arc<SqlDirectory> {
    let registry = DataSourceRegistry::new();
    registry.register("fake", source).unwrap();
    let env = DirectoryEnvironment::new(schemas())
        .with_data_sources(registry)
        .with_metrics(metrics);
    let descriptor = DirectoryDescriptor {
        data_source: Some("fake".to_string()),
        ..user_descriptor()
    };
    SqlDirectory::new(descriptor, &env).await.unwrap()
}

/// Directory over a fresh SQLite file, opened without a pool.
async fn sqlite_directory() -> (TempDir, Arc<SqlDirectory>) {
    let dir = tempfile::tempdir().unwrap();
    let env = DirectoryEnvironment::new(schemas());
    let descriptor = DirectoryDescriptor {
        db_url: Some(format!("sqlite:{}", dir.path().join("users.db").display())),
        create_table_policy: CreateTablePolicy::Always,
        ..user_descriptor()
    };
    let directory = SqlDirectory::new(descriptor, &env).await.unwrap();
    (dir, directory)
}

fn fields(values: &[(&str, JsonValue)]) -> IndexMap<String, JsonValue> {
    values
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

// =============================================================================
// Session registry
// =============================================================================

#[tokio::test]
async fn test_concurrent_sessions_are_counted() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let directory = fake_directory(Arc::new(FakeDataSource::default()), metrics.clone()).await;

    let sessions: Vec<_> = join_all((0..8).map(|_| directory.get_session(None)))
        .await
        .into_iter()
        .collect::<Result<_, _>>()
        .unwrap();

    let ids: HashSet<_> = sessions.iter().map(|s| s.id()).collect();
    assert_eq!(ids.len(), 8);
    assert_eq!(directory.session_count(), 8);
    assert_eq!(metrics.count(SESSION_COUNT), 8);
    assert!(sessions.iter().all(|s| s.is_live() && s.is_managed()));

    for session in &sessions {
        session.close().await.unwrap();
    }
    assert_eq!(directory.session_count(), 0);
    assert_eq!(directory.max_session_count(), 8);
    assert_eq!(metrics.count(SESSION_COUNT), 0);
    assert_eq!(metrics.count(SESSION_MAX_COUNT), 8);

    // Peak is kept when fewer sessions open later
    let session = directory.get_session(None).await.unwrap();
    assert_eq!(directory.max_session_count(), 8);
    session.close().await.unwrap();
}

/// Open `n` sessions from separate tasks, hold them all at once, then close
/// them from those tasks.
async fn open_and_close_concurrently(directory: &Arc<SqlDirectory>, n: usize) {
    let opened = Arc::new(Barrier::new(n + 1));
    let release = Arc::new(Barrier::new(n + 1));

    let tasks: Vec<_> = (0..n)
        .map(|_| {
            let directory = directory.clone();
            let opened = opened.clone();
            let release = release.clone();
            tokio::spawn(async move {
                let session = directory.get_session(None).await.unwrap();
                opened.wait().await;
                release.wait().await;
                let peak = directory.max_session_count();
                session.close().await.unwrap();
                assert!(directory.max_session_count() >= peak);
                session.id()
            })
        })
        .collect();

    opened.wait().await;
    assert_eq!(directory.session_count(), n);
    assert_eq!(directory.max_session_count(), n);
    release.wait().await;

    let mut ids = HashSet::new();
    for task in tasks {
        ids.insert(task.await.unwrap());
    }
    assert_eq!(ids.len(), n);
    assert_eq!(directory.session_count(), 0);
    assert_eq!(directory.max_session_count(), n);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_from_many_tasks_managed() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let directory = fake_directory(Arc::new(FakeDataSource::default()), metrics.clone()).await;

    open_and_close_concurrently(&directory, 32).await;
    assert_eq!(metrics.count(SESSION_COUNT), 0);
    assert_eq!(metrics.count(SESSION_MAX_COUNT), 32);

    // A smaller second wave leaves the peak untouched
    open_and_close_concurrently_peak_kept(&directory, 4, 32).await;
    assert_eq!(metrics.count(SESSION_MAX_COUNT), 32);
}

/// Like [`open_and_close_concurrently`] for a directory whose peak is
/// already `peak`.
async fn open_and_close_concurrently_peak_kept(directory: &Arc<SqlDirectory>, n: usize, peak: usize) {
    let tasks: Vec<_> = (0..n)
        .map(|_| {
            let directory = directory.clone();
            tokio::spawn(async move {
                let session = directory.get_session(None).await.unwrap();
                session.close().await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }
    assert_eq!(directory.session_count(), 0);
    assert_eq!(directory.max_session_count(), peak);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_sessions_from_many_tasks_unmanaged() {
    let (_dir, directory) = sqlite_directory().await;
    assert!(!directory.is_managed());

    open_and_close_concurrently(&directory, 8).await;
}

#[tokio::test]
async fn test_session_opening_during_shutdown_is_closed() {
    let (_dir, directory) = sqlite_directory().await;

    let opening = directory.get_session(None);
    tokio::pin!(opening);
    let early = (&mut opening).now_or_never();

    directory.shutdown().await;
    assert!(directory.is_shut_down());

    let result = match early {
        Some(result) => result,
        None => opening.await,
    };
    match result {
        // Registered before the shutdown, so the shutdown closed it
        Ok(session) => assert!(!session.is_live()),
        Err(err) => assert!(matches!(err, DirectoryError::Session { .. })),
    }
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test]
async fn test_managed_session_connects_on_first_use() {
    let source = Arc::new(FakeDataSource::default());
    let directory = fake_directory(source.clone(), Arc::new(InMemoryMetrics::new())).await;
    assert_eq!(source.handed_out(), 1); // setup connection

    let session = directory.get_session(None).await.unwrap();
    assert!(!session.has_connection().await);
    assert_eq!(source.handed_out(), 1);

    assert!(!session.has_entry("jdoe").await.unwrap());
    assert!(session.has_connection().await);
    assert_eq!(source.handed_out(), 2);

    session.close().await.unwrap();
    assert_eq!(source.closes(), 2);
}

#[tokio::test]
async fn test_close_is_idempotent() {
    let directory = fake_directory(
        Arc::new(FakeDataSource::default()),
        Arc::new(InMemoryMetrics::new()),
    )
    .await;
    let session = directory.get_session(None).await.unwrap();
    session.close().await.unwrap();
    session.close().await.unwrap();
    assert!(!session.is_live());
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test]
async fn test_closed_session_rejects_operations() {
    let directory = fake_directory(
        Arc::new(FakeDataSource::default()),
        Arc::new(InMemoryMetrics::new()),
    )
    .await;
    let session = directory.get_session(None).await.unwrap();
    session.close().await.unwrap();

    let err = session.get_entry("jdoe").await.unwrap_err();
    assert!(matches!(err, DirectoryError::Session { .. }));
}

// =============================================================================
// Transaction cleanup
// =============================================================================

#[tokio::test]
async fn test_session_closed_at_commit() {
    let directory = fake_directory(
        Arc::new(FakeDataSource::default()),
        Arc::new(InMemoryMetrics::new()),
    )
    .await;
    let tx = LocalTransaction::begin();
    let session = directory.get_session(Some(&tx)).await.unwrap();
    assert!(session.is_live());

    assert_eq!(tx.commit_or_rollback().await, TransactionStatus::Committed);
    assert!(!session.is_live());
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test]
async fn test_session_closed_at_rollback() {
    let directory = fake_directory(
        Arc::new(FakeDataSource::default()),
        Arc::new(InMemoryMetrics::new()),
    )
    .await;
    let tx = LocalTransaction::begin();
    let session = directory.get_session(Some(&tx)).await.unwrap();
    session.has_entry("jdoe").await.unwrap();

    tx.set_rollback_only();
    assert_eq!(tx.commit_or_rollback().await, TransactionStatus::RolledBack);
    assert!(!session.is_live());
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test]
async fn test_explicitly_closed_session_is_left_alone() {
    let source = Arc::new(FakeDataSource::default());
    let directory = fake_directory(source.clone(), Arc::new(InMemoryMetrics::new())).await;
    let tx = LocalTransaction::begin();
    let session = directory.get_session(Some(&tx)).await.unwrap();
    session.has_entry("jdoe").await.unwrap();
    session.close().await.unwrap();

    tx.commit_or_rollback().await;
    assert_eq!(source.closes(), 2);
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test]
async fn test_cleanup_close_failure_is_swallowed() {
    let source = Arc::new(FakeDataSource {
        fail_close: HashSet::from([1]),
        ..FakeDataSource::default()
    });
    let directory = fake_directory(source.clone(), Arc::new(InMemoryMetrics::new())).await;
    let tx = LocalTransaction::begin();
    let session = directory.get_session(Some(&tx)).await.unwrap();
    session.has_entry("jdoe").await.unwrap();

    assert_eq!(tx.commit_or_rollback().await, TransactionStatus::Committed);
    assert!(!session.is_live());
    assert_eq!(directory.session_count(), 0);
}

#[tokio::test]
async fn test_cleanup_outside_transaction_still_closes() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let directory = fake_directory(
        Arc::new(FakeDataSource::default()),
        Arc::new(InMemoryMetrics::new()),
    )
    .await;
    let tx = DetachedTransaction::default();
    let session = directory.get_session(Some(&tx)).await.unwrap();
    let syncs = tx.syncs();
    assert_eq!(syncs.len(), 1);

    syncs[0].before_completion(&tx).await;
    assert!(!session.is_live());
    assert_eq!(directory.session_count(), 0);

    // Second callback finds the session closed
    syncs[0]
        .after_completion(&tx, TransactionStatus::Committed)
        .await;

    let output = logs.contents();
    assert_eq!(output.matches("Closing a sql directory session for you").count(), 1);
    assert!(output.contains("init_context="));
    assert!(output.contains("Closing sql directory session outside a transaction"));
}

#[tokio::test]
async fn test_failed_setup_keeps_first_error_and_logs_close_failure() {
    let logs = LogBuffer::default();
    let subscriber = tracing_subscriber::fmt()
        .with_ansi(false)
        .with_writer(logs.clone())
        .finish();
    let _guard = tracing::subscriber::set_default(subscriber);

    let source = Arc::new(FakeDataSource {
        fail_close: HashSet::from([0]),
        ..FakeDataSource::default()
    });
    let registry = DataSourceRegistry::new();
    registry.register("fake", source.clone()).unwrap();
    let env = DirectoryEnvironment::new(schemas()).with_data_sources(registry);
    let descriptor = DirectoryDescriptor {
        data_source: Some("fake".to_string()),
        ..DirectoryDescriptor::new("groupDirectory", "group", "groupname")
    };

    let err = SqlDirectory::new(descriptor, &env).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Configuration { .. }));
    assert_eq!(source.closes(), 1);
    assert!(logs.contents().contains("Cannot release setup connection"));
}

#[tokio::test]
async fn test_inactive_transaction_registers_nothing() {
    let directory = fake_directory(
        Arc::new(FakeDataSource::default()),
        Arc::new(InMemoryMetrics::new()),
    )
    .await;
    let tx = LocalTransaction::begin();
    tx.set_rollback_only();

    let session = directory.get_session(Some(&tx)).await.unwrap();
    tx.commit_or_rollback().await;
    assert!(session.is_live());
    session.close().await.unwrap();
}

#[tokio::test]
async fn test_registration_failure_fails_get_session() {
    let metrics = Arc::new(InMemoryMetrics::new());
    let directory = fake_directory(Arc::new(FakeDataSource::default()), metrics.clone()).await;

    let err = directory
        .get_session(Some(&RefusingTransaction))
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Registration { .. }));
    assert!(err.to_string().contains("transaction manager unavailable"));
    assert_eq!(directory.session_count(), 0);
    assert_eq!(metrics.count(SESSION_COUNT), 0);
}

#[tokio::test]
async fn test_transaction_shared_data_source_wins() {
    let own = Arc::new(FakeDataSource::default());
    let directory = fake_directory(own.clone(), Arc::new(InMemoryMetrics::new())).await;
    let shared = Arc::new(FakeDataSource::default());
    let tx = LocalTransaction::begin();
    tx.bind_data_source("fake", shared.clone());

    let session = directory.get_session(Some(&tx)).await.unwrap();
    session.has_entry("jdoe").await.unwrap();
    assert_eq!(shared.handed_out(), 1);
    assert_eq!(own.handed_out(), 1);

    tx.commit_or_rollback().await;
    assert_eq!(shared.closes(), 1);
}

// =============================================================================
// Shutdown
// =============================================================================

#[tokio::test]
async fn test_shutdown_closes_all_despite_failure() {
    let source = Arc::new(FakeDataSource {
        fail_close: HashSet::from([2]),
        ..FakeDataSource::default()
    });
    let metrics = Arc::new(InMemoryMetrics::new());
    let directory = fake_directory(source.clone(), metrics.clone()).await;

    let mut sessions = Vec::new();
    for _ in 0..3 {
        let session = directory.get_session(None).await.unwrap();
        session.has_entry("jdoe").await.unwrap();
        sessions.push(session);
    }

    directory.shutdown().await;

    assert!(sessions.iter().all(|s| !s.is_live()));
    assert_eq!(source.closes(), 4);
    assert_eq!(directory.session_count(), 0);
    assert_eq!(metrics.count(SESSION_COUNT), 0);
    assert!(directory.is_shut_down());

    let err = directory.get_session(None).await.unwrap_err();
    assert!(matches!(err, DirectoryError::Session { .. }));
}

// =============================================================================
// Entry operations
// =============================================================================

#[tokio::test]
async fn test_entry_crud() {
    let (_dir, directory) = sqlite_directory().await;
    assert!(!directory.is_managed());
    let session = directory.get_session(None).await.unwrap();
    assert!(session.has_connection().await);

    let created = session
        .create_entry(fields(&[
            ("username", json!("jdoe")),
            ("password", json!("secret")),
            ("groups", json!(["members"])),
        ]))
        .await
        .unwrap();
    assert_eq!(created.id, "jdoe");
    assert_eq!(created.get("quota"), Some(&json!(10)));
    assert_eq!(created.get("email"), Some(&JsonValue::Null));
    assert!(created.get("groups").is_none());

    assert!(session.has_entry("jdoe").await.unwrap());
    assert!(!session.has_entry("nobody").await.unwrap());

    let mut entry = session.get_entry("jdoe").await.unwrap().unwrap();
    entry.set("email", json!("jdoe@example.com"));
    assert!(session.update_entry(&entry).await.unwrap());
    let stored = session.get_entry("jdoe").await.unwrap().unwrap();
    assert_eq!(stored.get_str("email"), Some("jdoe@example.com"));

    let missing = Entry::new("nobody", fields(&[("email", json!("x"))]));
    assert!(!session.update_entry(&missing).await.unwrap());

    assert!(session.delete_entry("jdoe").await.unwrap());
    assert!(!session.delete_entry("jdoe").await.unwrap());
    assert!(session.get_entry("jdoe").await.unwrap().is_none());

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_query_and_projection() {
    let (_dir, directory) = sqlite_directory().await;
    let session = directory.get_session(None).await.unwrap();
    for (name, email) in [("alice", json!("a@x")), ("bob", JsonValue::Null), ("carol", json!("c@x"))] {
        session
            .create_entry(fields(&[("username", json!(name)), ("email", email)]))
            .await
            .unwrap();
    }

    let all = session.query(&IndexMap::new()).await.unwrap();
    let ids: Vec<&str> = all.iter().map(|e| e.id.as_str()).collect();
    assert_eq!(ids, vec!["alice", "bob", "carol"]);

    let without_email = session
        .query(&fields(&[("email", JsonValue::Null)]))
        .await
        .unwrap();
    assert_eq!(without_email.len(), 1);
    assert_eq!(without_email[0].id, "bob");

    let emails = session
        .get_projection(&fields(&[("quota", json!(10))]), "email")
        .await
        .unwrap();
    assert_eq!(emails, vec![json!("a@x"), JsonValue::Null, json!("c@x")]);

    let err = session
        .get_projection(&IndexMap::new(), "groups")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("not stored"));

    session.close().await.unwrap();
}

#[tokio::test]
async fn test_create_entry_errors() {
    let (_dir, directory) = sqlite_directory().await;
    let session = directory.get_session(None).await.unwrap();

    let err = session
        .create_entry(fields(&[("password", json!("x"))]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("Missing id field"));

    session
        .create_entry(fields(&[("username", json!("jdoe"))]))
        .await
        .unwrap();
    let err = session
        .create_entry(fields(&[("username", json!("jdoe"))]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("already exists"));

    let err = session
        .create_entry(fields(&[("username", json!("x")), ("nickname", json!("X"))]))
        .await
        .unwrap_err();
    assert!(err.to_string().contains("nickname"));

    let err = session
        .create_entry(fields(&[("username", json!("y")), ("quota", json!("lots"))]))
        .await
        .unwrap_err();
    assert!(matches!(err, DirectoryError::Session { .. }));

    session.close().await.unwrap();
}
