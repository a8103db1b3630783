use std::cell::Cell;
use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::AppError;
use crate::models::AnalysisSnapshot;

/// Key the current snapshot is persisted under.
pub const SNAPSHOT_KEY: &str = "csvAnalysis";

/// Single-slot key-value persistence for the current snapshot.
pub trait SnapshotRepository: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, AppError>;
    fn put(&self, key: &str, value: &str) -> Result<(), AppError>;
    fn delete(&self, key: &str) -> Result<(), AppError>;
}

pub struct SqliteSnapshotRepository {
    conn: Mutex<Connection>,
}

impl SqliteSnapshotRepository {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AppError> {
        let path = path.as_ref();
        tracing::info!("Opening snapshot database at {}", path.display());
        let conn = Connection::open(path).map_err(|e| {
            tracing::error!("Failed to open snapshot database: {}", e);
            AppError::DatabaseError(e.to_string())
        })?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> Result<Self, AppError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, AppError> {
        conn.execute(
            "CREATE TABLE IF NOT EXISTS kv (key TEXT PRIMARY KEY, value TEXT NOT NULL)",
            [],
        )?;
        Ok(Self { conn: Mutex::new(conn) })
    }
}

impl SnapshotRepository for SqliteSnapshotRepository {
    fn get(&self, key: &str) -> Result<Option<String>, AppError> {
        let conn = self.conn.lock();
        let value = conn
            .query_row("SELECT value FROM kv WHERE key = ?1", params![key], |row| row.get(0))
            .optional()?;
        Ok(value)
    }

    fn put(&self, key: &str, value: &str) -> Result<(), AppError> {
        let conn = self.conn.lock();
        conn.execute(
            "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), AppError> {
        let conn = self.conn.lock();
        conn.execute("DELETE FROM kv WHERE key = ?1", params![key])?;
        Ok(())
    }
}

type Listener = Arc<dyn Fn(Option<&Arc<AnalysisSnapshot>>) + Send + Sync>;

/// Owns the current snapshot. Readers clone the `Arc`; writers replace it
/// wholesale and every subscriber hears about it in registration order.
/// Notifications go out in version order: one that has been overtaken by
/// a newer write is dropped.
pub struct SnapshotStore {
    current: RwLock<Option<Arc<AnalysisSnapshot>>>,
    version: AtomicU64,
    write_gate: Mutex<()>,
    /// Last version handed to listeners.
    delivered: ReentrantMutex<Cell<u64>>,
    listeners: Mutex<Vec<(u64, Listener)>>,
    next_listener: AtomicU64,
    repository: Box<dyn SnapshotRepository>,
}

impl SnapshotStore {
    /// Opens the store and rehydrates whatever the repository holds. A value
    /// that fails to load is logged and treated as absent.
    pub fn open(repository: Box<dyn SnapshotRepository>) -> Self {
        let restored = match repository.get(SNAPSHOT_KEY) {
            Ok(Some(raw)) => match serde_json::from_str::<AnalysisSnapshot>(&raw) {
                Ok(snapshot) => {
                    tracing::info!(
                        "Restored snapshot v{} ({} rows)",
                        snapshot.version,
                        snapshot.table.len()
                    );
                    Some(Arc::new(snapshot))
                }
                Err(e) => {
                    tracing::warn!("Ignoring unreadable stored snapshot: {}", e);
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!("Failed to read stored snapshot: {}", e);
                None
            }
        };

        let version = restored.as_ref().map_or(0, |s| s.version);
        Self {
            current: RwLock::new(restored),
            version: AtomicU64::new(version),
            write_gate: Mutex::new(()),
            delivered: ReentrantMutex::new(Cell::new(version)),
            listeners: Mutex::new(Vec::new()),
            next_listener: AtomicU64::new(0),
            repository,
        }
    }

    pub fn in_memory() -> Result<Self, AppError> {
        Ok(Self::open(Box::new(SqliteSnapshotRepository::open_in_memory()?)))
    }

    pub fn get(&self) -> Option<Arc<AnalysisSnapshot>> {
        self.current.read().clone()
    }

    pub fn version(&self) -> u64 {
        self.version.load(Ordering::SeqCst)
    }

    /// Replaces the current snapshot (or clears it with `None`), assigning
    /// the next version. Persistence failures are logged; the in-memory
    /// state is still replaced.
    pub fn set(&self, snapshot: Option<AnalysisSnapshot>) -> Option<Arc<AnalysisSnapshot>> {
        let (version, next) = {
            let _gate = self.write_gate.lock();
            let version = self.version.fetch_add(1, Ordering::SeqCst) + 1;
            let next = snapshot.map(|mut s| {
                s.version = version;
                Arc::new(s)
            });

            if let Err(e) = self.persist(next.as_deref()) {
                tracing::error!("Failed to persist snapshot v{}: {}", version, e);
            }

            *self.current.write() = next.clone();
            (version, next)
        };

        self.notify(version, next.as_ref());
        next
    }

    pub fn clear(&self) {
        self.set(None);
    }

    fn persist(&self, snapshot: Option<&AnalysisSnapshot>) -> Result<(), AppError> {
        match snapshot {
            Some(snapshot) => {
                let raw = serde_json::to_string(snapshot)?;
                self.repository.put(SNAPSHOT_KEY, &raw)
            }
            None => self.repository.delete(SNAPSHOT_KEY),
        }
    }

    fn notify(&self, version: u64, snapshot: Option<&Arc<AnalysisSnapshot>>) {
        // Reentrant so a listener may write to the store itself.
        let delivered = self.delivered.lock();
        if version <= delivered.get() {
            tracing::debug!("Dropping stale notification for v{}", version);
            return;
        }
        delivered.set(version);

        // Listeners run without the list locked so they may read the store
        // or subscribe again.
        let listeners: Vec<Listener> = self.listeners.lock().iter().map(|(_, l)| l.clone()).collect();
        for listener in listeners {
            if delivered.get() != version {
                // A listener wrote a newer snapshot, which everyone has heard.
                break;
            }
            listener(snapshot);
        }
    }

    pub fn subscribe<F>(self: &Arc<Self>, listener: F) -> Subscription
    where
        F: Fn(Option<&Arc<AnalysisSnapshot>>) + Send + Sync + 'static,
    {
        let id = self.next_listener.fetch_add(1, Ordering::SeqCst);
        self.listeners.lock().push((id, Arc::new(listener)));
        Subscription {
            store: Arc::downgrade(self),
            id,
        }
    }

    fn unsubscribe(&self, id: u64) {
        self.listeners.lock().retain(|(listener_id, _)| *listener_id != id);
    }

    pub fn subscriber_count(&self) -> usize {
        self.listeners.lock().len()
    }
}

/// Keeps a listener registered; dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    store: Weak<SnapshotStore>,
    id: u64,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(store) = self.store.upgrade() {
            store.unsubscribe(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Cell, Row, Table};
    use crate::services::analysis::profiler::build_snapshot;

    fn snapshot(values: &[f64]) -> AnalysisSnapshot {
        build_snapshot(Table::new(
            vec!["v".to_string()],
            values.iter().map(|v| Row::new(vec![Cell::Number(*v)])).collect(),
        ))
    }

    fn store() -> Arc<SnapshotStore> {
        Arc::new(SnapshotStore::in_memory().unwrap())
    }

    #[test]
    fn test_set_assigns_increasing_versions() {
        let store = store();
        assert!(store.get().is_none());

        let first = store.set(Some(snapshot(&[1.0]))).unwrap();
        let second = store.set(Some(snapshot(&[2.0]))).unwrap();
        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(store.get().unwrap().version, 2);
        // Earlier readers keep their own snapshot.
        assert_eq!(first.table.rows[0].get(0), &Cell::Number(1.0));
    }

    #[test]
    fn test_subscribers_notified_in_order() {
        let store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        let _a = store.subscribe(move |s| log.lock().push(("a", s.map(|s| s.version))));
        let log = seen.clone();
        let _b = store.subscribe(move |s| log.lock().push(("b", s.map(|s| s.version))));

        store.set(Some(snapshot(&[1.0])));
        store.clear();

        assert_eq!(
            *seen.lock(),
            vec![("a", Some(1)), ("b", Some(1)), ("a", None), ("b", None)]
        );
    }

    #[test]
    fn test_dropping_subscription_unsubscribes() {
        let store = store();
        let calls = Arc::new(AtomicU64::new(0));
        let counter = calls.clone();
        let subscription = store.subscribe(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        store.set(Some(snapshot(&[1.0])));
        drop(subscription);
        store.set(Some(snapshot(&[2.0])));

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(store.subscriber_count(), 0);
    }

    #[test]
    fn test_overtaken_notification_is_dropped() {
        let store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let log = seen.clone();
        let _sub = store.subscribe(move |s| log.lock().push(s.map(|s| s.version)));

        let first = store.set(Some(snapshot(&[1.0])));
        let second = store.set(Some(snapshot(&[2.0])));
        // v1's notification arriving late must not roll listeners back.
        store.notify(1, first.as_ref());

        assert_eq!(*seen.lock(), vec![Some(1), Some(2)]);
        assert_eq!(second.map(|s| s.version), Some(2));
    }

    #[test]
    fn test_listener_write_supersedes_current_delivery() {
        let store = store();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let writer = Arc::downgrade(&store);
        let _a = store.subscribe(move |s| {
            if s.map(|s| s.version) == Some(1) {
                if let Some(store) = writer.upgrade() {
                    store.set(Some(snapshot(&[9.0])));
                }
            }
        });
        let log = seen.clone();
        let _b = store.subscribe(move |s| log.lock().push(s.map(|s| s.version)));

        store.set(Some(snapshot(&[1.0])));

        assert_eq!(*seen.lock(), vec![Some(2)]);
        assert_eq!(store.get().map(|s| s.version), Some(2));
    }

    #[test]
    fn test_listener_can_read_store() {
        let store = store();
        let observed = Arc::new(Mutex::new(None));
        let slot = observed.clone();
        let reader = Arc::downgrade(&store);
        let _sub = store.subscribe(move |_| {
            if let Some(store) = reader.upgrade() {
                *slot.lock() = store.get().map(|s| s.version);
            }
        });

        store.set(Some(snapshot(&[3.0])));
        assert_eq!(*observed.lock(), Some(1));
    }

    #[test]
    fn test_rehydrates_from_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.sqlite3");

        {
            let repo = SqliteSnapshotRepository::open(&path).unwrap();
            let store = SnapshotStore::open(Box::new(repo));
            store.set(Some(snapshot(&[1.0])));
            store.set(Some(snapshot(&[4.0, 5.0])));
        }

        let repo = SqliteSnapshotRepository::open(&path).unwrap();
        let store = SnapshotStore::open(Box::new(repo));
        let restored = store.get().unwrap();
        assert_eq!(restored.version, 2);
        assert_eq!(restored.table.len(), 2);
        assert_eq!(store.version(), 2);

        let next = store.set(Some(snapshot(&[6.0]))).unwrap();
        assert_eq!(next.version, 3);
    }

    #[test]
    fn test_rehydrates_saturated_statistics() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.sqlite3");

        let stored = {
            let store = SnapshotStore::open(Box::new(SqliteSnapshotRepository::open(&path).unwrap()));
            store.set(Some(snapshot(&[1e308, 1e308]))).unwrap()
        };

        let store = SnapshotStore::open(Box::new(SqliteSnapshotRepository::open(&path).unwrap()));
        let restored = store.get().unwrap();
        assert_eq!(restored.statistics, stored.statistics);
        assert_eq!(restored.version, 1);
    }

    #[test]
    fn test_clear_removes_persisted_value() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("snapshots.sqlite3");

        let store = SnapshotStore::open(Box::new(SqliteSnapshotRepository::open(&path).unwrap()));
        store.set(Some(snapshot(&[1.0])));
        store.clear();
        assert!(store.get().is_none());

        let repo = SqliteSnapshotRepository::open(&path).unwrap();
        assert_eq!(repo.get(SNAPSHOT_KEY).unwrap(), None);
    }

    #[test]
    fn test_corrupt_value_is_ignored() {
        let repo = SqliteSnapshotRepository::open_in_memory().unwrap();
        repo.put(SNAPSHOT_KEY, "{not json").unwrap();
        let store = SnapshotStore::open(Box::new(repo));
        assert!(store.get().is_none());
        assert_eq!(store.version(), 0);
    }
}
