//! Durable and session-scoped key-value storage for the trigger gating state.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;
use tracing::{debug, warn};

pub const NEXT_ALLOWED_AT_KEY: &str = "rr_next_allowed_at";
pub const SEEN_PRODUCT_KEY: &str = "rr_seen_product";
pub const FIRST_PRODUCT_AT_KEY: &str = "rr_first_product_at";
pub const SELECTED_AT_KEY: &str = "rr_selected_at";

const PROBE_KEY: &str = "__rr_test__";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("storage io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("storage contents are corrupt: {0}")]
    Corrupt(String),
}

pub trait KeyValueStore: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError>;
    fn set(&self, key: &str, value: &str) -> Result<(), StorageError>;
    fn remove(&self, key: &str) -> Result<(), StorageError>;

    /// Write-then-delete round trip used to decide whether a store is usable.
    fn probe(&self) -> Result<(), StorageError> {
        self.set(PROBE_KEY, "1")?;
        self.remove(PROBE_KEY)
    }
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemoryStore {
    fn entries(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, String>>, StorageError> {
        self.entries.lock().map_err(|_| StorageError::Unavailable("memory store poisoned".into()))
    }
}

impl KeyValueStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        Ok(self.entries()?.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.entries()?.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.entries()?.remove(key);
        Ok(())
    }
}

/// A JSON object on disk, rewritten on every mutation.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
    entries: Mutex<BTreeMap<String, String>>,
}

impl JsonFileStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path = path.as_ref().to_path_buf();
        let entries = match fs::read_to_string(&path) {
            Ok(raw) if raw.trim().is_empty() => BTreeMap::new(),
            Ok(raw) => serde_json::from_str(&raw)
                .map_err(|error| StorageError::Corrupt(format!("{}: {error}", path.display())))?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => BTreeMap::new(),
            Err(error) => return Err(StorageError::Io(error)),
        };
        Ok(Self { path, entries: Mutex::new(entries) })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn mutate(
        &self,
        change: impl FnOnce(&mut BTreeMap<String, String>),
    ) -> Result<(), StorageError> {
        let mut entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("file store poisoned".into()))?;
        change(&mut entries);
        let encoded = serde_json::to_string_pretty(&*entries)
            .map_err(|error| StorageError::Corrupt(error.to_string()))?;
        fs::write(&self.path, encoded)?;
        Ok(())
    }
}

impl KeyValueStore for JsonFileStore {
    fn get(&self, key: &str) -> Result<Option<String>, StorageError> {
        let entries = self
            .entries
            .lock()
            .map_err(|_| StorageError::Unavailable("file store poisoned".into()))?;
        Ok(entries.get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.mutate(|entries| {
            entries.insert(key.to_string(), value.to_string());
        })
    }

    fn remove(&self, key: &str) -> Result<(), StorageError> {
        self.mutate(|entries| {
            entries.remove(key);
        })
    }
}

/// Point-in-time view of the gating keys.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EngagementSnapshot {
    pub next_allowed_at_ms: i64,
    pub seen_product: bool,
    pub first_product_at_ms: Option<i64>,
    pub selected_at_ms: Option<i64>,
}

/// Gating state split across a durable handle (frequency cap) and a session
/// handle (product view and selection marks).
///
/// Storage failures never surface to callers: reads fall back to "absent"
/// and writes are dropped with a warning.
#[derive(Clone)]
pub struct EngagementStore {
    durable: Arc<dyn KeyValueStore>,
    session: Arc<dyn KeyValueStore>,
}

impl EngagementStore {
    pub fn new(durable: Arc<dyn KeyValueStore>, session: Arc<dyn KeyValueStore>) -> Self {
        Self { durable, session }
    }

    /// Two fresh in-memory handles.
    pub fn in_memory() -> Self {
        Self::new(Arc::new(MemoryStore::default()), Arc::new(MemoryStore::default()))
    }

    /// Probes both handles. An unusable durable store degrades to memory for
    /// this session; an unusable session store shares the durable one.
    pub fn with_fallbacks(
        durable: Option<Arc<dyn KeyValueStore>>,
        session: Option<Arc<dyn KeyValueStore>>,
    ) -> Self {
        let durable = usable(durable, "durable")
            .unwrap_or_else(|| Arc::new(MemoryStore::default()) as Arc<dyn KeyValueStore>);
        let session = usable(session, "session").unwrap_or_else(|| durable.clone());
        Self { durable, session }
    }

    pub fn next_allowed_at(&self) -> i64 {
        read_ms(self.durable.as_ref(), NEXT_ALLOWED_AT_KEY).unwrap_or(0)
    }

    /// Moves the frequency cap forward; an earlier value than the stored one
    /// is ignored. Returns the cap now in effect.
    pub fn advance_next_allowed_at(&self, candidate_ms: i64) -> i64 {
        let current = self.next_allowed_at();
        if candidate_ms <= current {
            return current;
        }
        write(self.durable.as_ref(), NEXT_ALLOWED_AT_KEY, &candidate_ms.to_string());
        candidate_ms
    }

    pub fn seen_product(&self) -> bool {
        read(self.session.as_ref(), SEEN_PRODUCT_KEY).as_deref() == Some("1")
    }

    pub fn first_product_at(&self) -> Option<i64> {
        read_ms(self.session.as_ref(), FIRST_PRODUCT_AT_KEY).filter(|ms| *ms > 0)
    }

    pub fn selected_at(&self) -> Option<i64> {
        read_ms(self.session.as_ref(), SELECTED_AT_KEY).filter(|ms| *ms > 0)
    }

    /// Sets the seen flag; the first-view time is only written once per session.
    pub fn mark_product_seen(&self, now_ms: i64) {
        write(self.session.as_ref(), SEEN_PRODUCT_KEY, "1");
        if self.first_product_at().is_none() {
            write(self.session.as_ref(), FIRST_PRODUCT_AT_KEY, &now_ms.to_string());
        }
    }

    pub fn mark_selected(&self, now_ms: i64) {
        write(self.session.as_ref(), SELECTED_AT_KEY, &now_ms.to_string());
    }

    pub fn reset(&self) {
        remove(self.durable.as_ref(), NEXT_ALLOWED_AT_KEY);
        for key in [SEEN_PRODUCT_KEY, FIRST_PRODUCT_AT_KEY, SELECTED_AT_KEY] {
            remove(self.session.as_ref(), key);
        }
    }

    pub fn snapshot(&self) -> EngagementSnapshot {
        EngagementSnapshot {
            next_allowed_at_ms: self.next_allowed_at(),
            seen_product: self.seen_product(),
            first_product_at_ms: self.first_product_at(),
            selected_at_ms: self.selected_at(),
        }
    }
}

fn usable(store: Option<Arc<dyn KeyValueStore>>, role: &'static str) -> Option<Arc<dyn KeyValueStore>> {
    let store = store?;
    match store.probe() {
        Ok(()) => Some(store),
        Err(error) => {
            warn!(
                event_name = "widget.storage.degraded",
                role,
                error = %error,
                "storage handle unusable; falling back"
            );
            None
        }
    }
}

fn read(store: &dyn KeyValueStore, key: &str) -> Option<String> {
    store.get(key).unwrap_or_else(|error| {
        debug!(event_name = "widget.storage.read_failed", key, error = %error, "storage read failed");
        None
    })
}

fn read_ms(store: &dyn KeyValueStore, key: &str) -> Option<i64> {
    read(store, key).and_then(|raw| raw.trim().parse::<i64>().ok())
}

fn write(store: &dyn KeyValueStore, key: &str, value: &str) {
    if let Err(error) = store.set(key, value) {
        warn!(event_name = "widget.storage.write_failed", key, error = %error, "storage write dropped");
    }
}

fn remove(store: &dyn KeyValueStore, key: &str) {
    if let Err(error) = store.remove(key) {
        warn!(event_name = "widget.storage.write_failed", key, error = %error, "storage remove dropped");
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::{
        EngagementStore, JsonFileStore, KeyValueStore, MemoryStore, StorageError,
        NEXT_ALLOWED_AT_KEY, SELECTED_AT_KEY,
    };

    struct BrokenStore;

    impl KeyValueStore for BrokenStore {
        fn get(&self, _key: &str) -> Result<Option<String>, StorageError> {
            Err(StorageError::Unavailable("private mode".into()))
        }

        fn set(&self, _key: &str, _value: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("private mode".into()))
        }

        fn remove(&self, _key: &str) -> Result<(), StorageError> {
            Err(StorageError::Unavailable("private mode".into()))
        }
    }

    #[test]
    fn cap_never_moves_backwards() {
        let store = EngagementStore::in_memory();

        assert_eq!(store.advance_next_allowed_at(5_000), 5_000);
        assert_eq!(store.advance_next_allowed_at(3_000), 5_000);
        assert_eq!(store.next_allowed_at(), 5_000);
    }

    #[test]
    fn first_product_time_is_written_once() {
        let store = EngagementStore::in_memory();

        store.mark_product_seen(1_000);
        store.mark_product_seen(9_000);

        assert!(store.seen_product());
        assert_eq!(store.first_product_at(), Some(1_000));
    }

    #[test]
    fn garbage_values_read_as_absent() {
        let session = Arc::new(MemoryStore::default());
        session.set(SELECTED_AT_KEY, "soon").expect("set");
        let store = EngagementStore::new(Arc::new(MemoryStore::default()), session);

        assert_eq!(store.selected_at(), None);
    }

    #[test]
    fn reset_clears_cap_and_session_marks() {
        let store = EngagementStore::in_memory();
        store.advance_next_allowed_at(10_000);
        store.mark_product_seen(1);
        store.mark_selected(2);

        store.reset();

        assert_eq!(store.snapshot(), super::EngagementSnapshot::default());
    }

    #[test]
    fn broken_session_store_shares_durable_handle() {
        let durable: Arc<dyn KeyValueStore> = Arc::new(MemoryStore::default());
        let store = EngagementStore::with_fallbacks(Some(durable.clone()), Some(Arc::new(BrokenStore)));

        store.mark_selected(42);

        assert_eq!(durable.get(SELECTED_AT_KEY).expect("get").as_deref(), Some("42"));
    }

    #[test]
    fn missing_handles_degrade_to_memory() {
        let store = EngagementStore::with_fallbacks(Some(Arc::new(BrokenStore)), None);

        store.advance_next_allowed_at(7_000);
        store.mark_product_seen(1_000);

        assert_eq!(store.next_allowed_at(), 7_000);
        assert!(store.seen_product());
    }

    #[test]
    fn broken_store_without_fallback_absorbs_errors() {
        let store = EngagementStore::new(Arc::new(BrokenStore), Arc::new(BrokenStore));

        store.advance_next_allowed_at(7_000);

        assert_eq!(store.next_allowed_at(), 0);
        assert!(!store.seen_product());
    }

    #[test]
    fn json_file_store_persists_across_reopen() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engagement.json");

        let first = JsonFileStore::open(&path).expect("open");
        first.set(NEXT_ALLOWED_AT_KEY, "123").expect("set");
        first.probe().expect("probe");

        let reopened = JsonFileStore::open(&path).expect("reopen");
        assert_eq!(reopened.get(NEXT_ALLOWED_AT_KEY).expect("get").as_deref(), Some("123"));
        assert_eq!(reopened.get("__rr_test__").expect("get"), None);
    }

    #[test]
    fn json_file_store_rejects_corrupt_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("engagement.json");
        std::fs::write(&path, "{not json").expect("write");

        let result = JsonFileStore::open(&path);

        assert!(matches!(result, Err(StorageError::Corrupt(_))));
    }
}
