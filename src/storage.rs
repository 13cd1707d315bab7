//! File-backed entry storage.
//!
//! The whole collection lives in a single JSON file that is re-read on every
//! operation and fully rewritten on every append. A single async mutex covers
//! the entire load-modify-store span, so concurrent appends are applied one
//! after another in lock-acquisition order and readers never see a
//! half-written file.

use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, trace};

/// A single persisted record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    /// Store-assigned identifier, starting at 1
    pub id: u64,
    pub item: String,
    pub completed: bool,
}

/// A record submitted by a client, before an id is assigned.
///
/// Any `id` the client sends along is ignored.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewEntry {
    #[serde(default)]
    pub item: String,
    #[serde(default)]
    pub completed: bool,
}

/// Errors from loading or persisting the collection
#[derive(Debug)]
pub enum StorageError {
    /// Backing file exists but could not be read
    Read(std::io::Error),
    /// Backing file does not hold a valid collection
    Corrupt(serde_json::Error),
    /// Collection could not be serialized
    Encode(serde_json::Error),
    /// Backing file could not be written
    Write(std::io::Error),
}

impl std::fmt::Display for StorageError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StorageError::Read(e) => write!(f, "Failed to read data file: {}", e),
            StorageError::Corrupt(e) => write!(f, "Data file is malformed: {}", e),
            StorageError::Encode(e) => write!(f, "Failed to encode collection: {}", e),
            StorageError::Write(e) => write!(f, "Failed to write data file: {}", e),
        }
    }
}

impl std::error::Error for StorageError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            StorageError::Read(e) | StorageError::Write(e) => Some(e),
            StorageError::Corrupt(e) | StorageError::Encode(e) => Some(e),
        }
    }
}

/// Shared handle to the persisted collection
pub struct Store {
    /// Location of the JSON blob
    path: PathBuf,
    /// Held for the full span of every read and read-modify-write
    lock: Mutex<()>,
}

impl Store {
    /// Create a store backed by `path`. The file is not touched until the
    /// first operation.
    pub fn new(path: impl Into<PathBuf>) -> Arc<Self> {
        let path = path.into();
        info!(data_file = %path.display(), "Initializing storage");
        Arc::new(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Path of the backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the full collection. A missing file is an empty collection.
    pub async fn read_all(&self) -> Result<Vec<Entry>, StorageError> {
        let _guard = self.lock.lock().await;
        self.load().await
    }

    /// Number of persisted entries
    pub async fn count(&self) -> Result<usize, StorageError> {
        Ok(self.read_all().await?.len())
    }

    /// Assign ids to `batch`, append it to the collection and rewrite the
    /// backing file. Returns the entries as they were stored.
    ///
    /// Ids continue from the current collection length, in batch order. On
    /// any error the file is left as it was before the call.
    pub async fn append_batch(&self, batch: Vec<NewEntry>) -> Result<Vec<Entry>, StorageError> {
        let _guard = self.lock.lock().await;

        let mut entries = self.load().await?;
        let count_before = entries.len() as u64;

        let added: Vec<Entry> = batch
            .into_iter()
            .zip(1..)
            .map(|(new, offset)| Entry {
                id: count_before + offset,
                item: new.item,
                completed: new.completed,
            })
            .collect();
        entries.extend(added.iter().cloned());

        let encoded = encode(&entries)?;
        tokio::fs::write(&self.path, encoded)
            .await
            .map_err(StorageError::Write)?;

        debug!(
            added = added.len(),
            total = entries.len(),
            "Appended batch"
        );
        Ok(added)
    }

    /// Read and decode the backing file. Caller must hold the lock.
    async fn load(&self) -> Result<Vec<Entry>, StorageError> {
        let raw = match tokio::fs::read(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                trace!(data_file = %self.path.display(), "No data file yet");
                return Ok(Vec::new());
            }
            Err(e) => return Err(StorageError::Read(e)),
        };

        if raw.iter().all(u8::is_ascii_whitespace) {
            return Ok(Vec::new());
        }

        serde_json::from_slice(&raw).map_err(StorageError::Corrupt)
    }
}

/// Serialize a collection the way it is persisted: pretty JSON with
/// two-space indentation.
pub fn encode(entries: &[Entry]) -> Result<Vec<u8>, StorageError> {
    serde_json::to_vec_pretty(entries).map_err(StorageError::Encode)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn new_entry(item: &str, completed: bool) -> NewEntry {
        NewEntry {
            item: item.to_string(),
            completed,
        }
    }

    fn temp_store() -> (TempDir, Arc<Store>) {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("data.json"));
        (dir, store)
    }

    #[tokio::test]
    async fn test_read_missing_file_is_empty() {
        let (_dir, store) = temp_store();
        assert!(store.read_all().await.unwrap().is_empty());
        assert!(!store.path().exists());
    }

    #[tokio::test]
    async fn test_read_blank_file_is_empty() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "  \n").unwrap();
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_append_assigns_sequential_ids() {
        let (_dir, store) = temp_store();

        let added = store
            .append_batch(vec![new_entry("a", false), new_entry("b", true)])
            .await
            .unwrap();
        assert_eq!(added[0].id, 1);
        assert_eq!(added[1].id, 2);

        let added = store.append_batch(vec![new_entry("c", false)]).await.unwrap();
        assert_eq!(added[0].id, 3);

        let entries = store.read_all().await.unwrap();
        assert_eq!(
            entries,
            vec![
                Entry { id: 1, item: "a".into(), completed: false },
                Entry { id: 2, item: "b".into(), completed: true },
                Entry { id: 3, item: "c".into(), completed: false },
            ]
        );
        assert_eq!(store.count().await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_empty_batch_still_writes_file() {
        let (_dir, store) = temp_store();
        let added = store.append_batch(Vec::new()).await.unwrap();
        assert!(added.is_empty());
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "[]");
    }

    #[tokio::test]
    async fn test_persisted_format_is_pretty_json() {
        let (_dir, store) = temp_store();
        store.append_batch(vec![new_entry("milk", false)]).await.unwrap();

        let raw = std::fs::read_to_string(store.path()).unwrap();
        assert_eq!(
            raw,
            "[\n  {\n    \"id\": 1,\n    \"item\": \"milk\",\n    \"completed\": false\n  }\n]"
        );
    }

    #[tokio::test]
    async fn test_corrupt_file_is_reported_and_preserved() {
        let (_dir, store) = temp_store();
        std::fs::write(store.path(), "{not json").unwrap();

        assert!(matches!(
            store.read_all().await,
            Err(StorageError::Corrupt(_))
        ));
        assert!(matches!(
            store.append_batch(vec![new_entry("a", false)]).await,
            Err(StorageError::Corrupt(_))
        ));
        assert_eq!(std::fs::read_to_string(store.path()).unwrap(), "{not json");
    }

    #[tokio::test]
    async fn test_unwritable_path() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path().join("missing-dir").join("data.json"));

        assert!(matches!(
            store.append_batch(vec![new_entry("a", false)]).await,
            Err(StorageError::Write(_))
        ));
        assert!(store.read_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_read_error_when_path_is_directory() {
        let dir = TempDir::new().unwrap();
        let store = Store::new(dir.path());
        assert!(matches!(store.read_all().await, Err(StorageError::Read(_))));
    }

    #[test]
    fn test_new_entry_defaults_and_ignores_id() {
        let batch: Vec<NewEntry> =
            serde_json::from_str(r#"[{"id": 42, "item": "x"}, {"completed": true}]"#).unwrap();
        assert_eq!(batch[0], new_entry("x", false));
        assert_eq!(batch[1], new_entry("", true));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_batches_never_interleave() {
        let (_dir, store) = temp_store();

        let mut tasks = Vec::new();
        for batch in 0..8 {
            let store = Arc::clone(&store);
            tasks.push(tokio::spawn(async move {
                let items = (0..5)
                    .map(|i| new_entry(&format!("b{batch}-{i}"), false))
                    .collect();
                store.append_batch(items).await.unwrap()
            }));
        }
        for task in tasks {
            let added = task.await.unwrap();
            for pair in added.windows(2) {
                assert_eq!(pair[1].id, pair[0].id + 1);
            }
        }

        let entries = store.read_all().await.unwrap();
        assert_eq!(entries.len(), 40);
        for (i, entry) in entries.iter().enumerate() {
            assert_eq!(entry.id, i as u64 + 1);
        }
        for chunk in entries.chunks(5) {
            let prefix = chunk[0].item.split('-').next().unwrap();
            let prefix = format!("{prefix}-");
            assert!(chunk.iter().all(|e| e.item.starts_with(&prefix)));
        }
    }
}
