//! Durable backing stores for the resource ledger.
//!
//! The ledger only ever needs a full read at startup and a full rewrite per
//! mutation, so a store is two operations: [`BackingStore::load`] and
//! [`BackingStore::save`].
//!
//! # File Format
//!
//! [`FileStore`] keeps one JSON object per line:
//!
//! ```text
//! {"value":"https://example.com/a","claimant":"12345"}
//! {"value":"https://example.com/b"}
//! ```
//!
//! # Atomic Writes
//!
//! Every save goes through write-to-temp-then-rename:
//! 1. Write to `<path>.tmp`
//! 2. fsync the file
//! 3. Rename to `<path>`
//! 4. fsync the directory
//!
//! A crash at any point leaves either the previous or the new ledger on disk,
//! never a mix. `save` does not return until step 4 completes.

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use thiserror::Error;

use super::record::ResourceRecord;

/// Errors from a backing store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// IO error during file operations.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// A line of the ledger file is not a valid record.
    #[error("malformed record on line {line}: {source}")]
    Malformed {
        line: usize,
        #[source]
        source: serde_json::Error,
    },

    /// JSON serialization error while writing.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// The store refused the write (used by [`MemoryStore`] failure injection).
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;

/// Full-read / full-rewrite persistence for the ledger.
pub trait BackingStore: Send {
    /// Reads every record in stored order.
    fn load(&self) -> Result<Vec<ResourceRecord>>;

    /// Durably replaces the stored sequence. Must not return `Ok` before the
    /// data would survive a crash.
    fn save(&mut self, records: &[ResourceRecord]) -> Result<()>;
}

/// JSON Lines ledger file with crash-safe rewrites.
#[derive(Debug, Clone)]
pub struct FileStore {
    path: PathBuf,
}

impl FileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl BackingStore for FileStore {
    /// A missing file is an empty pool.
    fn load(&self) -> Result<Vec<ResourceRecord>> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        decode_lines(&text)
    }

    fn save(&mut self, records: &[ResourceRecord]) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent)?;

        let bytes = encode_lines(records)?;
        let tmp_path = self.tmp_path();

        {
            let mut file = OpenOptions::new()
                .write(true)
                .create(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(&bytes)?;
            file.sync_all()?;
        }

        std::fs::rename(&tmp_path, &self.path)?;

        // The rename is only durable once the directory entry is synced.
        fsync_dir(&parent)?;

        Ok(())
    }
}

/// Syncs a directory so renames inside it survive power loss.
fn fsync_dir(dir_path: &Path) -> io::Result<()> {
    File::open(dir_path)?.sync_all()
}

fn encode_lines(records: &[ResourceRecord]) -> Result<Vec<u8>> {
    let mut out = Vec::new();
    for record in records {
        serde_json::to_writer(&mut out, record)?;
        out.push(b'\n');
    }
    Ok(out)
}

fn decode_lines(text: &str) -> Result<Vec<ResourceRecord>> {
    text.lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|source| StoreError::Malformed {
                line: idx + 1,
                source,
            })
        })
        .collect()
}

/// In-memory store for tests and dry runs.
///
/// Clones share the same contents, so a test can keep a handle after moving
/// the store into a ledger and inspect what was "persisted".
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

#[derive(Debug, Default)]
struct MemoryInner {
    records: Vec<ResourceRecord>,
    failing_saves: usize,
    saves: usize,
}

impl MemoryStore {
    pub fn new(records: Vec<ResourceRecord>) -> Self {
        MemoryStore {
            inner: Arc::new(Mutex::new(MemoryInner {
                records,
                ..MemoryInner::default()
            })),
        }
    }

    /// Creates a store holding unclaimed records with the given values.
    pub fn with_values<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::new(values.into_iter().map(ResourceRecord::unclaimed).collect())
    }

    /// Makes the next `n` saves fail with [`StoreError::Unavailable`].
    pub fn fail_next_saves(&self, n: usize) {
        self.lock().failing_saves = n;
    }

    /// The last successfully saved sequence.
    pub fn persisted(&self) -> Vec<ResourceRecord> {
        self.lock().records.clone()
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.lock().saves
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl BackingStore for MemoryStore {
    fn load(&self) -> Result<Vec<ResourceRecord>> {
        Ok(self.lock().records.clone())
    }

    fn save(&mut self, records: &[ResourceRecord]) -> Result<()> {
        let mut inner = self.lock();
        if inner.failing_saves > 0 {
            inner.failing_saves -= 1;
            return Err(StoreError::Unavailable("injected save failure".to_string()));
        }
        inner.records = records.to_vec();
        inner.saves += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::UserId;
    use proptest::prelude::*;
    use tempfile::tempdir;

    fn arb_record() -> impl Strategy<Value = ResourceRecord> {
        (
            "https://[a-z]{1,10}\\.example/[a-zA-Z0-9]{1,12}",
            prop::option::of("[0-9]{1,19}"),
        )
            .prop_map(|(value, claimant)| ResourceRecord {
                value,
                claimant: claimant.map(UserId::new),
            })
    }

    proptest! {
        /// Whatever is saved is exactly what the next load returns, order included.
        #[test]
        fn file_store_save_load_preserves_sequence(
            records in prop::collection::vec(arb_record(), 0..30)
        ) {
            let dir = tempdir().unwrap();
            let mut store = FileStore::new(dir.path().join("links.jsonl"));

            store.save(&records).unwrap();
            prop_assert_eq!(store.load().unwrap(), records);
        }
    }

    #[test]
    fn missing_file_loads_as_empty_pool() {
        let dir = tempdir().unwrap();
        let store = FileStore::new(dir.path().join("absent.jsonl"));
        assert!(store.load().unwrap().is_empty());
    }

    #[test]
    fn temp_file_is_gone_after_save() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        let mut store = FileStore::new(&path);

        store.save(&[ResourceRecord::unclaimed("a")]).unwrap();

        assert!(path.exists());
        assert!(!dir.path().join("links.jsonl.tmp").exists());
    }

    #[test]
    fn save_creates_parent_directories() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested/state/links.jsonl");
        let mut store = FileStore::new(&path);

        store.save(&[ResourceRecord::unclaimed("a")]).unwrap();

        assert!(path.exists());
    }

    #[test]
    fn file_layout_is_one_record_per_line() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        let mut store = FileStore::new(&path);

        store
            .save(&[
                ResourceRecord::claimed("a", UserId::new("7")),
                ResourceRecord::unclaimed("b"),
            ])
            .unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(
            text,
            "{\"value\":\"a\",\"claimant\":\"7\"}\n{\"value\":\"b\"}\n"
        );
    }

    #[test]
    fn blank_lines_are_skipped() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(&path, "{\"value\":\"a\"}\n\n   \n{\"value\":\"b\"}\n").unwrap();

        let records = FileStore::new(&path).load().unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn malformed_line_reports_line_number() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("links.jsonl");
        std::fs::write(&path, "{\"value\":\"a\"}\nnot json\n").unwrap();

        let result = FileStore::new(&path).load();
        assert!(matches!(result, Err(StoreError::Malformed { line: 2, .. })));
    }

    #[test]
    fn memory_store_injected_failures_leave_contents_untouched() {
        let mut store = MemoryStore::with_values(["a"]);
        store.fail_next_saves(1);

        let result = store.save(&[ResourceRecord::claimed("a", UserId::new("1"))]);
        assert!(matches!(result, Err(StoreError::Unavailable(_))));
        assert_eq!(store.persisted(), vec![ResourceRecord::unclaimed("a")]);

        // Only one failure was injected.
        store
            .save(&[ResourceRecord::claimed("a", UserId::new("1"))])
            .unwrap();
        assert_eq!(store.save_count(), 1);
    }

    #[test]
    fn memory_store_clones_share_contents() {
        let store = MemoryStore::with_values(["a"]);
        let mut clone = store.clone();
        clone.save(&[]).unwrap();
        assert!(store.persisted().is_empty());
    }
}
