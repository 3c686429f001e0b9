//! File-backed storage adapter.
//!
//! Layout of a store directory:
//!
//! ```text
//! <store_dir>/
//! ├─ LOCK            # Advisory lock for single-process access
//! ├─ store.cbor      # Snapshot of every collection
//! └─ store.cbor.tmp  # Transient file used for atomic replacement
//! ```

use crate::adapter::{Changeset, Document, StorageAdapter};
use crate::error::{StorageError, StorageResult};
use crate::memory::{list_matching, CollectionData};
use fs2::FileExt;
use parking_lot::{Mutex, MutexGuard, RwLock};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

const LOCK_FILE: &str = "LOCK";
const SNAPSHOT_FILE: &str = "store.cbor";
const SNAPSHOT_TEMP: &str = "store.cbor.tmp";

/// A file-backed storage adapter.
///
/// The whole store is held in memory and every committed changeset is
/// persisted by writing a fresh snapshot to a temporary file, syncing it and
/// renaming it over the previous one. A crash therefore leaves either the
/// old or the new snapshot on disk, never a mix.
///
/// # Thread Safety
///
/// The adapter holds an exclusive advisory lock on its directory. Only one
/// `FileAdapter` can be open per directory at a time; the lock is released
/// when the adapter is dropped.
///
/// # Example
///
/// ```no_run
/// use tidemark_storage::FileAdapter;
/// use std::path::Path;
///
/// let adapter = FileAdapter::open(Path::new("tidemark-data")).unwrap();
/// ```
#[derive(Debug)]
pub struct FileAdapter {
    dir: PathBuf,
    collections: RwLock<HashMap<String, CollectionData>>,
    writer: Mutex<()>,
    _lock_file: File,
}

impl FileAdapter {
    /// Opens or creates a store in `dir`.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Another process holds the lock (returns `Locked`)
    /// - The snapshot cannot be decoded
    /// - I/O errors occur
    pub fn open(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;

        let lock_path = dir.join(LOCK_FILE);
        let lock_file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;

        if lock_file.try_lock_exclusive().is_err() {
            return Err(StorageError::Locked {
                path: dir.to_path_buf(),
            });
        }

        let collections = Self::load(&dir.join(SNAPSHOT_FILE))?;
        tracing::debug!(path = ?dir, collections = collections.len(), "opened file store");

        Ok(Self {
            dir: dir.to_path_buf(),
            collections: RwLock::new(collections),
            writer: Mutex::new(()),
            _lock_file: lock_file,
        })
    }

    /// Returns the store directory.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.dir
    }

    fn load(path: &Path) -> StorageResult<HashMap<String, CollectionData>> {
        if !path.exists() {
            return Ok(HashMap::new());
        }
        let file = File::open(path)?;
        ciborium::de::from_reader(BufReader::new(file)).map_err(StorageError::codec)
    }

    fn persist(&self, collections: &HashMap<String, CollectionData>) -> StorageResult<()> {
        let temp_path = self.dir.join(SNAPSHOT_TEMP);
        let file = File::create(&temp_path)?;
        let mut writer = BufWriter::new(file);
        ciborium::ser::into_writer(collections, &mut writer).map_err(StorageError::codec)?;
        writer.flush()?;
        writer
            .into_inner()
            .map_err(|e| StorageError::Io(e.into_error()))?
            .sync_all()?;
        fs::rename(&temp_path, self.dir.join(SNAPSHOT_FILE))?;
        Ok(())
    }
}

impl StorageAdapter for FileAdapter {
    fn get(&self, collection: &str, id: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|data| data.records.get(id).cloned()))
    }

    fn list(
        &self,
        collection: &str,
        filter: &dyn Fn(&Document) -> bool,
    ) -> StorageResult<Vec<(String, Document)>> {
        Ok(list_matching(self.collections.read().get(collection), filter))
    }

    fn get_metadata(&self, collection: &str) -> StorageResult<Option<Document>> {
        Ok(self
            .collections
            .read()
            .get(collection)
            .and_then(|data| data.metadata.clone()))
    }

    fn write_lock(&self) -> MutexGuard<'_, ()> {
        self.writer.lock()
    }

    fn apply(&self, changes: Changeset) -> StorageResult<()> {
        let mut collections = self.collections.write();

        let mut next = collections
            .get(&changes.collection)
            .cloned()
            .unwrap_or_default();
        next.apply(&changes);

        let previous = if next.is_empty() {
            collections.remove(&changes.collection)
        } else {
            collections.insert(changes.collection.clone(), next)
        };

        if let Err(e) = self.persist(&collections) {
            tracing::warn!(collection = %changes.collection, error = %e, "snapshot persist failed, rolling back");
            match previous {
                Some(data) => {
                    collections.insert(changes.collection.clone(), data);
                }
                None => {
                    collections.remove(&changes.collection);
                }
            }
            return Err(e);
        }

        Ok(())
    }
}
