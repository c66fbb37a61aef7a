//! In-memory dataset with staleness-triggered reload.
//!
//! Readers get an `Arc<Snapshot>`; a reload builds a complete new snapshot
//! (records and embedding index) off to the side and swaps the pointer, so a
//! reader holds either the old table or the new one, never a mix.

use std::{
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex, RwLock,
    },
    time::{Instant, SystemTime},
};

use serde::Serialize;
use sha2::{Digest, Sha256};

use super::{parse_table, Record};
use crate::{
    errors::LoadError,
    profile::{EmbeddingStrategy, Profile},
    semantic::{EmbeddingIndex, VectorProvider},
};

#[derive(Debug, Default)]
pub struct Snapshot {
    pub records: Vec<Record>,
    /// Vectors for `records`, same order.
    pub index: EmbeddingIndex,
    /// Modification time of the file this snapshot was read from.
    pub modified: Option<SystemTime>,
    pub generation: u64,
    /// SHA-256 of the file bytes, hex encoded.
    pub digest: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct StoreStatus {
    pub records: usize,
    pub generation: u64,
    pub digest: String,
    pub last_error: Option<String>,
}

pub struct DatasetStore {
    path: PathBuf,
    profile: Arc<Profile>,
    provider: Arc<dyn VectorProvider>,
    current: RwLock<Arc<Snapshot>>,
    /// Serializes reloads. Holds the mtime of the last failed attempt so a
    /// broken file is not re-parsed on every read.
    reload_lock: Mutex<Option<SystemTime>>,
    last_error: RwLock<Option<String>>,
    generation: AtomicU64,
}

impl DatasetStore {
    /// Create the store and try an initial load. A missing or malformed file
    /// leaves the store empty but usable; the next read retries.
    pub fn open(path: &Path, profile: Arc<Profile>, provider: Arc<dyn VectorProvider>) -> Self {
        let store = Self {
            path: path.to_path_buf(),
            profile,
            provider,
            current: RwLock::new(Arc::new(Snapshot::default())),
            reload_lock: Mutex::new(None),
            last_error: RwLock::new(None),
            generation: AtomicU64::new(0),
        };

        if let Err(err) = store.reload() {
            log::warn!("starting with an empty dataset: {err}");
        }

        store
    }

    pub fn profile(&self) -> &Arc<Profile> {
        &self.profile
    }

    pub fn provider(&self) -> &Arc<dyn VectorProvider> {
        &self.provider
    }

    /// Current snapshot, reloaded first when the file is newer than the one
    /// held. Load failures are logged and the previous snapshot is returned.
    pub fn current(&self) -> Arc<Snapshot> {
        if let Err(err) = self.refresh_if_stale() {
            self.record_error(&err);
        }

        self.snapshot()
    }

    fn snapshot(&self) -> Arc<Snapshot> {
        match self.current.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn status(&self) -> StoreStatus {
        let snapshot = self.snapshot();
        StoreStatus {
            records: snapshot.records.len(),
            generation: snapshot.generation,
            digest: snapshot.digest.clone(),
            last_error: self.last_error.read().ok().and_then(|e| e.clone()),
        }
    }

    /// Reload when the backing file's mtime is newer than the snapshot's.
    /// Returns whether a reload happened.
    pub fn refresh_if_stale(&self) -> Result<bool, LoadError> {
        let modified = self.file_mtime()?;
        if !self.is_newer(modified) {
            return Ok(false);
        }

        let mut failed_at = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        // another reader may have reloaded while we waited
        if !self.is_newer(modified) || *failed_at == Some(modified) {
            return Ok(false);
        }

        match self.load(modified) {
            Ok(()) => {
                *failed_at = None;
                Ok(true)
            }
            Err(err) => {
                *failed_at = Some(modified);
                Err(err)
            }
        }
    }

    /// Unconditionally re-read the file and rebuild the index.
    pub fn reload(&self) -> Result<Arc<Snapshot>, LoadError> {
        let mut failed_at = self
            .reload_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let result = self.file_mtime().and_then(|modified| {
            self.load(modified).map_err(|err| {
                *failed_at = Some(modified);
                err
            })
        });

        match result {
            Ok(()) => {
                *failed_at = None;
                Ok(self.snapshot())
            }
            Err(err) => {
                self.record_error(&err);
                Err(err)
            }
        }
    }

    fn is_newer(&self, modified: SystemTime) -> bool {
        match self.snapshot().modified {
            Some(loaded) => modified > loaded,
            None => true,
        }
    }

    fn file_mtime(&self) -> Result<SystemTime, LoadError> {
        match std::fs::metadata(&self.path) {
            Ok(meta) => Ok(meta.modified()?),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(LoadError::Missing(self.path.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    fn load(&self, modified: SystemTime) -> Result<(), LoadError> {
        let now = Instant::now();

        let bytes = std::fs::read(&self.path).map_err(|err| match err.kind() {
            std::io::ErrorKind::NotFound => LoadError::Missing(self.path.clone()),
            _ => err.into(),
        })?;
        let table = parse_table(&bytes, &self.profile)?;

        let index = match self.profile.strategy {
            EmbeddingStrategy::WholeIndex => {
                let keywords: Vec<String> = table
                    .records
                    .iter()
                    .map(|r| r.normalized_keyword.clone())
                    .collect();
                EmbeddingIndex::build(&keywords, self.provider.as_ref())?
            }
            // vectors are computed per query for the scoped rows
            EmbeddingStrategy::PerQuery => EmbeddingIndex::default(),
        };

        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let snapshot = Arc::new(Snapshot {
            records: table.records,
            index,
            modified: Some(modified),
            generation,
            digest: hex_digest(&bytes),
        });

        log::info!(
            "dataset reloaded from {}: {} rows ({} dropped), {} vectors, generation {generation}, took {}ms",
            self.path.display(),
            snapshot.records.len(),
            table.dropped,
            snapshot.index.len(),
            now.elapsed().as_millis()
        );

        match self.current.write() {
            Ok(mut guard) => *guard = snapshot,
            Err(poisoned) => *poisoned.into_inner() = snapshot,
        }
        if let Ok(mut last_error) = self.last_error.write() {
            *last_error = None;
        }

        Ok(())
    }

    fn record_error(&self, err: &LoadError) {
        let message = err.to_string();
        let Ok(mut last_error) = self.last_error.write() else {
            return;
        };

        if last_error.as_deref() != Some(message.as_str()) {
            log::error!("dataset load failed, serving previous table: {message}");
            *last_error = Some(message);
        }
    }
}

fn hex_digest(bytes: &[u8]) -> String {
    Sha256::digest(bytes)
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}
