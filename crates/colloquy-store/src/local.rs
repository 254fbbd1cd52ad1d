use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

use colloquy_core::ConversationKey;

use crate::error::StoreError;
use crate::record::LocalRecord;

const RECORD_EXT: &str = "json";

/// One JSON file per conversation key under a single directory.
///
/// Writes go to a temp file in the same directory, are fsynced, then renamed
/// over the previous record, so readers see either the old or the new record.
/// Same-key callers must be serialized externally.
#[derive(Clone, Debug)]
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn open(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        fs::create_dir_all(&root)
            .map_err(|e| StoreError::Io(format!("create {}: {e}", root.display())))?;
        Ok(Self { root })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// File name is a digest of the key so arbitrary key text is filesystem-safe.
    pub fn path_for(&self, key: &ConversationKey) -> PathBuf {
        let digest = Sha256::digest(key.as_str().as_bytes());
        self.root.join(format!("{digest:x}.{RECORD_EXT}"))
    }

    pub fn read(&self, key: &ConversationKey) -> Result<Option<LocalRecord>, StoreError> {
        let path = self.path_for(key);
        let Some(record) = read_record(&path)? else {
            return Ok(None);
        };
        if &record.key != key {
            return Err(StoreError::CorruptRecord {
                path: path.display().to_string(),
                reason: format!("holds key {} instead of {key}", record.key),
            });
        }
        Ok(Some(record))
    }

    pub fn write(&self, record: &LocalRecord) -> Result<(), StoreError> {
        let path = self.path_for(&record.key);
        let bytes = serde_json::to_vec(record)?;

        let mut tmp = NamedTempFile::new_in(&self.root)
            .map_err(|e| StoreError::Io(format!("temp file: {e}")))?;
        tmp.write_all(&bytes)
            .map_err(|e| StoreError::Io(format!("write temp: {e}")))?;
        tmp.as_file()
            .sync_all()
            .map_err(|e| StoreError::Io(format!("fsync temp: {e}")))?;
        tmp.persist(&path)
            .map_err(|e| StoreError::Io(format!("rename into {}: {}", path.display(), e.error)))?;
        sync_dir(&self.root);

        debug!(
            conversation_key = %record.key,
            turns = record.turns.len(),
            archived = record.archive.len(),
            "local record written"
        );
        Ok(())
    }

    /// Returns false when there was nothing to delete.
    pub fn delete(&self, key: &ConversationKey) -> Result<bool, StoreError> {
        let path = self.path_for(key);
        match fs::remove_file(&path) {
            Ok(()) => {
                sync_dir(&self.root);
                Ok(true)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(StoreError::Io(format!("remove {}: {e}", path.display()))),
        }
    }

    /// Every readable record under the root. Unreadable files are skipped with a warning.
    pub fn scan(&self) -> Result<Vec<LocalRecord>, StoreError> {
        let entries = fs::read_dir(&self.root)
            .map_err(|e| StoreError::Io(format!("read dir {}: {e}", self.root.display())))?;

        let mut records = Vec::new();
        for entry in entries {
            let path = entry?.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            match read_record(&path) {
                Ok(Some(record)) => records.push(record),
                Ok(None) => {}
                Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable record"),
            }
        }
        Ok(records)
    }
}

fn read_record(path: &Path) -> Result<Option<LocalRecord>, StoreError> {
    let bytes = match fs::read(path) {
        Ok(b) => b,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(StoreError::Io(format!("read {}: {e}", path.display()))),
    };
    serde_json::from_slice(&bytes)
        .map(Some)
        .map_err(|e| StoreError::CorruptRecord {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
}

/// Persist the rename itself. Not supported everywhere, so failures are ignored.
fn sync_dir(dir: &Path) {
    if let Ok(d) = File::open(dir) {
        let _ = d.sync_all();
    }
}
