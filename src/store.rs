//! Durable local metadata index (C3).
//!
//! Holds the full `{uid -> KeyMetadata}` index in memory behind a
//! reader/writer lock, with a `dirty` flag that gates persistence.
//! Mutators never touch the filesystem directly; they flip `dirty` under
//! the write lock and release it immediately, and `sync()` is the only
//! path that does I/O, snapshotting under a brief read lock and writing
//! with no lock held at all.

use std::collections::HashMap;
use std::fs::{self, DirBuilder};
use std::os::unix::fs::{DirBuilderExt, PermissionsExt};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, ErrorKind};

/// The only store format version this implementation understands.
pub const CURRENT_STORE_VERSION: u32 = 1;

/// Where a [`KeyMetadata`] record came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeySource {
    Generated,
    Imported,
    Synced,
}

/// The canonical local record of a remote key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyMetadata {
    pub uid: String,
    pub name: String,
    pub pub_key_bytes: Vec<u8>,
    pub pub_key_type: String,
    pub address: String,
    pub vault_key_path: String,
    pub algorithm: String,
    pub exportable: bool,
    pub created_at: DateTime<Utc>,
    pub source: KeySource,
}

/// The persisted root document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreData {
    pub version: u32,
    #[serde(default, deserialize_with = "null_keys_as_empty_map")]
    pub keys: HashMap<String, KeyMetadata>,
}

impl Default for StoreData {
    fn default() -> Self {
        StoreData {
            version: CURRENT_STORE_VERSION,
            keys: HashMap::new(),
        }
    }
}

/// Normalizes an absent or explicit `null` `keys` field to an empty
/// mapping, rather than letting serde fail trying to deserialize `null`
/// straight into a `HashMap`.
fn null_keys_as_empty_map<'de, D>(deserializer: D) -> Result<HashMap<String, KeyMetadata>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<HashMap<String, KeyMetadata>>::deserialize(deserializer)?.unwrap_or_default())
}

/// Thread-safe, durable `{uid -> KeyMetadata}` index.
pub struct MetadataStore {
    path: PathBuf,
    data: RwLock<StoreData>,
    dirty: AtomicBool,
}

impl MetadataStore {
    /// Opens (or creates) the store at `path`. An absent file yields a
    /// fresh empty store; an empty file is treated the same way; a file
    /// with a `version` greater than [`CURRENT_STORE_VERSION`] or that
    /// fails to parse is `ErrorKind::StoreCorrupted`.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, Error> {
        let path = path.into();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                DirBuilder::new()
                    .recursive(true)
                    .mode(0o700)
                    .create(parent)
                    .map_err(|e| {
                        Error::new(
                            ErrorKind::StorePersist,
                            format!("failed to create store directory {}: {e}", parent.display()),
                        )
                    })?;
            }
        }

        let data = match fs::read(&path) {
            Ok(bytes) if bytes.is_empty() => StoreData::default(),
            Ok(bytes) => {
                let mut parsed: StoreData = serde_json::from_slice(&bytes).map_err(|e| {
                    Error::new(
                        ErrorKind::StoreCorrupted,
                        format!("store file {} failed to parse: {e}", path.display()),
                    )
                })?;
                if parsed.version > CURRENT_STORE_VERSION {
                    return Err(Error::new(
                        ErrorKind::StoreCorrupted,
                        format!(
                            "store file {} has version {}, newest understood is {}",
                            path.display(),
                            parsed.version,
                            CURRENT_STORE_VERSION
                        ),
                    ));
                }
                parsed.version = CURRENT_STORE_VERSION;
                parsed
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => StoreData::default(),
            Err(e) => {
                return Err(Error::new(
                    ErrorKind::StorePersist,
                    format!("failed to read store file {}: {e}", path.display()),
                ))
            }
        };

        Ok(MetadataStore {
            path,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        })
    }

    /// Inserts or idempotently re-confirms `meta`.
    ///
    /// Fails with `KeyExists` when a different `uid` record already holds
    /// the same `address`, or when the same `uid` is present with a
    /// different `address` — i.e. idempotent only when every field of an
    /// existing `(uid, address)` pair already matches.
    pub fn save(&self, meta: KeyMetadata) -> Result<(), Error> {
        let mut guard = self.data.write().expect("store lock poisoned");

        if let Some(existing) = guard.keys.get(&meta.uid) {
            if *existing != meta {
                return Err(Error::exists(meta.uid.clone()));
            }
            return Ok(());
        }
        if guard.keys.values().any(|k| k.address == meta.address) {
            return Err(Error::exists(meta.uid.clone()));
        }

        guard.keys.insert(meta.uid.clone(), meta);
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn get(&self, uid: &str) -> Result<KeyMetadata, Error> {
        let guard = self.data.read().expect("store lock poisoned");
        guard.keys.get(uid).cloned().ok_or_else(|| Error::not_found(uid))
    }

    pub fn get_by_address(&self, address: &str) -> Result<KeyMetadata, Error> {
        let guard = self.data.read().expect("store lock poisoned");
        guard
            .keys
            .values()
            .find(|k| k.address == address)
            .cloned()
            .ok_or_else(|| Error::not_found(address))
    }

    /// Returns an independent copy of every record; ordering is
    /// unspecified.
    pub fn list(&self) -> Vec<KeyMetadata> {
        let guard = self.data.read().expect("store lock poisoned");
        guard.keys.values().cloned().collect()
    }

    pub fn delete(&self, uid: &str) -> Result<(), Error> {
        let mut guard = self.data.write().expect("store lock poisoned");
        if guard.keys.remove(uid).is_none() {
            return Err(Error::not_found(uid));
        }
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    /// `from == to` is a no-op; `from` absent is `KeyNotFound`; `to`
    /// present (and distinct from `from`) is `KeyExists`; preserves every
    /// field but `uid`/`name`.
    pub fn rename(&self, from: &str, to: &str) -> Result<(), Error> {
        if from == to {
            return Ok(());
        }

        let mut guard = self.data.write().expect("store lock poisoned");
        if !guard.keys.contains_key(from) {
            return Err(Error::not_found(from));
        }
        if guard.keys.contains_key(to) {
            return Err(Error::exists(to));
        }

        let mut meta = guard.keys.remove(from).expect("checked above");
        meta.uid = to.to_string();
        meta.name = to.to_string();
        guard.keys.insert(to.to_string(), meta);
        drop(guard);
        self.dirty.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn has(&self, uid: &str) -> bool {
        let guard = self.data.read().expect("store lock poisoned");
        guard.keys.contains_key(uid)
    }

    pub fn count(&self) -> usize {
        let guard = self.data.read().expect("store lock poisoned");
        guard.keys.len()
    }

    /// Visits a copy of every record; the visitor's error return aborts
    /// iteration and is propagated.
    pub fn for_each<F>(&self, mut visitor: F) -> Result<(), Error>
    where
        F: FnMut(&KeyMetadata) -> Result<(), Error>,
    {
        let records = self.list();
        for record in &records {
            visitor(record)?;
        }
        Ok(())
    }

    /// Writes the current state to disk if dirty; a no-op otherwise.
    /// Atomic: writes a sibling `.tmp` file and renames it over the
    /// canonical path; the temp file is removed on any I/O failure.
    pub fn sync(&self) -> Result<(), Error> {
        if !self.dirty.load(Ordering::SeqCst) {
            return Ok(());
        }

        let snapshot = {
            let guard = self.data.read().expect("store lock poisoned");
            guard.clone()
        };

        self.write_snapshot(&snapshot)?;
        self.dirty.store(false, Ordering::SeqCst);
        Ok(())
    }

    fn write_snapshot(&self, snapshot: &StoreData) -> Result<(), Error> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        let parent_path: &Path = parent.unwrap_or_else(|| Path::new("."));

        let json = serde_json::to_vec_pretty(snapshot).map_err(|e| {
            Error::new(ErrorKind::StorePersist, format!("failed to serialize store: {e}"))
        })?;

        let mut tmp = tempfile::NamedTempFile::new_in(parent_path).map_err(|e| {
            Error::new(
                ErrorKind::StorePersist,
                format!("failed to create temp store file in {}: {e}", parent_path.display()),
            )
        })?;

        use std::io::Write;
        tmp.write_all(&json).map_err(|e| {
            Error::new(ErrorKind::StorePersist, format!("failed to write temp store file: {e}"))
        })?;
        tmp.as_file()
            .set_permissions(fs::Permissions::from_mode(0o600))
            .map_err(|e| {
                Error::new(
                    ErrorKind::StorePersist,
                    format!("failed to set permissions on temp store file: {e}"),
                )
            })?;

        tmp.persist(&self.path).map_err(|e| {
            Error::new(
                ErrorKind::StorePersist,
                format!("failed to rename temp store file into place: {e}"),
            )
        })?;

        Ok(())
    }

    /// Flushes any pending mutation. Idempotent.
    pub fn close(&self) -> Result<(), Error> {
        self.sync()
    }
}
