//! Access-restricted dataset storage.
//!
//! Every entry is two artifacts addressed by its key: a MessagePack payload
//! (`<key>.mpk`) and a JSON metadata sidecar (`<key>_meta.json`). MessagePack
//! is self-describing and carries data only, so nothing executable can ride
//! along on deserialization. The directory and both artifacts are restricted
//! to the owning user.
//!
//! Writes stage both artifacts as hidden temp files, fsync them, then rename
//! into place: a reader never observes a half-written entry, and a failed
//! write leaves the previous entry untouched. Concurrent writers are
//! last-writer-wins; the deployment assumes a single orchestrator instance.
//!
//! The store enforces no expiry of its own. Staleness is judged by callers
//! from `metadata.timestamp`, and eviction only happens through
//! [`CacheStore::prune_older_than`] or [`CacheStore::delete`].

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::models::{DataSource, DataTable};

/// On-disk format version written into every metadata sidecar.
pub const FORMAT_VERSION: &str = "1";

/// Payload artifact extension (MessagePack).
const PAYLOAD_EXT: &str = "mpk";

/// Metadata sidecar suffix.
const META_SUFFIX: &str = "_meta.json";

#[derive(Debug, Error)]
pub enum CacheError {
    /// I/O failure while persisting or removing an entry. Local to one key;
    /// any previous entry for that key is untouched.
    #[error("cache write failed for `{target}`: {source}")]
    Write {
        target: String,
        #[source]
        source: std::io::Error,
    },

    /// Stored artifacts failed validation on read. The entry is not deleted;
    /// an operator should investigate.
    #[error("cache entry `{key}` is corrupt: {reason}")]
    Corruption { key: String, reason: String },

    /// Key is empty or would escape the cache directory.
    #[error("invalid cache key `{0}`")]
    InvalidKey(String),

    /// Refused to persist data that fails validation.
    #[error("refusing to cache `{key}`: {reason}")]
    InvalidData { key: String, reason: String },
}

/// Sidecar describing one cached payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheMetadata {
    pub timestamp: DateTime<Utc>,
    pub key: String,
    pub source: DataSource,
    pub record_count: usize,
    pub column_names: Vec<String>,
    pub format_version: String,
}

/// A fully loaded cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: String,
    pub data: DataTable,
    pub metadata: CacheMetadata,
}

impl CacheEntry {
    /// Age of the entry relative to `now`.
    pub fn age(&self, now: DateTime<Utc>) -> Duration {
        now - self.metadata.timestamp
    }

    /// Whether this entry was produced under demonstration mode. Consumers
    /// must surface this whenever the data is rendered.
    pub fn is_synthetic(&self) -> bool {
        self.metadata.source.is_synthetic()
    }
}

/// Aggregate view of the cache directory, for status displays.
#[derive(Debug, Default)]
pub struct CacheInfo {
    pub entry_count: usize,
    pub total_bytes: u64,
}

pub struct CacheStore {
    dir: PathBuf,
}

impl CacheStore {
    /// Open the cache directory, creating it if absent, and restrict it to
    /// the owning user (0o700).
    pub fn open(dir: impl Into<PathBuf>) -> Result<Self, CacheError> {
        let dir = dir.into();
        fs::create_dir_all(&dir).map_err(|e| CacheError::Write {
            target: dir.display().to_string(),
            source: e,
        })?;
        restrict(&dir, 0o700).map_err(|e| CacheError::Write {
            target: dir.display().to_string(),
            source: e,
        })?;
        debug!(dir = %dir.display(), "cache store opened");
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn payload_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}.{PAYLOAD_EXT}"))
    }

    fn meta_path(&self, key: &str) -> PathBuf {
        self.dir.join(format!("{key}{META_SUFFIX}"))
    }

    /// Persist a dataset under `key`, replacing any previous entry.
    ///
    /// Both artifacts are staged and fsynced before either rename, so a
    /// failure partway leaves the previous entry (or its absence) intact.
    pub fn put(
        &self,
        key: &str,
        data: &DataTable,
        source: DataSource,
    ) -> Result<CacheEntry, CacheError> {
        ensure_safe_key(key)?;
        if data.columns().is_empty() {
            return Err(CacheError::InvalidData {
                key: key.to_string(),
                reason: "table has no columns".to_string(),
            });
        }

        let metadata = CacheMetadata {
            timestamp: Utc::now(),
            key: key.to_string(),
            source,
            record_count: data.record_count(),
            column_names: data.columns().to_vec(),
            format_version: FORMAT_VERSION.to_string(),
        };

        let payload = rmp_serde::to_vec_named(data).map_err(|e| CacheError::Write {
            target: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;
        let sidecar = serde_json::to_vec_pretty(&metadata).map_err(|e| CacheError::Write {
            target: key.to_string(),
            source: std::io::Error::new(std::io::ErrorKind::InvalidData, e),
        })?;

        let payload_tmp = self.stage(key, &self.payload_path(key), &payload)?;
        let meta_tmp = match self.stage(key, &self.meta_path(key), &sidecar) {
            Ok(tmp) => tmp,
            Err(e) => {
                let _ = fs::remove_file(&payload_tmp);
                return Err(e);
            }
        };

        if let Err(e) = fs::rename(&payload_tmp, self.payload_path(key)) {
            let _ = fs::remove_file(&payload_tmp);
            let _ = fs::remove_file(&meta_tmp);
            return Err(CacheError::Write {
                target: key.to_string(),
                source: e,
            });
        }
        if let Err(e) = fs::rename(&meta_tmp, self.meta_path(key)) {
            let _ = fs::remove_file(&meta_tmp);
            return Err(CacheError::Write {
                target: key.to_string(),
                source: e,
            });
        }

        // Make the renames durable
        if let Ok(d) = fs::File::open(&self.dir) {
            let _ = d.sync_all();
        }

        debug!(
            key,
            records = metadata.record_count,
            source = %metadata.source,
            "cache entry written"
        );

        Ok(CacheEntry {
            key: key.to_string(),
            data: data.clone(),
            metadata,
        })
    }

    /// Load the entry for `key`. Returns `Ok(None)` when no entry exists;
    /// a half-present or inconsistent entry is a corruption error.
    pub fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        ensure_safe_key(key)?;
        let payload_path = self.payload_path(key);
        let meta_path = self.meta_path(key);

        match (payload_path.exists(), meta_path.exists()) {
            (false, false) => return Ok(None),
            (true, false) => {
                return Err(self.corrupt(key, "payload present but metadata sidecar missing"))
            }
            (false, true) => {
                return Err(self.corrupt(key, "metadata sidecar present but payload missing"))
            }
            (true, true) => {}
        }

        let sidecar = fs::read(&meta_path)
            .map_err(|e| self.corrupt(key, format!("failed to read metadata sidecar: {e}")))?;
        let metadata: CacheMetadata = serde_json::from_slice(&sidecar)
            .map_err(|e| self.corrupt(key, format!("metadata sidecar is not valid JSON: {e}")))?;

        let payload = fs::read(&payload_path)
            .map_err(|e| self.corrupt(key, format!("failed to read payload: {e}")))?;
        let data: DataTable = rmp_serde::from_slice(&payload)
            .map_err(|e| self.corrupt(key, format!("payload failed to deserialize: {e}")))?;

        if !data.is_well_formed() {
            return Err(self.corrupt(key, "payload rows do not match its column count"));
        }
        if metadata.record_count != data.record_count() {
            return Err(self.corrupt(
                key,
                format!(
                    "metadata reports {} records but payload holds {}",
                    metadata.record_count,
                    data.record_count()
                ),
            ));
        }
        if metadata.column_names.as_slice() != data.columns() {
            return Err(self.corrupt(key, "metadata column names do not match payload"));
        }

        Ok(Some(CacheEntry {
            key: key.to_string(),
            data,
            metadata,
        }))
    }

    /// Remove both artifacts for `key`. Idempotent; reports whether an
    /// entry existed.
    pub fn delete(&self, key: &str) -> Result<bool, CacheError> {
        ensure_safe_key(key)?;
        let mut existed = false;
        for path in [self.payload_path(key), self.meta_path(key)] {
            match fs::remove_file(&path) {
                Ok(()) => existed = true,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(CacheError::Write {
                        target: key.to_string(),
                        source: e,
                    })
                }
            }
        }
        Ok(existed)
    }

    /// All keys with a metadata sidecar on disk.
    pub fn list_keys(&self) -> Result<BTreeSet<String>, CacheError> {
        let mut keys = BTreeSet::new();
        let entries = fs::read_dir(&self.dir).map_err(|e| CacheError::Write {
            target: self.dir.display().to_string(),
            source: e,
        })?;
        for entry in entries {
            let entry = entry.map_err(|e| CacheError::Write {
                target: self.dir.display().to_string(),
                source: e,
            })?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.starts_with('.') {
                continue;
            }
            if let Some(key) = name.strip_suffix(META_SUFFIX) {
                if !key.is_empty() {
                    keys.insert(key.to_string());
                }
            }
        }
        Ok(keys)
    }

    /// Read only the metadata sidecar for `key`, without loading the payload.
    pub fn metadata(&self, key: &str) -> Result<Option<CacheMetadata>, CacheError> {
        ensure_safe_key(key)?;
        let meta_path = self.meta_path(key);
        if !meta_path.exists() {
            return Ok(None);
        }
        let sidecar = fs::read(&meta_path)
            .map_err(|e| self.corrupt(key, format!("failed to read metadata sidecar: {e}")))?;
        let metadata: CacheMetadata = serde_json::from_slice(&sidecar)
            .map_err(|e| self.corrupt(key, format!("metadata sidecar is not valid JSON: {e}")))?;
        Ok(Some(metadata))
    }

    /// Delete every entry whose timestamp is older than `max_age`. Returns
    /// the number of entries removed. Entries whose metadata cannot be read
    /// are left alone for an operator to look at.
    pub fn prune_older_than(&self, max_age: Duration) -> Result<usize, CacheError> {
        let cutoff = Utc::now() - max_age;
        let mut removed = 0;
        for key in self.list_keys()? {
            match self.metadata(&key) {
                Ok(Some(meta)) if meta.timestamp < cutoff => {
                    if self.delete(&key)? {
                        info!(key = %key, timestamp = %meta.timestamp, "pruned expired cache entry");
                        removed += 1;
                    }
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(key = %key, error = %e, "skipping unreadable entry during prune");
                }
            }
        }
        Ok(removed)
    }

    /// Artifact counts and total size, for status displays.
    pub fn info(&self) -> Result<CacheInfo, CacheError> {
        let mut info = CacheInfo::default();
        let entries = fs::read_dir(&self.dir).map_err(|e| CacheError::Write {
            target: self.dir.display().to_string(),
            source: e,
        })?;
        for entry in entries.flatten() {
            let name = entry.file_name();
            let Some(name) = name.to_str() else { continue };
            if name.ends_with(META_SUFFIX) {
                info.entry_count += 1;
            }
            if let Ok(meta) = entry.metadata() {
                info.total_bytes += meta.len();
            }
        }
        Ok(info)
    }

    /// Write `bytes` to a hidden temp file in the cache directory, fsynced
    /// and restricted to the owner, ready to be renamed over `dest`.
    fn stage(&self, key: &str, dest: &Path, bytes: &[u8]) -> Result<PathBuf, CacheError> {
        let name = dest
            .file_name()
            .and_then(|s| s.to_str())
            .unwrap_or("artifact");
        let tmp = self
            .dir
            .join(format!(".{}.tmp.{}", name, std::process::id()));
        let written = (|| -> std::io::Result<()> {
            let mut f = fs::File::create(&tmp)?;
            f.write_all(bytes)?;
            f.sync_all()?;
            restrict(&tmp, 0o600)
        })();
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(CacheError::Write {
                target: key.to_string(),
                source: e,
            });
        }
        Ok(tmp)
    }

    fn corrupt(&self, key: &str, reason: impl Into<String>) -> CacheError {
        CacheError::Corruption {
            key: key.to_string(),
            reason: reason.into(),
        }
    }
}

/// Owner-only permissions; no group/other bits.
fn restrict(path: &Path, mode: u32) -> std::io::Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        fs::set_permissions(path, fs::Permissions::from_mode(mode))?;
    }
    #[cfg(not(unix))]
    {
        let _ = (path, mode);
    }
    Ok(())
}

fn ensure_safe_key(key: &str) -> Result<(), CacheError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains('/')
        || key.contains('\\')
        || key.contains("..");
    if bad {
        return Err(CacheError::InvalidKey(key.to_string()));
    }
    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;
    use tempfile::TempDir;

    fn sample_table() -> DataTable {
        let mut t = DataTable::new(vec![
            "ano".to_string(),
            "mes".to_string(),
            "sexo".to_string(),
        ]);
        t.push_row(vec![
            Value::Int(2023),
            Value::Int(1),
            Value::Text("F".to_string()),
        ])
        .unwrap();
        t.push_row(vec![
            Value::Int(2023),
            Value::Int(2),
            Value::Text("M".to_string()),
        ])
        .unwrap();
        t.push_row(vec![Value::Int(2023), Value::Int(3), Value::Null])
            .unwrap();
        t
    }

    fn open_store(dir: &TempDir) -> CacheStore {
        CacheStore::open(dir.path().join("cache")).unwrap()
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let table = sample_table();

        let entry = store
            .put("sim_2601201_2023", &table, DataSource::ExternalProvider)
            .unwrap();
        assert_eq!(entry.metadata.record_count, 3);
        assert_eq!(entry.metadata.column_names, table.columns());
        assert_eq!(entry.metadata.format_version, FORMAT_VERSION);

        let loaded = store.get("sim_2601201_2023").unwrap().unwrap();
        assert_eq!(loaded.data, table);
        assert_eq!(loaded.metadata.record_count, 3);
        assert!(!loaded.is_synthetic());
    }

    #[test]
    fn test_get_absent_is_none() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        assert!(store.get("sim_2601201_1999").unwrap().is_none());
    }

    #[test]
    fn test_put_overwrites_previous_entry() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        let mut second = DataTable::new(vec!["ano".to_string()]);
        second.push_row(vec![Value::Int(2024)]).unwrap();
        store.put("k_1", &second, DataSource::Synthetic).unwrap();

        let loaded = store.get("k_1").unwrap().unwrap();
        assert_eq!(loaded.data, second);
        assert!(loaded.is_synthetic());
    }

    #[test]
    fn test_delete_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        assert!(store.delete("k_1").unwrap());
        assert!(!store.delete("k_1").unwrap());
        assert!(store.get("k_1").unwrap().is_none());
    }

    #[test]
    fn test_list_keys() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("sim_1_2023", &sample_table(), DataSource::ExternalProvider)
            .unwrap();
        store
            .put("sinan_1_2023", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        let keys = store.list_keys().unwrap();
        assert_eq!(keys.len(), 2);
        assert!(keys.contains("sim_1_2023"));
        assert!(keys.contains("sinan_1_2023"));
    }

    #[test]
    fn test_truncated_payload_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        let payload = store.dir().join("k_1.mpk");
        let bytes = std::fs::read(&payload).unwrap();
        std::fs::write(&payload, &bytes[..bytes.len() / 2]).unwrap();

        match store.get("k_1") {
            Err(CacheError::Corruption { key, .. }) => assert_eq!(key, "k_1"),
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_missing_sidecar_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();
        std::fs::remove_file(store.dir().join("k_1_meta.json")).unwrap();

        assert!(matches!(
            store.get("k_1"),
            Err(CacheError::Corruption { .. })
        ));
    }

    #[test]
    fn test_record_count_mismatch_is_corruption() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        let meta_path = store.dir().join("k_1_meta.json");
        let mut meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        meta["record_count"] = serde_json::json!(999);
        std::fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();

        match store.get("k_1") {
            Err(CacheError::Corruption { reason, .. }) => {
                assert!(reason.contains("999"), "unexpected reason: {reason}")
            }
            other => panic!("expected corruption, got {other:?}"),
        }
    }

    #[test]
    fn test_leftover_temp_files_are_invisible() {
        // A crash between staging and rename leaves hidden temp files; they
        // must not surface as entries.
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        std::fs::write(store.dir().join(".k_1.mpk.tmp.999"), b"partial").unwrap();
        std::fs::write(store.dir().join(".k_1_meta.json.tmp.999"), b"partial").unwrap();

        assert!(store.get("k_1").unwrap().is_none());
        assert!(store.list_keys().unwrap().is_empty());
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        for key in ["", "../escape", "a/b", ".hidden", "a\\b"] {
            assert!(matches!(
                store.get(key),
                Err(CacheError::InvalidKey(_))
            ));
        }
    }

    #[test]
    fn test_put_rejects_empty_schema() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        let empty = DataTable::new(vec![]);
        assert!(matches!(
            store.put("k_1", &empty, DataSource::ExternalProvider),
            Err(CacheError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_prune_older_than() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("old_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();
        store
            .put("fresh_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        // Backdate the first entry's sidecar by 100 days
        let meta_path = store.dir().join("old_1_meta.json");
        let mut meta: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&meta_path).unwrap()).unwrap();
        let old = Utc::now() - Duration::days(100);
        meta["timestamp"] = serde_json::json!(old.to_rfc3339());
        std::fs::write(&meta_path, serde_json::to_vec(&meta).unwrap()).unwrap();

        let removed = store.prune_older_than(Duration::days(90)).unwrap();
        assert_eq!(removed, 1);
        assert!(store.get("old_1").unwrap().is_none());
        assert!(store.get("fresh_1").unwrap().is_some());
    }

    #[test]
    fn test_metadata_without_payload_load() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::Synthetic)
            .unwrap();

        let meta = store.metadata("k_1").unwrap().unwrap();
        assert_eq!(meta.record_count, 3);
        assert!(meta.source.is_synthetic());
        assert!(store.metadata("k_2").unwrap().is_none());
    }

    #[test]
    fn test_info_counts_entries_and_bytes() {
        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();
        store
            .put("k_2", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        let info = store.info().unwrap();
        assert_eq!(info.entry_count, 2);
        assert!(info.total_bytes > 0);
    }

    #[cfg(unix)]
    #[test]
    fn test_owner_only_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let store = open_store(&dir);
        store
            .put("k_1", &sample_table(), DataSource::ExternalProvider)
            .unwrap();

        let dir_mode = std::fs::metadata(store.dir()).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        for artifact in ["k_1.mpk", "k_1_meta.json"] {
            let mode = std::fs::metadata(store.dir().join(artifact))
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o600, "artifact {artifact}");
        }
    }
}
