//! Compare-and-set file storage for conflict-free concurrent writes.
//!
//! Records are JSONL files keyed by a string. Versioning uses ETags
//! (content hashes): `read` returns `(records, etag)`, and a write only
//! succeeds when the expected etag still matches the file. On conflict
//! an optional merge function reconciles the two record sets and the
//! write retries with exponential backoff.
//!
//! The store is single-process: an internal mutex serializes access, and
//! writes go through a temp file + fsync + rename so readers in other
//! threads never observe a torn file.

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

use serde_json::Value;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

/// Result of a CAS operation.
#[derive(Clone, Debug)]
pub struct CasResult {
    pub success: bool,
    /// The etag now on disk ("new" when the file did not exist).
    pub current_version: String,
    /// The etag of the content just written, on success.
    pub new_version: Option<String>,
    pub error: Option<String>,
}

impl CasResult {
    fn failure(current: impl Into<String>, error: impl Into<String>) -> Self {
        CasResult {
            success: false,
            current_version: current.into(),
            new_version: None,
            error: Some(error.into()),
        }
    }
}

/// Merge function called on etag conflict: `(current, new) → merged`.
pub type MergeFn = dyn Fn(Vec<Value>, Vec<Value>) -> Vec<Value> + Send + Sync;

/// ETag-versioned JSONL storage with retry-and-merge semantics.
pub struct CasFileStorage {
    base_path: PathBuf,
    max_retries: u32,
    lock: Mutex<()>,
}

impl CasFileStorage {
    /// Create the storage, ensuring the base directory exists.
    pub fn new(base_path: impl Into<PathBuf>, max_retries: u32) -> std::io::Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path)?;
        Ok(CasFileStorage {
            base_path,
            max_retries,
            lock: Mutex::new(()),
        })
    }

    /// Compute the etag for file content: first 16 hex chars of SHA-256.
    pub fn compute_etag(content: &str) -> String {
        let digest = Sha256::digest(content.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    /// File path for a key.
    fn path_for(&self, key: &str) -> PathBuf {
        let safe_key = key.replace([':', '/'], "_");
        self.base_path.join(format!("{safe_key}.jsonl"))
    }

    /// Read records and the current etag.
    ///
    /// Returns `(None, None)` when the key does not exist.
    pub fn read(&self, key: &str) -> (Option<Vec<Value>>, Option<String>) {
        let _guard = self.lock.lock().unwrap();
        self.read_unlocked(key)
    }

    fn read_unlocked(&self, key: &str) -> (Option<Vec<Value>>, Option<String>) {
        let path = self.path_for(key);
        if !path.exists() {
            return (None, None);
        }

        let content = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(e) => {
                warn!(key = key, error = %e, "CAS read failed");
                return (None, None);
            }
        };

        let etag = Self::compute_etag(&content);
        let mut records = Vec::new();
        for line in content.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(v) => records.push(v),
                Err(e) => warn!(key = key, error = %e, "skipping malformed CAS record"),
            }
        }

        (Some(records), Some(etag))
    }

    /// Write records only if the current etag matches `expected_etag`.
    ///
    /// On mismatch, `merge` (if given) reconciles the current and new
    /// records and the write retries against the fresh etag, backing off
    /// exponentially from 10 ms. Without `merge`, a mismatch fails fast.
    pub fn write_cas(
        &self,
        key: &str,
        records: Vec<Value>,
        expected_etag: Option<&str>,
        merge: Option<&MergeFn>,
    ) -> CasResult {
        let _guard = self.lock.lock().unwrap();

        let mut records = records;
        let mut expected: Option<String> = expected_etag.map(String::from);

        for attempt in 0..self.max_retries {
            let (_, current_etag) = self.read_unlocked(key);

            if current_etag.as_deref() != expected.as_deref() {
                match merge {
                    Some(merge_fn) => {
                        let (current_records, fresh_etag) = self.read_unlocked(key);
                        records = merge_fn(current_records.unwrap_or_default(), records);
                        expected = fresh_etag;
                        std::thread::sleep(Duration::from_millis(10 << attempt.min(6)));
                        continue;
                    }
                    None => {
                        return CasResult::failure(
                            current_etag.clone().unwrap_or_else(|| "new".into()),
                            format!(
                                "ETag mismatch: expected {:?}, got {:?}",
                                expected, current_etag
                            ),
                        );
                    }
                }
            }

            match self.write_atomic(key, &records) {
                Ok(new_etag) => {
                    debug!(key = key, attempt = attempt + 1, "CAS write succeeded");
                    return CasResult {
                        success: true,
                        current_version: new_etag.clone(),
                        new_version: Some(new_etag),
                        error: None,
                    };
                }
                Err(e) => {
                    warn!(key = key, attempt = attempt + 1, error = %e, "CAS write attempt failed");
                    if attempt + 1 < self.max_retries {
                        std::thread::sleep(Duration::from_millis(10 << attempt.min(6)));
                    } else {
                        return CasResult::failure(
                            expected.unwrap_or_else(|| "unknown".into()),
                            e.to_string(),
                        );
                    }
                }
            }
        }

        CasResult::failure("unknown", "Max retries exceeded")
    }

    /// Write with automatic retry on conflict using a merge function.
    pub fn write_with_retry(
        &self,
        key: &str,
        records: Vec<Value>,
        merge: Option<&MergeFn>,
    ) -> CasResult {
        let (_, current_etag) = self.read(key);
        self.write_cas(key, records, current_etag.as_deref(), merge)
    }

    /// Serialize to `<key>.tmp`, fsync, and rename over the target.
    fn write_atomic(&self, key: &str, records: &[Value]) -> std::io::Result<String> {
        let path = self.path_for(key);
        let tmp_path = path.with_extension("tmp");

        let mut content = String::new();
        for record in records {
            content.push_str(&serde_json::to_string(record)?);
            content.push('\n');
        }
        let etag = Self::compute_etag(&content);

        {
            use std::io::Write;
            let mut file = std::fs::File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &path)?;

        Ok(etag)
    }

    /// Base directory of this store.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

// ─────────────────────────────────────────────
// SessionCas — session-specialized merge
// ─────────────────────────────────────────────

/// CAS storage specialized for session records.
///
/// The default merge deduplicates by message `id` (falling back to a
/// stable content hash) and sorts by `timestamp`.
pub struct SessionCas {
    storage: CasFileStorage,
}

impl SessionCas {
    pub fn new(base_path: impl Into<PathBuf>, max_retries: u32) -> std::io::Result<Self> {
        Ok(SessionCas {
            storage: CasFileStorage::new(base_path, max_retries)?,
        })
    }

    /// Merge two record sets, keeping unique messages in timestamp order.
    pub fn merge_sessions(current: Vec<Value>, new: Vec<Value>) -> Vec<Value> {
        let mut seen = std::collections::HashSet::new();
        let mut merged = Vec::new();

        for item in current.into_iter().chain(new) {
            let id = item
                .get("id")
                .and_then(|v| v.as_str())
                .map(String::from)
                .unwrap_or_else(|| {
                    CasFileStorage::compute_etag(&item.to_string())
                });
            if seen.insert(id) {
                merged.push(item);
            }
        }

        merged.sort_by(|a, b| {
            let ta = a.get("timestamp").and_then(|v| v.as_str()).unwrap_or("");
            let tb = b.get("timestamp").and_then(|v| v.as_str()).unwrap_or("");
            ta.cmp(tb)
        });

        merged
    }

    /// Save session records with automatic conflict resolution.
    pub fn save_session(&self, session_key: &str, records: Vec<Value>) -> CasResult {
        self.storage
            .write_with_retry(session_key, records, Some(&Self::merge_sessions))
    }

    /// Read session records and their etag.
    pub fn read(&self, session_key: &str) -> (Option<Vec<Value>>, Option<String>) {
        self.storage.read(session_key)
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::tempdir;

    fn make_store() -> (CasFileStorage, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let store = CasFileStorage::new(dir.path(), 10).unwrap();
        (store, dir)
    }

    #[test]
    fn test_read_missing_key() {
        let (store, _dir) = make_store();
        let (records, etag) = store.read("nope");
        assert!(records.is_none());
        assert!(etag.is_none());
    }

    #[test]
    fn test_write_then_read() {
        let (store, _dir) = make_store();
        let records = vec![json!({"id": "m1", "content": "hello"})];

        let result = store.write_cas("room:general", records.clone(), None, None);
        assert!(result.success);
        assert!(result.new_version.is_some());

        let (read_back, etag) = store.read("room:general");
        assert_eq!(read_back.unwrap(), records);
        assert_eq!(etag, result.new_version);
    }

    #[test]
    fn test_etag_is_stable_hash_prefix() {
        let etag = CasFileStorage::compute_etag("hello\n");
        assert_eq!(etag.len(), 16);
        assert_eq!(etag, CasFileStorage::compute_etag("hello\n"));
        assert_ne!(etag, CasFileStorage::compute_etag("hello!\n"));
    }

    #[test]
    fn test_stale_etag_fails_without_merge() {
        let (store, _dir) = make_store();
        let r1 = store.write_cas("k", vec![json!({"id": "a"})], None, None);
        assert!(r1.success);

        // A second writer with a stale (None) etag must be rejected.
        let r2 = store.write_cas("k", vec![json!({"id": "b"})], None, None);
        assert!(!r2.success);
        assert!(r2.error.unwrap().contains("ETag mismatch"));
    }

    #[test]
    fn test_stale_etag_merges_and_succeeds() {
        let (store, _dir) = make_store();
        store.write_cas("k", vec![json!({"id": "a"})], None, None);

        let merge: Box<MergeFn> = Box::new(|mut current, new| {
            current.extend(new);
            current
        });
        let r = store.write_cas("k", vec![json!({"id": "b"})], None, Some(&*merge));
        assert!(r.success);

        let (records, _) = store.read("k");
        let records = records.unwrap();
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn test_write_with_current_etag() {
        let (store, _dir) = make_store();
        let r1 = store.write_cas("k", vec![json!({"id": "a"})], None, None);
        let r2 = store.write_cas(
            "k",
            vec![json!({"id": "a"}), json!({"id": "b"})],
            r1.new_version.as_deref(),
            None,
        );
        assert!(r2.success);
    }

    #[test]
    fn test_key_sanitization() {
        let (store, dir) = make_store();
        store.write_cas("room:general/main", vec![json!({"x": 1})], None, None);
        assert!(dir.path().join("room_general_main.jsonl").exists());
    }

    #[test]
    fn test_no_tmp_file_left_behind() {
        let (store, dir) = make_store();
        store.write_cas("k", vec![json!({"x": 1})], None, None);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map_or(false, |ext| ext == "tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    // ── SessionCas ──

    #[test]
    fn test_merge_sessions_dedupes_by_id() {
        let current = vec![
            json!({"id": "m1", "timestamp": "2026-01-01T00:00:00"}),
            json!({"id": "m2", "timestamp": "2026-01-01T00:01:00"}),
        ];
        let new = vec![
            json!({"id": "m2", "timestamp": "2026-01-01T00:01:00"}),
            json!({"id": "m3", "timestamp": "2026-01-01T00:02:00"}),
        ];

        let merged = SessionCas::merge_sessions(current, new);
        assert_eq!(merged.len(), 3);
    }

    #[test]
    fn test_merge_sessions_sorts_by_timestamp() {
        let current = vec![json!({"id": "late", "timestamp": "2026-01-02T00:00:00"})];
        let new = vec![json!({"id": "early", "timestamp": "2026-01-01T00:00:00"})];

        let merged = SessionCas::merge_sessions(current, new);
        assert_eq!(merged[0]["id"], "early");
        assert_eq!(merged[1]["id"], "late");
    }

    #[test]
    fn test_merge_sessions_without_ids_uses_content_hash() {
        let current = vec![json!({"content": "same", "timestamp": "t"})];
        let new = vec![
            json!({"content": "same", "timestamp": "t"}),
            json!({"content": "different", "timestamp": "t"}),
        ];

        let merged = SessionCas::merge_sessions(current, new);
        assert_eq!(merged.len(), 2);
    }

    #[test]
    fn test_session_cas_save_and_reload() {
        let dir = tempdir().unwrap();
        let cas = SessionCas::new(dir.path(), 5).unwrap();

        let records = vec![
            json!({"id": "m1", "role": "user", "content": "hi", "timestamp": "2026-01-01T00:00:00"}),
        ];
        let result = cas.save_session("room:general", records);
        assert!(result.success);

        // Saving again with an overlapping set merges instead of failing.
        let more = vec![
            json!({"id": "m1", "role": "user", "content": "hi", "timestamp": "2026-01-01T00:00:00"}),
            json!({"id": "m2", "role": "assistant", "content": "hello", "timestamp": "2026-01-01T00:00:05"}),
        ];
        let result = cas.save_session("room:general", more);
        assert!(result.success);

        let (records, _) = cas.read("room:general");
        assert_eq!(records.unwrap().len(), 2);
    }
}
