//! Durable set of user-dismissed events.
//!
//! Persisted as a JSON object mapping event id → ISO-8601 UTC expiry:
//!
//! ```json
//! { "standup::20260302T090000Z": "2026-03-03T08:41:12Z" }
//! ```
//!
//! Every mutation happens under one lock and rewrites the file atomically
//! (sibling temp file, fsync, rename). If the write fails, the in-memory
//! change is rolled back before the error is returned, so memory and disk
//! never disagree. Calls block on file I/O; async callers should go through
//! `spawn_blocking` (see [`crate::service::AgendaService`]).

use std::collections::{BTreeMap, HashMap};
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use parking_lot::Mutex;

use crate::error::StoreError;

pub const DEFAULT_SKIP_TTL_HOURS: i64 = 24;

pub struct SkippedStore {
    path: PathBuf,
    ttl: Duration,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SkippedStore {
    /// Open the store at `path`, loading whatever can be salvaged.
    ///
    /// A missing or unreadable file yields an empty store; individual
    /// malformed entries are dropped.
    pub fn open(path: impl Into<PathBuf>, ttl: Duration) -> Self {
        let path = path.into();
        let entries = load(&path);
        tracing::info!(path = %path.display(), count = entries.len(), "loaded skip store");
        Self {
            path,
            ttl,
            entries: Mutex::new(entries),
        }
    }

    pub fn with_default_ttl(path: impl Into<PathBuf>) -> Self {
        Self::open(path, Duration::hours(DEFAULT_SKIP_TTL_HOURS))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Skip `id` until now + TTL. Returns the expiry as an ISO-8601 string.
    pub fn add_skip(&self, id: &str) -> Result<String, StoreError> {
        self.add_skip_at(id, Utc::now())
    }

    pub fn add_skip_at(&self, id: &str, now: DateTime<Utc>) -> Result<String, StoreError> {
        let mut entries = self.entries.lock();
        let previous = entries.clone();

        entries.retain(|_, expiry| *expiry > now);
        let expiry = now + self.ttl;
        entries.insert(id.to_string(), expiry);

        if let Err(e) = persist(&self.path, &entries) {
            *entries = previous;
            tracing::error!(id, error = %e, "failed to persist skip, rolled back");
            return Err(e);
        }
        tracing::info!(id, expiry = %iso(expiry), "event skipped");
        Ok(iso(expiry))
    }

    /// Whether `id` is currently skipped. Never fails; an expired entry is
    /// dropped from memory on the spot and from disk on the next mutation.
    pub fn is_skipped(&self, id: &str) -> bool {
        self.is_skipped_at(id, Utc::now())
    }

    pub fn is_skipped_at(&self, id: &str, now: DateTime<Utc>) -> bool {
        let mut entries = self.entries.lock();
        match entries.get(id) {
            Some(expiry) if *expiry > now => true,
            Some(_) => {
                entries.remove(id);
                false
            }
            None => false,
        }
    }

    /// Remove every entry. Returns how many were removed.
    pub fn clear_all(&self) -> Result<usize, StoreError> {
        let mut entries = self.entries.lock();
        let previous = std::mem::take(&mut *entries);

        if let Err(e) = persist(&self.path, &entries) {
            *entries = previous;
            tracing::error!(error = %e, "failed to clear skip store, rolled back");
            return Err(e);
        }
        tracing::info!(removed = previous.len(), "skip store cleared");
        Ok(previous.len())
    }

    /// Unexpired entries as id → ISO-8601 expiry.
    pub fn active_list(&self) -> BTreeMap<String, String> {
        self.active_list_at(Utc::now())
    }

    pub fn active_list_at(&self, now: DateTime<Utc>) -> BTreeMap<String, String> {
        self.entries
            .lock()
            .iter()
            .filter(|(_, expiry)| **expiry > now)
            .map(|(id, expiry)| (id.clone(), iso(*expiry)))
            .collect()
    }
}

fn iso(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn load(path: &Path) -> HashMap<String, DateTime<Utc>> {
    let data = match fs::read_to_string(path) {
        Ok(data) => data,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return HashMap::new(),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not read skip store, starting empty");
            return HashMap::new();
        }
    };

    let raw: serde_json::Map<String, serde_json::Value> = match serde_json::from_str(&data) {
        Ok(map) => map,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "skip store is not a JSON object, starting empty");
            return HashMap::new();
        }
    };

    let total = raw.len();
    let entries: HashMap<String, DateTime<Utc>> = raw
        .into_iter()
        .filter_map(|(id, value)| {
            let expiry = DateTime::parse_from_rfc3339(value.as_str()?).ok()?;
            Some((id, expiry.with_timezone(&Utc)))
        })
        .collect();
    if entries.len() < total {
        tracing::debug!(dropped = total - entries.len(), "dropped malformed skip entries");
    }
    entries
}

fn persist(path: &Path, entries: &HashMap<String, DateTime<Utc>>) -> Result<(), StoreError> {
    let doc: BTreeMap<&str, String> = entries
        .iter()
        .map(|(id, expiry)| (id.as_str(), iso(*expiry)))
        .collect();
    let json = serde_json::to_vec_pretty(&doc)?;

    let io_err = |source| StoreError::Io {
        path: path.to_path_buf(),
        source,
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(io_err)?;
    }

    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);

    let written = File::create(&tmp).and_then(|mut f| {
        f.write_all(&json)?;
        f.sync_all()
    });
    if let Err(e) = written.and_then(|()| fs::rename(&tmp, path)) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(e));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use chrono::TimeZone;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 8, 0, 0).unwrap()
    }

    fn store(dir: &tempfile::TempDir) -> SkippedStore {
        SkippedStore::with_default_ttl(dir.path().join("skipped.json"))
    }

    #[test]
    fn test_skip_expires_after_ttl() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        let expiry = s.add_skip_at("x", t0()).unwrap();
        assert_eq!(expiry, "2026-03-02T08:00:00Z");
        assert!(s.is_skipped_at("x", t0()));
        assert!(s.is_skipped_at("x", t0() + Duration::hours(23)));
        assert!(!s.is_skipped_at("x", t0() + Duration::hours(25)));
        assert!(s.active_list_at(t0() + Duration::hours(25)).is_empty());
    }

    #[test]
    fn test_persisted_format_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skipped.json");
        SkippedStore::with_default_ttl(&path)
            .add_skip_at("standup", t0())
            .unwrap();

        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(json["standup"], "2026-03-02T08:00:00Z");

        let reopened = SkippedStore::with_default_ttl(&path);
        assert!(reopened.is_skipped_at("standup", t0() + Duration::hours(1)));
        assert!(!dir.path().join("skipped.json.tmp").exists());
    }

    #[test]
    fn test_malformed_entries_dropped_on_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skipped.json");
        fs::write(
            &path,
            r#"{"good": "2026-03-02T08:00:00Z", "number": 42, "text": "soon"}"#,
        )
        .unwrap();
        let s = SkippedStore::with_default_ttl(&path);
        let active = s.active_list_at(t0());
        assert_eq!(active.len(), 1);
        assert!(active.contains_key("good"));
    }

    #[test]
    fn test_corrupt_file_starts_empty() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("skipped.json");
        fs::write(&path, "[1, 2, 3").unwrap();
        let s = SkippedStore::with_default_ttl(&path);
        assert!(s.active_list_at(t0()).is_empty());
        s.add_skip_at("x", t0()).unwrap();
        assert!(s.is_skipped_at("x", t0()));
    }

    #[test]
    fn test_expired_entries_purged_on_next_write() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.add_skip_at("old", t0()).unwrap();
        s.add_skip_at("new", t0() + Duration::hours(30)).unwrap();
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(s.path()).unwrap()).unwrap();
        assert!(json.get("old").is_none());
        assert!(json.get("new").is_some());
    }

    #[test]
    fn test_lazy_read_does_not_rewrite_disk() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.add_skip_at("x", t0()).unwrap();
        assert!(!s.is_skipped_at("x", t0() + Duration::hours(25)));
        let json: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(s.path()).unwrap()).unwrap();
        assert!(json.get("x").is_some());
    }

    #[test]
    fn test_clear_all_reports_count() {
        let dir = tempfile::tempdir().unwrap();
        let s = store(&dir);
        s.add_skip_at("a", t0()).unwrap();
        s.add_skip_at("b", t0()).unwrap();
        assert_eq!(s.clear_all().unwrap(), 2);
        assert!(!s.is_skipped_at("a", t0()));
        assert_eq!(fs::read_to_string(s.path()).unwrap().trim(), "{}");
    }

    #[test]
    fn test_write_failure_rolls_back_memory() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        fs::write(&blocker, "").unwrap();
        let s = SkippedStore::with_default_ttl(blocker.join("skipped.json"));

        let err = s.add_skip_at("x", t0()).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));
        assert!(!s.is_skipped_at("x", t0()));
        assert!(s.active_list_at(t0()).is_empty());
    }

    #[test]
    fn test_concurrent_skips_of_same_key() {
        let dir = tempfile::tempdir().unwrap();
        let s = Arc::new(store(&dir));
        let handles: Vec<_> = (0..25)
            .map(|_| {
                let s = Arc::clone(&s);
                std::thread::spawn(move || s.add_skip_at("same-key", t0()).unwrap())
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        assert_eq!(s.active_list_at(t0()).len(), 1);
        let json: serde_json::Map<String, serde_json::Value> =
            serde_json::from_str(&fs::read_to_string(s.path()).unwrap()).unwrap();
        assert_eq!(json.len(), 1);
        assert!(json.contains_key("same-key"));
    }
}
