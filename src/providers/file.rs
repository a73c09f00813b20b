//! Filesystem backend: one file per session.
//!
//! Records live at `save_path/<c0>/<c1>/<sid>`, where `c0` and `c1` are the
//! first two characters of the id. The file's modification time is the
//! session's last-touch timestamp. Writes go to a dot-prefixed temp file in
//! the same directory and are renamed into place, so a failed `release`
//! leaves the previous record intact.

use async_trait::async_trait;
use parking_lot::Mutex as SyncMutex;
use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use super::config::FileConfig;
use super::traits::{GcPolicy, SessionProvider, SessionStore};
use crate::session::error::{Result, SessionError};
use crate::session::id::{redact, validate_session_id};
use crate::session::state::SessionValues;

/// One async lock per session id, alive only while some call holds it.
#[derive(Default)]
struct RecordLocks {
    held: SyncMutex<HashMap<String, Weak<Mutex<()>>>>,
}

impl RecordLocks {
    fn handle(&self, sid: &str) -> Arc<Mutex<()>> {
        let mut held = self.held.lock();
        if let Some(lock) = held.get(sid).and_then(Weak::upgrade) {
            return lock;
        }
        held.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(Mutex::new(()));
        held.insert(sid.to_string(), Arc::downgrade(&lock));
        lock
    }
}

#[derive(Default)]
struct TreeListing {
    /// Record path, modification time, and whether it is a temp file.
    files: Vec<(PathBuf, SystemTime, bool)>,
    /// Directories below the save path, parents before children.
    dirs: Vec<PathBuf>,
}

pub struct FileProvider {
    save_path: PathBuf,
    max_lifetime: Duration,
    locks: Arc<RecordLocks>,
}

impl FileProvider {
    pub fn new() -> Self {
        Self {
            save_path: PathBuf::new(),
            max_lifetime: Duration::ZERO,
            locks: Arc::new(RecordLocks::default()),
        }
    }

    pub fn save_path(&self) -> &Path {
        &self.save_path
    }

    fn ensure_initialized(&self) -> Result<()> {
        if self.save_path.as_os_str().is_empty() {
            return Err(SessionError::config("file provider used before init"));
        }
        Ok(())
    }

    fn is_expired(&self, modified: SystemTime) -> bool {
        modified.elapsed().unwrap_or_default() > self.max_lifetime
    }

    fn store(&self, sid: &str, data: &[u8]) -> Result<Arc<dyn SessionStore>> {
        Ok(Arc::new(FileStore {
            values: SessionValues::decode(sid, data)?,
            path: record_path(&self.save_path, sid),
            locks: Arc::clone(&self.locks),
        }))
    }

    async fn walk(&self) -> Result<TreeListing> {
        let mut listing = TreeListing::default();
        let mut pending = vec![self.save_path.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let file_type = entry.file_type().await?;
                if file_type.is_dir() {
                    listing.dirs.push(entry.path());
                    pending.push(entry.path());
                    continue;
                }
                if !file_type.is_file() {
                    continue;
                }
                let metadata = match entry.metadata().await {
                    Ok(m) => m,
                    // Removed by a concurrent destroy or release.
                    Err(e) if e.kind() == ErrorKind::NotFound => continue,
                    Err(e) => return Err(e.into()),
                };
                let is_temp = entry.file_name().to_string_lossy().starts_with('.');
                listing
                    .files
                    .push((entry.path(), metadata.modified()?, is_temp));
            }
        }
        Ok(listing)
    }
}

impl Default for FileProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn record_path(save_path: &Path, sid: &str) -> PathBuf {
    let mut chars = sid.chars();
    let first = chars.next().map(String::from).unwrap_or_default();
    let second = chars.next().map(String::from).unwrap_or_default();
    save_path.join(first).join(second).join(sid)
}

/// Reset a file's modification time to now.
async fn touch(path: &Path) -> Result<()> {
    let file = fs::OpenOptions::new().write(true).open(path).await?;
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now())).await??;
    Ok(())
}

async fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

async fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await?;
    }
    Ok(())
}

// GC may prune an empty directory between `ensure_parent` and the file
// operation, so each of these retries once after recreating it.

async fn create_file(path: &Path) -> Result<fs::File> {
    ensure_parent(path).await?;
    match fs::File::create(path).await {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            ensure_parent(path).await?;
            Ok(fs::File::create(path).await?)
        }
        other => Ok(other?),
    }
}

async fn rename_into(from: &Path, to: &Path) -> std::io::Result<()> {
    if let Some(parent) = to.parent() {
        fs::create_dir_all(parent).await?;
    }
    match fs::rename(from, to).await {
        Err(e) if e.kind() == ErrorKind::NotFound => {
            if let Some(parent) = to.parent() {
                fs::create_dir_all(parent).await?;
            }
            fs::rename(from, to).await
        }
        other => other,
    }
}

#[async_trait]
impl SessionProvider for FileProvider {
    async fn init(&mut self, max_lifetime: u64, config: &str) -> Result<()> {
        let config = FileConfig::parse(config)?;
        let expanded = shellexpand::tilde(&config.save_path).into_owned();
        self.save_path = PathBuf::from(expanded);
        self.max_lifetime = Duration::from_secs(max_lifetime);
        fs::create_dir_all(&self.save_path).await?;
        tracing::debug!(
            provider = "file",
            path = %self.save_path.display(),
            "Session directory ready"
        );
        Ok(())
    }

    async fn exists(&self, sid: &str) -> Result<bool> {
        validate_session_id(sid)?;
        self.ensure_initialized()?;
        match fs::metadata(record_path(&self.save_path, sid)).await {
            Ok(m) => Ok(m.is_file() && !self.is_expired(m.modified()?)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    async fn read(&self, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(sid)?;
        self.ensure_initialized()?;
        let path = record_path(&self.save_path, sid);

        let data = {
            let lock = self.locks.handle(sid);
            let _guard = lock.lock().await;
            match fs::read(&path).await {
                Ok(data) => {
                    touch(&path).await?;
                    data
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    create_file(&path).await?;
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            }
        };

        self.store(sid, &data).map_err(|e| {
            tracing::warn!(provider = "file", sid = %redact(sid), "Unreadable session record: {e}");
            e
        })
    }

    async fn regenerate(&self, old_sid: &str, sid: &str) -> Result<Arc<dyn SessionStore>> {
        validate_session_id(old_sid)?;
        validate_session_id(sid)?;
        self.ensure_initialized()?;
        let old_path = record_path(&self.save_path, old_sid);
        let new_path = record_path(&self.save_path, sid);

        // Both ids are locked in a fixed order so two opposing renames cannot
        // deadlock.
        let (first, second) = if old_sid <= sid {
            (old_sid, sid)
        } else {
            (sid, old_sid)
        };
        let first_lock = self.locks.handle(first);
        let second_lock = (first != second).then(|| self.locks.handle(second));

        let data = {
            let _first = first_lock.lock().await;
            let _second = match &second_lock {
                Some(lock) => Some(lock.lock().await),
                None => None,
            };
            match rename_into(&old_path, &new_path).await {
                Ok(()) => {
                    touch(&new_path).await?;
                    fs::read(&new_path).await?
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {
                    create_file(&new_path).await?;
                    Vec::new()
                }
                Err(e) => return Err(e.into()),
            }
        };

        tracing::debug!(
            provider = "file",
            old = %redact(old_sid),
            sid = %redact(sid),
            "Session regenerated"
        );
        self.store(sid, &data)
    }

    async fn destroy(&self, sid: &str) -> Result<()> {
        validate_session_id(sid)?;
        self.ensure_initialized()?;
        let lock = self.locks.handle(sid);
        let _guard = lock.lock().await;
        remove_if_present(&record_path(&self.save_path, sid)).await
    }

    async fn gc(&self) -> Result<()> {
        self.ensure_initialized()?;
        let listing = self.walk().await?;
        let mut removed = 0usize;
        for (path, modified, _) in listing.files {
            if self.is_expired(modified) {
                remove_if_present(&path).await?;
                removed += 1;
            }
        }

        // Children come after their parents in the listing, so walking it
        // backwards empties leaves first. Non-empty directories fail and stay.
        let mut pruned = 0usize;
        for dir in listing.dirs.iter().rev() {
            if fs::remove_dir(dir).await.is_ok() {
                pruned += 1;
            }
        }

        if removed > 0 || pruned > 0 {
            tracing::debug!(provider = "file", removed, pruned, "Expired sessions removed");
        }
        Ok(())
    }

    async fn count(&self) -> Result<usize> {
        self.ensure_initialized()?;
        Ok(self
            .walk()
            .await?
            .files
            .into_iter()
            .filter(|(_, _, is_temp)| !is_temp)
            .count())
    }

    fn gc_policy(&self) -> GcPolicy {
        GcPolicy::Sweep
    }

    fn name(&self) -> &str {
        "file"
    }
}

struct FileStore {
    values: SessionValues,
    path: PathBuf,
    locks: Arc<RecordLocks>,
}

#[async_trait]
impl SessionStore for FileStore {
    fn values(&self) -> &SessionValues {
        &self.values
    }

    async fn release(&self) -> Result<()> {
        let data = self.values.encode()?;
        let parent = self
            .path
            .parent()
            .ok_or_else(|| SessionError::backend("file", "session path has no parent"))?;
        let temp_path = parent.join(format!(
            ".{}.{}.tmp",
            self.values.sid(),
            uuid::Uuid::new_v4()
        ));

        let lock = self.locks.handle(self.values.sid());
        let _guard = lock.lock().await;

        let written = async {
            let mut file = create_file(&temp_path).await?;
            file.write_all(&data).await?;
            file.sync_all().await?;
            rename_into(&temp_path, &self.path).await?;
            Ok::<(), SessionError>(())
        }
        .await;

        if written.is_err() {
            let _ = fs::remove_file(&temp_path).await;
        }
        written
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::value::SessionValue;
    use tempfile::TempDir;

    async fn provider(tmp: &TempDir, max_lifetime: u64) -> FileProvider {
        let mut p = FileProvider::new();
        p.init(max_lifetime, tmp.path().to_str().unwrap())
            .await
            .unwrap();
        p
    }

    #[tokio::test]
    async fn init_requires_save_path() {
        let mut p = FileProvider::new();
        assert!(matches!(p.init(180, "").await, Err(SessionError::Config(_))));
    }

    #[tokio::test]
    async fn init_accepts_structured_config() {
        let tmp = TempDir::new().unwrap();
        let nested = tmp.path().join("nested");
        let cfg = serde_json::json!({ "save_path": nested }).to_string();
        let mut p = FileProvider::new();
        p.init(180, &cfg).await.unwrap();
        assert_eq!(p.save_path(), nested.as_path());
        assert!(nested.is_dir());
    }

    #[tokio::test]
    async fn read_then_exists() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        assert!(!p.exists("sid_123").await.unwrap());
        p.read("sid_123").await.unwrap();
        assert!(p.exists("sid_123").await.unwrap());
        assert!(tmp.path().join("s").join("i").join("sid_123").is_file());
    }

    #[tokio::test]
    async fn empty_and_short_ids_are_rejected() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        for sid in ["", "1"] {
            assert!(p.exists(sid).await.unwrap_err().is_invalid_session_id());
            assert!(p.read(sid).await.err().unwrap().is_invalid_session_id());
        }
        assert!(p.read("../../etc").await.err().unwrap().is_invalid_session_id());
    }

    #[tokio::test]
    async fn count_reports_every_record() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        for i in 1..=546 {
            p.read(&format!("{i:04}_session")).await.unwrap();
        }
        assert_eq!(p.count().await.unwrap(), 546);
    }

    #[tokio::test]
    async fn regenerate_moves_content_to_new_id() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.read("old_sid").await.unwrap();
        s.set("a".into(), 1.into()).unwrap();
        s.release().await.unwrap();

        let moved = p.regenerate("old_sid", "new_sid").await.unwrap();
        assert!(!p.exists("old_sid").await.unwrap());
        assert!(p.exists("new_sid").await.unwrap());
        assert_eq!(moved.session_id(), "new_sid");
        assert_eq!(moved.get(&"a".into()), Some(SessionValue::Int(1)));
    }

    #[tokio::test]
    async fn regenerate_without_old_record_creates_empty() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.regenerate("missing_sid", "new_sid").await.unwrap();
        assert!(s.snapshot().is_empty());
        assert!(p.exists("new_sid").await.unwrap());
    }

    #[tokio::test]
    async fn destroy_removes_record_and_tolerates_absence() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        p.read("doomed").await.unwrap();
        p.destroy("doomed").await.unwrap();
        assert!(!p.exists("doomed").await.unwrap());
        p.destroy("doomed").await.unwrap();
    }

    #[tokio::test]
    async fn gc_sweeps_expired_records() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 1).await;
        for i in 0..10 {
            p.read(&format!("gc_{i}")).await.unwrap();
        }
        assert_eq!(p.count().await.unwrap(), 10);
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!p.exists("gc_0").await.unwrap());
        p.gc().await.unwrap();
        assert_eq!(p.count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn concurrent_sets_survive_release() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let store = p.read("busy_sid").await.unwrap();

        let tasks: Vec<_> = (0..100i64)
            .map(|i| {
                let store = Arc::clone(&store);
                tokio::spawn(async move { store.set(i.into(), i.into()) })
            })
            .collect();
        for task in tasks {
            task.await.unwrap().unwrap();
        }
        store.release().await.unwrap();

        let fresh = p.read("busy_sid").await.unwrap();
        let snapshot = fresh.snapshot();
        assert_eq!(snapshot.len(), 100);
        assert_eq!(fresh.get(&42i64.into()), Some(SessionValue::Int(42)));
    }

    #[tokio::test]
    async fn values_survive_a_fresh_read() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.read("S1").await.unwrap();
        s.set("user".into(), "alice".into()).unwrap();
        assert_eq!(s.get(&"user".into()), Some(SessionValue::from("alice")));
        s.release().await.unwrap();

        let again = p.read("S1").await.unwrap();
        assert_eq!(again.get(&"user".into()), Some(SessionValue::from("alice")));
    }

    #[tokio::test]
    async fn flushed_record_persists_as_empty() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.read("flushme").await.unwrap();
        s.set("k".into(), "v".into()).unwrap();
        s.release().await.unwrap();
        s.flush().unwrap();
        s.release().await.unwrap();
        assert!(p.read("flushme").await.unwrap().snapshot().is_empty());
    }

    #[tokio::test]
    async fn busy_record_does_not_block_other_sessions() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;

        let held = p.locks.handle("AA_writing");
        let _guard = held.lock().await;

        let other = tokio::time::timeout(Duration::from_millis(500), p.read("BB_other")).await;
        assert!(other.expect("unrelated read should not wait").is_ok());

        let same = tokio::time::timeout(Duration::from_millis(100), p.read("AA_writing")).await;
        assert!(same.is_err());
    }

    #[test]
    fn record_locks_are_dropped_when_idle() {
        let locks = RecordLocks::default();
        let a = locks.handle("first_sid");
        assert!(Arc::ptr_eq(&a, &locks.handle("first_sid")));
        drop(a);
        locks.handle("second_sid");
        assert!(!locks.held.lock().contains_key("first_sid"));
    }

    #[tokio::test]
    async fn gc_prunes_empty_directories() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 1).await;
        p.read("xy_old").await.unwrap();
        p.read("zw_gone").await.unwrap();
        p.destroy("zw_gone").await.unwrap();
        tokio::time::sleep(Duration::from_secs(2)).await;
        p.read("kq_fresh").await.unwrap();

        p.gc().await.unwrap();
        assert!(!tmp.path().join("x").exists());
        assert!(!tmp.path().join("z").exists());
        assert!(tmp.path().join("k").join("q").join("kq_fresh").is_file());
        assert!(tmp.path().is_dir());

        // The pruned branch is recreated on demand.
        p.read("xy_old").await.unwrap();
        assert!(p.exists("xy_old").await.unwrap());
    }

    #[tokio::test]
    async fn infinite_float_survives_release() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        let s = p.read("S1").await.unwrap();
        s.set("ratio".into(), SessionValue::Float(f64::INFINITY)).unwrap();
        s.release().await.unwrap();

        let again = p.read("S1").await.unwrap();
        assert_eq!(again.get(&"ratio".into()), Some(SessionValue::Float(f64::INFINITY)));
    }

    #[tokio::test]
    async fn corrupt_record_is_reported() {
        let tmp = TempDir::new().unwrap();
        let p = provider(&tmp, 180).await;
        p.read("broken").await.unwrap();
        std::fs::write(record_path(tmp.path(), "broken"), b"not a record").unwrap();
        let err = p.read("broken").await.err().unwrap();
        assert!(matches!(err, SessionError::CorruptPayload(_)));
    }
}
