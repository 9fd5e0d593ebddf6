//! Disk Tier - Persisted Warm Cache
//!
//! Durable store of encoded bytes that survives process restarts.
//!
//! # Layout
//!
//! One directory, one file per entry. The file name is the hex cache key and
//! the contents are exactly the bytes received from origin. The file's mtime
//! is the last-write signal used by age- and size-based trimming.
//!
//! # Design
//!
//! - Writes go to `<key>.<uuid>.tmp` and are renamed over the final name, so
//!   readers never observe a partial entry and concurrent writers to the same
//!   key resolve to last-write-wins
//! - Every filesystem call runs on tokio's blocking pool
//! - Fail-soft: I/O errors are logged and reported as a miss or a no-op,
//!   never returned to the caller
//! - Renames, deletions and trims hold one commit lock, so each accounts for
//!   exactly the file it replaced or removed

use std::fs::{self, File};
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use bytes::Bytes;
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use super::key::CacheKey;
use super::policy::RetentionPolicy;

/// Suffix of in-progress writes
pub const TEMP_SUFFIX: &str = ".tmp";

/// Outcome of a trim pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TrimReport {
    /// Entries deleted
    pub removed: usize,
    /// Bytes released
    pub freed_bytes: u64,
    /// Bytes still resident after the pass
    pub remaining_bytes: u64,
}

impl TrimReport {
    /// Fold a later pass into this report
    pub fn merge(self, later: TrimReport) -> TrimReport {
        TrimReport {
            removed: self.removed + later.removed,
            freed_bytes: self.freed_bytes + later.freed_bytes,
            remaining_bytes: later.remaining_bytes,
        }
    }
}

/// A resident entry as seen by a directory scan
#[derive(Debug, Clone)]
struct DiskEntry {
    key: CacheKey,
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

/// Resident byte accounting for one cache directory
#[derive(Debug)]
struct Resident {
    bytes: AtomicU64,
    /// Held while the set of files changes
    commit: Mutex<()>,
}

impl Resident {
    fn new(bytes: u64) -> Self {
        Self {
            bytes: AtomicU64::new(bytes),
            commit: Mutex::new(()),
        }
    }

    fn get(&self) -> u64 {
        self.bytes.load(Ordering::Relaxed)
    }

    fn set(&self, n: u64) {
        self.bytes.store(n, Ordering::Relaxed);
    }

    fn add(&self, n: u64) {
        self.bytes.fetch_add(n, Ordering::Relaxed);
    }

    fn sub(&self, n: u64) {
        let _ = self
            .bytes
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(n))
            });
    }
}

/// Disk tier
pub struct DiskTier {
    /// Cache directory
    dir: PathBuf,
    /// Resident bytes, kept current by writes and re-synced by scans
    resident: Arc<Resident>,
}

impl DiskTier {
    /// Open (creating if needed) the cache directory.
    ///
    /// Leftover temp files from interrupted writes are swept. Failures are
    /// logged; the tier still opens and behaves as empty.
    pub fn open(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        if let Err(e) = fs::create_dir_all(&dir) {
            warn!("Cannot create disk cache directory {}: {}", dir.display(), e);
        }
        sweep_temp_files(&dir);

        let resident = scan(&dir).iter().map(|e| e.size).sum();
        debug!(
            "Opened disk tier at {} ({} bytes resident)",
            dir.display(),
            resident
        );

        Self {
            dir,
            resident: Arc::new(Resident::new(resident)),
        }
    }

    /// Cache directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File path of an entry
    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    /// Read an entry's bytes.
    ///
    /// An entry that exists but cannot be read is deleted and reported absent.
    pub async fn load(&self, key: &CacheKey) -> Option<Bytes> {
        let key = key.clone();
        self.blocking("load", move |dir, resident| {
            load_entry(dir, &key, resident)
        })
        .await
        .flatten()
    }

    /// Persist an entry. Returns `false` if the write failed for any reason.
    pub async fn store(&self, key: &CacheKey, bytes: Bytes) -> bool {
        let key = key.clone();
        self.blocking("store", move |dir, resident| {
            store_entry(dir, &key, &bytes, resident)
        })
        .await
        .unwrap_or(false)
    }

    /// Check if an entry exists
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let key = key.clone();
        self.blocking("contains", move |dir, _| dir.join(key.as_str()).is_file())
            .await
            .unwrap_or(false)
    }

    /// Delete an entry. Returns `true` if a file was removed.
    pub async fn remove(&self, key: &CacheKey) -> bool {
        let key = key.clone();
        self.blocking("remove", move |dir, resident| {
            let _commit = resident.commit.lock();
            remove_file_accounted(&dir.join(key.as_str()), resident).is_some()
        })
        .await
        .unwrap_or(false)
    }

    /// Delete every file in the cache directory. Returns the number removed.
    pub async fn clear_all(&self) -> usize {
        self.blocking("clear_all", |dir, resident| {
            let _commit = resident.commit.lock();
            let removed = clear_dir(dir);
            resident.set(total_size(&scan(dir)));
            removed
        })
        .await
        .unwrap_or(0)
    }

    /// Delete entries last modified more than `max_age` ago
    pub async fn trim_by_age(&self, max_age: Duration) -> TrimReport {
        self.blocking("trim_by_age", move |dir, resident| {
            trim_by_age(dir, max_age, resident)
        })
        .await
        .unwrap_or_default()
    }

    /// Delete oldest-modified entries until at most `max_total_bytes` remain
    pub async fn trim_by_size(&self, max_total_bytes: u64) -> TrimReport {
        self.blocking("trim_by_size", move |dir, resident| {
            trim_by_size(dir, max_total_bytes, resident)
        })
        .await
        .unwrap_or_default()
    }

    /// Age trim followed by size trim
    pub async fn trim(&self, policy: &RetentionPolicy) -> TrimReport {
        let by_age = self.trim_by_age(policy.max_age).await;
        let by_size = self.trim_by_size(policy.max_total_bytes).await;
        by_age.merge(by_size)
    }

    /// Resident bytes as last accounted
    pub fn resident_bytes(&self) -> u64 {
        self.resident.get()
    }

    /// Number of resident entries (scans the directory)
    pub async fn entry_count(&self) -> usize {
        self.blocking("entry_count", |dir, _| scan(dir).len())
            .await
            .unwrap_or(0)
    }

    /// Run a filesystem operation on the blocking pool
    async fn blocking<T, F>(&self, op: &'static str, f: F) -> Option<T>
    where
        F: FnOnce(&Path, &Resident) -> T + Send + 'static,
        T: Send + 'static,
    {
        let dir = self.dir.clone();
        let resident = Arc::clone(&self.resident);

        match tokio::task::spawn_blocking(move || f(&dir, &resident)).await {
            Ok(value) => Some(value),
            Err(e) => {
                warn!("Disk tier {} task failed: {}", op, e);
                None
            }
        }
    }
}

impl std::fmt::Debug for DiskTier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DiskTier")
            .field("dir", &self.dir)
            .field("resident_bytes", &self.resident_bytes())
            .finish()
    }
}

// =============================================================================
// Blocking Operations
// =============================================================================

fn load_entry(dir: &Path, key: &CacheKey, resident: &Resident) -> Option<Bytes> {
    let path = dir.join(key.as_str());
    match fs::read(&path) {
        Ok(data) => Some(Bytes::from(data)),
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Unreadable disk cache entry {}: {}", key.short(), e);
            let _commit = resident.commit.lock();
            remove_file_accounted(&path, resident);
            None
        }
    }
}

fn store_entry(dir: &Path, key: &CacheKey, bytes: &[u8], resident: &Resident) -> bool {
    if let Err(e) = fs::create_dir_all(dir) {
        warn!("Disk cache store skipped for {}: {}", key.short(), e);
        return false;
    }

    let target = dir.join(key.as_str());
    let temp = dir.join(format!(
        "{}.{}{}",
        key.as_str(),
        Uuid::new_v4().simple(),
        TEMP_SUFFIX
    ));

    match write_atomically(&temp, &target, bytes, resident) {
        Ok(()) => {
            debug!("Stored {} bytes for {}", bytes.len(), key.short());
            true
        }
        Err(e) => {
            let _ = fs::remove_file(&temp);
            warn!("Disk cache store failed for {}: {}", key.short(), e);
            false
        }
    }
}

/// Write `bytes` to `temp`, then rename over `target`, swapping the replaced
/// file's size for the new one in `resident`.
fn write_atomically(
    temp: &Path,
    target: &Path,
    bytes: &[u8],
    resident: &Resident,
) -> io::Result<()> {
    let mut file = File::create(temp)?;
    file.write_all(bytes)?;
    file.sync_data()?;
    drop(file);

    let _commit = resident.commit.lock();
    let replaced = fs::metadata(target).map(|m| m.len()).unwrap_or(0);
    fs::rename(temp, target)?;
    resident.add(bytes.len() as u64);
    resident.sub(replaced);
    Ok(())
}

/// Remove a file, updating the resident counter. Returns the freed size.
/// Callers hold the commit lock.
fn remove_file_accounted(path: &Path, resident: &Resident) -> Option<u64> {
    let size = fs::metadata(path).map(|m| m.len()).unwrap_or(0);
    match fs::remove_file(path) {
        Ok(()) => {
            resident.sub(size);
            Some(size)
        }
        Err(e) if e.kind() == ErrorKind::NotFound => None,
        Err(e) => {
            warn!("Failed to delete disk cache file {}: {}", path.display(), e);
            None
        }
    }
}

fn trim_by_age(dir: &Path, max_age: Duration, resident: &Resident) -> TrimReport {
    let _commit = resident.commit.lock();
    let policy_cutoff = SystemTime::now().checked_sub(max_age);
    let mut report = TrimReport::default();
    let mut remaining = 0;

    for entry in scan(dir) {
        let expired = policy_cutoff.is_some_and(|cutoff| entry.modified < cutoff);
        if expired {
            if let Some(freed) = remove_file_accounted(&entry.path, resident) {
                report.removed += 1;
                report.freed_bytes += freed;
                continue;
            }
        }
        remaining += entry.size;
    }

    resident.set(remaining);
    report.remaining_bytes = remaining;
    if report.removed > 0 {
        debug!(
            "Age trim removed {} entries ({} bytes)",
            report.removed, report.freed_bytes
        );
    }
    report
}

fn trim_by_size(dir: &Path, max_total_bytes: u64, resident: &Resident) -> TrimReport {
    let _commit = resident.commit.lock();
    let mut entries = scan(dir);
    let mut total = total_size(&entries);
    let mut report = TrimReport::default();

    if total > max_total_bytes {
        // Oldest first; name breaks mtime ties deterministically
        entries.sort_by(|a, b| a.modified.cmp(&b.modified).then_with(|| a.key.cmp(&b.key)));

        for entry in entries {
            if total <= max_total_bytes {
                break;
            }
            if let Some(freed) = remove_file_accounted(&entry.path, resident) {
                total = total.saturating_sub(entry.size);
                report.removed += 1;
                report.freed_bytes += freed;
            }
        }
        debug!(
            "Size trim removed {} entries ({} bytes)",
            report.removed, report.freed_bytes
        );
    }

    resident.set(total);
    report.remaining_bytes = total;
    report
}

fn clear_dir(dir: &Path) -> usize {
    let read = match fs::read_dir(dir) {
        Ok(read) => read,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                warn!("Cannot list disk cache directory {}: {}", dir.display(), e);
            }
            return 0;
        }
    };

    let mut removed = 0;
    for item in read.flatten() {
        let path = item.path();
        if !path.is_file() {
            continue;
        }
        match fs::remove_file(&path) {
            Ok(()) => removed += 1,
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
    }
    removed
}

fn sweep_temp_files(dir: &Path) {
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    for item in read.flatten() {
        let name = item.file_name();
        if name.to_string_lossy().ends_with(TEMP_SUFFIX) {
            if let Err(e) = fs::remove_file(item.path()) {
                debug!("Could not sweep temp file {:?}: {}", name, e);
            }
        }
    }
}

/// List resident entries; files that are not named by a key are ignored
fn scan(dir: &Path) -> Vec<DiskEntry> {
    let Ok(read) = fs::read_dir(dir) else {
        return Vec::new();
    };

    read.flatten()
        .filter_map(|item| {
            let key = CacheKey::parse(item.file_name().to_str()?)?;
            let meta = item.metadata().ok().filter(|m| m.is_file())?;
            Some(DiskEntry {
                key,
                path: item.path(),
                size: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            })
        })
        .collect()
}

fn total_size(entries: &[DiskEntry]) -> u64 {
    entries.iter().map(|e| e.size).sum()
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn key(name: &str) -> CacheKey {
        CacheKey::digest(name)
    }

    fn age_file(path: &Path, age: Duration) {
        let file = File::options().write(true).open(path).unwrap();
        file.set_modified(SystemTime::now() - age).unwrap();
    }

    #[tokio::test]
    async fn test_disk_tier_store_load() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        assert!(tier.store(&key("a"), Bytes::from_static(b"encoded")).await);
        assert_eq!(tier.load(&key("a")).await.unwrap().as_ref(), b"encoded");
        assert_eq!(tier.resident_bytes(), 7);
    }

    #[tokio::test]
    async fn test_disk_layout_is_raw_bytes_named_by_key() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        tier.store(&key("a"), Bytes::from_static(b"\x89PNG raw")).await;

        let path = tmp.path().join(key("a").as_str());
        assert_eq!(fs::read(path).unwrap(), b"\x89PNG raw");
        assert_eq!(fs::read_dir(tmp.path()).unwrap().count(), 1);
    }

    #[tokio::test]
    async fn test_disk_tier_miss() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());
        assert!(tier.load(&key("missing")).await.is_none());
        assert!(!tier.contains(&key("missing")).await);
    }

    #[tokio::test]
    async fn test_disk_tier_overwrite() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        tier.store(&key("a"), Bytes::from(vec![1u8; 100])).await;
        tier.store(&key("a"), Bytes::from(vec![2u8; 40])).await;

        assert_eq!(tier.load(&key("a")).await.unwrap(), Bytes::from(vec![2u8; 40]));
        assert_eq!(tier.resident_bytes(), 40);
        assert_eq!(tier.entry_count().await, 1);
    }

    #[tokio::test]
    async fn test_disk_tier_remove() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        tier.store(&key("a"), Bytes::from_static(b"data")).await;
        assert!(tier.contains(&key("a")).await);

        assert!(tier.remove(&key("a")).await);
        assert!(!tier.contains(&key("a")).await);
        assert_eq!(tier.resident_bytes(), 0);

        // Remove nonexistent
        assert!(!tier.remove(&key("a")).await);
    }

    #[tokio::test]
    async fn test_clear_all_is_idempotent() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        for i in 0..5 {
            let name = format!("obj-{}", i);
            tier.store(&key(&name), Bytes::from(vec![0u8; 10])).await;
        }

        assert_eq!(tier.clear_all().await, 5);
        assert_eq!(tier.clear_all().await, 0);
        assert_eq!(tier.resident_bytes(), 0);
        assert!(!tier.contains(&key("obj-0")).await);
    }

    #[tokio::test]
    async fn test_trim_by_age() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        tier.store(&key("old"), Bytes::from(vec![0u8; 10])).await;
        tier.store(&key("new"), Bytes::from(vec![0u8; 20])).await;
        age_file(&tier.path_for(&key("old")), Duration::from_secs(2 * 3600));

        let report = tier.trim_by_age(Duration::from_secs(3600)).await;

        assert_eq!(report.removed, 1);
        assert_eq!(report.freed_bytes, 10);
        assert_eq!(report.remaining_bytes, 20);
        assert!(!tier.contains(&key("old")).await);
        assert!(tier.contains(&key("new")).await);
        assert_eq!(tier.resident_bytes(), 20);
    }

    #[tokio::test]
    async fn test_trim_by_size_removes_oldest_first() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        for (name, age_secs) in [("a", 300), ("b", 200), ("c", 100)] {
            tier.store(&key(name), Bytes::from(vec![0u8; 10])).await;
            age_file(&tier.path_for(&key(name)), Duration::from_secs(age_secs));
        }

        let report = tier.trim_by_size(15).await;

        assert_eq!(report.removed, 2);
        assert_eq!(report.remaining_bytes, 10);
        assert!(!tier.contains(&key("a")).await);
        assert!(!tier.contains(&key("b")).await);
        assert!(tier.contains(&key("c")).await);
    }

    #[tokio::test]
    async fn test_trim_by_size_under_budget_is_noop() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());
        tier.store(&key("a"), Bytes::from(vec![0u8; 10])).await;

        let report = tier.trim_by_size(1024).await;
        assert_eq!(report.removed, 0);
        assert_eq!(report.remaining_bytes, 10);
    }

    #[tokio::test]
    async fn test_trim_with_policy() {
        let tmp = TempDir::new().unwrap();
        let tier = DiskTier::open(tmp.path());

        tier.store(&key("stale"), Bytes::from(vec![0u8; 10])).await;
        tier.store(&key("older"), Bytes::from(vec![0u8; 10])).await;
        tier.store(&key("newest"), Bytes::from(vec![0u8; 10])).await;
        age_file(&tier.path_for(&key("stale")), Duration::from_secs(10_000));
        age_file(&tier.path_for(&key("older")), Duration::from_secs(100));

        let policy = RetentionPolicy {
            max_age: Duration::from_secs(1000),
            max_total_bytes: 10,
        };
        let report = tier.trim(&policy).await;

        assert_eq!(report.removed, 2);
        assert_eq!(report.freed_bytes, 20);
        assert_eq!(report.remaining_bytes, 10);
        assert!(tier.contains(&key("newest")).await);
    }

    #[tokio::test]
    async fn test_unwritable_directory_is_fail_soft() {
        let tmp = TempDir::new().unwrap();
        let blocker = tmp.path().join("not-a-directory");
        fs::write(&blocker, b"x").unwrap();

        let tier = DiskTier::open(blocker.join("cache"));

        assert!(!tier.store(&key("a"), Bytes::from_static(b"data")).await);
        assert!(tier.load(&key("a")).await.is_none());
        assert!(!tier.contains(&key("a")).await);
        assert_eq!(tier.clear_all().await, 0);
        assert_eq!(tier.trim_by_size(0).await, TrimReport::default());
    }

    #[tokio::test]
    async fn test_directory_recreated_after_wholesale_delete() {
        let tmp = TempDir::new().unwrap();
        let dir = tmp.path().join("images");
        let tier = DiskTier::open(&dir);

        tier.store(&key("a"), Bytes::from_static(b"one")).await;
        fs::remove_dir_all(&dir).unwrap();
        assert!(tier.load(&key("a")).await.is_none());

        assert!(tier.store(&key("b"), Bytes::from_static(b"two")).await);
        assert!(tier.contains(&key("b")).await);
    }

    #[tokio::test]
    async fn test_temp_files_swept_and_ignored() {
        let tmp = TempDir::new().unwrap();
        let stale = tmp.path().join(format!("{}.deadbeef{}", key("a"), TEMP_SUFFIX));
        fs::write(&stale, b"partial").unwrap();
        fs::write(tmp.path().join("README"), b"not an entry").unwrap();

        let tier = DiskTier::open(tmp.path());

        assert!(!stale.exists());
        assert!(tier.load(&key("a")).await.is_none());
        assert_eq!(tier.resident_bytes(), 0);
        assert_eq!(tier.entry_count().await, 0);
    }

    #[tokio::test]
    async fn test_reopen_sees_previous_entries() {
        let tmp = TempDir::new().unwrap();
        {
            let tier = DiskTier::open(tmp.path());
            tier.store(&key("persisted"), Bytes::from(vec![9u8; 32])).await;
        }

        let reopened = DiskTier::open(tmp.path());
        assert_eq!(reopened.resident_bytes(), 32);
        assert_eq!(
            reopened.load(&key("persisted")).await.unwrap(),
            Bytes::from(vec![9u8; 32])
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_writers_same_key() {
        let tmp = TempDir::new().unwrap();
        let tier = Arc::new(DiskTier::open(tmp.path()));

        let handles: Vec<_> = (0..16u8)
            .map(|i| {
                let tier = Arc::clone(&tier);
                tokio::spawn(async move {
                    tier.store(&key("contended"), Bytes::from(vec![i; 64])).await
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.await.unwrap());
        }

        let data = tier.load(&key("contended")).await.unwrap();
        assert_eq!(data.len(), 64);
        assert!(data.iter().all(|b| *b == data[0]));
        assert_eq!(tier.entry_count().await, 1);
        assert_eq!(tier.resident_bytes(), 64);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_store_and_remove_keep_accounting() {
        let tmp = TempDir::new().unwrap();
        let tier = Arc::new(DiskTier::open(tmp.path()));

        let handles: Vec<_> = (0..32usize)
            .map(|i| {
                let tier = Arc::clone(&tier);
                tokio::spawn(async move {
                    let k = key(&format!("obj-{}", i % 4));
                    if i % 3 == 0 {
                        tier.remove(&k).await;
                    } else {
                        tier.store(&k, Bytes::from(vec![0u8; 10 + i])).await;
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.await.unwrap();
        }

        let on_disk: u64 = fs::read_dir(tmp.path())
            .unwrap()
            .flatten()
            .map(|e| e.metadata().unwrap().len())
            .sum();
        assert_eq!(tier.resident_bytes(), on_disk);
    }

    #[test]
    fn test_trim_report_merge() {
        let a = TrimReport {
            removed: 1,
            freed_bytes: 10,
            remaining_bytes: 90,
        };
        let b = TrimReport {
            removed: 2,
            freed_bytes: 20,
            remaining_bytes: 70,
        };
        assert_eq!(
            a.merge(b),
            TrimReport {
                removed: 3,
                freed_bytes: 30,
                remaining_bytes: 70
            }
        );
    }
}
