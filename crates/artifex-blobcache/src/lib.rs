// SPDX-License-Identifier: BUSL-1.1
//! # artifex-blobcache: On-disk LRU blob store
//!
//! A flat directory of blobs addressed by string key. Each key is stored
//! under the hex SHA-256 of the key, so arbitrary blob names are safe as
//! keys. Writes go to a temporary file in the same directory and are
//! renamed into place, so readers never see a partial blob.
//!
//! ## Eviction
//!
//! Reads touch the blob's modification time. Capacity is not checked on
//! every write: after every `check_every` bytes written the cache sums the
//! directory and, if it exceeds `max_bytes`, deletes blobs oldest-mtime
//! first until it fits.

pub mod error;

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use filetime::FileTime;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

pub use error::BlobCacheError;

pub const DEFAULT_MAX_BYTES: u64 = 10 * 1024 * 1024 * 1024;
pub const DEFAULT_CHECK_EVERY: u64 = 64 * 1024 * 1024;

#[derive(Debug, Clone)]
pub struct BlobCacheConfig {
    pub dir: PathBuf,
    pub max_bytes: u64,
    /// Bytes written between capacity checks.
    pub check_every: u64,
}

impl BlobCacheConfig {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            max_bytes: DEFAULT_MAX_BYTES,
            check_every: DEFAULT_CHECK_EVERY,
        }
    }
}

/// Outcome of one eviction pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EvictionReport {
    pub before_bytes: u64,
    pub after_bytes: u64,
    pub evicted: usize,
}

struct Inner {
    config: BlobCacheConfig,
    written_since_check: AtomicU64,
    evicting: Mutex<()>,
}

/// Cheaply cloneable; clones share the same directory and counters.
#[derive(Clone)]
pub struct BlobCache {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for BlobCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlobCache")
            .field("dir", &self.inner.config.dir)
            .field("max_bytes", &self.inner.config.max_bytes)
            .finish()
    }
}

impl BlobCache {
    /// Open (creating if needed) the cache directory.
    pub fn open(config: BlobCacheConfig) -> Result<Self, BlobCacheError> {
        fs::create_dir_all(&config.dir)?;
        Ok(Self {
            inner: Arc::new(Inner {
                config,
                written_since_check: AtomicU64::new(0),
                evicting: Mutex::new(()),
            }),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.inner.config.dir
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, BlobCacheError> {
        if key.is_empty() {
            return Err(BlobCacheError::InvalidKey(key.to_string()));
        }
        let name = hex::encode(Sha256::digest(key.as_bytes()));
        Ok(self.inner.config.dir.join(name))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.path_for(key).map(|p| p.is_file()).unwrap_or(false)
    }

    /// Read a whole blob.
    pub fn get(&self, key: &str) -> Result<Vec<u8>, BlobCacheError> {
        let mut file = self.get_reader(key)?;
        let mut buf = Vec::new();
        file.read_to_end(&mut buf)?;
        Ok(buf)
    }

    /// Open a blob for streaming, touching its modification time. A blob
    /// whose mtime cannot be set is still served.
    pub fn get_reader(&self, key: &str) -> Result<fs::File, BlobCacheError> {
        let path = self.path_for(key)?;
        let file = match fs::File::open(&path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(BlobCacheError::NotFound(key.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if let Err(e) = filetime::set_file_mtime(&path, FileTime::now()) {
            tracing::warn!(key, error = %e, "failed to touch blob mtime");
        }
        Ok(file)
    }

    pub fn put(&self, key: &str, data: &[u8]) -> Result<(), BlobCacheError> {
        let mut writer = self.put_writer(key)?;
        writer.write_all(data)?;
        writer.commit()
    }

    /// Start a streaming write. Nothing is visible under `key` until
    /// [`BlobWriter::commit`]; dropping the writer discards the data.
    pub fn put_writer(&self, key: &str) -> Result<BlobWriter, BlobCacheError> {
        let path = self.path_for(key)?;
        let tmp = NamedTempFile::new_in(&self.inner.config.dir)?;
        Ok(BlobWriter {
            cache: self.clone(),
            tmp,
            path,
            written: 0,
        })
    }

    pub fn remove(&self, key: &str) -> Result<bool, BlobCacheError> {
        let path = self.path_for(key)?;
        match fs::remove_file(path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    /// Total bytes of committed blobs on disk.
    pub fn size_on_disk(&self) -> Result<u64, BlobCacheError> {
        Ok(self.entries()?.iter().map(|e| e.len).sum())
    }

    fn record_write(&self, bytes: u64) {
        let total = self.inner.written_since_check.fetch_add(bytes, Ordering::AcqRel) + bytes;
        if total < self.inner.config.check_every {
            return;
        }
        self.inner.written_since_check.store(0, Ordering::Release);
        if let Err(e) = self.evict() {
            tracing::warn!(dir = %self.dir().display(), error = %e, "blob cache eviction failed");
        }
    }

    fn entries(&self) -> Result<Vec<Entry>, BlobCacheError> {
        let mut entries = Vec::new();
        for entry in fs::read_dir(&self.inner.config.dir)? {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    tracing::debug!(error = %e, "failed to read blob cache directory entry");
                    continue;
                }
            };
            // In-flight temp files.
            if entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                Ok(_) => continue,
                // Raced with removal.
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            entries.push(Entry {
                path: entry.path(),
                len: meta.len(),
                modified: meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
            });
        }
        Ok(entries)
    }

    /// Delete oldest blobs until the cache fits in `max_bytes`.
    pub fn evict(&self) -> Result<EvictionReport, BlobCacheError> {
        let _guard = self.inner.evicting.lock();
        let mut entries = self.entries()?;
        let before_bytes: u64 = entries.iter().map(|e| e.len).sum();
        let mut report = EvictionReport {
            before_bytes,
            after_bytes: before_bytes,
            evicted: 0,
        };
        if before_bytes <= self.inner.config.max_bytes {
            return Ok(report);
        }

        entries.sort_by_key(|e| e.modified);
        for entry in entries {
            if report.after_bytes <= self.inner.config.max_bytes {
                break;
            }
            match fs::remove_file(&entry.path) {
                Ok(()) => {
                    report.after_bytes -= entry.len;
                    report.evicted += 1;
                }
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    report.after_bytes -= entry.len;
                }
                Err(e) => {
                    tracing::warn!(path = %entry.path.display(), error = %e, "failed to evict blob");
                }
            }
        }
        tracing::info!(
            before_bytes = report.before_bytes,
            after_bytes = report.after_bytes,
            evicted = report.evicted,
            "blob cache evicted"
        );
        Ok(report)
    }
}

struct Entry {
    path: PathBuf,
    len: u64,
    modified: SystemTime,
}

/// Streaming writer returned by [`BlobCache::put_writer`].
pub struct BlobWriter {
    cache: BlobCache,
    tmp: NamedTempFile,
    path: PathBuf,
    written: u64,
}

impl BlobWriter {
    /// Move the blob into place and account its size towards the next
    /// capacity check.
    pub fn commit(mut self) -> Result<(), BlobCacheError> {
        self.tmp.as_file_mut().flush()?;
        self.tmp.persist(&self.path).map_err(|e| e.error)?;
        self.cache.record_write(self.written);
        Ok(())
    }
}

impl Write for BlobWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let n = self.tmp.write(buf)?;
        self.written += n as u64;
        Ok(n)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.tmp.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn cache(dir: &Path, max_bytes: u64, check_every: u64) -> BlobCache {
        BlobCache::open(BlobCacheConfig {
            dir: dir.to_path_buf(),
            max_bytes,
            check_every,
        })
        .unwrap()
    }

    fn age(cache: &BlobCache, key: &str, secs_ago: u64) {
        let path = cache.path_for(key).unwrap();
        let then = SystemTime::now() - Duration::from_secs(secs_ago);
        filetime::set_file_mtime(path, FileTime::from_system_time(then)).unwrap();
    }

    fn mtime(cache: &BlobCache, key: &str) -> SystemTime {
        fs::metadata(cache.path_for(key).unwrap())
            .unwrap()
            .modified()
            .unwrap()
    }

    #[test]
    fn reading_refreshes_mtime() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), DEFAULT_MAX_BYTES, DEFAULT_CHECK_EVERY);
        cache.put("u-index.json", b"{}").unwrap();
        age(&cache, "u-index.json", 3600);
        let before = mtime(&cache, "u-index.json");

        cache.get_reader("u-index.json").unwrap();
        assert!(mtime(&cache, "u-index.json") > before + Duration::from_secs(3000));
    }

    #[test]
    fn read_only_blob_is_still_served() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), DEFAULT_MAX_BYTES, DEFAULT_CHECK_EVERY);
        cache.put("u-index.json", b"{}").unwrap();
        let path = cache.path_for("u-index.json").unwrap();
        let mut perms = fs::metadata(&path).unwrap().permissions();
        perms.set_readonly(true);
        fs::set_permissions(&path, perms).unwrap();

        let mut body = String::new();
        cache
            .get_reader("u-index.json")
            .unwrap()
            .read_to_string(&mut body)
            .unwrap();
        assert_eq!(body, "{}");
    }

    #[test]
    fn put_get_remove() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), DEFAULT_MAX_BYTES, DEFAULT_CHECK_EVERY);
        cache.put("u-index.json", b"{}").unwrap();
        assert!(cache.contains("u-index.json"));
        assert_eq!(cache.get("u-index.json").unwrap(), b"{}");
        assert!(cache.remove("u-index.json").unwrap());
        assert!(!cache.remove("u-index.json").unwrap());
        assert!(cache.get("u-index.json").unwrap_err().is_not_found());
    }

    #[test]
    fn keys_with_slashes_are_safe() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), DEFAULT_MAX_BYTES, DEFAULT_CHECK_EVERY);
        cache.put("id-../../etc/passwd", b"x").unwrap();
        assert_eq!(cache.get("id-../../etc/passwd").unwrap(), b"x");
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(matches!(cache.put("", b"x"), Err(BlobCacheError::InvalidKey(_))));
    }

    #[test]
    fn uncommitted_writer_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), DEFAULT_MAX_BYTES, DEFAULT_CHECK_EVERY);
        {
            let mut w = cache.put_writer("partial").unwrap();
            w.write_all(b"half").unwrap();
        }
        assert!(!cache.contains("partial"));
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn eviction_removes_oldest_first() {
        let dir = tempfile::tempdir().unwrap();
        // Large check interval: eviction only runs when asked.
        let cache = cache(dir.path(), 20, u64::MAX);
        cache.put("old", &[0u8; 10]).unwrap();
        cache.put("mid", &[0u8; 10]).unwrap();
        cache.put("new", &[0u8; 10]).unwrap();
        age(&cache, "old", 300);
        age(&cache, "mid", 200);
        age(&cache, "new", 100);

        let report = cache.evict().unwrap();
        assert_eq!(report.before_bytes, 30);
        assert_eq!(report.after_bytes, 20);
        assert_eq!(report.evicted, 1);
        assert!(!cache.contains("old"));
        assert!(cache.contains("mid"));
        assert!(cache.contains("new"));
    }

    #[test]
    fn reads_protect_blobs_from_eviction() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), 20, u64::MAX);
        cache.put("a", &[0u8; 10]).unwrap();
        cache.put("b", &[0u8; 10]).unwrap();
        cache.put("c", &[0u8; 10]).unwrap();
        age(&cache, "a", 300);
        age(&cache, "b", 200);
        age(&cache, "c", 100);
        cache.get("a").unwrap();

        cache.evict().unwrap();
        assert!(cache.contains("a"));
        assert!(!cache.contains("b"));
    }

    #[test]
    fn capacity_checked_after_batched_writes() {
        let dir = tempfile::tempdir().unwrap();
        let cache = cache(dir.path(), 15, 25);
        cache.put("a", &[0u8; 10]).unwrap();
        age(&cache, "a", 300);
        cache.put("b", &[0u8; 10]).unwrap();
        age(&cache, "b", 200);
        // 20 bytes written, below the check interval: over budget but untouched.
        assert_eq!(cache.size_on_disk().unwrap(), 20);

        cache.put("c", &[0u8; 10]).unwrap();
        assert_eq!(cache.size_on_disk().unwrap(), 10);
        assert!(cache.contains("c"));
    }
}
