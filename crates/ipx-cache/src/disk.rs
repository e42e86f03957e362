//! Filesystem-backed image cache.
//!
//! [`DiskCache`] stores each entry as a plain file holding the processed
//! bytes. There is no header and no index: size and last access come from
//! filesystem metadata, and the filesystem is the only synchronization
//! primitive.
//!
//! Directory layout:
//! ```text
//! {base_dir}/
//! +-- avatar/                          # sanitized preset
//! |   +-- did_plc_z72i7hdynmk6r22z27/  # sanitized DID (':' -> '_')
//! |       +-- bafyreihgdyzz...         # sanitized CID, file contents = JPEG
//! +-- banner/
//!     +-- ...
//! ```
//!
//! Writes go to a unique sibling `*.tmp` file which is then renamed over the
//! final path, so readers see either the old entry, the new entry, or a miss.
//! Every successful read touches the file's mtime; eviction treats mtime as
//! the last-access time.

use std::fs::{self, File, FileTimes};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, SystemTime};

use ipx_core::sanitize_path_component;

use crate::{CacheError, ImageCache};

const SECONDS_PER_DAY: u64 = 24 * 60 * 60;

/// Temp files younger than this belong to an in-flight `set` and are
/// invisible to size accounting and eviction. Older ones are crash leftovers.
const TMP_GRACE: Duration = Duration::from_secs(10 * 60);

/// Disambiguates concurrent temp files within one process.
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

/// [`ImageCache`] rooted at a directory on disk.
#[derive(Debug)]
pub struct DiskCache {
    base_dir: PathBuf,
    max_bytes: u64,
    ttl_days: u32,
}

/// A cached file seen during a scan.
#[derive(Debug)]
struct CacheEntry {
    path: PathBuf,
    size: u64,
    modified: SystemTime,
}

impl DiskCache {
    /// Create a cache rooted at `base_dir`.
    ///
    /// `max_bytes` caps the aggregate size enforced by LRU eviction.
    /// `ttl_days` of `0` disables expiry.
    ///
    /// The directory is created lazily on first write.
    pub fn new(
        base_dir: impl Into<PathBuf>,
        max_bytes: u64,
        ttl_days: u32,
    ) -> Result<Self, CacheError> {
        let base_dir = base_dir.into();
        if base_dir.as_os_str().is_empty() {
            return Err(CacheError::InvalidBasePath);
        }
        if max_bytes == 0 {
            return Err(CacheError::InvalidMaxSize);
        }
        Ok(Self {
            base_dir,
            max_bytes,
            ttl_days,
        })
    }

    /// Cache root directory.
    #[must_use]
    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Size cap in bytes.
    #[must_use]
    pub fn max_bytes(&self) -> u64 {
        self.max_bytes
    }

    /// Expiry in days (`0` = disabled).
    #[must_use]
    pub fn ttl_days(&self) -> u32 {
        self.ttl_days
    }

    /// Build the on-disk path for a key.
    fn entry_path(&self, preset: &str, did: &str, cid: &str) -> Result<PathBuf, CacheError> {
        if preset.is_empty() || did.is_empty() || cid.is_empty() {
            return Err(CacheError::EmptyParameter);
        }
        let parts = [preset, did, cid].map(sanitize_path_component);
        if parts.iter().any(|p| p.is_empty() || p == ".") {
            return Err(CacheError::EmptyParameter);
        }
        let [preset, did, cid] = parts;
        Ok(self.base_dir.join(preset).join(did).join(cid))
    }

    /// Walk the tree collecting every file and the total size.
    fn scan(&self) -> Result<(Vec<CacheEntry>, u64), CacheError> {
        let mut entries = Vec::new();
        scan_dir(&self.base_dir, &mut entries)?;
        let total = entries.iter().map(|e| e.size).sum();
        Ok((entries, total))
    }

    /// Remove entries whose last access is at or before `now - ttl_days`.
    ///
    /// Returns the number of entries removed. A no-op when expiry is disabled.
    pub fn clean_expired(&self) -> Result<usize, CacheError> {
        if self.ttl_days == 0 {
            return Ok(0);
        }

        let (entries, _) = self.scan()?;
        let ttl = Duration::from_secs(u64::from(self.ttl_days) * SECONDS_PER_DAY);
        let cutoff = SystemTime::now()
            .checked_sub(ttl)
            .unwrap_or(SystemTime::UNIX_EPOCH);

        let mut removed = 0;
        for entry in entries {
            if entry.modified > cutoff {
                continue;
            }
            if remove_entry(&entry.path) {
                removed += 1;
                tracing::debug!(
                    path = %entry.path.display(),
                    ttl_days = self.ttl_days,
                    "removed expired cache entry"
                );
            }
        }

        if removed > 0 {
            tracing::info!(
                entries_removed = removed,
                ttl_days = self.ttl_days,
                "TTL cleanup completed"
            );
        }
        Ok(removed)
    }

    /// Remove least recently used entries until the total size fits the cap.
    ///
    /// Returns the number of entries removed.
    pub fn evict_lru(&self) -> Result<usize, CacheError> {
        let (mut entries, mut total) = self.scan()?;
        if total <= self.max_bytes {
            return Ok(0);
        }

        // Oldest first; path breaks mtime ties so the order is deterministic
        entries.sort_by(|a, b| {
            a.modified
                .cmp(&b.modified)
                .then_with(|| a.path.cmp(&b.path))
        });

        let mut removed = 0;
        for entry in entries {
            if total <= self.max_bytes {
                break;
            }
            if remove_entry(&entry.path) {
                total = total.saturating_sub(entry.size);
                removed += 1;
                tracing::debug!(
                    path = %entry.path.display(),
                    size_bytes = entry.size,
                    "evicted cache entry (LRU)"
                );
            }
        }

        if removed > 0 {
            tracing::info!(
                entries_removed = removed,
                new_size_bytes = total,
                max_size_bytes = self.max_bytes,
                "LRU eviction completed"
            );
        }
        Ok(removed)
    }

    /// Remove empty directories below the cache root.
    ///
    /// The root itself is kept. Failures are logged and skipped. Returns the
    /// number of directories removed.
    pub fn clean_empty_dirs(&self) -> usize {
        let mut removed = 0;
        sweep_empty_dirs(&self.base_dir, &mut removed);
        removed
    }
}

impl ImageCache for DiskCache {
    fn get(&self, preset: &str, did: &str, cid: &str) -> Result<Option<Vec<u8>>, CacheError> {
        let path = self.entry_path(preset, did, cid)?;

        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        let mut data = Vec::new();
        file.read_to_end(&mut data)?;

        // A failed touch only degrades LRU accuracy
        let now = SystemTime::now();
        if let Err(e) = file.set_times(FileTimes::new().set_accessed(now).set_modified(now)) {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to update mtime for LRU tracking"
            );
        }

        Ok(Some(data))
    }

    fn set(&self, preset: &str, did: &str, cid: &str, data: &[u8]) -> Result<(), CacheError> {
        let path = self.entry_path(preset, did, cid)?;
        let Some(dir) = path.parent() else {
            return Err(CacheError::EmptyParameter);
        };
        create_dirs(dir)?;

        let tmp = tmp_path(&path);
        if let Err(e) = write_new_file(&tmp, data).and_then(|()| fs::rename(&tmp, &path)) {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        Ok(())
    }

    fn delete(&self, preset: &str, did: &str, cid: &str) -> Result<(), CacheError> {
        let path = self.entry_path(preset, did, cid)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn cleanup(&self) -> Result<usize, CacheError> {
        // Expired entries first, then whatever is still over the cap
        let expired = self.clean_expired()?;
        let evicted = self.evict_lru()?;
        Ok(expired + evicted)
    }

    fn size(&self) -> Result<u64, CacheError> {
        let (_, total) = self.scan()?;
        Ok(total)
    }
}

/// Recursively collect regular files below `dir`.
///
/// Directories that vanish mid-walk are skipped; eviction races with
/// concurrent deletes.
fn scan_dir(dir: &Path, entries: &mut Vec<CacheEntry>) -> io::Result<()> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
        Err(e) => return Err(e),
    };

    for entry in read_dir {
        let entry = entry?;
        let path = entry.path();
        let Ok(file_type) = entry.file_type() else {
            continue;
        };

        if file_type.is_dir() {
            scan_dir(&path, entries)?;
            continue;
        }
        if !file_type.is_file() {
            continue;
        }

        match entry.metadata() {
            Ok(meta) => {
                let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
                if is_in_flight_tmp(&path, modified) {
                    continue;
                }
                entries.push(CacheEntry {
                    size: meta.len(),
                    modified,
                    path,
                });
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to stat file during cache scan, cache size may be inaccurate"
                );
            }
        }
    }
    Ok(())
}

/// Whether `path` is a temp file a concurrent `set` may still rename.
///
/// CIDs never contain a dot, so the `.tmp` suffix only matches temp files.
fn is_in_flight_tmp(path: &Path, modified: SystemTime) -> bool {
    path.extension().is_some_and(|ext| ext == "tmp")
        && modified
            .elapsed()
            .map_or(true, |age| age < TMP_GRACE)
}

/// Unlink a cache file. Returns whether this call removed it.
fn remove_entry(path: &Path) -> bool {
    match fs::remove_file(path) {
        Ok(()) => true,
        Err(e) if e.kind() == io::ErrorKind::NotFound => false,
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to remove cache entry"
            );
            false
        }
    }
}

/// Depth-first removal of empty directories strictly below `dir`.
fn sweep_empty_dirs(dir: &Path, removed: &mut usize) {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(path = %dir.display(), error = %e, "failed to read directory during cleanup");
            return;
        }
    };

    for entry in read_dir.flatten() {
        if !entry.file_type().is_ok_and(|t| t.is_dir()) {
            continue;
        }
        let path = entry.path();
        sweep_empty_dirs(&path, removed);

        let is_empty = fs::read_dir(&path).is_ok_and(|mut rd| rd.next().is_none());
        if !is_empty {
            continue;
        }
        match fs::remove_dir(&path) {
            Ok(()) => *removed += 1,
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to remove empty directory");
            }
        }
    }
}

/// Unique sibling temp path for an atomic write of `path`.
fn tmp_path(path: &Path) -> PathBuf {
    let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!("{name}.{}.{n}.tmp", std::process::id()))
}

/// Create `dir` and its parents (mode 0755).
fn create_dirs(dir: &Path) -> io::Result<()> {
    let mut builder = fs::DirBuilder::new();
    builder.recursive(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::DirBuilderExt;
        builder.mode(0o755);
    }
    builder.create(dir)
}

/// Write `data` to a file that must not exist yet (mode 0644).
fn write_new_file(path: &Path, data: &[u8]) -> io::Result<()> {
    let mut options = fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o644);
    }
    let mut file = options.open(path)?;
    file.write_all(data)
}
