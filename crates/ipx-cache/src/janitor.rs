//! Periodic background cleanup of a [`DiskCache`].

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::{CacheError, DiskCache, ImageCache};

/// Idle cycles between two heartbeat log lines.
const HEARTBEAT_EVERY: u32 = 6;

/// Handle to the background cleanup task.
///
/// The task runs [`ImageCache::cleanup`] once per interval, first tick one
/// interval after start. Dropping the handle cancels the task without
/// waiting; use [`Janitor::shutdown`] to wait for an in-flight cycle.
#[derive(Debug)]
pub struct Janitor {
    token: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

/// One cleanup pass, run on the blocking pool.
type Cycle = Arc<dyn Fn() -> Result<CycleStats, CacheError> + Send + Sync>;

/// Outcome of one cleanup cycle.
#[derive(Debug)]
struct CycleStats {
    removed: usize,
    dirs_removed: usize,
    size_bytes: u64,
}

impl Janitor {
    /// Spawn the cleanup task on the current tokio runtime.
    ///
    /// A zero `interval` disables periodic cleanup; the returned handle is
    /// inert.
    pub fn start(cache: Arc<DiskCache>, interval: Duration) -> Self {
        if !interval.is_zero() {
            tracing::info!(
                interval_secs = interval.as_secs(),
                max_size_bytes = cache.max_bytes(),
                ttl_days = cache.ttl_days(),
                "cache janitor started"
            );
        }
        Self::with_cycle(interval, Arc::new(move || run_cycle(&cache)))
    }

    /// Spawn the loop around an arbitrary cleanup cycle.
    fn with_cycle(interval: Duration, cycle: Cycle) -> Self {
        let token = CancellationToken::new();
        if interval.is_zero() {
            tracing::info!("cache janitor disabled");
            return Self {
                token,
                handle: None,
            };
        }

        let handle = tokio::spawn(run(cycle, interval, token.clone()));
        Self {
            token,
            handle: Some(handle),
        }
    }

    /// Whether the background task is still alive.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the task and wait for it to exit.
    ///
    /// An in-flight cleanup cycle is allowed to complete.
    pub async fn shutdown(mut self) {
        self.token.cancel();
        if let Some(handle) = self.handle.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "cache janitor task failed");
        }
    }
}

impl Drop for Janitor {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

async fn run(cycle: Cycle, interval: Duration, token: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut idle_cycles: u32 = 0;

    loop {
        tokio::select! {
            () = token.cancelled() => break,
            _ = ticker.tick() => {}
        }

        // Filesystem work runs off the async workers; a panic surfaces as a
        // JoinError and the loop carries on
        let cycle = Arc::clone(&cycle);
        match tokio::task::spawn_blocking(move || cycle()).await {
            Ok(Ok(stats)) if stats.removed > 0 => {
                idle_cycles = 0;
                tracing::info!(
                    entries_removed = stats.removed,
                    dirs_removed = stats.dirs_removed,
                    size_bytes = stats.size_bytes,
                    "cache cleanup completed"
                );
            }
            Ok(Ok(stats)) => {
                idle_cycles += 1;
                if idle_cycles % HEARTBEAT_EVERY == 0 {
                    tracing::debug!(
                        idle_cycles,
                        size_bytes = stats.size_bytes,
                        "cache janitor heartbeat"
                    );
                }
            }
            Ok(Err(e)) => {
                tracing::error!(error = %e, "cache cleanup failed");
            }
            Err(e) => {
                tracing::error!(error = %e, "cache cleanup panicked");
            }
        }
    }

    tracing::info!("cache janitor stopped");
}

fn run_cycle(cache: &DiskCache) -> Result<CycleStats, CacheError> {
    let removed = cache.cleanup()?;
    let dirs_removed = if removed > 0 {
        cache.clean_empty_dirs()
    } else {
        0
    };
    let size_bytes = cache.size()?;
    Ok(CycleStats {
        removed,
        dirs_removed,
        size_bytes,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::SystemTime;

    use super::*;
    use crate::disk::tests::set_mtime;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    const DID: &str = "did:plc:z72i7hdynmk6r22z27h6tvur";
    const CID: &str = "bafyreihgdyzzpkkzq2izfnhcmm77ycuacvkuziwbnqxfxtqsz7tmxwhnshi";

    fn expired_entry_path(cache: &DiskCache) -> std::path::PathBuf {
        cache.set("avatar", DID, CID, b"stale").unwrap();
        let path = cache
            .base_dir()
            .join("avatar")
            .join("did_plc_z72i7hdynmk6r22z27h6tvur")
            .join(CID);
        set_mtime(&path, SystemTime::now() - Duration::from_secs(3 * 24 * 60 * 60));
        path
    }

    #[tokio::test]
    async fn test_janitor_removes_expired_entries() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap());
        let path = expired_entry_path(&cache);

        let janitor = Janitor::start(Arc::clone(&cache), Duration::from_millis(20));
        assert!(janitor.is_running());

        let deadline = Instant::now() + Duration::from_secs(5);
        while path.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        janitor.shutdown().await;

        assert!(!path.exists(), "expired entry should be removed");
        // Empty directories are swept after a cycle that removed entries
        assert!(!cache.base_dir().join("avatar").exists());
        assert!(cache.base_dir().is_dir());
    }

    #[tokio::test]
    async fn test_janitor_survives_panicking_cycle() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap());
        let path = expired_entry_path(&cache);

        let calls = Arc::new(AtomicUsize::new(0));
        let cycle_calls = Arc::clone(&calls);
        let cycle_cache = Arc::clone(&cache);
        let janitor = Janitor::with_cycle(
            Duration::from_millis(20),
            Arc::new(move || {
                assert!(
                    cycle_calls.fetch_add(1, Ordering::SeqCst) > 0,
                    "first cleanup cycle blows up"
                );
                run_cycle(&cycle_cache)
            }),
        );

        let deadline = Instant::now() + Duration::from_secs(5);
        while path.exists() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(janitor.is_running());
        assert!(calls.load(Ordering::SeqCst) >= 2);
        janitor.shutdown().await;
        assert!(!path.exists(), "a later cycle should remove the expired entry");
    }

    #[tokio::test]
    async fn test_janitor_first_cycle_waits_one_interval() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap());
        let path = expired_entry_path(&cache);

        let janitor = Janitor::start(Arc::clone(&cache), Duration::from_secs(3600));
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(path.exists(), "no cleanup before the first interval elapses");
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_janitor_zero_interval_is_disabled() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap());

        let janitor = Janitor::start(cache, Duration::ZERO);

        assert!(!janitor.is_running());
        janitor.shutdown().await;
    }

    #[tokio::test]
    async fn test_janitor_shutdown_stops_task() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap());

        let janitor = Janitor::start(Arc::clone(&cache), Duration::from_millis(10));
        tokio::time::sleep(Duration::from_millis(30)).await;

        tokio::time::timeout(Duration::from_secs(5), janitor.shutdown())
            .await
            .expect("shutdown should complete promptly");

        // Entries written after shutdown are never cleaned
        let path = expired_entry_path(&cache);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(path.exists());
    }

    #[tokio::test]
    async fn test_janitor_drop_cancels_task() {
        let tmp = TempDir::new().unwrap();
        let cache = Arc::new(DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap());

        let janitor = Janitor::start(Arc::clone(&cache), Duration::from_millis(10));
        let token = janitor.token.clone();
        drop(janitor);

        assert!(token.is_cancelled());
    }

    #[test]
    fn test_run_cycle_reports_stats() {
        let tmp = TempDir::new().unwrap();
        let cache = DiskCache::new(tmp.path().join("cache"), 1 << 30, 1).unwrap();
        expired_entry_path(&cache);
        cache.set("banner", DID, CID, &[0u8; 42]).unwrap();

        let stats = run_cycle(&cache).unwrap();

        assert_eq!(stats.removed, 1);
        assert_eq!(stats.dirs_removed, 2);
        assert_eq!(stats.size_bytes, 42);
    }
}
