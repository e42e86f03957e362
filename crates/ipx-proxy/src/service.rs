//! Read-through image service.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ipx_cache::ImageCache;
use ipx_core::PresetRegistry;
use ipx_fetch::{BlobFetcher, FetchContext};
use ipx_image::ImageProcessor;
use tokio::runtime::Handle;

use crate::ProxyError;

/// Failed background cache writes since process start.
static CACHE_WRITE_ERRORS: AtomicU64 = AtomicU64::new(0);

/// Number of background cache writes that failed since process start.
pub fn cache_write_error_count() -> u64 {
    CACHE_WRITE_ERRORS.load(Ordering::Relaxed)
}

/// Orchestrates cache lookup, origin fetch, processing and cache store.
///
/// Cheap to share behind an `Arc`; all collaborators are immutable.
pub struct ImageService {
    cache: Arc<dyn ImageCache>,
    processor: Arc<dyn ImageProcessor>,
    fetcher: Arc<dyn BlobFetcher>,
    presets: PresetRegistry,
}

/// Builder for [`ImageService`].
#[derive(Default)]
pub struct ImageServiceBuilder {
    cache: Option<Arc<dyn ImageCache>>,
    processor: Option<Arc<dyn ImageProcessor>>,
    fetcher: Option<Arc<dyn BlobFetcher>>,
    presets: Option<PresetRegistry>,
}

impl ImageServiceBuilder {
    /// Cache for processed images.
    #[must_use]
    pub fn cache(mut self, cache: Arc<dyn ImageCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Processor turning source blobs into preset output.
    #[must_use]
    pub fn processor(mut self, processor: Arc<dyn ImageProcessor>) -> Self {
        self.processor = Some(processor);
        self
    }

    /// Origin fetcher.
    #[must_use]
    pub fn fetcher(mut self, fetcher: Arc<dyn BlobFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Preset table. Defaults to [`PresetRegistry::builtin`].
    #[must_use]
    pub fn presets(mut self, presets: PresetRegistry) -> Self {
        self.presets = Some(presets);
        self
    }

    /// Build the service.
    ///
    /// Fails with [`ProxyError::NilDependency`] naming the first missing
    /// collaborator.
    pub fn build(self) -> Result<ImageService, ProxyError> {
        let cache = self.cache.ok_or(ProxyError::NilDependency("cache"))?;
        let processor = self
            .processor
            .ok_or(ProxyError::NilDependency("processor"))?;
        let fetcher = self.fetcher.ok_or(ProxyError::NilDependency("fetcher"))?;

        Ok(ImageService {
            cache,
            processor,
            fetcher,
            presets: self.presets.unwrap_or_default(),
        })
    }
}

impl ImageService {
    /// Start building a service.
    #[must_use]
    pub fn builder() -> ImageServiceBuilder {
        ImageServiceBuilder::default()
    }

    /// Preset table used to resolve preset names.
    #[must_use]
    pub fn presets(&self) -> &PresetRegistry {
        &self.presets
    }

    /// Return the processed image for `(preset, did, cid)`, fetching from
    /// `origin` on a cache miss.
    ///
    /// `did` and `cid` must already be validated. Cancelling `ctx` aborts an
    /// in-flight fetch; once processing has finished the cache store runs to
    /// completion even if the caller goes away.
    pub async fn get_image(
        &self,
        ctx: &FetchContext,
        preset_name: &str,
        did: &str,
        cid: &str,
        origin: &str,
    ) -> Result<Vec<u8>, ProxyError> {
        let preset = self.presets.get(preset_name)?.clone();

        if let Some(data) = self.cached(preset_name, did, cid).await {
            tracing::debug!(preset = preset_name, did, cid, "cache hit");
            return Ok(data);
        }

        let raw = self.fetcher.fetch(ctx, origin, did, cid).await?;

        let processor = Arc::clone(&self.processor);
        let store = PendingStore {
            cache: Arc::clone(&self.cache),
            preset: preset_name.to_owned(),
            did: did.to_owned(),
            cid: cid.to_owned(),
        };
        let runtime = Handle::current();

        // The store is scheduled from the worker so it is not lost when the
        // request future is dropped while processing
        let processed = tokio::task::spawn_blocking(move || {
            let processed = processor.process(&raw, &preset)?;
            let data = processed.clone();
            runtime.spawn_blocking(move || store.run(&data));
            Ok::<_, ProxyError>(processed)
        })
        .await
        .map_err(|e| ProxyError::Internal(format!("processing task failed: {e}")))??;

        Ok(processed)
    }

    /// Cache lookup. Read errors are logged and reported as a miss.
    async fn cached(&self, preset: &str, did: &str, cid: &str) -> Option<Vec<u8>> {
        let cache = Arc::clone(&self.cache);
        let key = (preset.to_owned(), did.to_owned(), cid.to_owned());
        let lookup = tokio::task::spawn_blocking(move || cache.get(&key.0, &key.1, &key.2)).await;

        match lookup {
            Ok(Ok(hit)) => hit,
            Ok(Err(e)) => {
                tracing::warn!(
                    preset,
                    did,
                    cid,
                    error = %e,
                    "cache read error, falling back to fetch"
                );
                None
            }
            Err(e) => {
                tracing::warn!(preset, did, cid, error = %e, "cache read task failed");
                None
            }
        }
    }
}

/// Detached write-back of a processed image.
struct PendingStore {
    cache: Arc<dyn ImageCache>,
    preset: String,
    did: String,
    cid: String,
}

impl PendingStore {
    fn run(self, data: &[u8]) {
        match self.cache.set(&self.preset, &self.did, &self.cid, data) {
            Ok(()) => {
                tracing::debug!(
                    preset = %self.preset,
                    did = %self.did,
                    cid = %self.cid,
                    size_bytes = data.len(),
                    "cached processed image"
                );
            }
            Err(e) => {
                let total = CACHE_WRITE_ERRORS.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::error!(
                    preset = %self.preset,
                    did = %self.did,
                    cid = %self.cid,
                    error = %e,
                    total_cache_write_errors = total,
                    "async cache write failed"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Mutex;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use async_trait::async_trait;
    use ipx_cache::CacheError;
    use ipx_core::{Preset, ValidationError};
    use ipx_fetch::FetchError;
    use ipx_image::ProcessError;
    use pretty_assertions::assert_eq;

    use super::*;

    const DID: &str = "did:plc:z72i7hdynmk6r22z27h6tvur";
    const CID: &str = "bafyreihgdyzzpkkzq2izfnhcmm77ycuacvkuziwbnqxfxtqsz7tmxwhnshi";
    const ORIGIN: &str = "https://pds.example.com";

    type Key = (String, String, String);

    fn key(preset: &str, did: &str, cid: &str) -> Key {
        (preset.to_owned(), did.to_owned(), cid.to_owned())
    }

    #[derive(Default)]
    struct MemoryCache {
        entries: Mutex<HashMap<Key, Vec<u8>>>,
    }

    impl MemoryCache {
        fn contains(&self, preset: &str, did: &str, cid: &str) -> bool {
            self.entries.lock().unwrap().contains_key(&key(preset, did, cid))
        }
    }

    impl ImageCache for MemoryCache {
        fn get(&self, preset: &str, did: &str, cid: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Ok(self.entries.lock().unwrap().get(&key(preset, did, cid)).cloned())
        }

        fn set(&self, preset: &str, did: &str, cid: &str, data: &[u8]) -> Result<(), CacheError> {
            self.entries
                .lock()
                .unwrap()
                .insert(key(preset, did, cid), data.to_vec());
            Ok(())
        }

        fn delete(&self, preset: &str, did: &str, cid: &str) -> Result<(), CacheError> {
            self.entries.lock().unwrap().remove(&key(preset, did, cid));
            Ok(())
        }

        fn cleanup(&self) -> Result<usize, CacheError> {
            Ok(0)
        }

        fn size(&self) -> Result<u64, CacheError> {
            Ok(self.entries.lock().unwrap().values().map(|v| v.len() as u64).sum())
        }
    }

    /// Cache whose every operation fails.
    struct BrokenCache;

    impl ImageCache for BrokenCache {
        fn get(&self, _: &str, _: &str, _: &str) -> Result<Option<Vec<u8>>, CacheError> {
            Err(std::io::Error::other("disk on fire").into())
        }

        fn set(&self, _: &str, _: &str, _: &str, _: &[u8]) -> Result<(), CacheError> {
            Err(std::io::Error::other("disk full").into())
        }

        fn delete(&self, _: &str, _: &str, _: &str) -> Result<(), CacheError> {
            Ok(())
        }

        fn cleanup(&self) -> Result<usize, CacheError> {
            Ok(0)
        }

        fn size(&self) -> Result<u64, CacheError> {
            Ok(0)
        }
    }

    /// Fetcher returning a fixed result and counting calls.
    struct StubFetcher {
        calls: AtomicUsize,
        result: fn() -> Result<Vec<u8>, FetchError>,
    }

    impl StubFetcher {
        fn ok() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result: || Ok(b"raw-image".to_vec()),
            }
        }

        fn failing(result: fn() -> Result<Vec<u8>, FetchError>) -> Self {
            Self {
                calls: AtomicUsize::new(0),
                result,
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BlobFetcher for StubFetcher {
        async fn fetch(
            &self,
            _ctx: &FetchContext,
            origin: &str,
            _did: &str,
            _cid: &str,
        ) -> Result<Vec<u8>, FetchError> {
            assert_eq!(origin, ORIGIN);
            self.calls.fetch_add(1, Ordering::SeqCst);
            (self.result)()
        }
    }

    /// Processor tagging its input with the preset name.
    struct TagProcessor;

    impl ImageProcessor for TagProcessor {
        fn process(&self, data: &[u8], preset: &Preset) -> Result<Vec<u8>, ProcessError> {
            if data == b"corrupt" {
                return Err(ProcessError::ProcessingFailed("bad pixels".to_owned()));
            }
            let mut out = format!("{}:", preset.name).into_bytes();
            out.extend_from_slice(data);
            Ok(out)
        }
    }

    fn service(cache: Arc<dyn ImageCache>, fetcher: Arc<StubFetcher>) -> ImageService {
        ImageService::builder()
            .cache(cache)
            .processor(Arc::new(TagProcessor))
            .fetcher(fetcher)
            .build()
            .unwrap()
    }

    /// Poll until the detached store lands.
    async fn wait_for(cond: impl Fn() -> bool) -> bool {
        for _ in 0..200 {
            if cond() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        cond()
    }

    #[tokio::test]
    async fn test_miss_fetches_processes_and_stores() {
        let cache = Arc::new(MemoryCache::default());
        let fetcher = Arc::new(StubFetcher::ok());
        let svc = service(Arc::clone(&cache) as Arc<dyn ImageCache>, Arc::clone(&fetcher));

        let data = svc
            .get_image(&FetchContext::new(), "avatar", DID, CID, ORIGIN)
            .await
            .unwrap();

        assert_eq!(data, b"avatar:raw-image");
        assert_eq!(fetcher.calls(), 1);
        assert!(wait_for(|| cache.contains("avatar", DID, CID)).await);
    }

    #[tokio::test]
    async fn test_hit_skips_fetch() {
        let cache = Arc::new(MemoryCache::default());
        cache.set("avatar", DID, CID, b"cached-bytes").unwrap();
        let fetcher = Arc::new(StubFetcher::ok());
        let svc = service(cache, Arc::clone(&fetcher));

        let data = svc
            .get_image(&FetchContext::new(), "avatar", DID, CID, ORIGIN)
            .await
            .unwrap();

        assert_eq!(data, b"cached-bytes");
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_repeated_requests_are_identical() {
        let cache = Arc::new(MemoryCache::default());
        let fetcher = Arc::new(StubFetcher::ok());
        let svc = service(Arc::clone(&cache) as Arc<dyn ImageCache>, Arc::clone(&fetcher));
        let ctx = FetchContext::new();

        let first = svc.get_image(&ctx, "banner", DID, CID, ORIGIN).await.unwrap();
        assert!(wait_for(|| cache.contains("banner", DID, CID)).await);
        let second = svc.get_image(&ctx, "banner", DID, CID, ORIGIN).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_invalid_preset_short_circuits() {
        let fetcher = Arc::new(StubFetcher::ok());
        let svc = service(Arc::new(MemoryCache::default()), Arc::clone(&fetcher));

        let err = svc
            .get_image(&FetchContext::new(), "invalid_preset", DID, CID, ORIGIN)
            .await
            .unwrap_err();

        assert!(
            matches!(err, ProxyError::Validation(ValidationError::InvalidPreset)),
            "got {err:?}"
        );
        assert_eq!(fetcher.calls(), 0);
    }

    #[tokio::test]
    async fn test_cache_errors_degrade_to_fetch_and_count_failed_writes() {
        let fetcher = Arc::new(StubFetcher::ok());
        let svc = service(Arc::new(BrokenCache), Arc::clone(&fetcher));
        let before = cache_write_error_count();

        let data = svc
            .get_image(&FetchContext::new(), "avatar", DID, CID, ORIGIN)
            .await
            .unwrap();

        assert_eq!(data, b"avatar:raw-image");
        assert_eq!(fetcher.calls(), 1);
        assert!(wait_for(|| cache_write_error_count() > before).await);
    }

    #[tokio::test]
    async fn test_fetch_error_propagates() {
        let cache = Arc::new(MemoryCache::default());
        let fetcher = Arc::new(StubFetcher::failing(|| Err(FetchError::NotFound)));
        let svc = service(Arc::clone(&cache) as Arc<dyn ImageCache>, fetcher);

        let err = svc
            .get_image(&FetchContext::new(), "avatar", DID, CID, ORIGIN)
            .await
            .unwrap_err();

        assert!(matches!(err, ProxyError::Fetch(FetchError::NotFound)), "got {err:?}");
        assert!(!cache.contains("avatar", DID, CID));
    }

    #[tokio::test]
    async fn test_process_error_propagates_and_nothing_is_cached() {
        let cache = Arc::new(MemoryCache::default());
        let fetcher = Arc::new(StubFetcher::failing(|| Ok(b"corrupt".to_vec())));
        let svc = service(Arc::clone(&cache) as Arc<dyn ImageCache>, fetcher);

        let err = svc
            .get_image(&FetchContext::new(), "avatar", DID, CID, ORIGIN)
            .await
            .unwrap_err();

        assert!(
            matches!(err, ProxyError::Process(ProcessError::ProcessingFailed(_))),
            "got {err:?}"
        );
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!cache.contains("avatar", DID, CID));
    }

    #[test]
    fn test_builder_requires_dependencies() {
        let err = ImageService::builder()
            .processor(Arc::new(TagProcessor))
            .fetcher(Arc::new(StubFetcher::ok()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::NilDependency("cache")));

        let err = ImageService::builder()
            .cache(Arc::new(MemoryCache::default()))
            .fetcher(Arc::new(StubFetcher::ok()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::NilDependency("processor")));

        let err = ImageService::builder()
            .cache(Arc::new(MemoryCache::default()))
            .processor(Arc::new(TagProcessor))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ProxyError::NilDependency("fetcher")));
    }

    #[test]
    fn test_builder_defaults_to_builtin_presets() {
        let svc = service(Arc::new(MemoryCache::default()), Arc::new(StubFetcher::ok()));
        assert_eq!(svc.presets().len(), PresetRegistry::builtin().len());
    }
}
