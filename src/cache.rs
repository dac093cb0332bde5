//! Process-wide content store for fetched indices and in-flight pages.
//!
//! Two tiers with different lifetimes:
//!
//! - a durable LRU for offset and column indices, which are small and reused
//!   across queries against the same reader;
//! - a short-scope map for page fetches, which only exists to deduplicate
//!   concurrent requests and is evicted as soon as the first consumer
//!   resolves the fetch.
//!
//! Both tiers are single-flight: concurrent requests for one key share one
//! underlying reader call through a [`Shared`] future. Keys carry the reader
//! id and the row-group ordinal, so readers are isolated from each other and
//! identical column layouts in different row groups never collide.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::Future;
use lru::LruCache;
use parking_lot::Mutex;

use crate::error::{Error, Result};
use crate::reader::{ColumnIndex, OffsetIndex, PageValues};

/// Which kind of blob a cache entry holds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CacheKind {
    OffsetIndex,
    ColumnIndex,
    Page,
}

/// Cache key: `(reader id, row-group ordinal, kind, path, page ordinal)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub reader_id: String,
    pub row_group: usize,
    pub kind: CacheKind,
    pub path: String,
    pub page: Option<usize>,
}

impl CacheKey {
    pub(crate) fn index(
        reader_id: &str,
        row_group: usize,
        kind: CacheKind,
        path: &str,
    ) -> Self {
        Self {
            reader_id: reader_id.to_string(),
            row_group,
            kind,
            path: path.to_string(),
            page: None,
        }
    }

    pub(crate) fn page(reader_id: &str, row_group: usize, path: &str, page: usize) -> Self {
        Self {
            reader_id: reader_id.to_string(),
            row_group,
            kind: CacheKind::Page,
            path: path.to_string(),
            page: Some(page),
        }
    }
}

/// Observability callbacks. Implementations must not affect behavior.
pub trait CacheHooks: Send + Sync {
    /// A lookup happened.
    fn read(&self, _key: &CacheKey) {}
    /// The lookup missed and a fetch was scheduled.
    fn miss(&self, _key: &CacheKey) {}
    /// The scheduled fetch resolved.
    fn complete(&self, _key: &CacheKey) {}
}

struct NoHooks;

impl CacheHooks for NoHooks {}

#[derive(Clone)]
enum Blob {
    OffsetIndex(Arc<OffsetIndex>),
    ColumnIndex(Arc<ColumnIndex>),
    Page(Arc<PageValues>),
}

type SharedFetch = Shared<BoxFuture<'static, Result<Blob>>>;

/// Two-tier single-flight content store. Share across the process with
/// [`Arc`]; all methods take `&self`.
pub struct IndexCache {
    durable: Mutex<LruCache<CacheKey, SharedFetch>>,
    pages: Mutex<HashMap<CacheKey, SharedFetch>>,
    hooks: Arc<dyn CacheHooks>,
}

impl std::fmt::Debug for IndexCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexCache")
            .field("durable_len", &self.durable.lock().len())
            .field("pages_in_flight", &self.pages.lock().len())
            .finish()
    }
}

impl IndexCache {
    /// Default durable capacity, in entries.
    pub const DEFAULT_CAPACITY: usize = 10_000;

    pub fn new(capacity: usize) -> Self {
        Self::with_hooks(capacity, Arc::new(NoHooks))
    }

    pub fn with_hooks(capacity: usize, hooks: Arc<dyn CacheHooks>) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).expect("max(1) is non-zero");
        Self {
            durable: Mutex::new(LruCache::new(capacity)),
            pages: Mutex::new(HashMap::new()),
            hooks,
        }
    }

    /// Offset index for a column chunk, fetching through `fetch` on miss.
    pub async fn offset_index<F>(&self, key: CacheKey, fetch: F) -> Result<Arc<OffsetIndex>>
    where
        F: Future<Output = Result<OffsetIndex>> + Send + 'static,
    {
        let blob = self
            .durable_fetch(key, fetch.map(|r| r.map(|v| Blob::OffsetIndex(Arc::new(v)))))
            .await?;
        match blob {
            Blob::OffsetIndex(index) => Ok(index),
            _ => Err(Error::invariant("cache entry kind mismatch for offset index")),
        }
    }

    /// Column index for a column chunk, fetching through `fetch` on miss.
    pub async fn column_index<F>(&self, key: CacheKey, fetch: F) -> Result<Arc<ColumnIndex>>
    where
        F: Future<Output = Result<ColumnIndex>> + Send + 'static,
    {
        let blob = self
            .durable_fetch(key, fetch.map(|r| r.map(|v| Blob::ColumnIndex(Arc::new(v)))))
            .await?;
        match blob {
            Blob::ColumnIndex(index) => Ok(index),
            _ => Err(Error::invariant("cache entry kind mismatch for column index")),
        }
    }

    /// Decoded page values. The entry only lives while the fetch is in
    /// flight; the first resolving consumer evicts it.
    pub async fn page<F>(&self, key: CacheKey, fetch: F) -> Result<Arc<PageValues>>
    where
        F: Future<Output = Result<PageValues>> + Send + 'static,
    {
        self.hooks.read(&key);
        let (shared, leader) = {
            let mut pages = self.pages.lock();
            match pages.get(&key) {
                Some(existing) => {
                    tracing::trace!(?key, "page cache join");
                    (existing.clone(), false)
                }
                None => {
                    tracing::trace!(?key, "page cache fetch");
                    self.hooks.miss(&key);
                    let shared = self
                        .instrumented(key.clone(), fetch.map(|r| r.map(|v| Blob::Page(Arc::new(v)))));
                    pages.insert(key.clone(), shared.clone());
                    (shared, true)
                }
            }
        };
        let out = shared.await;
        if leader {
            self.pages.lock().remove(&key);
        }
        match out? {
            Blob::Page(values) => Ok(values),
            _ => Err(Error::invariant("cache entry kind mismatch for page")),
        }
    }

    async fn durable_fetch<F>(&self, key: CacheKey, fetch: F) -> Result<Blob>
    where
        F: Future<Output = Result<Blob>> + Send + 'static,
    {
        self.hooks.read(&key);
        let shared = {
            let mut durable = self.durable.lock();
            match durable.get(&key) {
                Some(existing) => {
                    tracing::trace!(?key, "index cache hit");
                    existing.clone()
                }
                None => {
                    tracing::trace!(?key, "index cache miss");
                    self.hooks.miss(&key);
                    let shared = self.instrumented(key.clone(), fetch);
                    durable.put(key.clone(), shared.clone());
                    shared
                }
            }
        };
        let out = shared.await;
        // A failed fetch must not poison the slot for later queries.
        if out.is_err() {
            self.durable.lock().pop(&key);
        }
        out
    }

    fn instrumented<F>(&self, key: CacheKey, fetch: F) -> SharedFetch
    where
        F: Future<Output = Result<Blob>> + Send + 'static,
    {
        let hooks = self.hooks.clone();
        async move {
            let out = fetch.await;
            hooks.complete(&key);
            out
        }
        .boxed()
        .shared()
    }
}

impl Default for IndexCache {
    fn default() -> Self {
        Self::new(Self::DEFAULT_CAPACITY)
    }
}
