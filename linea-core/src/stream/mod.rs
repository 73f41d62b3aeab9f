mod proxy;

pub use proxy::{filter_headers, ProxiedStream, StreamProxy, PASSTHROUGH_HEADERS};

use std::collections::HashMap;
use std::sync::RwLock;

use thiserror::Error;
use tracing::{debug, info};

use crate::catalog::{CatalogError, ContentKind, SqliteCatalogStore};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),
    #[error("no {kind} stream with provider id {provider_id}")]
    NotFound {
        kind: ContentKind,
        provider_id: String,
    },
    #[error("upstream request failed: {0}")]
    Upstream(#[from] reqwest::Error),
    #[error("upstream read timed out")]
    ReadTimeout,
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Maps public (kind, provider id) pairs to origin URLs. Lookups are
/// memoized; `preload` trades startup latency for a zero-miss steady
/// state.
pub struct StreamResolver {
    store: SqliteCatalogStore,
    cache: RwLock<HashMap<(ContentKind, String), String>>,
}

impl StreamResolver {
    pub fn new(store: SqliteCatalogStore) -> Self {
        Self {
            store,
            cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn resolve(&self, kind: ContentKind, provider_id: &str) -> StreamResult<String> {
        let key = (kind, provider_id.to_string());
        if let Some(url) = self.cache.read().unwrap().get(&key) {
            return Ok(url.clone());
        }

        match self.store.lookup_url(kind, provider_id)? {
            Some(url) => {
                debug!(kind = %kind, provider_id, "origin url cached");
                self.cache.write().unwrap().insert(key, url.clone());
                Ok(url)
            }
            None => Err(StreamError::NotFound {
                kind,
                provider_id: provider_id.to_string(),
            }),
        }
    }

    /// Fills the cache with every catalog row in one pass.
    pub fn preload(&self) -> StreamResult<usize> {
        let rows = self.store.stream_rows()?;
        let mut cache = self.cache.write().unwrap();
        cache.clear();
        for (kind, provider_id, url) in rows {
            cache.insert((kind, provider_id), url);
        }
        info!(entries = cache.len(), "stream url cache preloaded");
        Ok(cache.len())
    }

    /// Drops every memoized URL; used after a catalog rewrite.
    pub fn clear(&self) {
        self.cache.write().unwrap().clear();
    }

    pub fn cached_entries(&self) -> usize {
        self.cache.read().unwrap().len()
    }
}
