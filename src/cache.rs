//! Content-addressed cache keyed by `(data-source identity, request)`.
//!
//! [`Cache`] is a pure, immutable value: [`Cache::update`] returns a new
//! logical cache rather than mutating in place, so a cache snapshot can be
//! captured cheaply (an `Arc` clone) before every round for diagnostics, and
//! the same cache can be replayed across independent runs.

use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::Hash;
use std::sync::Arc;

use crate::source::{DataSource, ReqKey};

/// A persistent, content-addressed cache of data-source responses.
///
/// Internally a two-level map: outer by source name, inner by type-erased
/// request key, holding a type-erased response. The public `get`/`update`
/// methods are generic over a [`DataSource`] and downcast at the single call
/// site that knows the concrete `Req`/`Resp` types — the same scope that put
/// the value in, per the engine's heterogeneous-cache invariant.
#[derive(Clone, Default)]
pub struct Cache {
    sources: Arc<HashMap<Arc<str>, Arc<HashMap<ReqKey, Arc<dyn Any + Send + Sync>>>>>,
}

impl fmt::Debug for Cache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Cache")
            .field("sources", &self.sources.keys().collect::<Vec<_>>())
            .field("len", &self.len())
            .finish()
    }
}

impl Cache {
    /// An empty cache.
    pub fn empty() -> Self {
        Cache::default()
    }

    /// Build a cache pre-seeded with entries for one data source.
    pub fn cache_from<DS: DataSource>(
        ds: &DS,
        entries: impl IntoIterator<Item = (DS::Req, DS::Resp)>,
    ) -> Self {
        Cache::empty().cache_results(ds, entries.into_iter().collect())
    }

    /// Total number of cached entries across all sources.
    pub fn len(&self) -> usize {
        self.sources.values().map(|m| m.len()).sum()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Look up a cached response for `req` against `ds`.
    pub fn get<DS: DataSource>(&self, ds: &DS, req: &DS::Req) -> Option<DS::Resp> {
        let identity = ds.identity(req);
        self.get_erased(&identity.source, &identity.key)
            .and_then(|v| v.downcast_ref::<DS::Resp>().cloned())
    }

    /// Returns a new cache with `(req, resp)` recorded against `ds`.
    pub fn update<DS: DataSource>(&self, ds: &DS, req: DS::Req, resp: DS::Resp) -> Self {
        let mut results = HashMap::with_capacity(1);
        results.insert(req, resp);
        self.cache_results(ds, results)
    }

    /// Returns a new cache with every `(req, resp)` pair recorded against `ds`.
    pub fn cache_results<DS: DataSource>(
        &self,
        ds: &DS,
        results: HashMap<DS::Req, DS::Resp>,
    ) -> Self {
        if results.is_empty() {
            return self.clone();
        }
        let name: Arc<str> = Arc::from(ds.name());
        let mut sources = (*self.sources).clone();
        let mut inner = sources
            .get(&name)
            .map(|m| (**m).clone())
            .unwrap_or_default();
        for (req, resp) in results {
            let key = ds.identity(&req).key;
            inner.insert(key, Arc::new(resp) as Arc<dyn Any + Send + Sync>);
        }
        sources.insert(name, Arc::new(inner));
        Cache {
            sources: Arc::new(sources),
        }
    }

    pub(crate) fn get_erased(
        &self,
        source: &str,
        key: &ReqKey,
    ) -> Option<Arc<dyn Any + Send + Sync>> {
        self.sources.get(source).and_then(|m| m.get(key)).cloned()
    }

    pub(crate) fn has_erased(&self, source: &str, key: &ReqKey) -> bool {
        self.get_erased(source, key).is_some()
    }

    pub(crate) fn update_erased(
        &self,
        source: &str,
        entries: HashMap<ReqKey, Arc<dyn Any + Send + Sync>>,
    ) -> Self {
        if entries.is_empty() {
            return self.clone();
        }
        let name: Arc<str> = Arc::from(source);
        let mut sources = (*self.sources).clone();
        let mut inner = sources
            .get(&name)
            .map(|m| (**m).clone())
            .unwrap_or_default();
        for (key, value) in entries {
            inner.insert(key, value);
        }
        sources.insert(name, Arc::new(inner));
        Cache {
            sources: Arc::new(sources),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FetchError;
    use async_trait::async_trait;

    struct EchoSource;

    #[async_trait]
    impl DataSource for EchoSource {
        type Req = i32;
        type Resp = String;

        fn name(&self) -> &str {
            "echo"
        }

        async fn fetch(&self, reqs: &[i32]) -> Result<HashMap<i32, String>, FetchError> {
            Ok(reqs.iter().map(|r| (*r, r.to_string())).collect())
        }
    }

    #[test]
    fn get_after_update_returns_the_updated_value() {
        let ds = EchoSource;
        let cache = Cache::empty().update(&ds, 1, "one".to_string());
        assert_eq!(cache.get(&ds, &1), Some("one".to_string()));
    }

    #[test]
    fn update_does_not_touch_unrelated_keys() {
        let ds = EchoSource;
        let cache = Cache::empty()
            .update(&ds, 1, "one".to_string())
            .update(&ds, 2, "two".to_string());
        assert_eq!(cache.get(&ds, &1), Some("one".to_string()));
        assert_eq!(cache.get(&ds, &2), Some("two".to_string()));
    }

    #[test]
    fn update_is_pure_the_old_cache_is_unaffected() {
        let ds = EchoSource;
        let before = Cache::empty().update(&ds, 1, "one".to_string());
        let after = before.update(&ds, 1, "ONE".to_string());
        assert_eq!(before.get(&ds, &1), Some("one".to_string()));
        assert_eq!(after.get(&ds, &1), Some("ONE".to_string()));
    }

    #[test]
    fn cache_from_seeds_multiple_entries() {
        let ds = EchoSource;
        let cache = Cache::cache_from(&ds, [(1, "one".to_string()), (2, "two".to_string())]);
        assert_eq!(cache.len(), 2);
    }

    #[test]
    fn miss_returns_none() {
        let ds = EchoSource;
        let cache = Cache::empty();
        assert_eq!(cache.get(&ds, &1), None);
    }
}
