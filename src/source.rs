//! Data-source contract: the typed `(request, response)` capability that the
//! executor dedupes, batches, and caches against.
//!
//! A [`DataSource`] is a thin async capability object: a stable [`name`](DataSource::name),
//! a cache [`identity`](DataSource::identity) for a request, and a batch
//! [`fetch`](DataSource::fetch) that the executor calls with a distinct,
//! non-empty set of requests. Everything downstream of this module only ever
//! sees the type-erased [`Group`]/[`ReqKey`] shapes built on top of it, so the
//! AST and executor stay generic over however many concrete `DataSource`
//! implementations a host registers.

use async_trait::async_trait;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use crate::error::FetchError;

/// A data source the executor can batch-fetch against.
///
/// `reqs` passed to [`fetch`](DataSource::fetch) is always distinct and
/// non-empty; the returned map MUST NOT contain keys outside `reqs`, but MAY
/// omit some (an omission is treated as [`FetchError::MissingIdentity`]).
#[async_trait]
pub trait DataSource: Send + Sync + 'static {
    /// The request type this source accepts.
    type Req: Clone + Eq + Hash + fmt::Debug + Send + Sync + 'static;
    /// The response type this source produces.
    type Resp: Clone + Send + Sync + 'static;

    /// Stable identifier for this source, used to fuse sibling blocked nodes
    /// at `join`/`collect`/`traverse` time.
    fn name(&self) -> &str;

    /// Cache key for a request. Defaults to `(name(), req.clone())`; override
    /// only if a source needs to normalize requests before keying the cache.
    fn identity(&self, req: &Self::Req) -> Identity {
        Identity::new(self.name(), req.clone())
    }

    /// Batch-fetch a distinct, non-empty set of requests.
    async fn fetch(
        &self,
        reqs: &[Self::Req],
    ) -> Result<HashMap<Self::Req, Self::Resp>, FetchError>;
}

/// The cache key for one request: `(source name, request)`.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub(crate) source: Arc<str>,
    pub(crate) key: ReqKey,
}

impl Identity {
    pub(crate) fn new<R>(source: &str, req: R) -> Self
    where
        R: Any + Eq + Hash + Clone + fmt::Debug + Send + Sync,
    {
        Identity {
            source: Arc::from(source),
            key: ReqKey::new(req),
        }
    }

    /// The owning data source's name.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub(crate) fn from_parts(source: Arc<str>, key: ReqKey) -> Self {
        Identity { source, key }
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{:?}]", self.source, self.key)
    }
}

// ---------------------------------------------------------------------------
// Type-erased request keys
// ---------------------------------------------------------------------------

/// Object-safe `Eq + Hash + Clone + Debug` for an erased request, following
/// the standard "dyn-compatible trait" trick: the blanket impl below
/// monomorphizes the concrete comparison/hash/clone behind the trait object.
trait ErasedReqObj: Any + fmt::Debug + Send + Sync {
    fn eq_erased(&self, other: &dyn ErasedReqObj) -> bool;
    fn hash_erased(&self, state: &mut dyn Hasher);
    fn clone_erased(&self) -> Box<dyn ErasedReqObj>;
    fn as_any(&self) -> &dyn Any;
}

impl<T> ErasedReqObj for T
where
    T: Any + Eq + Hash + Clone + fmt::Debug + Send + Sync,
{
    fn eq_erased(&self, other: &dyn ErasedReqObj) -> bool {
        other.as_any().downcast_ref::<T>() == Some(self)
    }

    fn hash_erased(&self, mut state: &mut dyn Hasher) {
        self.hash(&mut state)
    }

    fn clone_erased(&self) -> Box<dyn ErasedReqObj> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// A type-erased request, usable as a `HashMap` key across unrelated
/// `DataSource::Req` types. Downcasting back to the concrete `Req` is only
/// ever done at the [`SourceAdapter`] that originally erased it.
pub(crate) struct ReqKey(Box<dyn ErasedReqObj>);

impl ReqKey {
    pub(crate) fn new<R>(req: R) -> Self
    where
        R: Any + Eq + Hash + Clone + fmt::Debug + Send + Sync,
    {
        ReqKey(Box::new(req))
    }

    pub(crate) fn downcast<R: Any + Clone>(&self) -> Option<R> {
        self.0.as_any().downcast_ref::<R>().cloned()
    }
}

impl PartialEq for ReqKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_erased(&*other.0)
    }
}

impl Eq for ReqKey {}

impl Hash for ReqKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.hash_erased(state);
    }
}

impl Clone for ReqKey {
    fn clone(&self) -> Self {
        ReqKey(self.0.clone_erased())
    }
}

impl fmt::Debug for ReqKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(&*self.0, f)
    }
}

// ---------------------------------------------------------------------------
// Erased data sources and blocked groups
// ---------------------------------------------------------------------------

/// Object-safe view of a [`DataSource`], used by the executor once requests
/// have been erased into [`ReqKey`]s. Produced only by [`SourceAdapter`].
#[async_trait]
pub(crate) trait ErasedSource: Send + Sync {
    fn name(&self) -> &str;

    async fn fetch_erased(
        &self,
        reqs: Vec<ReqKey>,
    ) -> Result<HashMap<ReqKey, Arc<dyn Any + Send + Sync>>, FetchError>;
}

pub(crate) struct SourceAdapter<DS: DataSource>(pub(crate) Arc<DS>);

#[async_trait]
impl<DS: DataSource> ErasedSource for SourceAdapter<DS> {
    fn name(&self) -> &str {
        self.0.name()
    }

    async fn fetch_erased(
        &self,
        reqs: Vec<ReqKey>,
    ) -> Result<HashMap<ReqKey, Arc<dyn Any + Send + Sync>>, FetchError> {
        let typed: Vec<DS::Req> = reqs
            .iter()
            .map(|k| {
                k.downcast::<DS::Req>()
                    .expect("ReqKey always downcasts to the Req type it was built from")
            })
            .collect();
        let responses = self.0.fetch(&typed).await?;
        Ok(responses
            .into_iter()
            .map(|(req, resp)| {
                let key = self.0.identity(&req).key;
                (key, Arc::new(resp) as Arc<dyn Any + Send + Sync>)
            })
            .collect())
    }
}

/// One data source's worth of pending requests within a frontier. A frontier
/// is a non-empty `Vec<Group>`: one group per distinct source name, fused at
/// construction time by `join`/`collect`/`traverse`.
pub(crate) struct Group {
    pub(crate) source: Arc<dyn ErasedSource>,
    pub(crate) reqs: Vec<ReqKey>,
}

impl Group {
    pub(crate) fn one<DS: DataSource>(ds: Arc<DS>, req: DS::Req) -> Self {
        let key = ds.identity(&req).key;
        Group {
            source: Arc::new(SourceAdapter(ds)),
            reqs: vec![key],
        }
    }
}

/// Fuse two frontiers' groups by source name, concatenating request lists in
/// encounter order. This is the mechanism behind the batching and dedup laws:
/// construction-time fusion, not runtime coincidence.
pub(crate) fn merge_groups(mut a: Vec<Group>, b: Vec<Group>) -> Vec<Group> {
    for group in b {
        if let Some(existing) = a.iter_mut().find(|g| g.source.name() == group.source.name()) {
            existing.reqs.extend(group.reqs);
        } else {
            a.push(group);
        }
    }
    a
}
