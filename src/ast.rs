//! The `Fetch` description language: an opaque, purely-functional AST whose
//! only public construction paths are the combinators below. Every `Fetch<A>`
//! reduces to exactly one of three normal forms — already resolved
//! ([`FetchRepr::Pure`]), permanently failed ([`FetchRepr::Errored`]), or
//! waiting on one more round of data-source calls before it can continue
//! ([`FetchRepr::Blocked`]).
//!
//! There are no separate `Map`/`FlatMap` variants: `map` and `flat_map`
//! instead push a continuation into the `Blocked` case, so a chain of
//! `map`/`flat_map` calls over a still-blocked fetch simply defers `f`/`k`
//! until the round resolves. This is what keeps batching and deduplication a
//! construction-time property of `join`/`collect`/`traverse` rather than
//! something the executor has to rediscover at run time.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::FetchError;
use crate::source::{merge_groups, DataSource, Group, Identity};

/// A deferred, possibly-batched data-fetching computation yielding `A`.
///
/// `Fetch<A>` carries no executor, no cache, and does nothing on its own —
/// build one with [`pure`], [`error`], [`fetch_one`], or the combinators on
/// this type, then hand it to [`crate::executor::run`].
pub struct Fetch<A>(pub(crate) FetchRepr<A>);

pub(crate) enum FetchRepr<A> {
    Pure(A),
    Errored(FetchError),
    Blocked(Vec<Group>, Continuation<A>),
}

/// What to do once the groups in a `Blocked` node have been resolved: look
/// the caller's own requests up in the round's results and continue (or
/// stop) from there.
pub(crate) type Continuation<A> = Box<dyn FnOnce(&ResultsBySource) -> Fetch<A> + Send>;

/// The flattened results of one resolved round, keyed by data-source
/// identity rather than by position — so a leaf's continuation can look
/// itself up directly, which is what makes duplicate requests across
/// different branches of a `join`/`collect` resolve correctly.
#[derive(Default)]
pub(crate) struct ResultsBySource {
    values: HashMap<Identity, Arc<dyn std::any::Any + Send + Sync>>,
}

impl ResultsBySource {
    pub(crate) fn insert(&mut self, id: Identity, value: Arc<dyn std::any::Any + Send + Sync>) {
        self.values.insert(id, value);
    }

    pub(crate) fn get<DS: DataSource>(&self, ds: &DS, req: &DS::Req) -> Option<DS::Resp> {
        let id = ds.identity(req);
        self.values
            .get(&id)
            .and_then(|v| v.downcast_ref::<DS::Resp>().cloned())
    }
}

impl<A: Send + 'static> Fetch<A> {
    /// A fetch that is already resolved to `value`, with no data-source calls.
    pub fn pure(value: A) -> Self {
        Fetch(FetchRepr::Pure(value))
    }

    /// A fetch that fails immediately without ever reaching the executor's
    /// data sources.
    pub fn error(err: impl Into<anyhow::Error>) -> Self {
        Fetch(FetchRepr::Errored(FetchError::UserError(err.into())))
    }

    /// Transform the eventual result without introducing a sequencing
    /// barrier: if `self` is still blocked, `f` is deferred until the round
    /// that resolves it completes.
    pub fn map<B, F>(self, f: F) -> Fetch<B>
    where
        F: FnOnce(A) -> B + Send + 'static,
        B: Send + 'static,
    {
        match self.0 {
            FetchRepr::Pure(a) => Fetch(FetchRepr::Pure(f(a))),
            FetchRepr::Errored(e) => Fetch(FetchRepr::Errored(e)),
            FetchRepr::Blocked(groups, k) => Fetch(FetchRepr::Blocked(
                groups,
                Box::new(move |results| k(results).map(f)),
            )),
        }
    }

    /// Sequence a dependent fetch: `f` only runs once `self` has resolved,
    /// which forces a new round boundary between the two (unlike `join`,
    /// which runs independent fetches in the same round).
    pub fn flat_map<B, F>(self, f: F) -> Fetch<B>
    where
        F: FnOnce(A) -> Fetch<B> + Send + 'static,
        B: Send + 'static,
    {
        match self.0 {
            FetchRepr::Pure(a) => f(a),
            FetchRepr::Errored(e) => Fetch(FetchRepr::Errored(e)),
            FetchRepr::Blocked(groups, k) => Fetch(FetchRepr::Blocked(
                groups,
                Box::new(move |results| k(results).flat_map(f)),
            )),
        }
    }
}

/// Free-function form of [`Fetch::pure`], matching this crate's
/// `pure`/`fetch_one`/`error` constructor naming.
pub fn pure<A: Send + 'static>(value: A) -> Fetch<A> {
    Fetch::pure(value)
}

/// Free-function form of [`Fetch::error`].
pub fn error<A: Send + 'static>(err: impl Into<anyhow::Error>) -> Fetch<A> {
    Fetch::error(err)
}

/// A single data-source request, as a `Fetch`. Always produces exactly one
/// blocked group of size one; fusion with sibling requests happens when this
/// is combined with others via [`join`], [`collect`], or [`traverse`].
pub fn fetch_one<DS: DataSource>(ds: &Arc<DS>, req: DS::Req) -> Fetch<DS::Resp> {
    let ds = Arc::clone(ds);
    let group = Group::one(Arc::clone(&ds), req.clone());
    let continuation: Continuation<DS::Resp> = Box::new(move |results| {
        match results.get(&*ds, &req) {
            Some(resp) => Fetch(FetchRepr::Pure(resp)),
            None => Fetch(FetchRepr::Errored(FetchError::missing_identity(
                ds.name(),
                vec![format!("{req:?}")],
            ))),
        }
    });
    Fetch(FetchRepr::Blocked(vec![group], continuation))
}

/// Run two independent fetches concurrently: if both are still blocked, their
/// groups are fused into a single round rather than run one after the other.
pub fn join<A, B>(fa: Fetch<A>, fb: Fetch<B>) -> Fetch<(A, B)>
where
    A: Send + 'static,
    B: Send + 'static,
{
    match (fa.0, fb.0) {
        (FetchRepr::Errored(e), _) => Fetch(FetchRepr::Errored(e)),
        (FetchRepr::Pure(_), FetchRepr::Errored(e)) => Fetch(FetchRepr::Errored(e)),
        (FetchRepr::Pure(a), FetchRepr::Pure(b)) => Fetch(FetchRepr::Pure((a, b))),
        (FetchRepr::Pure(a), FetchRepr::Blocked(groups, kb)) => Fetch(FetchRepr::Blocked(
            groups,
            Box::new(move |results| kb(results).map(move |b| (a, b))),
        )),
        (FetchRepr::Blocked(groups, ka), FetchRepr::Pure(b)) => Fetch(FetchRepr::Blocked(
            groups,
            Box::new(move |results| ka(results).map(move |a| (a, b))),
        )),
        (FetchRepr::Blocked(ga, ka), FetchRepr::Blocked(gb, kb)) => Fetch(FetchRepr::Blocked(
            merge_groups(ga, gb),
            Box::new(move |results| join(ka(results), kb(results))),
        )),
    }
}

/// Run a collection of independent fetches concurrently, fusing every
/// blocked group that shares a data source into as few rounds as possible.
pub fn collect<A: Send + 'static>(fetches: Vec<Fetch<A>>) -> Fetch<Vec<A>> {
    fetches
        .into_iter()
        .fold(Fetch(FetchRepr::Pure(Vec::new())), push)
}

/// `collect(items.into_iter().map(f).collect())`, as a single call.
pub fn traverse<T, A, F>(items: Vec<T>, f: F) -> Fetch<Vec<A>>
where
    F: Fn(T) -> Fetch<A>,
    A: Send + 'static,
{
    collect(items.into_iter().map(f).collect())
}

fn push<A: Send + 'static>(acc: Fetch<Vec<A>>, fa: Fetch<A>) -> Fetch<Vec<A>> {
    match (acc.0, fa.0) {
        (FetchRepr::Errored(e), _) => Fetch(FetchRepr::Errored(e)),
        (FetchRepr::Pure(_), FetchRepr::Errored(e)) => Fetch(FetchRepr::Errored(e)),
        (FetchRepr::Pure(mut v), FetchRepr::Pure(a)) => {
            v.push(a);
            Fetch(FetchRepr::Pure(v))
        }
        (FetchRepr::Pure(v), FetchRepr::Blocked(groups, k)) => Fetch(FetchRepr::Blocked(
            groups,
            Box::new(move |results| push(Fetch(FetchRepr::Pure(v)), k(results))),
        )),
        (FetchRepr::Blocked(groups, k), FetchRepr::Pure(a)) => Fetch(FetchRepr::Blocked(
            groups,
            Box::new(move |results| push(k(results), Fetch(FetchRepr::Pure(a)))),
        )),
        (FetchRepr::Blocked(ga, ka), FetchRepr::Blocked(gb, kb)) => Fetch(FetchRepr::Blocked(
            merge_groups(ga, gb),
            Box::new(move |results| push(ka(results), kb(results))),
        )),
    }
}
