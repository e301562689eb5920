//! The executor: interprets a [`Fetch`] to normal form, resolving one
//! blocked frontier at a time against a [`Cache`], dispatching any remaining
//! misses to their data sources concurrently, and recording a [`Round`] per
//! frontier resolved.
//!
//! This is the interpreter half of the engine — the `Fetch` value itself
//! does nothing; everything here is what actually turns a description into a
//! result.

use std::any::Any;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use tracing::info_span;

use crate::ast::{Fetch, FetchRepr, ResultsBySource};
use crate::cache::Cache;
use crate::config::ExecutorConfig;
use crate::diagnostics::{Round, RoundLog, SourceCall};
use crate::effect::{parallel, BoxFuture};
use crate::error::FetchError;
use crate::source::{ErasedSource, Group, Identity, ReqKey};

/// Executor-private state for one run: the cache as it currently stands, and
/// the round-by-round history accumulated so far.
#[derive(Debug, Clone)]
pub struct Environment {
    cache: Cache,
    rounds: RoundLog,
}

impl Environment {
    fn new(cache: Cache) -> Self {
        Environment {
            cache,
            rounds: RoundLog::new(),
        }
    }

    /// The cache as it stood when the run stopped: its final state on
    /// success, or its state just before the failing round on failure.
    pub fn cache(&self) -> &Cache {
        &self.cache
    }

    /// The full round-by-round history of this run.
    pub fn rounds(&self) -> &RoundLog {
        &self.rounds
    }
}

/// A run that did not reach `Pure`: the triggering error, plus the
/// [`Environment`] (cache and round log) as they stood at the point of
/// failure. Per the engine's atomicity guarantee, the cache here never
/// contains a partial commit from the failing round.
#[derive(Debug)]
pub struct FetchFailure {
    /// The error that aborted the run.
    pub error: FetchError,
    /// Cache and round log as of the failing round.
    pub env: Environment,
}

impl std::fmt::Display for FetchFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.error)
    }
}

impl std::error::Error for FetchFailure {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

impl From<FetchFailure> for anyhow::Error {
    fn from(failure: FetchFailure) -> Self {
        anyhow::Error::new(failure.error)
    }
}

/// Run `fetch` to completion against a fresh cache, returning only the
/// result.
pub async fn run<A: Send + 'static>(fetch: Fetch<A>) -> Result<A, FetchFailure> {
    run_with_cache(fetch, Cache::empty()).await.map(|(_, a)| a)
}

/// Like [`run`], but also returns the final [`Environment`] (cache and round
/// log) for introspection.
pub async fn run_with_env<A: Send + 'static>(
    fetch: Fetch<A>,
) -> Result<(Environment, A), FetchFailure> {
    run_with_cache(fetch, Cache::empty()).await
}

/// Run `fetch` starting from a caller-supplied cache rather than an empty
/// one, e.g. to replay a previous run's final cache.
pub async fn run_with_cache<A: Send + 'static>(
    fetch: Fetch<A>,
    cache: Cache,
) -> Result<(Environment, A), FetchFailure> {
    run_with_config(fetch, cache, &ExecutorConfig::default()).await
}

/// Run `fetch` purely for its diagnostics, discarding the result value.
pub async fn run_env_only<A: Send + 'static>(
    fetch: Fetch<A>,
) -> Result<Environment, FetchFailure> {
    run_with_env(fetch).await.map(|(env, _)| env)
}

/// Run `fetch` with an explicit [`ExecutorConfig`].
pub async fn run_with_config<A: Send + 'static>(
    mut fetch: Fetch<A>,
    cache: Cache,
    config: &ExecutorConfig,
) -> Result<(Environment, A), FetchFailure> {
    let mut env = Environment::new(cache);
    loop {
        match fetch.0 {
            FetchRepr::Pure(a) => return Ok((env, a)),
            FetchRepr::Errored(e) => return Err(FetchFailure { error: e, env }),
            FetchRepr::Blocked(groups, k) => {
                let results = match resolve_frontier(groups, &mut env, config).await {
                    Ok(results) => results,
                    Err(e) => return Err(FetchFailure { error: e, env }),
                };
                fetch = k(&results);
            }
        }
    }
}

/// One data source's worth of work within a frontier, after deduplication
/// and a cache lookup.
struct Pending {
    name: Arc<str>,
    source: Arc<dyn ErasedSource>,
    distinct: Vec<ReqKey>,
    miss: Vec<ReqKey>,
}

/// Resolve every group in one frontier: dedupe each group's requests, serve
/// whatever the cache already has, dispatch the rest concurrently (honoring
/// [`ExecutorConfig::max_concurrent_sources`]), and merge the results into
/// the cache atomically — either the whole frontier commits, or (on any
/// single failure) none of it does.
async fn resolve_frontier(
    groups: Vec<Group>,
    env: &mut Environment,
    config: &ExecutorConfig,
) -> Result<ResultsBySource, FetchError> {
    let start = Instant::now();
    let mut pendings = Vec::with_capacity(groups.len());
    for group in groups {
        let name: Arc<str> = Arc::from(group.source.name());
        let mut seen = HashSet::with_capacity(group.reqs.len());
        let mut distinct = Vec::with_capacity(group.reqs.len());
        for key in group.reqs {
            if seen.insert(key.clone()) {
                distinct.push(key);
            }
        }
        let miss: Vec<ReqKey> = distinct
            .iter()
            .filter(|k| !env.cache.has_erased(&name, k))
            .cloned()
            .collect();
        pendings.push(Pending {
            name,
            source: group.source,
            distinct,
            miss,
        });
    }

    // Built up front, from data already known before any dispatch can fail,
    // so a failing frontier still logs exactly the round it attempted.
    let source_calls: Vec<SourceCall> = pendings
        .iter()
        .map(|p| SourceCall {
            source: p.name.to_string(),
            requested: p.distinct.len(),
            served_from_cache: p.distinct.len() - p.miss.len(),
            requests: p.distinct.iter().map(|k| format!("{k:?}")).collect(),
        })
        .collect();

    let mut fetched: HashMap<usize, HashMap<ReqKey, Arc<dyn Any + Send + Sync>>> = HashMap::new();
    let mut dispatch_queue: Vec<(usize, Arc<dyn ErasedSource>, Vec<ReqKey>)> = pendings
        .iter()
        .enumerate()
        .filter(|(_, p)| !p.miss.is_empty())
        .map(|(i, p)| (i, Arc::clone(&p.source), p.miss.clone()))
        .collect();

    let batch_size = config
        .max_concurrent_sources
        .unwrap_or(dispatch_queue.len().max(1))
        .max(1);

    while !dispatch_queue.is_empty() {
        let take = batch_size.min(dispatch_queue.len());
        let chunk: Vec<_> = dispatch_queue.drain(..take).collect();
        let indices: Vec<usize> = chunk.iter().map(|(i, ..)| *i).collect();
        let effects: Vec<BoxFuture<'static, Result<HashMap<ReqKey, Arc<dyn Any + Send + Sync>>, FetchError>>> =
            chunk
                .into_iter()
                .map(|(_, source, reqs)| {
                    Box::pin(async move { source.fetch_erased(reqs).await })
                        as BoxFuture<'static, _>
                })
                .collect();
        let maps = match parallel(effects).await {
            Ok(maps) => maps,
            Err(e) => {
                let round = finish_round(source_calls, start, config, Some(&e));
                env.rounds.push(round);
                return Err(e);
            }
        };
        for (idx, map) in indices.into_iter().zip(maps) {
            fetched.insert(idx, map);
        }
    }

    // Every miss resolved without error: commit the whole frontier.
    let mut new_cache = env.cache.clone();
    let mut results = ResultsBySource::default();

    for (i, pending) in pendings.into_iter().enumerate() {
        if let Some(map) = fetched.remove(&i) {
            new_cache = new_cache.update_erased(&pending.name, map);
        }

        for key in &pending.distinct {
            let value = match new_cache.get_erased(&pending.name, key) {
                Some(value) => value,
                None => {
                    let e = FetchError::missing_identity(
                        pending.name.to_string(),
                        vec![format!("{key:?}")],
                    );
                    let round = finish_round(source_calls, start, config, Some(&e));
                    env.rounds.push(round);
                    return Err(e);
                }
            };
            results.insert(Identity::from_parts(Arc::clone(&pending.name), key.clone()), value);
        }
    }

    let round = finish_round(source_calls, start, config, None);
    env.cache = new_cache;
    env.rounds.push(round);

    Ok(results)
}

/// Build the [`Round`] for a frontier that just finished (successfully or
/// not) and emit its `tracing` event, mirroring the executor's logging
/// regardless of outcome.
fn finish_round(
    sources: Vec<SourceCall>,
    start: Instant,
    config: &ExecutorConfig,
    error: Option<&FetchError>,
) -> Round {
    let round = Round {
        sources,
        start,
        end: Instant::now(),
    };
    if config.trace_rounds {
        match error {
            None => {
                let span = info_span!(
                    "round",
                    kind = %round.shape(),
                    sources = round.sources.len(),
                    elapsed_ms = round.elapsed().as_secs_f64() * 1000.0,
                );
                let _entered = span.enter();
                tracing::info!(parent: &span, "resolved frontier");
            }
            Some(e) => {
                tracing::warn!(
                    sources = round.sources.len(),
                    elapsed_ms = round.elapsed().as_secs_f64() * 1000.0,
                    error = %e,
                    "frontier failed"
                );
            }
        }
    }
    round
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::{collect, fetch_one, join, traverse, Fetch};
    use crate::diagnostics::RoundShape;
    use crate::source::DataSource;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone, Debug, PartialEq, Eq)]
    struct Article {
        id: i32,
        title: String,
        author_id: i32,
    }

    struct ArticleDS {
        calls: AtomicUsize,
    }

    impl ArticleDS {
        fn new() -> Arc<Self> {
            Arc::new(ArticleDS { calls: AtomicUsize::new(0) })
        }
    }

    #[async_trait]
    impl DataSource for ArticleDS {
        type Req = i32;
        type Resp = Article;

        fn name(&self) -> &str {
            "ArticleDS"
        }

        async fn fetch(&self, reqs: &[i32]) -> Result<HashMap<i32, Article>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(reqs
                .iter()
                .map(|&id| {
                    (
                        id,
                        Article {
                            id,
                            title: format!("An article with id {id}"),
                            author_id: id + 10,
                        },
                    )
                })
                .collect())
        }
    }

    struct AuthorDS;

    #[async_trait]
    impl DataSource for AuthorDS {
        type Req = i32;
        type Resp = String;

        fn name(&self) -> &str {
            "AuthorDS"
        }

        async fn fetch(&self, reqs: &[i32]) -> Result<HashMap<i32, String>, FetchError> {
            Ok(reqs.iter().map(|&id| (id, format!("@egg_{id}"))).collect())
        }
    }

    struct MetadataDS;

    #[async_trait]
    impl DataSource for MetadataDS {
        type Req = i32;
        type Resp = usize;

        fn name(&self) -> &str {
            "MetadataDS"
        }

        async fn fetch(&self, reqs: &[i32]) -> Result<HashMap<i32, usize>, FetchError> {
            Ok(reqs.iter().map(|&id| (id, id as usize)).collect())
        }
    }

    // S1
    #[tokio::test]
    async fn single_request_is_one_round() {
        let ds = ArticleDS::new();
        let (env, article) = run_with_env(fetch_one(&ds, 1)).await.unwrap();
        assert_eq!(article.title, "An article with id 1");
        assert_eq!(env.rounds().len(), 1);
    }

    // S2
    #[tokio::test]
    async fn flat_map_forces_two_sequential_rounds() {
        let ds = ArticleDS::new();
        let ds2 = Arc::clone(&ds);
        let fetch = fetch_one(&ds, 1).flat_map(move |a| fetch_one(&ds2, a.author_id - 9));
        let (env, article) = run_with_env(fetch).await.unwrap();
        assert_eq!(article.id, 2);
        assert_eq!(env.rounds().len(), 2);
        assert!(!env.rounds().rounds()[0].is_cache_only());
    }

    // S3 / S4: batching + dedup laws
    #[tokio::test]
    async fn join_of_two_distinct_requests_is_one_round_one_batch() {
        let ds = ArticleDS::new();
        let (env, (a, b)) = run_with_env(join(fetch_one(&ds, 1), fetch_one(&ds, 2)))
            .await
            .unwrap();
        assert_eq!((a.id, b.id), (1, 2));
        assert_eq!(env.rounds().len(), 1);
        assert_eq!(env.rounds().rounds()[0].sources[0].requested, 2);
        assert_eq!(ds.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn join_of_duplicate_requests_dedupes_into_one_call() {
        let ds = ArticleDS::new();
        let (env, (a, b)) = run_with_env(join(fetch_one(&ds, 1), fetch_one(&ds, 1)))
            .await
            .unwrap();
        assert_eq!(a, b);
        assert_eq!(env.rounds().rounds()[0].sources[0].requested, 1);
    }

    // S5: dependent duplicate resolves from cache on the second round
    #[tokio::test]
    async fn flat_map_on_same_request_hits_cache_on_second_round() {
        let ds = ArticleDS::new();
        let ds2 = Arc::clone(&ds);
        let fetch = fetch_one(&ds, 1).flat_map(move |_| fetch_one(&ds2, 1));
        let (env, article) = run_with_env(fetch).await.unwrap();
        assert_eq!(article.id, 1);
        assert_eq!(env.rounds().len(), 2);
        assert!(env.rounds().rounds()[1].is_cache_only());
        assert_eq!(ds.calls.load(Ordering::SeqCst), 1);
    }

    // S6: traverse over one source, then a concurrent join of two other sources
    #[tokio::test]
    async fn blog_scenario_is_exactly_two_non_cache_rounds() {
        let articles = ArticleDS::new();
        let authors = Arc::new(AuthorDS);
        let metadata = Arc::new(MetadataDS);

        let ids = vec![1, 2, 3, 4, 5];
        let posts = traverse(ids, {
            let articles = Arc::clone(&articles);
            move |id| fetch_one(&articles, id)
        });

        let fetch = posts.flat_map(move |posts: Vec<Article>| {
            let meta = traverse(posts.clone(), {
                let metadata = Arc::clone(&metadata);
                move |a| fetch_one(&metadata, a.id)
            });
            let auth = traverse(posts, {
                let authors = Arc::clone(&authors);
                move |a| fetch_one(&authors, a.author_id)
            });
            join(meta, auth)
        });

        let (env, (metas, authors)) = run_with_env(fetch).await.unwrap();
        assert_eq!(metas.len(), 5);
        assert_eq!(authors.len(), 5);
        assert_eq!(env.rounds().len(), 2);
        assert_eq!(env.rounds().rounds()[0].shape(), RoundShape::SingleSource);
        assert_eq!(env.rounds().rounds()[1].shape(), RoundShape::Concurrent);
    }

    // Invariant 2: a fully-cached run makes zero data-source calls.
    #[tokio::test]
    async fn cache_hit_makes_no_data_source_calls() {
        let ds = ArticleDS::new();
        let cache = Cache::cache_from(
            &*ds,
            [(1, Article { id: 1, title: "cached".into(), author_id: 11 })],
        );
        let (env, article) = run_with_cache(fetch_one(&ds, 1), cache).await.unwrap();
        assert_eq!(article.title, "cached");
        assert_eq!(ds.calls.load(Ordering::SeqCst), 0);
        assert!(env.rounds().rounds()[0].is_cache_only());
    }

    // Invariant 7: collect preserves input order regardless of completion order.
    #[tokio::test]
    async fn collect_preserves_input_order() {
        let ds = ArticleDS::new();
        let fetches: Vec<Fetch<Article>> = vec![3, 1, 2]
            .into_iter()
            .map(|id| fetch_one(&ds, id))
            .collect();
        let (_, articles) = run_with_env(collect(fetches)).await.unwrap();
        assert_eq!(
            articles.iter().map(|a| a.id).collect::<Vec<_>>(),
            vec![3, 1, 2]
        );
    }

    // Invariant 8: failure atomicity — a missing key leaves the cache untouched.
    struct FlakyDS;

    #[async_trait]
    impl DataSource for FlakyDS {
        type Req = i32;
        type Resp = i32;

        fn name(&self) -> &str {
            "FlakyDS"
        }

        async fn fetch(&self, reqs: &[i32]) -> Result<HashMap<i32, i32>, FetchError> {
            Ok(reqs.iter().filter(|&&r| r != 2).map(|&r| (r, r)).collect())
        }
    }

    #[tokio::test]
    async fn missing_key_fails_the_whole_round_without_partial_commit() {
        let ds = Arc::new(FlakyDS);
        let failure = run_env_only(join(fetch_one(&ds, 1), fetch_one(&ds, 2)))
            .await
            .unwrap_err();
        assert!(matches!(failure.error, FetchError::MissingIdentity { .. }));
        assert!(failure.env.cache().is_empty());

        // The failing round's attempt still shows up in diagnostics.
        let rounds = failure.env.rounds().rounds();
        assert_eq!(rounds.len(), 1, "the attempted round must still be logged");
        assert_eq!(rounds[0].sources[0].source, "FlakyDS");
        assert_eq!(rounds[0].sources[0].requested, 2);
        assert!(rounds[0].end >= rounds[0].start);
    }

    // A data source effect failure (as opposed to a missing key) is logged
    // the same way.
    struct FailingDS;

    #[async_trait]
    impl DataSource for FailingDS {
        type Req = i32;
        type Resp = i32;

        fn name(&self) -> &str {
            "FailingDS"
        }

        async fn fetch(&self, _reqs: &[i32]) -> Result<HashMap<i32, i32>, FetchError> {
            Err(FetchError::source_failure("FailingDS", anyhow::anyhow!("connection reset")))
        }
    }

    #[tokio::test]
    async fn source_effect_failure_also_logs_the_attempted_round() {
        let ds = Arc::new(FailingDS);
        let failure = run_env_only(fetch_one(&ds, 1)).await.unwrap_err();
        assert!(matches!(failure.error, FetchError::SourceFailure { .. }));
        assert!(failure.env.cache().is_empty());
        let rounds = failure.env.rounds().rounds();
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].sources[0].requested, 1);
        assert_eq!(rounds[0].sources[0].requests, vec!["1".to_string()]);
    }

    // Diagnostics carry the actual request identities, not just counts.
    #[tokio::test]
    async fn round_diagnostics_record_the_requests_issued() {
        let ds = ArticleDS::new();
        let (env, _) = run_with_env(join(fetch_one(&ds, 1), fetch_one(&ds, 2)))
            .await
            .unwrap();
        let call = &env.rounds().rounds()[0].sources[0];
        assert_eq!(call.requests, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn pure_value_runs_without_any_round() {
        let (env, value) = run_with_env(Fetch::pure(42)).await.unwrap();
        assert_eq!(value, 42);
        assert!(env.rounds().is_empty());
    }
}
