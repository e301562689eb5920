//! Round-by-round diagnostics: a record of what the executor actually did,
//! independent of what the `Fetch` result eventually comes out to. Built
//! incrementally into a [`RoundLog`] as [`crate::executor::run`] resolves one
//! blocked frontier at a time, and returned alongside the result so tests and
//! callers can assert on batching/dedup/caching behavior directly instead of
//! inferring it from timing.

use std::fmt;
use std::time::{Duration, Instant};

/// What a single data source contributed to one round.
#[derive(Debug, Clone)]
pub struct SourceCall {
    /// The data source's [`crate::source::DataSource::name`].
    pub source: String,
    /// How many distinct requests this round needed from the source.
    pub requested: usize,
    /// Of those, how many were already present in the cache and so were not
    /// dispatched to [`crate::source::DataSource::fetch`].
    pub served_from_cache: usize,
    /// Debug representation of the distinct requests this round needed from
    /// the source, in first-occurrence order.
    pub requests: Vec<String>,
}

impl SourceCall {
    /// Requests that actually reached [`crate::source::DataSource::fetch`].
    pub fn dispatched(&self) -> usize {
        self.requested - self.served_from_cache
    }
}

/// One resolved frontier: the set of data-source calls the executor made (or
/// skipped, via the cache) before it could make further progress — or
/// attempted to make, if the frontier ended up failing.
#[derive(Debug, Clone)]
pub struct Round {
    /// One entry per distinct data source touched in this round.
    pub sources: Vec<SourceCall>,
    /// When the executor started resolving this frontier.
    pub start: Instant,
    /// When the executor finished resolving this frontier (successfully or
    /// not).
    pub end: Instant,
}

impl Round {
    /// Wall-clock time spent resolving this frontier.
    pub fn elapsed(&self) -> Duration {
        self.end.duration_since(self.start)
    }

    /// Whether every request in this round was already cached — no source's
    /// `fetch` was actually called.
    pub fn is_cache_only(&self) -> bool {
        !self.sources.is_empty() && self.sources.iter().all(|s| s.dispatched() == 0)
    }

    /// Total distinct data sources dispatched to (excludes sources fully
    /// served from cache).
    pub fn sources_dispatched(&self) -> usize {
        self.sources.iter().filter(|s| s.dispatched() > 0).count()
    }

    /// A [`Round`] that dispatched to exactly one data source is a
    /// single-source round (what `traverse`/`collect` over one source
    /// produces); more than one means the executor ran a concurrent round
    /// across multiple data sources (what `join`/`collect` across data
    /// sources produces).
    pub fn shape(&self) -> RoundShape {
        match self.sources_dispatched() {
            0 => RoundShape::CacheOnly,
            1 => RoundShape::SingleSource,
            _ => RoundShape::Concurrent,
        }
    }
}

/// Coarse classification of a [`Round`], useful for asserting on batching
/// behavior in tests without hand-inspecting [`SourceCall`] lists.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoundShape {
    /// Every request in the round was already cached.
    CacheOnly,
    /// Exactly one data source was dispatched to (possibly batched: many
    /// requests, one call).
    SingleSource,
    /// More than one data source was dispatched to in the same round.
    Concurrent,
}

impl fmt::Display for RoundShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RoundShape::CacheOnly => write!(f, "cache-only"),
            RoundShape::SingleSource => write!(f, "single-source"),
            RoundShape::Concurrent => write!(f, "concurrent"),
        }
    }
}

/// The full sequence of rounds an executor run took to resolve a `Fetch`.
#[derive(Debug, Clone, Default)]
pub struct RoundLog {
    rounds: Vec<Round>,
}

impl RoundLog {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, round: Round) {
        self.rounds.push(round);
    }

    /// The rounds in execution order.
    pub fn rounds(&self) -> &[Round] {
        &self.rounds
    }

    /// How many rounds were needed to resolve the fetch.
    pub fn len(&self) -> usize {
        self.rounds.len()
    }

    /// Whether the fetch resolved without needing any round at all (it was
    /// already `Pure`, or failed before the first round).
    pub fn is_empty(&self) -> bool {
        self.rounds.is_empty()
    }

    /// Total number of data-source calls actually made across every round
    /// (one call per distinct source per round, batched requests counted
    /// once).
    pub fn total_dispatches(&self) -> usize {
        self.rounds
            .iter()
            .map(|r| r.sources_dispatched())
            .sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn call(source: &str, requested: usize, served_from_cache: usize) -> SourceCall {
        SourceCall {
            source: source.into(),
            requested,
            served_from_cache,
            requests: (0..requested).map(|i| i.to_string()).collect(),
        }
    }

    fn round(sources: Vec<SourceCall>) -> Round {
        let start = Instant::now();
        Round { sources, start, end: start }
    }

    #[test]
    fn cache_only_round_has_no_dispatches() {
        let round = round(vec![call("articles", 3, 3)]);
        assert!(round.is_cache_only());
        assert_eq!(round.shape(), RoundShape::CacheOnly);
    }

    #[test]
    fn single_source_round_batches_requests_into_one_call() {
        let round = round(vec![call("articles", 5, 2)]);
        assert_eq!(round.shape(), RoundShape::SingleSource);
        assert_eq!(round.sources[0].dispatched(), 3);
        assert_eq!(round.sources[0].requests.len(), 5);
    }

    #[test]
    fn concurrent_round_spans_multiple_sources() {
        let round = round(vec![call("articles", 2, 0), call("authors", 1, 0)]);
        assert_eq!(round.shape(), RoundShape::Concurrent);
        assert_eq!(round.sources_dispatched(), 2);
    }

    #[test]
    fn round_log_tracks_total_dispatches_across_rounds() {
        let mut log = RoundLog::new();
        log.push(round(vec![call("articles", 2, 0)]));
        log.push(round(vec![call("authors", 1, 0), call("metadata", 1, 0)]));
        assert_eq!(log.len(), 2);
        assert_eq!(log.total_dispatches(), 3);
    }

    #[test]
    fn elapsed_is_non_negative() {
        let round = round(vec![call("articles", 1, 0)]);
        assert!(round.elapsed() >= Duration::ZERO);
    }
}
