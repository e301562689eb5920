//! Executor configuration.
//!
//! An ambient tunable surface, not a semantic one: nothing here changes what
//! a `Fetch` computes, only how eagerly the executor dispatches concurrent
//! data-source calls and how much it logs. Mirrors the builder pattern this
//! codebase uses for its HTTP client configuration.

/// Tunables for [`crate::executor::run`] and friends.
#[derive(Debug, Clone)]
pub struct ExecutorConfig {
    /// Upper bound on how many data-source groups within one `Concurrent`
    /// round are dispatched at once. `None` means all groups in a round are
    /// dispatched together.
    pub max_concurrent_sources: Option<usize>,
    /// Whether each round is also emitted as a `tracing` span/event.
    pub trace_rounds: bool,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_sources: None,
            trace_rounds: true,
        }
    }
}

impl ExecutorConfig {
    /// Create a new builder for `ExecutorConfig`.
    pub fn builder() -> ExecutorConfigBuilder {
        ExecutorConfigBuilder::new()
    }
}

/// Builder for [`ExecutorConfig`].
#[derive(Debug)]
pub struct ExecutorConfigBuilder {
    max_concurrent_sources: Option<usize>,
    trace_rounds: bool,
}

impl ExecutorConfigBuilder {
    fn new() -> Self {
        let default = ExecutorConfig::default();
        Self {
            max_concurrent_sources: default.max_concurrent_sources,
            trace_rounds: default.trace_rounds,
        }
    }

    /// Bound how many data-source groups a `Concurrent` round dispatches at once.
    pub fn max_concurrent_sources(mut self, max: usize) -> Self {
        self.max_concurrent_sources = Some(max);
        self
    }

    /// Enable or disable per-round `tracing` spans/events.
    pub fn trace_rounds(mut self, trace: bool) -> Self {
        self.trace_rounds = trace;
        self
    }

    /// Build the `ExecutorConfig`.
    pub fn build(self) -> ExecutorConfig {
        ExecutorConfig {
            max_concurrent_sources: self.max_concurrent_sources,
            trace_rounds: self.trace_rounds,
        }
    }
}
