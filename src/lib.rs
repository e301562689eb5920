//! # fetch-engine
//!
//! A deferred, batching, deduplicating, caching data-fetching engine in the
//! style of Haxl and Scala's Fetch: describe *what* data you need as a pure
//! [`ast::Fetch`] value, independent of *when* or *from which backend* it is
//! obtained, and let the [`executor`] figure out how to fetch it with as few
//! backend round trips as possible.
//!
//! ## Quick start
//!
//! ```no_run
//! use async_trait::async_trait;
//! use fetch_engine::source::DataSource;
//! use fetch_engine::{ast, error::FetchError, executor};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! struct ArticleDS;
//!
//! #[async_trait]
//! impl DataSource for ArticleDS {
//!     type Req = i32;
//!     type Resp = String;
//!
//!     fn name(&self) -> &str {
//!         "ArticleDS"
//!     }
//!
//!     async fn fetch(&self, reqs: &[i32]) -> Result<HashMap<i32, String>, FetchError> {
//!         Ok(reqs.iter().map(|&id| (id, format!("article {id}"))).collect())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let ds = Arc::new(ArticleDS);
//! let fetch = ast::join(ast::fetch_one(&ds, 1), ast::fetch_one(&ds, 2));
//! let (a, b) = executor::run(fetch).await?;
//! assert_eq!((a, b), ("article 1".to_string(), "article 2".to_string()));
//! # Ok(())
//! # }
//! ```
//!
//! `join` above issues exactly one batched call to `ArticleDS` for `[1, 2]`,
//! rather than two independent calls — the same fusion applies to
//! [`ast::collect`] and [`ast::traverse`] over many independent fetches, and
//! [`Fetch::flat_map`] is the one combinator that introduces a sequencing
//! barrier between rounds.
//!
//! ## Module map
//!
//! - `effect` — the minimal async capability the executor needs (`Future` + `parallel`).
//! - [`source`] — the [`source::DataSource`] contract and its type erasure.
//! - [`cache`] — the content-addressed, purely-functional [`cache::Cache`].
//! - [`ast`] — the [`ast::Fetch`] description language and its combinators.
//! - [`executor`] — the interpreter that turns a `Fetch` into a result.
//! - [`diagnostics`] — per-round history ([`diagnostics::Round`], [`diagnostics::RoundLog`]).
//! - [`config`] — [`config::ExecutorConfig`], an ambient tuning surface.
//! - [`error`] — the [`error::FetchError`] hierarchy.

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

/// The `Fetch` description language and its combinators.
pub mod ast;
/// Content-addressed, purely-functional response cache.
pub mod cache;
/// Ambient executor configuration.
pub mod config;
/// Per-round execution history.
pub mod diagnostics;
/// The minimal async capability the executor needs from its runtime.
mod effect;
/// Error types and result definitions.
pub mod error;
/// The interpreter that resolves a `Fetch` against data sources and a cache.
pub mod executor;
/// The data-source contract and its type erasure.
pub mod source;

pub use ast::Fetch;
pub use cache::Cache;
pub use config::{ExecutorConfig, ExecutorConfigBuilder};
pub use diagnostics::{Round, RoundLog, RoundShape, SourceCall};
pub use error::{ErrorCategory, FetchError, Result};
pub use executor::{run, run_env_only, run_with_cache, run_with_config, run_with_env, Environment, FetchFailure};
pub use source::DataSource;
