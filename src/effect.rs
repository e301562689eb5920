//! The effect substrate: the minimal capability the executor needs from
//! whatever runs asynchronous work.
//!
//! Rather than emulate an abstract monad with `of`/`fail`/`then`/`parallel`
//! methods, this crate specializes directly onto `std::future::Future` and
//! `Result`, since Rust already has first-class async tasks: `of` is simply
//! returning a value from an `async fn`, `fail` is `Result::Err`, `then` is
//! `.await` followed by further code, and [`parallel`] is the one piece of
//! the contract that needs a named helper.

use std::future::Future;
use std::pin::Pin;

/// A boxed, owned future — the engine's currency for "a unit of asynchronous
/// work", used wherever a collection of heterogeneous futures needs to be
/// stored or awaited together.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Run a set of independent effects in parallel, collecting their results in
/// submission order. On the first failure, the remaining effects are not
/// waited on and their results are discarded — this is what gives the
/// executor's `Concurrent` rounds all-or-nothing cache commits.
pub(crate) async fn parallel<T, E>(effects: Vec<BoxFuture<'static, Result<T, E>>>) -> Result<Vec<T>, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    futures::future::try_join_all(effects).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn parallel_collects_in_submission_order() {
        let effects: Vec<BoxFuture<'static, Result<i32, ()>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { Ok(2) }),
            Box::pin(async { Ok(3) }),
        ];
        assert_eq!(parallel(effects).await, Ok(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn parallel_surfaces_the_first_failure() {
        let effects: Vec<BoxFuture<'static, Result<i32, &'static str>>> = vec![
            Box::pin(async { Ok(1) }),
            Box::pin(async { Err("boom") }),
        ];
        assert_eq!(parallel(effects).await, Err("boom"));
    }
}
