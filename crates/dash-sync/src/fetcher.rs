//! The fetch procedure interface supplied per binding by the caller.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;

use crate::error::FetchError;

/// A zero-argument async operation returning the resource value or a fetch
/// failure.
///
/// Timeout and retry policy belong to the implementation; the coordinator
/// only reacts to settlement. Safe-to-call-concurrently is not required:
/// the coordinator guarantees at most one outstanding call per key.
#[async_trait]
pub trait Fetcher<T>: Send + Sync {
    /// Fetch the resource value.
    async fn fetch(&self) -> Result<T, FetchError>;
}

struct FnFetcher<T> {
    f: Box<dyn Fn() -> BoxFuture<'static, Result<T, FetchError>> + Send + Sync>,
}

#[async_trait]
impl<T: Send + 'static> Fetcher<T> for FnFetcher<T> {
    async fn fetch(&self) -> Result<T, FetchError> {
        (self.f)().await
    }
}

/// Adapt a closure returning a future into a [`Fetcher`].
///
/// # Example
///
/// ```rust,ignore
/// let fetcher = fetcher_fn(move || {
///     let client = client.clone();
///     async move { client.load_attempts().await }
/// });
/// ```
pub fn fetcher_fn<T, F, Fut>(f: F) -> Arc<dyn Fetcher<T>>
where
    T: Send + 'static,
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, FetchError>> + Send + 'static,
{
    Arc::new(FnFetcher {
        f: Box::new(move || f().boxed()),
    })
}
