//! Shared types for polling streams
//!
//! The engine only needs two things from an item: a stable identifier and,
//! optionally, when it was created. Everything else about posts, comments
//! and messages is opaque to it.

use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures_util::stream::BoxStream;
use futures_util::FutureExt;
use std::future::Future;
use std::sync::Arc;

use crate::error::StreamResult;

/// A boxed, heap-allocated stream
pub type ItemStream<O> = BoxStream<'static, O>;

/// Anything a polling stream can deliver
pub trait Streamable: Send + 'static {
    /// Stable identifier, also used as the pagination cursor
    fn id(&self) -> &str;

    /// Creation time; items without one never advance the cursor
    fn created(&self) -> Option<DateTime<Utc>> {
        None
    }
}

/// What a fetch function is asked for on every tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    /// Subreddit (or other scope) the stream was opened for
    pub scope: String,
    /// Identifier to fetch items newer than, if any
    pub cursor: Option<String>,
}

pub type FetchFuture<T> = BoxFuture<'static, StreamResult<Vec<T>>>;

/// Fetches one page, newest item first
pub type FetchFn<T> = Arc<dyn Fn(FetchRequest) -> FetchFuture<T> + Send + Sync>;

/// Extracts the deduplication key of an item
pub type KeyFn<T> = Arc<dyn Fn(&T) -> String + Send + Sync>;

/// Box an async closure into a [`FetchFn`].
///
/// # Examples
/// ```
/// use reddit_stream::stream_types::{fetch_fn, FetchFn};
/// use reddit_stream::things::Post;
///
/// let fetch: FetchFn<Post> = fetch_fn(|req| async move {
///     println!("fetching r/{} before {:?}", req.scope, req.cursor);
///     Ok(Vec::new())
/// });
/// # let _ = fetch;
/// ```
pub fn fetch_fn<T, F, Fut>(f: F) -> FetchFn<T>
where
    F: Fn(FetchRequest) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = StreamResult<Vec<T>>> + Send + 'static,
    T: Send + 'static,
{
    Arc::new(move |req| f(req).boxed())
}

/// Box a closure into a [`KeyFn`].
pub fn key_fn<T, F>(f: F) -> KeyFn<T>
where
    F: Fn(&T) -> String + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Which output channel of a two-channel stream an item belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Route {
    First,
    Second,
}

impl Route {
    pub(crate) fn index(self) -> usize {
        match self {
            Route::First => 0,
            Route::Second => 1,
        }
    }
}

/// An item already classified for a two-channel stream
#[derive(Debug, Clone, PartialEq)]
pub enum Routed<A, B> {
    First(A),
    Second(B),
}

impl<A, B> Routed<A, B> {
    pub fn route(&self) -> Route {
        match self {
            Routed::First(_) => Route::First,
            Routed::Second(_) => Route::Second,
        }
    }
}

impl<A, B> Streamable for Routed<A, B>
where
    A: Streamable,
    B: Streamable,
{
    fn id(&self) -> &str {
        match self {
            Routed::First(a) => a.id(),
            Routed::Second(b) => b.id(),
        }
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        match self {
            Routed::First(a) => a.created(),
            Routed::Second(b) => b.created(),
        }
    }
}
