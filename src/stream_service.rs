//! Per-listing entry points over the poll-stream engine
//!
//! Each method binds the engine to one [`ListingSource`] call and, for the
//! two-channel listings, to a routing rule. Reddit returns at most 100
//! items per listing, so very busy streams such as r/all can miss items
//! between two polls.
//!
//! All methods spawn onto the current tokio runtime and must be called from
//! within one.

use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::connectors::{ConnectorResult, ListOptions, ListingSource};
use crate::error::StreamError;
use crate::poll_stream::{
    spawn_split_stream, spawn_stream, LaneMode, SplitStreamHandle, StreamHandle,
};
use crate::stream_configuration::{StreamConfig, StreamOpt};
use crate::stream_types::{fetch_fn, key_fn, FetchRequest, Routed, Streamable};
use crate::things::{Comment, InboxItem, Message, ModAction, Post, Reported};

/// Scope reported to fetch functions of the inbox stream
pub const INBOX_SCOPE: &str = "inbox";

/// Streams new content from a [`ListingSource`] as it appears
pub struct StreamService<S> {
    source: Arc<S>,
    cursor_pagination: bool,
}

impl<S> Clone for StreamService<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
            cursor_pagination: self.cursor_pagination,
        }
    }
}

impl<S> StreamService<S>
where
    S: ListingSource,
{
    pub fn new(source: S) -> Self {
        Self::from_arc(Arc::new(source))
    }

    pub fn from_arc(source: Arc<S>) -> Self {
        Self {
            source,
            cursor_pagination: false,
        }
    }

    /// Pass the stream cursor to the source as `before`.
    ///
    /// Off by default: once the anchor item is deleted, Reddit answers every
    /// `before=` request with an empty listing. The id set alone already
    /// prevents duplicates.
    pub fn cursor_pagination(mut self, enabled: bool) -> Self {
        self.cursor_pagination = enabled;
        self
    }

    pub fn source(&self) -> &Arc<S> {
        &self.source
    }

    /// Stream new posts of a subreddit.
    pub fn posts(
        &self,
        token: CancellationToken,
        subreddit: &str,
        opts: impl IntoIterator<Item = StreamOpt<Post>>,
    ) -> StreamHandle<Post> {
        let config = self.bind(StreamConfig::from_opts(opts), |source, scope, list| async move {
            source.new_posts(&scope, &list).await
        });
        spawn_stream(token, subreddit, config)
    }

    /// Stream new comments of a subreddit, or of all of Reddit with `"all"`.
    pub fn comments(
        &self,
        token: CancellationToken,
        subreddit: &str,
        opts: impl IntoIterator<Item = StreamOpt<Comment>>,
    ) -> StreamHandle<Comment> {
        let config = self.bind(StreamConfig::from_opts(opts), |source, scope, list| async move {
            source.new_comments(&scope, &list).await
        });
        spawn_stream(token, subreddit, config)
    }

    /// Stream the moderation log of a subreddit.
    pub fn actions(
        &self,
        token: CancellationToken,
        subreddit: &str,
        opts: impl IntoIterator<Item = StreamOpt<ModAction>>,
    ) -> StreamHandle<ModAction> {
        let config = self.bind(StreamConfig::from_opts(opts), |source, scope, list| async move {
            source.mod_actions(&scope, &list).await
        });
        spawn_stream(token, subreddit, config)
    }

    /// Stream unread inbox entries: comment replies on `first`, direct
    /// messages on `second`.
    pub fn inbox_unread(
        &self,
        token: CancellationToken,
        opts: impl IntoIterator<Item = StreamOpt<InboxItem>>,
    ) -> SplitStreamHandle<Message, Message> {
        let config = self.bind(StreamConfig::from_opts(opts), |source, _scope, list| async move {
            source.inbox_unread(&list).await.map(|(replies, direct)| {
                let mut unread: Vec<Message> = replies.into_iter().chain(direct).collect();
                // One newest-first pass over both kinds, as the inbox listing itself is ordered.
                unread.sort_by(|a, b| b.created.cmp(&a.created));
                unread
                    .into_iter()
                    .map(InboxItem::from_message)
                    .collect::<Vec<_>>()
            })
        });
        spawn_split_stream(token, INBOX_SCOPE, config, LaneMode::Shared)
    }

    /// Stream reported content: posts on `first`, comments on `second`.
    ///
    /// An item is delivered again whenever its report count changes.
    pub fn reported(
        &self,
        token: CancellationToken,
        subreddit: &str,
        opts: impl IntoIterator<Item = StreamOpt<Reported>>,
    ) -> SplitStreamHandle<Post, Comment> {
        let mut config = StreamConfig::from_opts(opts);
        if config.dedup_key.is_none() {
            config = config.dedup_key(key_fn(Reported::report_key));
        }
        let config = self.bind(config, |source, scope, list| async move {
            source.reported(&scope, &list).await.map(|(posts, comments)| {
                posts
                    .into_iter()
                    .map(Routed::First)
                    .chain(comments.into_iter().map(Routed::Second))
                    .collect::<Vec<_>>()
            })
        });
        spawn_split_stream(token, subreddit, config, LaneMode::PerRoute)
    }

    /// Stream any item type through a caller-supplied fetch function.
    ///
    /// Without [`StreamOpt::FetchWith`] the stream reports
    /// [`StreamError::InvalidConfiguration`] and closes.
    pub fn stream<T>(
        &self,
        token: CancellationToken,
        scope: &str,
        opts: impl IntoIterator<Item = StreamOpt<T>>,
    ) -> StreamHandle<T>
    where
        T: Streamable,
    {
        spawn_stream(token, scope, StreamConfig::from_opts(opts))
    }

    /// Attach a fetch function calling the source, unless the caller
    /// already supplied one.
    fn bind<T, F, Fut>(&self, config: StreamConfig<T>, call: F) -> StreamConfig<T>
    where
        T: Send + 'static,
        F: Fn(Arc<S>, String, ListOptions) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ConnectorResult<Vec<T>>> + Send + 'static,
    {
        if config.fetch.is_some() {
            return config;
        }

        let source = Arc::clone(&self.source);
        let limit = config.page_size;
        let cursor_pagination = self.cursor_pagination;
        let fetch = fetch_fn(move |req: FetchRequest| {
            let before = if cursor_pagination { req.cursor } else { None };
            let page = call(Arc::clone(&source), req.scope, ListOptions::new(limit, before));
            async move { page.await.map_err(StreamError::from) }
        });
        config.fetch_with(fetch)
    }
}
