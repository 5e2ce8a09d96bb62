//! The seam between the stream service and whatever talks HTTP

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::connection_errors::ConnectorResult;
use crate::stream_configuration::ITEM_LIMIT;
use crate::things::{Comment, Message, ModAction, Post};

/// Listing pagination parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListOptions {
    /// Maximum items per page (Reddit caps this at 100)
    pub limit: usize,
    /// Return items newer than this full id
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
}

impl Default for ListOptions {
    fn default() -> Self {
        Self {
            limit: ITEM_LIMIT,
            before: None,
        }
    }
}

impl ListOptions {
    pub fn new(limit: usize, before: Option<String>) -> Self {
        Self { limit, before }
    }
}

/// Fetches the newest page of each listing the stream service can follow.
///
/// Every method returns items newest first. Implementations own transport,
/// authentication and response decoding.
#[async_trait]
pub trait ListingSource: Send + Sync + 'static {
    async fn new_posts(&self, subreddit: &str, opts: &ListOptions) -> ConnectorResult<Vec<Post>>;

    async fn new_comments(
        &self,
        subreddit: &str,
        opts: &ListOptions,
    ) -> ConnectorResult<Vec<Comment>>;

    async fn mod_actions(
        &self,
        subreddit: &str,
        opts: &ListOptions,
    ) -> ConnectorResult<Vec<ModAction>>;

    /// Unread comment replies and unread direct messages, in that order
    async fn inbox_unread(
        &self,
        opts: &ListOptions,
    ) -> ConnectorResult<(Vec<Message>, Vec<Message>)>;

    /// Reported posts and reported comments, in that order
    async fn reported(
        &self,
        subreddit: &str,
        opts: &ListOptions,
    ) -> ConnectorResult<(Vec<Post>, Vec<Comment>)>;
}
