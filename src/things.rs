//! Listing items the stream service knows how to deliver
//!
//! Only the fields the streams and their callers commonly need are modelled.
//! Field names follow Reddit's listing JSON so a source can deserialize
//! responses straight into these types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::stream_types::{Routed, Streamable};

/// Reported content, routed to the posts or the comments channel
pub type Reported = Routed<Post, Comment>;

/// Unread inbox entry, routed to the comment-replies or the direct-messages channel
pub type InboxItem = Routed<Message, Message>;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: String,
    #[serde(rename = "name")]
    pub full_id: String,
    pub subreddit: String,
    pub title: String,
    pub author: String,
    pub permalink: String,
    pub url: String,
    #[serde(rename = "selftext")]
    pub body: String,
    pub score: i64,
    pub num_comments: i64,
    pub num_reports: i64,
    #[serde(rename = "created_utc", with = "epoch_seconds")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: String,
    #[serde(rename = "name")]
    pub full_id: String,
    #[serde(rename = "link_id")]
    pub post_id: String,
    pub parent_id: String,
    pub subreddit: String,
    pub author: String,
    pub body: String,
    pub score: i64,
    pub num_reports: i64,
    #[serde(rename = "created_utc", with = "epoch_seconds")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Message {
    pub id: String,
    #[serde(rename = "name")]
    pub full_id: String,
    pub subject: String,
    pub author: String,
    pub dest: String,
    pub body: String,
    pub parent_id: String,
    /// Reply to a post or comment rather than a direct message
    #[serde(rename = "was_comment")]
    pub is_comment: bool,
    #[serde(rename = "created_utc", with = "epoch_seconds")]
    pub created: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ModAction {
    pub id: String,
    pub action: String,
    #[serde(rename = "mod")]
    pub moderator: String,
    pub subreddit: String,
    pub target_author: String,
    #[serde(rename = "target_fullname")]
    pub target_full_id: String,
    pub details: String,
    pub description: String,
    #[serde(rename = "created_utc", with = "epoch_seconds")]
    pub created: Option<DateTime<Utc>>,
}

// Full ids ("t3_…", "t1_…") are what `before=` expects, and they cannot
// collide between posts and comments sharing one stream.
fn full_or_short<'a>(full_id: &'a str, id: &'a str) -> &'a str {
    if full_id.is_empty() {
        id
    } else {
        full_id
    }
}

impl Streamable for Post {
    fn id(&self) -> &str {
        full_or_short(&self.full_id, &self.id)
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

impl Streamable for Comment {
    fn id(&self) -> &str {
        full_or_short(&self.full_id, &self.id)
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

impl Streamable for Message {
    fn id(&self) -> &str {
        full_or_short(&self.full_id, &self.id)
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

impl Streamable for ModAction {
    fn id(&self) -> &str {
        &self.id
    }

    fn created(&self) -> Option<DateTime<Utc>> {
        self.created
    }
}

impl Reported {
    /// Dedup key of a reported item: it comes back as a new event every
    /// time it collects another report.
    pub fn report_key(&self) -> String {
        match self {
            Routed::First(post) => format!("{}{}", post.id(), post.num_reports),
            Routed::Second(comment) => format!("{}{}", comment.id(), comment.num_reports),
        }
    }
}

impl InboxItem {
    pub fn from_message(message: Message) -> Self {
        if message.is_comment {
            Routed::First(message)
        } else {
            Routed::Second(message)
        }
    }
}

/// Reddit timestamps: fractional epoch seconds, sometimes absent or null
mod epoch_seconds {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(value: &Option<DateTime<Utc>>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match value {
            Some(ts) => serializer.serialize_f64(ts.timestamp_millis() as f64 / 1000.0),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = Option::<f64>::deserialize(deserializer)?;
        Ok(secs.and_then(|secs| DateTime::from_timestamp_millis((secs * 1000.0) as i64)))
    }
}
