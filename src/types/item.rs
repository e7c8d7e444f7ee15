//! The unified content item produced by normalization.

use serde::{Deserialize, Serialize};

use super::{now_secs, LIKE_COLLECTION, POST_COLLECTION, REPOST_COLLECTION};

/// Weight of one like in the engagement score.
pub const LIKE_WEIGHT: f64 = 1.0;

/// Weight of one repost in the engagement score.
pub const REPOST_WEIGHT: f64 = 2.0;

/// Weight of one reply in the engagement score.
pub const REPLY_WEIGHT: f64 = 2.5;

/// The kind of record a content item was normalized from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentType {
    /// A post authored by the account.
    Post,
    /// A like of someone else's content.
    Like,
    /// A repost of someone else's content.
    Repost,
}

impl ContentType {
    /// Map a collection NSID to its content type, returning None for untracked collections.
    pub fn from_collection(collection: &str) -> Option<Self> {
        match collection {
            POST_COLLECTION => Some(Self::Post),
            LIKE_COLLECTION => Some(Self::Like),
            REPOST_COLLECTION => Some(Self::Repost),
            _ => None,
        }
    }

    /// The collection NSID records of this type live in.
    pub fn collection(&self) -> &'static str {
        match self {
            Self::Post => POST_COLLECTION,
            Self::Like => LIKE_COLLECTION,
            Self::Repost => REPOST_COLLECTION,
        }
    }

    /// Return a human-readable name for this content type.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Post => "post",
            Self::Like => "like",
            Self::Repost => "repost",
        }
    }

    /// Parse a content type from a string name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_lowercase().as_str() {
            "post" | "posts" => Some(Self::Post),
            "like" | "likes" => Some(Self::Like),
            "repost" | "reposts" => Some(Self::Repost),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContentType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Engagement counts for one piece of content.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementCounts {
    pub likes: u64,
    pub reposts: u64,
    pub replies: u64,
}

impl EngagementCounts {
    pub fn new(likes: u64, reposts: u64, replies: u64) -> Self {
        Self {
            likes,
            reposts,
            replies,
        }
    }

    /// Weighted engagement: `likes + 2 * reposts + 2.5 * replies`.
    pub fn score(&self) -> f64 {
        self.likes as f64 * LIKE_WEIGHT
            + self.reposts as f64 * REPOST_WEIGHT
            + self.replies as f64 * REPLY_WEIGHT
    }
}

/// A single normalized record from the account's history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    /// Globally unique record identifier (`at://did/collection/rkey`).
    pub uri: String,
    /// Content hash (CID) of the record.
    pub content_hash: String,
    /// Which collection the record came from.
    pub content_type: ContentType,
    /// Post text. Empty for likes and reposts.
    pub text: String,
    /// When the record was created (Unix epoch seconds).
    pub created_at: i64,
    /// DID of the account that authored the record.
    pub author_id: String,
    /// For likes and reposts: the uri of the content acted on.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_uri: Option<String>,
    pub like_count: u64,
    pub repost_count: u64,
    pub reply_count: u64,
}

impl ContentItem {
    /// Current engagement counts.
    pub fn counts(&self) -> EngagementCounts {
        EngagementCounts::new(self.like_count, self.repost_count, self.reply_count)
    }

    /// Overwrite all three engagement counts.
    pub fn apply_counts(&mut self, counts: EngagementCounts) {
        self.like_count = counts.likes;
        self.repost_count = counts.reposts;
        self.reply_count = counts.replies;
    }

    /// Derived engagement score, recomputed from the counts on every call.
    pub fn engagement_score(&self) -> f64 {
        self.counts().score()
    }

    /// Age of the item in whole seconds at `now` (never negative).
    pub fn age_secs(&self, now: i64) -> i64 {
        (now - self.created_at).max(0)
    }
}

/// Builder for constructing ContentItem instances ergonomically.
pub struct ContentItemBuilder {
    uri: String,
    content_type: ContentType,
    content_hash: String,
    text: String,
    created_at: Option<i64>,
    author_id: String,
    subject_uri: Option<String>,
    counts: EngagementCounts,
}

impl ContentItemBuilder {
    /// Create a new builder with the required fields.
    pub fn new(content_type: ContentType, uri: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            content_type,
            content_hash: String::new(),
            text: String::new(),
            created_at: None,
            author_id: String::new(),
            subject_uri: None,
            counts: EngagementCounts::default(),
        }
    }

    /// Set the content hash.
    pub fn content_hash(mut self, hash: impl Into<String>) -> Self {
        self.content_hash = hash.into();
        self
    }

    /// Set the text.
    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.text = text.into();
        self
    }

    /// Set the creation timestamp (epoch seconds).
    pub fn created_at(mut self, ts: i64) -> Self {
        self.created_at = Some(ts);
        self
    }

    /// Set the author DID.
    pub fn author_id(mut self, author: impl Into<String>) -> Self {
        self.author_id = author.into();
        self
    }

    /// Set the subject uri for likes and reposts.
    pub fn subject_uri(mut self, subject: impl Into<String>) -> Self {
        self.subject_uri = Some(subject.into());
        self
    }

    /// Set initial engagement counts.
    pub fn counts(mut self, counts: EngagementCounts) -> Self {
        self.counts = counts;
        self
    }

    /// Build the ContentItem. Without an explicit timestamp the item is created "now".
    pub fn build(self) -> ContentItem {
        ContentItem {
            uri: self.uri,
            content_hash: self.content_hash,
            content_type: self.content_type,
            text: self.text,
            created_at: self.created_at.unwrap_or_else(now_secs),
            author_id: self.author_id,
            subject_uri: self.subject_uri,
            like_count: self.counts.likes,
            repost_count: self.counts.reposts,
            reply_count: self.counts.replies,
        }
    }
}
