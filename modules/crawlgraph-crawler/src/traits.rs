// Trait seams for the crawler's external collaborators.
//
// SourceApi + PageIterator: the social platform, one paged iterator per
//   follower/followee/post listing.
// ContentAnalyzer: the LLM used for post and account analysis.
// Sleeper: every pacing delay, so tests can observe cooldowns without waiting.
//
// MockSource, MockAnalyzer and RecordingSleeper in `testing` implement these
// for deterministic tests: no network, no Neo4j.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crawlgraph_common::{RawComment, RawPost, RawProfile, RawUser, ResumeCursor};

// ---------------------------------------------------------------------------
// Source platform
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SourceError {
    #[error("rate limited by the source platform")]
    RateLimited,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("session expired")]
    SessionExpired,

    #[error("invalid pagination cursor: {0}")]
    InvalidCursor(String),

    #[error("transient source error: {0}")]
    Transient(String),
}

/// A server-side paged listing consumed one item at a time.
///
/// `checkpoint` is the exact position after the last item returned by
/// `next_item`: the token of the page holding the next item plus how many
/// of that page's items were already consumed. It is `None` until the first
/// page has been fetched or a cursor resumed.
#[async_trait]
pub trait PageIterator: Send {
    type Item: Send;

    fn checkpoint(&self) -> Option<ResumeCursor>;

    /// Items returned so far, including any carried over by `resume`.
    fn total_index(&self) -> u64;

    /// Position the iterator at a saved checkpoint. Only valid before the
    /// first `next_item` call.
    fn resume(&mut self, cursor: &ResumeCursor) -> Result<(), SourceError>;

    async fn next_item(&mut self) -> Result<Option<Self::Item>, SourceError>;
}

pub type UserPages = Box<dyn PageIterator<Item = RawUser>>;
pub type PostPages = Box<dyn PageIterator<Item = RawPost>>;

#[async_trait]
pub trait SourceApi: Send + Sync {
    /// Load the stored session for `account` and make it the active identity
    /// for subsequent calls, including iterators created afterwards.
    async fn login(&self, account: &str) -> Result<(), SourceError>;

    async fn profile(&self, handle: &str) -> Result<RawProfile, SourceError>;

    fn followers(&self, profile: &RawProfile) -> UserPages;

    fn followees(&self, profile: &RawProfile) -> UserPages;

    fn posts(&self, profile: &RawProfile) -> PostPages;

    /// Top-level comments with their replies and comment likers.
    async fn post_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, SourceError>;

    async fn post_likers(&self, post: &RawPost) -> Result<Vec<RawUser>, SourceError>;
}

// ---------------------------------------------------------------------------
// Content analyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AnalyzerError {
    #[error("analyzer quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("analyzer API key rejected")]
    InvalidKey,

    #[error("analysis failed: {0}")]
    Failed(String),
}

#[async_trait]
pub trait ContentAnalyzer: Send + Sync {
    async fn analyze_image(&self, url: &str, system: &str) -> Result<Value, AnalyzerError>;

    async fn analyze_text(&self, prompt: &str, system: &str) -> Result<Value, AnalyzerError>;
}

// ---------------------------------------------------------------------------
// Sleeper
// ---------------------------------------------------------------------------

#[async_trait]
pub trait Sleeper: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

pub struct TokioSleeper;

#[async_trait]
impl Sleeper for TokioSleeper {
    async fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            tokio::time::sleep(duration).await;
        }
    }
}
