use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CrawlGraphError;
use crate::source::{RawComment, RawPost, RawProfile, RawUser};

/// Stable numeric identifier assigned by the source platform.
pub type EntityId = i64;

// ---------------------------------------------------------------------------
// Stages and data types
// ---------------------------------------------------------------------------

/// Pipeline stages after the profile fetch, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Followers,
    Followees,
    Posts,
    PostsAnalysis,
    AccountAnalysis,
}

impl Stage {
    pub const ALL: [Stage; 5] = [
        Stage::Followers,
        Stage::Followees,
        Stage::Posts,
        Stage::PostsAnalysis,
        Stage::AccountAnalysis,
    ];

    /// Name used in logs and in the completion-flag property.
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Followers => "followers",
            Stage::Followees => "followees",
            Stage::Posts => "posts",
            Stage::PostsAnalysis => "posts_analysis",
            Stage::AccountAnalysis => "account_analysis",
        }
    }

    /// The paginated data type this stage drains, if any.
    pub fn data_type(&self) -> Option<DataType> {
        match self {
            Stage::Followers => Some(DataType::Followers),
            Stage::Followees => Some(DataType::Followees),
            Stage::Posts => Some(DataType::Posts),
            Stage::PostsAnalysis | Stage::AccountAnalysis => None,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = CrawlGraphError;

    /// Accepts the CLI spellings (`follower`, `post-analysis`) as well as the
    /// flag names (`followers`, `posts_analysis`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().replace('-', "_").as_str() {
            "follower" | "followers" => Ok(Stage::Followers),
            "followee" | "followees" => Ok(Stage::Followees),
            "post" | "posts" => Ok(Stage::Posts),
            "post_analysis" | "posts_analysis" => Ok(Stage::PostsAnalysis),
            "account_analysis" => Ok(Stage::AccountAnalysis),
            other => Err(CrawlGraphError::Config(format!("unknown stage: {other}"))),
        }
    }
}

/// Paginated resources whose cursors are checkpointed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    Followers,
    Followees,
    Posts,
}

impl DataType {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataType::Followers => "followers",
            DataType::Followees => "followees",
            DataType::Posts => "posts",
        }
    }

    /// Entity property holding the shared resume cursor.
    pub fn cursor_property(&self) -> &'static str {
        match self {
            DataType::Followers => "_shared_followers_cursor",
            DataType::Followees => "_shared_followees_cursor",
            DataType::Posts => "_shared_posts_cursor",
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Completion flags
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompletionFlags {
    pub profile: bool,
    pub followers: bool,
    pub followees: bool,
    pub posts: bool,
    pub posts_analysis: bool,
    pub account_analysis: bool,
}

impl CompletionFlags {
    pub fn get(&self, stage: Stage) -> bool {
        match stage {
            Stage::Followers => self.followers,
            Stage::Followees => self.followees,
            Stage::Posts => self.posts,
            Stage::PostsAnalysis => self.posts_analysis,
            Stage::AccountAnalysis => self.account_analysis,
        }
    }

    /// Apply a partial update; fields left `None` are untouched.
    pub fn apply(&mut self, update: &FlagUpdate) {
        if let Some(v) = update.profile {
            self.profile = v;
        }
        if let Some(v) = update.followers {
            self.followers = v;
        }
        if let Some(v) = update.followees {
            self.followees = v;
        }
        if let Some(v) = update.posts {
            self.posts = v;
        }
        if let Some(v) = update.posts_analysis {
            self.posts_analysis = v;
        }
        if let Some(v) = update.account_analysis {
            self.account_analysis = v;
        }
    }
}

/// Partial update of completion flags.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlagUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followees: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posts_analysis: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub account_analysis: Option<bool>,
}

impl FlagUpdate {
    pub fn stage(stage: Stage, value: bool) -> Self {
        Self::default().with(stage, value)
    }

    pub fn with(mut self, stage: Stage, value: bool) -> Self {
        match stage {
            Stage::Followers => self.followers = Some(value),
            Stage::Followees => self.followees = Some(value),
            Stage::Posts => self.posts = Some(value),
            Stage::PostsAnalysis => self.posts_analysis = Some(value),
            Stage::AccountAnalysis => self.account_analysis = Some(value),
        }
        self
    }

    pub fn is_empty(&self) -> bool {
        self.profile.is_none()
            && self.followers.is_none()
            && self.followees.is_none()
            && self.posts.is_none()
            && self.posts_analysis.is_none()
            && self.account_analysis.is_none()
    }

    /// `(property, value)` pairs for the supplied fields only.
    pub fn assignments(&self) -> Vec<(&'static str, bool)> {
        [
            ("_profile_complete", self.profile),
            ("_followers_complete", self.followers),
            ("_followees_complete", self.followees),
            ("_posts_complete", self.posts),
            ("_posts_analysis_complete", self.posts_analysis),
            ("_account_analysis_complete", self.account_analysis),
        ]
        .into_iter()
        .filter_map(|(prop, v)| v.map(|v| (prop, v)))
        .collect()
    }
}

// ---------------------------------------------------------------------------
// Resume cursor
// ---------------------------------------------------------------------------

/// Account-agnostic pagination checkpoint: the page token plus the number of
/// items already consumed, `skip` of them from the page at `end_cursor`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeCursor {
    pub end_cursor: String,
    pub count: u64,
    #[serde(default)]
    pub skip: u64,
}

impl ResumeCursor {
    /// Token standing for the listing's first page, which the source fetches
    /// without any cursor.
    pub const FIRST_PAGE: &'static str = "@first";

    /// Position at the start of the page fetched by `end_cursor`.
    pub fn new(end_cursor: impl Into<String>, count: u64) -> Self {
        Self {
            end_cursor: end_cursor.into(),
            count,
            skip: 0,
        }
    }

    /// Position `skip` items into the page fetched by `end_cursor`.
    pub fn within_page(end_cursor: impl Into<String>, count: u64, skip: u64) -> Self {
        Self {
            end_cursor: end_cursor.into(),
            count,
            skip,
        }
    }

    pub fn is_first_page(&self) -> bool {
        self.end_cursor == Self::FIRST_PAGE
    }

    pub fn to_json(&self) -> String {
        let mut value =
            serde_json::json!({ "end_cursor": self.end_cursor, "count": self.count });
        if self.skip > 0 {
            value["skip"] = self.skip.into();
        }
        value.to_string()
    }

    /// Parse a stored cursor. Legacy or hand-edited shapes are rejected so the
    /// caller can discard them and start over.
    pub fn from_json(raw: &str) -> Result<Self, CrawlGraphError> {
        let cursor: ResumeCursor = serde_json::from_str(raw)
            .map_err(|e| CrawlGraphError::MalformedCursor(e.to_string()))?;
        if cursor.end_cursor.is_empty() {
            return Err(CrawlGraphError::MalformedCursor("empty end_cursor".into()));
        }
        if cursor.skip > cursor.count {
            return Err(CrawlGraphError::MalformedCursor(
                "skip exceeds consumed count".into(),
            ));
        }
        Ok(cursor)
    }
}

// ---------------------------------------------------------------------------
// Entities
// ---------------------------------------------------------------------------

/// Full profile record written by the profile stage.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EntityRecord {
    pub id: EntityId,
    pub username: String,
    pub fullname: String,
    pub bio: String,
    pub biography_mentions: Vec<String>,
    pub biography_hashtags: Vec<String>,
    pub business_category_name: String,
    pub external_url: String,
    pub followers: i64,
    pub followees: i64,
    pub mediacount: i64,
    pub is_private: bool,
    pub is_verified: bool,
    pub is_business_account: bool,
    pub has_highlight_reels: bool,
    pub has_public_story: bool,
    pub profile_pic_url: String,
    pub profile_pic_url_no_iphone: String,
    /// Enrichment written by the account-analysis stage. Empty means "keep
    /// whatever is stored".
    pub account_analysis: String,
}

impl EntityRecord {
    /// Map a source profile onto the stored record. Every field is listed so
    /// additions to `RawProfile` are a compile-time decision here.
    pub fn from_profile(p: &RawProfile) -> Self {
        Self {
            id: p.user_id,
            username: p.username.clone(),
            fullname: p.full_name.clone().unwrap_or_default(),
            bio: p.biography.clone().unwrap_or_default(),
            biography_mentions: p.biography_mentions.clone(),
            biography_hashtags: p.biography_hashtags.clone(),
            business_category_name: p.business_category_name.clone().unwrap_or_default(),
            external_url: p.external_url.clone().unwrap_or_default(),
            followers: p.followers as i64,
            followees: p.followees as i64,
            mediacount: p.mediacount as i64,
            is_private: p.is_private,
            is_verified: p.is_verified,
            is_business_account: p.is_business_account,
            has_highlight_reels: p.has_highlight_reels,
            has_public_story: p.has_public_story,
            profile_pic_url: p.profile_pic_url.clone().unwrap_or_default(),
            profile_pic_url_no_iphone: p.profile_pic_url_no_iphone.clone().unwrap_or_default(),
            account_analysis: String::new(),
        }
    }

    /// Merge-preserving overlay: non-empty text in `incoming` wins, empty text
    /// keeps the stored value. Counts and booleans always take the fresh value.
    pub fn merge(&mut self, incoming: &EntityRecord) {
        fn keep(stored: &mut String, fresh: &str) {
            if !fresh.is_empty() {
                *stored = fresh.to_string();
            }
        }
        self.id = incoming.id;
        keep(&mut self.username, &incoming.username);
        keep(&mut self.fullname, &incoming.fullname);
        keep(&mut self.bio, &incoming.bio);
        if !incoming.biography_mentions.is_empty() {
            self.biography_mentions = incoming.biography_mentions.clone();
        }
        if !incoming.biography_hashtags.is_empty() {
            self.biography_hashtags = incoming.biography_hashtags.clone();
        }
        keep(&mut self.business_category_name, &incoming.business_category_name);
        keep(&mut self.external_url, &incoming.external_url);
        self.followers = incoming.followers;
        self.followees = incoming.followees;
        self.mediacount = incoming.mediacount;
        self.is_private = incoming.is_private;
        self.is_verified = incoming.is_verified;
        self.is_business_account = incoming.is_business_account;
        self.has_highlight_reels = incoming.has_highlight_reels;
        self.has_public_story = incoming.has_public_story;
        keep(&mut self.profile_pic_url, &incoming.profile_pic_url);
        keep(&mut self.profile_pic_url_no_iphone, &incoming.profile_pic_url_no_iphone);
        keep(&mut self.account_analysis, &incoming.account_analysis);
    }
}

/// Lightweight entity seen as a follower, followee, liker or commenter.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EntityStub {
    pub id: EntityId,
    pub username: String,
    pub fullname: String,
    pub profile_pic_url: String,
    pub is_verified: bool,
}

impl EntityStub {
    pub fn from_user(u: &RawUser) -> Self {
        Self {
            id: u.id,
            username: u.username.clone(),
            fullname: u.full_name.clone().unwrap_or_default(),
            profile_pic_url: u.profile_pic_url.clone().unwrap_or_default(),
            is_verified: u.is_verified,
        }
    }
}

/// Minimal view used when a candidate is chosen for exploration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    pub username: String,
    pub followers_count: i64,
}

/// Which exploration query produced the candidate list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CandidateTier {
    /// Followees whose profile has never been fetched.
    IncompleteProfile,
    /// Followees with a profile but missing followers, followees or posts.
    IncompleteGraph,
}

// ---------------------------------------------------------------------------
// Posts and comments
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostRecord {
    pub id: EntityId,
    pub shortcode: String,
    pub owner_id: EntityId,
    pub typename: String,
    pub is_video: bool,
    pub video_duration: f64,
    pub video_view_count: i64,
    pub caption: String,
    pub caption_hashtags: Vec<String>,
    pub caption_mentions: Vec<String>,
    pub accessibility_caption: String,
    pub likes: i64,
    pub comments: i64,
    pub date_utc: Option<DateTime<Utc>>,
    pub mediacount: i64,
    pub title: String,
    pub tagged_users: Vec<String>,
    pub is_sponsored: bool,
    pub is_pinned: bool,
    pub media_urls: Vec<String>,
    pub image_analysis: String,
    pub post_analysis: String,
}

impl PostRecord {
    pub fn from_raw(p: &RawPost) -> Self {
        Self {
            id: p.media_id,
            shortcode: p.shortcode.clone(),
            owner_id: p.owner_id,
            typename: p.typename.clone().unwrap_or_default(),
            is_video: p.is_video,
            video_duration: p.video_duration.unwrap_or(0.0),
            video_view_count: p.video_view_count.unwrap_or(0),
            caption: p.caption.clone().unwrap_or_default(),
            caption_hashtags: p.caption_hashtags.clone(),
            caption_mentions: p.caption_mentions.clone(),
            accessibility_caption: p.accessibility_caption.clone().unwrap_or_default(),
            likes: p.likes as i64,
            comments: p.comments as i64,
            date_utc: p.date_utc,
            mediacount: p.mediacount as i64,
            title: p.title.clone().unwrap_or_default(),
            tagged_users: p.tagged_users.clone(),
            is_sponsored: p.is_sponsored,
            is_pinned: p.is_pinned,
            media_urls: p.media_urls.clone(),
            image_analysis: String::new(),
            post_analysis: String::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: EntityId,
    pub owner_id: EntityId,
    pub text: String,
    pub likes_count: i64,
    pub created_at: Option<DateTime<Utc>>,
    /// Parent comment for replies.
    pub reply_to: Option<EntityId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentLike {
    pub comment_id: EntityId,
    pub liker: EntityStub,
}

/// Everything ingested for one post in a single write.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PostBundle {
    pub post: PostRecord,
    pub likers: Vec<EntityStub>,
    pub comments: Vec<CommentRecord>,
    pub commenters: Vec<EntityStub>,
    pub comment_likes: Vec<CommentLike>,
}

impl PostBundle {
    /// Flatten source comments (and their answers) into records, commenters
    /// and comment likes.
    pub fn assemble(post: &RawPost, likers: &[RawUser], comments: &[RawComment]) -> Self {
        let mut bundle = PostBundle {
            post: PostRecord::from_raw(post),
            likers: likers.iter().map(EntityStub::from_user).collect(),
            ..Default::default()
        };
        for comment in comments {
            bundle.push_comment(comment, None);
            for answer in &comment.answers {
                bundle.push_comment(answer, Some(comment.id));
            }
        }
        bundle
    }

    fn push_comment(&mut self, c: &RawComment, reply_to: Option<EntityId>) {
        self.comments.push(CommentRecord {
            id: c.id,
            owner_id: c.owner.id,
            text: c.text.clone(),
            likes_count: c.likes_count as i64,
            created_at: c.created_at_utc,
            reply_to,
        });
        self.commenters.push(EntityStub::from_user(&c.owner));
        for liker in &c.likers {
            self.comment_likes.push(CommentLike {
                comment_id: c.id,
                liker: EntityStub::from_user(liker),
            });
        }
    }
}

/// Comment with nested replies, as fed to the post-analysis prompt.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CommentThread {
    pub text: String,
    pub likes_count: i64,
    pub timestamp: Option<DateTime<Utc>>,
    pub replies: Vec<CommentThread>,
}

/// Group flat comments into top-level threads, oldest first at both levels.
pub fn thread_comments(mut comments: Vec<CommentRecord>) -> Vec<CommentThread> {
    comments.sort_by_key(|c| c.created_at);
    let mut replies: HashMap<EntityId, Vec<CommentThread>> = HashMap::new();
    let mut roots = Vec::new();
    for c in comments {
        let node = CommentThread {
            text: c.text,
            likes_count: c.likes_count,
            timestamp: c.created_at,
            replies: Vec::new(),
        };
        match c.reply_to {
            Some(parent) => replies.entry(parent).or_default().push(node),
            None => roots.push((c.id, node)),
        }
    }
    roots
        .into_iter()
        .map(|(id, mut node)| {
            node.replies = replies.remove(&id).unwrap_or_default();
            node
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn stage_parses_cli_and_flag_spellings() {
        assert_eq!("follower".parse::<Stage>().unwrap(), Stage::Followers);
        assert_eq!("post-analysis".parse::<Stage>().unwrap(), Stage::PostsAnalysis);
        assert_eq!("account_analysis".parse::<Stage>().unwrap(), Stage::AccountAnalysis);
        assert!("likes".parse::<Stage>().is_err());
    }

    #[test]
    fn flag_update_only_touches_supplied_fields() {
        let mut flags = CompletionFlags {
            followers: true,
            posts: true,
            ..Default::default()
        };
        flags.apply(&FlagUpdate::stage(Stage::Posts, false));
        assert!(flags.followers, "untouched field must survive");
        assert!(!flags.posts);
        assert_eq!(
            FlagUpdate::stage(Stage::Followees, true).assignments(),
            vec![("_followees_complete", true)]
        );
    }

    #[test]
    fn cursor_json_roundtrip_and_legacy_rejection() {
        let cursor = ResumeCursor::new("QVFD", 150);
        assert_eq!(ResumeCursor::from_json(&cursor.to_json()).unwrap(), cursor);
        // Old per-account hash shape
        assert!(ResumeCursor::from_json(r#"{"alice": "abc123"}"#).is_err());
        assert!(ResumeCursor::from_json("not json").is_err());
        assert!(ResumeCursor::from_json(r#"{"end_cursor": "", "count": 3}"#).is_err());
        assert!(ResumeCursor::from_json(r#"{"end_cursor": "x", "count": 3, "skip": 4}"#).is_err());

        let inside = ResumeCursor::within_page(ResumeCursor::FIRST_PAGE, 7, 7);
        assert_eq!(ResumeCursor::from_json(&inside.to_json()).unwrap(), inside);
        assert!(inside.is_first_page());
        assert!(!cursor.to_json().contains("skip"));
    }

    #[test]
    fn merge_never_clobbers_text_with_empty() {
        let mut stored = EntityRecord {
            id: 1,
            username: "ada".into(),
            bio: "mathematician".into(),
            account_analysis: "{\"summary\":\"x\"}".into(),
            followers: 10,
            ..Default::default()
        };
        let lighter = EntityRecord {
            id: 1,
            username: "ada".into(),
            followers: 12,
            ..Default::default()
        };
        stored.merge(&lighter);
        assert_eq!(stored.bio, "mathematician");
        assert_eq!(stored.account_analysis, "{\"summary\":\"x\"}");
        assert_eq!(stored.followers, 12);
    }

    #[test]
    fn threads_group_replies_under_parents() {
        let t = |s| Some(Utc.timestamp_opt(s, 0).unwrap());
        let comments = vec![
            CommentRecord { id: 3, owner_id: 9, text: "reply".into(), likes_count: 0, created_at: t(30), reply_to: Some(1) },
            CommentRecord { id: 2, owner_id: 8, text: "second".into(), likes_count: 1, created_at: t(20), reply_to: None },
            CommentRecord { id: 1, owner_id: 7, text: "first".into(), likes_count: 5, created_at: t(10), reply_to: None },
        ];
        let threads = thread_comments(comments);
        assert_eq!(threads.len(), 2);
        assert_eq!(threads[0].text, "first");
        assert_eq!(threads[0].replies.len(), 1);
        assert_eq!(threads[0].replies[0].text, "reply");
        assert!(threads[1].replies.is_empty());
    }
}
