//! Records as they arrive from the social platform, before mapping onto the
//! stored graph model. Field names follow the platform's JSON.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::EntityId;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawProfile {
    pub user_id: EntityId,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub biography: Option<String>,
    #[serde(default)]
    pub biography_mentions: Vec<String>,
    #[serde(default)]
    pub biography_hashtags: Vec<String>,
    #[serde(default)]
    pub business_category_name: Option<String>,
    #[serde(default)]
    pub external_url: Option<String>,
    #[serde(default)]
    pub followers: u64,
    #[serde(default)]
    pub followees: u64,
    #[serde(default)]
    pub mediacount: u64,
    #[serde(default)]
    pub is_private: bool,
    #[serde(default)]
    pub is_verified: bool,
    #[serde(default)]
    pub is_business_account: bool,
    #[serde(default)]
    pub has_highlight_reels: bool,
    #[serde(default)]
    pub has_public_story: bool,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    #[serde(default)]
    pub profile_pic_url_no_iphone: Option<String>,
    /// Whether the logged-in account follows this profile. Private profiles
    /// are only readable when this is true.
    #[serde(default)]
    pub followed_by_viewer: bool,
}

impl RawProfile {
    pub fn is_readable(&self) -> bool {
        !self.is_private || self.followed_by_viewer
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawUser {
    pub id: EntityId,
    pub username: String,
    #[serde(default)]
    pub full_name: Option<String>,
    #[serde(default)]
    pub profile_pic_url: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawPost {
    pub media_id: EntityId,
    pub shortcode: String,
    pub owner_id: EntityId,
    #[serde(default)]
    pub typename: Option<String>,
    #[serde(default)]
    pub is_video: bool,
    #[serde(default)]
    pub video_duration: Option<f64>,
    #[serde(default)]
    pub video_view_count: Option<i64>,
    #[serde(default)]
    pub caption: Option<String>,
    #[serde(default)]
    pub caption_hashtags: Vec<String>,
    #[serde(default)]
    pub caption_mentions: Vec<String>,
    #[serde(default)]
    pub accessibility_caption: Option<String>,
    #[serde(default)]
    pub likes: u64,
    #[serde(default)]
    pub comments: u64,
    #[serde(default)]
    pub date_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub mediacount: u64,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub tagged_users: Vec<String>,
    #[serde(default)]
    pub is_sponsored: bool,
    #[serde(default)]
    pub is_pinned: bool,
    /// Display URLs of every image or video frame in the post.
    #[serde(default)]
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawComment {
    pub id: EntityId,
    pub owner: RawUser,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub likes_count: u64,
    #[serde(default)]
    pub created_at_utc: Option<DateTime<Utc>>,
    #[serde(default)]
    pub likers: Vec<RawUser>,
    #[serde(default)]
    pub answers: Vec<RawComment>,
}
