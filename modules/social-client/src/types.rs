use chrono::{DateTime, Utc};
use serde::Deserialize;

/// `GET /users/{handle}`
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Profile {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub biography_mentions: Vec<String>,
    pub biography_hashtags: Vec<String>,
    pub business_category_name: Option<String>,
    pub external_url: Option<String>,
    pub follower_count: u64,
    pub following_count: u64,
    pub media_count: u64,
    pub is_private: bool,
    pub is_verified: bool,
    pub is_business_account: bool,
    pub has_highlight_reels: bool,
    pub has_public_story: bool,
    pub profile_pic_url: Option<String>,
    pub profile_pic_url_hd: Option<String>,
    pub followed_by_viewer: bool,
}

/// Compact user as it appears in follower, followee and liker listings.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub full_name: Option<String>,
    pub profile_pic_url: Option<String>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Post {
    pub id: i64,
    pub shortcode: String,
    pub owner_id: i64,
    #[serde(rename = "__typename")]
    pub typename: Option<String>,
    pub is_video: bool,
    pub video_duration: Option<f64>,
    pub video_view_count: Option<i64>,
    pub caption: Option<String>,
    pub caption_hashtags: Vec<String>,
    pub caption_mentions: Vec<String>,
    pub accessibility_caption: Option<String>,
    pub like_count: u64,
    pub comment_count: u64,
    pub taken_at: Option<DateTime<Utc>>,
    pub media_count: u64,
    pub title: Option<String>,
    pub tagged_users: Vec<String>,
    pub is_sponsored: bool,
    pub is_pinned: bool,
    pub media_urls: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Comment {
    pub id: i64,
    pub owner: User,
    pub text: String,
    pub like_count: u64,
    pub created_at: Option<DateTime<Utc>>,
    pub likers: Vec<User>,
    pub answers: Vec<Comment>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PageInfo {
    pub end_cursor: Option<String>,
    pub has_next_page: bool,
}

/// One page of a cursor-paginated listing.
#[derive(Debug, Clone, Deserialize)]
pub struct Page<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
    #[serde(default)]
    pub page_info: PageInfo,
}

impl<T> Page<T> {
    /// Cursor for the following page, if there is one.
    pub fn next_cursor(&self) -> Option<&str> {
        if !self.page_info.has_next_page {
            return None;
        }
        self.page_info.end_cursor.as_deref().filter(|c| !c.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sparse_post_uses_defaults() {
        let post: Post = serde_json::from_str(
            r#"{"id": 7, "shortcode": "abc", "owner_id": 1, "__typename": "GraphImage"}"#,
        )
        .unwrap();
        assert_eq!(post.typename.as_deref(), Some("GraphImage"));
        assert_eq!(post.like_count, 0);
        assert!(post.media_urls.is_empty());
    }

    #[test]
    fn last_page_has_no_next_cursor() {
        let page: Page<User> = serde_json::from_str(
            r#"{"items": [{"id": 1, "username": "a"}],
                "page_info": {"end_cursor": "QVFE", "has_next_page": false}}"#,
        )
        .unwrap();
        assert_eq!(page.items.len(), 1);
        assert_eq!(page.next_cursor(), None);

        let page: Page<User> = serde_json::from_str(
            r#"{"items": [], "page_info": {"end_cursor": "QVFE", "has_next_page": true}}"#,
        )
        .unwrap();
        assert_eq!(page.next_cursor(), Some("QVFE"));
    }

    #[test]
    fn nested_comment_answers_deserialize() {
        let comment: Comment = serde_json::from_str(
            r#"{"id": 1, "owner": {"id": 2, "username": "b"}, "text": "hi",
                "answers": [{"id": 3, "owner": {"id": 4, "username": "c"}, "text": "yo"}]}"#,
        )
        .unwrap();
        assert_eq!(comment.answers.len(), 1);
        assert_eq!(comment.answers[0].owner.username, "c");
    }
}
