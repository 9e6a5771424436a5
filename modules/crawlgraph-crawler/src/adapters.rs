//! Production implementations of the crawler's seams on top of
//! `social-client`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crawlgraph_common::{RawComment, RawPost, RawProfile, RawUser};
use social_client::{ChatClient, SocialClient, SocialError};

use crate::pages::{CursorPages, Page, PageFetcher};
use crate::traits::{AnalyzerError, ContentAnalyzer, PostPages, SourceApi, SourceError, UserPages};

impl From<SocialError> for SourceError {
    fn from(err: SocialError) -> Self {
        match err {
            SocialError::RateLimited => SourceError::RateLimited,
            SocialError::NotFound(what) => SourceError::NotFound(what),
            SocialError::Unauthorized(_) | SocialError::Session(_) => SourceError::SessionExpired,
            SocialError::BadCursor(msg) => SourceError::InvalidCursor(msg),
            other => SourceError::Transient(other.to_string()),
        }
    }
}

/// [`SourceApi`] backed by the platform's HTTP API.
pub struct SocialSource {
    client: Arc<SocialClient>,
}

impl SocialSource {
    pub fn new(client: SocialClient) -> Self {
        Self {
            client: Arc::new(client),
        }
    }
}

#[derive(Clone, Copy)]
enum Listing {
    Followers,
    Followees,
}

struct UserFetcher {
    client: Arc<SocialClient>,
    user_id: i64,
    listing: Listing,
}

#[async_trait]
impl PageFetcher for UserFetcher {
    type Item = RawUser;

    async fn fetch(&self, after: Option<&str>) -> Result<Page<RawUser>, SourceError> {
        let page = match self.listing {
            Listing::Followers => self.client.followers_page(self.user_id, after).await?,
            Listing::Followees => self.client.followees_page(self.user_id, after).await?,
        };
        let end_cursor = page.next_cursor().map(String::from);
        Ok(Page {
            items: page.items.into_iter().map(raw_user).collect(),
            end_cursor,
        })
    }
}

struct PostFetcher {
    client: Arc<SocialClient>,
    user_id: i64,
}

#[async_trait]
impl PageFetcher for PostFetcher {
    type Item = RawPost;

    async fn fetch(&self, after: Option<&str>) -> Result<Page<RawPost>, SourceError> {
        let page = self.client.posts_page(self.user_id, after).await?;
        let end_cursor = page.next_cursor().map(String::from);
        Ok(Page {
            items: page.items.into_iter().map(raw_post).collect(),
            end_cursor,
        })
    }
}

#[async_trait]
impl SourceApi for SocialSource {
    async fn login(&self, account: &str) -> Result<(), SourceError> {
        self.client.load_session(account)?;
        Ok(())
    }

    async fn profile(&self, handle: &str) -> Result<RawProfile, SourceError> {
        let p = self.client.profile(handle).await?;
        Ok(RawProfile {
            user_id: p.id,
            username: p.username,
            full_name: p.full_name,
            biography: p.biography,
            biography_mentions: p.biography_mentions,
            biography_hashtags: p.biography_hashtags,
            business_category_name: p.business_category_name,
            external_url: p.external_url,
            followers: p.follower_count,
            followees: p.following_count,
            mediacount: p.media_count,
            is_private: p.is_private,
            is_verified: p.is_verified,
            is_business_account: p.is_business_account,
            has_highlight_reels: p.has_highlight_reels,
            has_public_story: p.has_public_story,
            profile_pic_url: p.profile_pic_url,
            profile_pic_url_no_iphone: p.profile_pic_url_hd,
            followed_by_viewer: p.followed_by_viewer,
        })
    }

    fn followers(&self, profile: &RawProfile) -> UserPages {
        Box::new(CursorPages::new(UserFetcher {
            client: self.client.clone(),
            user_id: profile.user_id,
            listing: Listing::Followers,
        }))
    }

    fn followees(&self, profile: &RawProfile) -> UserPages {
        Box::new(CursorPages::new(UserFetcher {
            client: self.client.clone(),
            user_id: profile.user_id,
            listing: Listing::Followees,
        }))
    }

    fn posts(&self, profile: &RawProfile) -> PostPages {
        Box::new(CursorPages::new(PostFetcher {
            client: self.client.clone(),
            user_id: profile.user_id,
        }))
    }

    async fn post_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, SourceError> {
        let comments = self.client.comments(&post.shortcode).await?;
        Ok(comments.into_iter().map(raw_comment).collect())
    }

    async fn post_likers(&self, post: &RawPost) -> Result<Vec<RawUser>, SourceError> {
        let likers = self.client.likers(&post.shortcode).await?;
        Ok(likers.into_iter().map(raw_user).collect())
    }
}

fn raw_user(u: social_client::User) -> RawUser {
    RawUser {
        id: u.id,
        username: u.username,
        full_name: u.full_name,
        profile_pic_url: u.profile_pic_url,
        is_verified: u.is_verified,
    }
}

fn raw_post(p: social_client::Post) -> RawPost {
    RawPost {
        media_id: p.id,
        shortcode: p.shortcode,
        owner_id: p.owner_id,
        typename: p.typename,
        is_video: p.is_video,
        video_duration: p.video_duration,
        video_view_count: p.video_view_count,
        caption: p.caption,
        caption_hashtags: p.caption_hashtags,
        caption_mentions: p.caption_mentions,
        accessibility_caption: p.accessibility_caption,
        likes: p.like_count,
        comments: p.comment_count,
        date_utc: p.taken_at,
        mediacount: p.media_count,
        title: p.title,
        tagged_users: p.tagged_users,
        is_sponsored: p.is_sponsored,
        is_pinned: p.is_pinned,
        media_urls: p.media_urls,
    }
}

fn raw_comment(c: social_client::Comment) -> RawComment {
    RawComment {
        id: c.id,
        owner: raw_user(c.owner),
        text: c.text,
        likes_count: c.like_count,
        created_at_utc: c.created_at,
        likers: c.likers.into_iter().map(raw_user).collect(),
        answers: c.answers.into_iter().map(raw_comment).collect(),
    }
}

fn analyzer_error(err: SocialError) -> AnalyzerError {
    match err {
        SocialError::RateLimited => AnalyzerError::QuotaExceeded("HTTP 429".into()),
        SocialError::Api { status: 402, message } => AnalyzerError::QuotaExceeded(message),
        SocialError::Unauthorized(_) => AnalyzerError::InvalidKey,
        other => AnalyzerError::Failed(other.to_string()),
    }
}

#[async_trait]
impl ContentAnalyzer for ChatClient {
    async fn analyze_image(&self, url: &str, system: &str) -> Result<Value, AnalyzerError> {
        ChatClient::analyze_image(self, url, system)
            .await
            .map_err(analyzer_error)
    }

    async fn analyze_text(&self, prompt: &str, system: &str) -> Result<Value, AnalyzerError> {
        ChatClient::analyze_text(self, prompt, system)
            .await
            .map_err(analyzer_error)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn http_failures_map_to_crawl_outcomes() {
        assert_eq!(SourceError::from(SocialError::RateLimited), SourceError::RateLimited);
        assert_eq!(
            SourceError::from(SocialError::Unauthorized("expired".into())),
            SourceError::SessionExpired
        );
        assert_eq!(
            SourceError::from(SocialError::BadCursor("stale".into())),
            SourceError::InvalidCursor("stale".into())
        );
        assert!(matches!(
            SourceError::from(SocialError::Api { status: 502, message: String::new() }),
            SourceError::Transient(_)
        ));
    }

    #[test]
    fn analyzer_failures_map_to_quota_and_key_errors() {
        assert!(matches!(analyzer_error(SocialError::RateLimited), AnalyzerError::QuotaExceeded(_)));
        assert_eq!(
            analyzer_error(SocialError::Unauthorized(String::new())),
            AnalyzerError::InvalidKey
        );
        assert!(matches!(
            analyzer_error(SocialError::Parse("x".into())),
            AnalyzerError::Failed(_)
        ));
    }

    #[test]
    fn nested_comments_keep_answers_and_likers() {
        let wire = social_client::Comment {
            id: 1,
            owner: social_client::User {
                id: 2,
                username: "b".into(),
                ..Default::default()
            },
            text: "hi".into(),
            likers: vec![social_client::User {
                id: 9,
                ..Default::default()
            }],
            answers: vec![social_client::Comment {
                id: 3,
                ..Default::default()
            }],
            ..Default::default()
        };
        let raw = raw_comment(wire);
        assert_eq!(raw.owner.username, "b");
        assert_eq!(raw.likers[0].id, 9);
        assert_eq!(raw.answers[0].id, 3);
    }
}
