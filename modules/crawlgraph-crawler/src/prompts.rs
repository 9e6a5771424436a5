use serde_json::{json, Map, Value};

use crawlgraph_common::{CommentThread, EntityRecord, PostRecord};

pub const IMAGE_ANALYSIS: &str = r#"You analyze a single social media image for a research archive.
Describe only what is visible. Respond with one JSON object and nothing else:
{
  "image_type": "",
  "scene_description": "",
  "setting": "",
  "people_count_visible": 0,
  "activities": [],
  "objects": [],
  "text_present": false,
  "text_transcribed": "",
  "text_language": "",
  "brands_or_logos": [],
  "tone": "",
  "notable_details": []
}"#;

pub const POST_ANALYSIS: &str = r#"You summarize a social media post for a research archive.
You receive the post's metadata, the analysis of its images and its comment threads.
Respond with one JSON object and nothing else:
{
  "summary": "",
  "topics": [],
  "sentiment": "",
  "intent": "",
  "mentioned_accounts": [],
  "locations_mentioned": [],
  "audience_reaction": "",
  "notable_comments": [],
  "language": ""
}"#;

pub const ACCOUNT_ANALYSIS: &str = r#"You profile a public social media account for a research archive.
You receive the account's profile metadata and every collected post with its analysis.
Respond with one JSON object and nothing else:
{
  "summary": "",
  "account_type": "",
  "main_topics": [],
  "posting_style": "",
  "recurring_accounts": [],
  "locations_mentioned": [],
  "languages": [],
  "audience_engagement": "",
  "activity_timeline": ""
}"#;

/// Stored analyses are JSON text; malformed or empty text becomes `{}`.
fn parse_stored(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::Object(Map::new()))
}

pub fn post_prompt(post: &PostRecord, image_analysis: &str, comments: &[CommentThread]) -> String {
    let context = json!({
        "is_video": post.is_video,
        "caption": post.caption,
        "caption_hashtags": post.caption_hashtags,
        "caption_mentions": post.caption_mentions,
        "likes": post.likes,
        "comments": post.comments,
        "date_utc": post.date_utc,
        "title": post.title,
        "tagged_users": post.tagged_users,
        "is_sponsored": post.is_sponsored,
        "is_pinned": post.is_pinned,
        "image_analysis": parse_stored(image_analysis),
    });
    format!(
        "Post contextual background: {}\n\nComments: {}",
        pretty(&context),
        pretty(&json!(comments)),
    )
}

pub fn account_prompt(profile: &EntityRecord, posts: &[PostRecord]) -> String {
    let metadata = json!({
        "username": profile.username,
        "fullname": profile.fullname,
        "bio": profile.bio,
        "followers": profile.followers,
        "followees": profile.followees,
        "is_verified": profile.is_verified,
        "is_business_account": profile.is_business_account,
        "business_category_name": profile.business_category_name,
        "biography_hashtags": profile.biography_hashtags,
        "biography_mentions": profile.biography_mentions,
    });

    let mut prompt = format!("Profile metadata: {}\n\nPosts:\n", pretty(&metadata));
    for (i, post) in posts.iter().enumerate() {
        let entry = json!({
            "id": post.id,
            "is_video": post.is_video,
            "caption": post.caption,
            "caption_hashtags": post.caption_hashtags,
            "caption_mentions": post.caption_mentions,
            "likes": post.likes,
            "date_utc": post.date_utc,
            "title": post.title,
            "tagged_users": post.tagged_users,
            "is_sponsored": post.is_sponsored,
            "is_pinned": post.is_pinned,
            "post_analysis": parse_stored(&post.post_analysis),
        });
        prompt.push_str(&format!("\nPost {}:\n{}\n", i + 1, pretty(&entry)));
    }
    prompt
}

fn pretty(value: &Value) -> String {
    serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn post_prompt_embeds_image_analysis_as_json() {
        let post = PostRecord {
            id: 1,
            caption: "sunset".into(),
            ..Default::default()
        };
        let prompt = post_prompt(&post, r#"[{"tone":"calm"}]"#, &[]);
        assert!(prompt.starts_with("Post contextual background: "));
        assert!(prompt.contains("\"tone\": \"calm\""));
        assert!(prompt.contains("\"caption\": \"sunset\""));
        assert!(prompt.contains("Comments: []"));
    }

    #[test]
    fn account_prompt_tolerates_missing_post_analysis() {
        let profile = EntityRecord {
            username: "ada".into(),
            ..Default::default()
        };
        let posts = vec![
            PostRecord {
                id: 1,
                post_analysis: r#"{"summary":"x"}"#.into(),
                ..Default::default()
            },
            PostRecord {
                id: 2,
                ..Default::default()
            },
        ];
        let prompt = account_prompt(&profile, &posts);
        assert!(prompt.contains("\"username\": \"ada\""));
        assert!(prompt.contains("Post 1:"));
        assert!(prompt.contains("Post 2:"));
        assert!(prompt.contains("\"summary\": \"x\""));
        assert!(prompt.contains("\"post_analysis\": {}"));
    }
}
