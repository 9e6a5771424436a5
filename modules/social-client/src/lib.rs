pub mod chat;
pub mod error;
pub mod session;
pub mod types;

pub use chat::ChatClient;
pub use error::{Result, SocialError};
pub use session::Session;
pub use types::{Comment, Page, PageInfo, Post, Profile, User};

use std::path::PathBuf;
use std::sync::RwLock;

use reqwest::header::USER_AGENT;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use tracing::debug;

pub const DEFAULT_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Client for the platform's JSON API. One client serves every account;
/// `load_session` switches which account's token is sent.
pub struct SocialClient {
    client: reqwest::Client,
    base_url: String,
    user_agent: String,
    sessions_dir: PathBuf,
    session: RwLock<Option<Session>>,
}

impl SocialClient {
    pub fn new(base_url: &str, user_agent: &str, sessions_dir: impl Into<PathBuf>) -> Self {
        let user_agent = if user_agent.trim().is_empty() {
            DEFAULT_USER_AGENT
        } else {
            user_agent
        };
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            user_agent: user_agent.to_string(),
            sessions_dir: sessions_dir.into(),
            session: RwLock::new(None),
        }
    }

    /// Make `username`'s saved session the active one.
    pub fn load_session(&self, username: &str) -> Result<()> {
        let session = Session::load(&self.sessions_dir, username)?;
        let mut slot = self
            .session
            .write()
            .map_err(|_| SocialError::Session("session lock poisoned".into()))?;
        *slot = Some(session);
        debug!(username, "Session loaded");
        Ok(())
    }

    pub fn active_account(&self) -> Option<String> {
        self.session
            .read()
            .ok()
            .and_then(|s| s.as_ref().map(|s| s.username.clone()))
    }

    fn token(&self) -> Result<String> {
        let slot = self
            .session
            .read()
            .map_err(|_| SocialError::Session("session lock poisoned".into()))?;
        slot.as_ref()
            .map(|s| s.token.clone())
            .ok_or_else(|| SocialError::Session("no active session".into()))
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, after: Option<&str>) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let mut req = self
            .client
            .get(&url)
            .bearer_auth(self.token()?)
            .header(USER_AGENT, &self.user_agent);
        if let Some(after) = after {
            req = req.query(&[("after", after)]);
        }

        debug!(path, after, "GET");
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => SocialError::RateLimited,
                StatusCode::NOT_FOUND => SocialError::NotFound(path.to_string()),
                StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => SocialError::Unauthorized(body),
                StatusCode::BAD_REQUEST if after.is_some() => SocialError::BadCursor(body),
                _ => SocialError::Api {
                    status: status.as_u16(),
                    message: body,
                },
            });
        }

        let body = resp.text().await?;
        Ok(serde_json::from_str(&body)?)
    }

    pub async fn profile(&self, handle: &str) -> Result<Profile> {
        self.get(&format!("/users/{handle}"), None).await
    }

    pub async fn followers_page(&self, user_id: i64, after: Option<&str>) -> Result<Page<User>> {
        self.get(&format!("/users/{user_id}/followers"), after).await
    }

    pub async fn followees_page(&self, user_id: i64, after: Option<&str>) -> Result<Page<User>> {
        self.get(&format!("/users/{user_id}/following"), after).await
    }

    pub async fn posts_page(&self, user_id: i64, after: Option<&str>) -> Result<Page<Post>> {
        self.get(&format!("/users/{user_id}/posts"), after).await
    }

    pub async fn comments(&self, shortcode: &str) -> Result<Vec<Comment>> {
        self.get(&format!("/posts/{shortcode}/comments"), None).await
    }

    pub async fn likers(&self, shortcode: &str) -> Result<Vec<User>> {
        self.get(&format!("/posts/{shortcode}/likers"), None).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_user_agent_falls_back_to_default() {
        let client = SocialClient::new("https://api.example.com/", "  ", "/tmp");
        assert_eq!(client.user_agent, DEFAULT_USER_AGENT);
        assert_eq!(client.base_url, "https://api.example.com");
    }

    #[test]
    fn load_session_switches_active_account() {
        let dir = tempfile::tempdir().unwrap();
        Session::new("a", "t1").save(dir.path()).unwrap();
        Session::new("b", "t2").save(dir.path()).unwrap();

        let client = SocialClient::new("https://api.example.com", "", dir.path());
        assert!(client.token().is_err());

        client.load_session("a").unwrap();
        assert_eq!(client.token().unwrap(), "t1");
        client.load_session("b").unwrap();
        assert_eq!(client.active_account().as_deref(), Some("b"));
        assert!(client.load_session("missing").is_err());
        assert_eq!(client.token().unwrap(), "t2");
    }
}
