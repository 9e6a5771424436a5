//! OpenAI-compatible chat completions, used to turn images and text into
//! JSON analyses.

use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use crate::error::{Result, SocialError};

const MAX_ATTEMPTS: usize = 3;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Value>,
    response_format: Value,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ResponseMessage {
    content: Option<String>,
}

pub struct ChatClient {
    client: reqwest::Client,
    api_key: String,
    api_url: String,
    model: String,
}

impl ChatClient {
    pub fn new(api_key: &str, api_url: &str, model: &str) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.to_string(),
            api_url: api_url.to_string(),
            model: model.to_string(),
        }
    }

    pub async fn analyze_image(&self, image_url: &str, system: &str) -> Result<Value> {
        let user = json!({
            "role": "user",
            "content": [{"type": "image_url", "image_url": {"url": image_url}}],
        });
        self.complete_json(system, user).await
    }

    pub async fn analyze_text(&self, prompt: &str, system: &str) -> Result<Value> {
        let user = json!({"role": "user", "content": prompt});
        self.complete_json(system, user).await
    }

    /// Ask for a JSON object, re-asking when the reply doesn't parse.
    async fn complete_json(&self, system: &str, user: Value) -> Result<Value> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![json!({"role": "system", "content": system}), user],
            response_format: json!({"type": "json_object"}),
        };

        let mut last = String::new();
        for attempt in 1..=MAX_ATTEMPTS {
            let text = self.send(&request).await?;
            if let Some(value) = extract_json(&text) {
                return Ok(value);
            }
            warn!(attempt, "Analyzer reply was not JSON, retrying");
            last = text;
        }
        Err(SocialError::Parse(format!(
            "no JSON object in reply after {MAX_ATTEMPTS} attempts: {}",
            last.chars().take(200).collect::<String>()
        )))
    }

    async fn send(&self, request: &ChatRequest<'_>) -> Result<String> {
        debug!(model = request.model, "Chat request");
        let resp = self
            .client
            .post(&self.api_url)
            .bearer_auth(&self.api_key)
            .json(request)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(match status {
                StatusCode::TOO_MANY_REQUESTS => SocialError::RateLimited,
                StatusCode::UNAUTHORIZED => SocialError::Unauthorized(body),
                _ => SocialError::Api {
                    status: status.as_u16(),
                    message: body,
                },
            });
        }

        let chat: ChatResponse = resp.json().await?;
        chat.choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| SocialError::Parse("empty chat response".into()))
    }
}

/// Pull the first JSON object or array out of a model reply, tolerating
/// code fences and surrounding prose.
pub fn extract_json(text: &str) -> Option<Value> {
    let trimmed = text
        .trim()
        .trim_start_matches("```json")
        .trim_start_matches("```")
        .trim_end_matches("```")
        .trim();
    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        if value.is_object() || value.is_array() {
            return Some(value);
        }
    }

    let start = trimmed.find(['{', '['])?;
    let close = if trimmed[start..].starts_with('{') { '}' } else { ']' };
    let end = trimmed.rfind(close)?;
    if end <= start {
        return None;
    }
    serde_json::from_str(&trimmed[start..=end]).ok()
}
