use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::info;

use crate::credentials::{CredentialStore, Credentials};
use crate::error::CrawlGraphError;
use crate::types::Stage;

/// Runtime configuration. Each secret comes from the environment first and
/// falls back to the credential store written by `crawlgraph setup`.
#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,

    // Neo4j
    pub neo4j_uri: String,
    pub neo4j_user: String,
    pub neo4j_password: String,

    // Source platform
    pub source_api_url: String,
    pub source_user_agent: String,
    pub source_accounts: Vec<String>,
    pub default_source_account: Option<String>,

    // Content analyzer
    pub analyzer_api_key: String,
    pub analyzer_api_url: String,
    pub analyzer_model: String,
}

impl Config {
    /// Directory holding credentials, sessions, the sync queue and
    /// `crawlgraph.toml`. `CRAWLGRAPH_HOME` overrides `$HOME/.config/crawlgraph`.
    pub fn home_from_env() -> PathBuf {
        if let Ok(home) = env::var("CRAWLGRAPH_HOME") {
            return PathBuf::from(home);
        }
        let base = env::var("HOME").unwrap_or_else(|_| ".".to_string());
        PathBuf::from(base).join(".config").join("crawlgraph")
    }

    /// Build from env vars layered over stored credentials.
    pub fn load(home: PathBuf, creds: &Credentials) -> Self {
        let accounts = match env::var("SOURCE_ACCOUNTS") {
            Ok(list) => list
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect(),
            Err(_) => creds.source_accounts.clone(),
        };
        let default_account =
            env_or("DEFAULT_SOURCE_ACCOUNT", &creds.default_source_account);

        Self {
            home,
            neo4j_uri: env_or("NEO4J_URI", &creds.neo4j_uri),
            neo4j_user: env_or("NEO4J_USER", &creds.neo4j_user),
            neo4j_password: env_or("NEO4J_PASSWORD", &creds.neo4j_password),
            source_api_url: env_or("SOURCE_API_URL", ""),
            source_user_agent: env_or("SOURCE_USER_AGENT", &creds.source_user_agent),
            source_accounts: accounts,
            default_source_account: (!default_account.is_empty()).then_some(default_account),
            analyzer_api_key: env_or("ANALYZER_API_KEY", &creds.analyzer_api_key),
            analyzer_api_url: env_or(
                "ANALYZER_API_URL",
                "https://api.openai.com/v1/chat/completions",
            ),
            analyzer_model: env_or("ANALYZER_MODEL", "gpt-4o-mini"),
        }
    }

    /// Convenience: resolve home, open its credential store and load.
    pub fn from_env() -> Result<(Self, CredentialStore)> {
        let home = Self::home_from_env();
        let store = CredentialStore::open(Self::credentials_path_in(&home))
            .context("Failed to open credential store")?;
        let creds = store.snapshot()?;
        Ok((Self::load(home, &creds), store))
    }

    /// Fail fast before any side effect when the crawl cannot run.
    pub fn require_crawl_credentials(&self) -> Result<(), CrawlGraphError> {
        for (name, value) in [
            ("NEO4J_URI", &self.neo4j_uri),
            ("NEO4J_USER", &self.neo4j_user),
            ("NEO4J_PASSWORD", &self.neo4j_password),
            ("SOURCE_API_URL", &self.source_api_url),
        ] {
            if value.is_empty() {
                return Err(CrawlGraphError::MissingCredential(name.to_string()));
            }
        }
        if self.source_accounts.is_empty() {
            return Err(CrawlGraphError::MissingCredential("SOURCE_ACCOUNTS".into()));
        }
        Ok(())
    }

    pub fn analyzer_enabled(&self) -> bool {
        !self.analyzer_api_key.is_empty()
    }

    pub fn credentials_path_in(home: &Path) -> PathBuf {
        home.join("credentials.json")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    pub fn sync_queue_path(&self) -> PathBuf {
        self.home.join("neo4j_sync_queue.json")
    }

    pub fn file_config_path(&self) -> PathBuf {
        self.home.join("crawlgraph.toml")
    }

    /// Log the loaded configuration with secrets masked.
    pub fn log_redacted(&self) {
        info!(
            home = %self.home.display(),
            neo4j_uri = self.neo4j_uri.as_str(),
            neo4j_user = self.neo4j_user.as_str(),
            neo4j_password = redact(&self.neo4j_password),
            source_api_url = self.source_api_url.as_str(),
            accounts = self.source_accounts.len(),
            default_account = self.default_source_account.as_deref().unwrap_or("-"),
            analyzer_api_key = redact(&self.analyzer_api_key),
            analyzer_model = self.analyzer_model.as_str(),
            "Config loaded"
        );
    }
}

fn env_or(key: &str, fallback: &str) -> String {
    env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".to_string();
    }
    let tail: String = secret
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<_>>()
        .into_iter()
        .rev()
        .collect();
    format!("...{tail}")
}

// ---------------------------------------------------------------------------
// Crawl tuning (crawlgraph.toml)
// ---------------------------------------------------------------------------

/// TOML-backed crawl tuning. Every section is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub limits: LimitsConfig,
    pub pacing: PacingConfig,
    pub explore: ExploreConfig,
}

/// Per-stage item caps. Zero disables the stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LimitsConfig {
    pub followers: u64,
    pub followees: u64,
    pub posts: u64,
    /// Items per batched write during edge stages.
    pub batch_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            followers: 1000,
            followees: 1000,
            posts: 10,
            batch_size: 100,
        }
    }
}

impl LimitsConfig {
    pub fn for_stage(&self, stage: Stage) -> Option<u64> {
        match stage {
            Stage::Followers => Some(self.followers),
            Stage::Followees => Some(self.followees),
            Stage::Posts => Some(self.posts),
            Stage::PostsAnalysis | Stage::AccountAnalysis => None,
        }
    }

    /// Apply a CLI `TYPE=N` override.
    pub fn set_from_arg(&mut self, arg: &str) -> Result<(), CrawlGraphError> {
        let (kind, value) = arg.split_once('=').ok_or_else(|| {
            CrawlGraphError::Config(format!("invalid limit format: {arg} (use TYPE=VALUE)"))
        })?;
        let value: u64 = value.trim().parse().map_err(|_| {
            CrawlGraphError::Config(format!("invalid limit value in {arg}"))
        })?;
        match kind.trim().to_lowercase().as_str() {
            "follower" | "followers" => self.followers = value,
            "followee" | "followees" => self.followees = value,
            "post" | "posts" => self.posts = value,
            other => {
                return Err(CrawlGraphError::Config(format!("unknown limit type: {other}")))
            }
        }
        Ok(())
    }
}

/// Delays, in seconds unless noted.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PacingConfig {
    /// Requests between proactive account rotations.
    pub rotate_every: u64,
    pub jitter_min_ms: u64,
    pub jitter_max_ms: u64,
    pub stage_delay_min: u64,
    pub stage_delay_max: u64,
    pub explore_delay_min: u64,
    pub explore_delay_max: u64,
    /// Pause once every account has been tried.
    pub cooldown: u64,
    /// Pause instead of rotating when only one account is configured.
    pub solo_pause_min: u64,
    pub solo_pause_max: u64,
    pub long_rest_after: u64,
    pub long_rest: u64,
}

impl Default for PacingConfig {
    fn default() -> Self {
        Self {
            rotate_every: 200,
            jitter_min_ms: 500,
            jitter_max_ms: 2500,
            stage_delay_min: 5,
            stage_delay_max: 15,
            explore_delay_min: 5,
            explore_delay_max: 10,
            cooldown: 600,
            solo_pause_min: 300,
            solo_pause_max: 600,
            long_rest_after: 2000,
            long_rest: 600,
        }
    }
}

impl PacingConfig {
    /// Zero-delay pacing for tests and dry runs.
    pub fn immediate() -> Self {
        Self {
            jitter_min_ms: 0,
            jitter_max_ms: 0,
            stage_delay_min: 0,
            stage_delay_max: 0,
            explore_delay_min: 0,
            explore_delay_max: 0,
            cooldown: 0,
            solo_pause_min: 0,
            solo_pause_max: 0,
            long_rest: 0,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExploreConfig {
    /// Handles never crawled by explore.
    pub skip_accounts: HashSet<String>,
}

/// Load and parse a TOML config file.
pub fn load_config(path: &Path) -> Result<FileConfig> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: FileConfig = toml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;
    Ok(config)
}

/// Like [`load_config`] but a missing file yields defaults.
pub fn load_config_or_default(path: &Path) -> Result<FileConfig> {
    if !path.exists() {
        return Ok(FileConfig::default());
    }
    load_config(path)
}
