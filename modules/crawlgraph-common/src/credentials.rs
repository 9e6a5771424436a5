use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::CrawlGraphError;

/// Persisted secrets and account bookkeeping.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(rename = "NEO4J_URI", default)]
    pub neo4j_uri: String,
    #[serde(rename = "NEO4J_USER", default)]
    pub neo4j_user: String,
    #[serde(rename = "NEO4J_PASSWORD", default)]
    pub neo4j_password: String,
    #[serde(rename = "SOURCE_ACCOUNTS", default)]
    pub source_accounts: Vec<String>,
    #[serde(rename = "DEFAULT_SOURCE_ACCOUNT", default)]
    pub default_source_account: String,
    #[serde(rename = "SOURCE_USER_AGENT", default)]
    pub source_user_agent: String,
    #[serde(rename = "ANALYZER_API_KEY", default)]
    pub analyzer_api_key: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialKey {
    Neo4jUri,
    Neo4jUser,
    Neo4jPassword,
    SourceAccounts,
    DefaultSourceAccount,
    SourceUserAgent,
    AnalyzerApiKey,
}

impl CredentialKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            CredentialKey::Neo4jUri => "NEO4J_URI",
            CredentialKey::Neo4jUser => "NEO4J_USER",
            CredentialKey::Neo4jPassword => "NEO4J_PASSWORD",
            CredentialKey::SourceAccounts => "SOURCE_ACCOUNTS",
            CredentialKey::DefaultSourceAccount => "DEFAULT_SOURCE_ACCOUNT",
            CredentialKey::SourceUserAgent => "SOURCE_USER_AGENT",
            CredentialKey::AnalyzerApiKey => "ANALYZER_API_KEY",
        }
    }
}

/// Group of credentials configured or reset together from the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceTarget {
    All,
    Accounts,
    Neo4j,
    Analyzer,
    UserAgent,
}

impl ServiceTarget {
    pub fn keys(&self) -> &'static [CredentialKey] {
        use CredentialKey::*;
        match self {
            ServiceTarget::Accounts => &[SourceAccounts, DefaultSourceAccount],
            ServiceTarget::Neo4j => &[Neo4jUri, Neo4jUser, Neo4jPassword],
            ServiceTarget::Analyzer => &[AnalyzerApiKey],
            ServiceTarget::UserAgent => &[SourceUserAgent],
            ServiceTarget::All => &[
                Neo4jUri,
                Neo4jUser,
                Neo4jPassword,
                SourceAccounts,
                DefaultSourceAccount,
                SourceUserAgent,
                AnalyzerApiKey,
            ],
        }
    }

    pub fn includes(&self, other: ServiceTarget) -> bool {
        *self == ServiceTarget::All || *self == other
    }
}

impl FromStr for ServiceTarget {
    type Err = CrawlGraphError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "all" => Ok(ServiceTarget::All),
            "accounts" => Ok(ServiceTarget::Accounts),
            "neo4j" => Ok(ServiceTarget::Neo4j),
            "analyzer" => Ok(ServiceTarget::Analyzer),
            "user-agent" => Ok(ServiceTarget::UserAgent),
            other => Err(CrawlGraphError::Config(format!(
                "unknown target: {other} (expected all, accounts, neo4j, analyzer, user-agent)"
            ))),
        }
    }
}

/// JSON-file credential store. Constructed once and passed by reference;
/// every mutation is written through to disk under the lock.
pub struct CredentialStore {
    path: PathBuf,
    inner: Mutex<Credentials>,
}

impl CredentialStore {
    /// Open the store, creating an empty file if none exists.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, CrawlGraphError> {
        let path = path.into();
        let credentials = if path.exists() {
            let raw = std::fs::read_to_string(&path)?;
            serde_json::from_str(&raw)?
        } else {
            let empty = Credentials::default();
            write_file(&path, &empty)?;
            empty
        };
        Ok(Self {
            path,
            inner: Mutex::new(credentials),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn snapshot(&self) -> Result<Credentials, CrawlGraphError> {
        Ok(self.lock()?.clone())
    }

    /// Value of a string key; empty when unset. Accounts are joined with commas.
    pub fn get(&self, key: CredentialKey) -> Result<String, CrawlGraphError> {
        let c = self.lock()?;
        Ok(match key {
            CredentialKey::Neo4jUri => c.neo4j_uri.clone(),
            CredentialKey::Neo4jUser => c.neo4j_user.clone(),
            CredentialKey::Neo4jPassword => c.neo4j_password.clone(),
            CredentialKey::SourceAccounts => c.source_accounts.join(","),
            CredentialKey::DefaultSourceAccount => c.default_source_account.clone(),
            CredentialKey::SourceUserAgent => c.source_user_agent.clone(),
            CredentialKey::AnalyzerApiKey => c.analyzer_api_key.clone(),
        })
    }

    pub fn set(&self, key: CredentialKey, value: &str) -> Result<(), CrawlGraphError> {
        self.update(|c| match key {
            CredentialKey::Neo4jUri => c.neo4j_uri = value.to_string(),
            CredentialKey::Neo4jUser => c.neo4j_user = value.to_string(),
            CredentialKey::Neo4jPassword => c.neo4j_password = value.to_string(),
            CredentialKey::SourceAccounts => {
                c.source_accounts = value
                    .split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            }
            CredentialKey::DefaultSourceAccount => c.default_source_account = value.to_string(),
            CredentialKey::SourceUserAgent => c.source_user_agent = value.to_string(),
            CredentialKey::AnalyzerApiKey => c.analyzer_api_key = value.to_string(),
        })
    }

    /// Register an account. The first account added becomes the default.
    pub fn add_account(&self, account: &str) -> Result<bool, CrawlGraphError> {
        let mut added = false;
        self.update(|c| {
            if !c.source_accounts.iter().any(|a| a == account) {
                c.source_accounts.push(account.to_string());
                added = true;
            }
            if c.default_source_account.is_empty() {
                c.default_source_account = account.to_string();
            }
        })?;
        Ok(added)
    }

    /// Blank every listed key.
    pub fn reset(&self, keys: &[CredentialKey]) -> Result<(), CrawlGraphError> {
        self.update(|c| {
            for key in keys {
                match key {
                    CredentialKey::Neo4jUri => c.neo4j_uri.clear(),
                    CredentialKey::Neo4jUser => c.neo4j_user.clear(),
                    CredentialKey::Neo4jPassword => c.neo4j_password.clear(),
                    CredentialKey::SourceAccounts => c.source_accounts.clear(),
                    CredentialKey::DefaultSourceAccount => c.default_source_account.clear(),
                    CredentialKey::SourceUserAgent => c.source_user_agent.clear(),
                    CredentialKey::AnalyzerApiKey => c.analyzer_api_key.clear(),
                }
            }
        })
    }

    fn update(&self, f: impl FnOnce(&mut Credentials)) -> Result<(), CrawlGraphError> {
        let mut c = self.lock()?;
        f(&mut c);
        write_file(&self.path, &c)?;
        debug!(path = %self.path.display(), "Credentials saved");
        Ok(())
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Credentials>, CrawlGraphError> {
        self.inner
            .lock()
            .map_err(|_| CrawlGraphError::CredentialStore("lock poisoned".into()))
    }
}

fn write_file(path: &Path, credentials: &Credentials) -> Result<(), CrawlGraphError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(credentials)?)?;
    Ok(())
}
