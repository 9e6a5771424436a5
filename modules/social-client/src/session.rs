//! Per-account session files under the sessions directory.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SocialError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub username: String,
    pub token: String,
    pub saved_at: DateTime<Utc>,
}

impl Session {
    pub fn new(username: &str, token: &str) -> Self {
        Self {
            username: username.to_string(),
            token: token.to_string(),
            saved_at: Utc::now(),
        }
    }

    pub fn path_in(dir: &Path, username: &str) -> PathBuf {
        dir.join(format!("{username}.session.json"))
    }

    pub fn load(dir: &Path, username: &str) -> Result<Self> {
        let path = Self::path_in(dir, username);
        let raw = fs::read_to_string(&path).map_err(|e| {
            SocialError::Session(format!("no session for {username} at {}: {e}", path.display()))
        })?;
        Ok(serde_json::from_str(&raw)?)
    }

    pub fn save(&self, dir: &Path) -> Result<PathBuf> {
        fs::create_dir_all(dir).map_err(|e| SocialError::Session(e.to_string()))?;
        let path = Self::path_in(dir, &self.username);
        let raw = serde_json::to_string_pretty(self)?;
        fs::write(&path, raw).map_err(|e| SocialError::Session(e.to_string()))?;
        Ok(path)
    }

    /// Delete the account's session file. Returns false when there was none.
    pub fn remove(dir: &Path, username: &str) -> Result<bool> {
        let path = Self::path_in(dir, username);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(SocialError::Session(e.to_string())),
        }
    }
}
