use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use thiserror::Error;
use tracing::{info, warn};

use crawlgraph_common::config::PacingConfig;

use crate::traits::{Sleeper, SourceApi, SourceError};

#[derive(Debug, Error)]
pub enum RotationError {
    #[error("account '{0}' is not configured; run `crawlgraph setup accounts`")]
    UnknownAccount(String),

    #[error("no source accounts configured; run `crawlgraph setup accounts`")]
    NoAccounts,

    #[error("login as '{account}' failed: {source}")]
    Login {
        account: String,
        #[source]
        source: SourceError,
    },
}

/// Uniform random duration in `[min, max]` seconds.
pub(crate) fn random_secs(min: u64, max: u64) -> Duration {
    random_millis(min.saturating_mul(1000), max.saturating_mul(1000))
}

pub(crate) fn random_millis(min: u64, max: u64) -> Duration {
    if max <= min {
        return Duration::from_millis(min);
    }
    Duration::from_millis(rand::rng().random_range(min..=max))
}

/// Pool of source accounts with one active identity.
///
/// Rotation walks the pool in order. Landing back on the default account
/// (or the first, without a default) marks the pool as fully tried; the
/// rotation after that waits out the cooldown first.
pub struct AccountRotator {
    source: Arc<dyn SourceApi>,
    sleeper: Arc<dyn Sleeper>,
    accounts: Vec<String>,
    default_account: Option<String>,
    current: usize,
    tried_all: bool,
    requests: u64,
    requests_since_rest: u64,
    pacing: PacingConfig,
}

impl AccountRotator {
    pub fn new(
        source: Arc<dyn SourceApi>,
        sleeper: Arc<dyn Sleeper>,
        accounts: Vec<String>,
        default_account: Option<String>,
        pacing: PacingConfig,
    ) -> Self {
        Self {
            source,
            sleeper,
            accounts,
            default_account,
            current: 0,
            tried_all: false,
            requests: 0,
            requests_since_rest: 0,
            pacing,
        }
    }

    pub fn accounts(&self) -> &[String] {
        &self.accounts
    }

    pub fn current(&self) -> Option<&str> {
        self.accounts.get(self.current).map(String::as_str)
    }

    pub fn requests(&self) -> u64 {
        self.requests
    }

    /// Check an explicitly requested account without touching the session.
    pub fn check(&self, requested: Option<&str>) -> Result<(), RotationError> {
        if self.accounts.is_empty() {
            return Err(RotationError::NoAccounts);
        }
        match requested {
            Some(name) if !self.accounts.iter().any(|a| a == name) => {
                Err(RotationError::UnknownAccount(name.to_string()))
            }
            _ => Ok(()),
        }
    }

    fn home_account(&self) -> &str {
        self.default_account
            .as_deref()
            .filter(|d| self.accounts.iter().any(|a| a == d))
            .or_else(|| self.accounts.first().map(String::as_str))
            .unwrap_or_default()
    }

    /// Log in as `requested`, or the default account when `None`.
    pub async fn activate(&mut self, requested: Option<&str>) -> Result<String, RotationError> {
        self.check(requested)?;
        let name = match requested {
            Some(name) => name.to_string(),
            None => {
                if self.default_account.is_none() {
                    warn!("No default account set and --account not given, using the first configured account");
                }
                self.home_account().to_string()
            }
        };
        self.current = self
            .accounts
            .iter()
            .position(|a| *a == name)
            .unwrap_or_default();
        self.login_current().await?;
        Ok(name)
    }

    async fn login_current(&self) -> Result<(), RotationError> {
        let account = self.current().unwrap_or_default().to_string();
        self.source
            .login(&account)
            .await
            .map_err(|source| RotationError::Login {
                account: account.clone(),
                source,
            })?;
        info!(account = account.as_str(), "Logged in");
        Ok(())
    }

    /// Switch to the next account. `Ok(false)` when there is nothing to
    /// switch to.
    pub async fn rotate(&mut self) -> Result<bool, RotationError> {
        if self.accounts.len() < 2 {
            warn!("No other accounts available to switch to");
            return Ok(false);
        }

        if self.tried_all {
            let cooldown = Duration::from_secs(self.pacing.cooldown);
            warn!(
                cooldown_secs = cooldown.as_secs(),
                "All accounts have been tried, cooling down"
            );
            self.sleeper.sleep(cooldown).await;
            self.tried_all = false;
        }

        self.current = (self.current + 1) % self.accounts.len();
        if self.accounts[self.current] == self.home_account() {
            self.tried_all = true;
        }
        info!(account = self.accounts[self.current].as_str(), "Switching account");
        self.login_current().await?;
        Ok(true)
    }

    /// Record one source request: short jitter, and a proactive rotation (or
    /// a long pause when rotation is impossible) every `rotate_every` requests.
    pub async fn after_request(&mut self) -> Result<(), RotationError> {
        self.requests += 1;
        self.requests_since_rest += 1;

        self.sleeper
            .sleep(random_millis(
                self.pacing.jitter_min_ms,
                self.pacing.jitter_max_ms,
            ))
            .await;

        let every = self.pacing.rotate_every;
        if every > 0 && self.requests % every == 0 {
            info!(requests = self.requests, "Proactive rate limit reached, switching accounts");
            if !self.rotate().await? {
                let pause = random_secs(self.pacing.solo_pause_min, self.pacing.solo_pause_max);
                info!(pause_secs = pause.as_secs(), "Pausing instead of rotating");
                self.sleeper.sleep(pause).await;
            }
        }
        Ok(())
    }

    /// Long rest before the next target once a session has made many
    /// requests.
    pub async fn pace_session(&mut self) {
        if self.requests_since_rest <= self.pacing.long_rest_after {
            return;
        }
        let rest = Duration::from_secs(self.pacing.long_rest);
        info!(
            requests = self.requests_since_rest,
            rest_secs = rest.as_secs(),
            "Request count high, resting before continuing"
        );
        self.sleeper.sleep(rest).await;
        self.requests_since_rest = 0;
    }
}
