// Test mocks for the crawler.
//
// - MockSource (SourceApi): in-memory profiles and listings served in pages of
//   a fixed size, with per-account rate limits and one-shot page failures
// - MockAnalyzer (ContentAnalyzer): canned JSON, optional quota cutoff
// - RecordingSleeper (Sleeper): records every requested delay, never waits
//   unless told to hang
//
// Plus builders for RawProfile / RawUser / RawPost fixtures.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};

use crawlgraph_common::{
    DataType, EntityId, RawComment, RawPost, RawProfile, RawUser,
};

use crate::pages::{CursorPages, Page, PageFetcher};
use crate::traits::{
    AnalyzerError, ContentAnalyzer, PostPages, Sleeper, SourceApi, SourceError, UserPages,
};

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

/// Public profile with the given counts.
pub fn profile(id: EntityId, handle: &str, followers: u64, followees: u64, posts: u64) -> RawProfile {
    RawProfile {
        user_id: id,
        username: handle.to_string(),
        full_name: Some(format!("{handle} full")),
        biography: Some(format!("bio of {handle}")),
        followers,
        followees,
        mediacount: posts,
        ..Default::default()
    }
}

pub fn user(id: EntityId) -> RawUser {
    RawUser {
        id,
        username: format!("user{id}"),
        full_name: Some(format!("User {id}")),
        ..Default::default()
    }
}

/// Users with ids in `ids`, in order.
pub fn users(ids: impl IntoIterator<Item = EntityId>) -> Vec<RawUser> {
    ids.into_iter().map(user).collect()
}

pub fn post(id: EntityId, owner: EntityId) -> RawPost {
    RawPost {
        media_id: id,
        shortcode: format!("sc{id}"),
        owner_id: owner,
        caption: Some(format!("caption {id}")),
        likes: 2,
        comments: 1,
        mediacount: 1,
        media_urls: vec![format!("https://cdn.example/{id}.jpg")],
        ..Default::default()
    }
}

pub fn comment(id: EntityId, owner: EntityId, text: &str) -> RawComment {
    RawComment {
        id,
        owner: user(owner),
        text: text.to_string(),
        ..Default::default()
    }
}

// ---------------------------------------------------------------------------
// MockSource
// ---------------------------------------------------------------------------

struct PageFailure {
    data_type: DataType,
    page: usize,
    error: SourceError,
    remaining: usize,
}

/// One page request as seen by the mock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageFetch {
    pub data_type: DataType,
    pub owner: EntityId,
    pub after: Option<String>,
}

struct MockState {
    page_size: usize,
    profiles: HashMap<String, RawProfile>,
    followers: HashMap<EntityId, Vec<RawUser>>,
    followees: HashMap<EntityId, Vec<RawUser>>,
    posts: HashMap<EntityId, Vec<RawPost>>,
    comments: HashMap<EntityId, Vec<RawComment>>,
    likers: HashMap<EntityId, Vec<RawUser>>,
    active: Option<String>,
    logins: Vec<String>,
    rate_limited: HashSet<String>,
    profile_errors: HashMap<String, SourceError>,
    page_failures: Vec<PageFailure>,
    fetches: Vec<PageFetch>,
    profile_calls: usize,
}

impl MockState {
    fn check_rate_limit(&self) -> Result<(), SourceError> {
        match &self.active {
            Some(account) if self.rate_limited.contains(account) => Err(SourceError::RateLimited),
            _ => Ok(()),
        }
    }
}

/// In-memory source platform. Listings are read at fetch time, so changing
/// them between runs models the platform changing underneath the crawler.
/// Builder pattern: `.page_size()`, `.with_profile()`, `.with_followers()`,
/// `.with_followees()`, `.with_posts()`, `.with_comments()`, `.with_likers()`.
pub struct MockSource {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockSource {
    fn default() -> Self {
        Self::new()
    }
}

impl MockSource {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                page_size: 50,
                profiles: HashMap::new(),
                followers: HashMap::new(),
                followees: HashMap::new(),
                posts: HashMap::new(),
                comments: HashMap::new(),
                likers: HashMap::new(),
                active: None,
                logins: Vec::new(),
                rate_limited: HashSet::new(),
                profile_errors: HashMap::new(),
                page_failures: Vec::new(),
                fetches: Vec::new(),
                profile_calls: 0,
            })),
        }
    }

    pub fn page_size(self, size: usize) -> Self {
        self.state.lock().unwrap().page_size = size.max(1);
        self
    }

    pub fn with_profile(self, profile: RawProfile) -> Self {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.username.clone(), profile);
        self
    }

    pub fn with_followers(self, owner: EntityId, users: Vec<RawUser>) -> Self {
        self.set_followers(owner, users);
        self
    }

    pub fn with_followees(self, owner: EntityId, users: Vec<RawUser>) -> Self {
        self.set_followees(owner, users);
        self
    }

    pub fn with_posts(self, owner: EntityId, posts: Vec<RawPost>) -> Self {
        self.state.lock().unwrap().posts.insert(owner, posts);
        self
    }

    pub fn with_comments(self, post_id: EntityId, comments: Vec<RawComment>) -> Self {
        self.state.lock().unwrap().comments.insert(post_id, comments);
        self
    }

    pub fn with_likers(self, post_id: EntityId, likers: Vec<RawUser>) -> Self {
        self.state.lock().unwrap().likers.insert(post_id, likers);
        self
    }

    // --- Runtime changes ---

    pub fn set_followers(&self, owner: EntityId, users: Vec<RawUser>) {
        self.state.lock().unwrap().followers.insert(owner, users);
    }

    pub fn set_followees(&self, owner: EntityId, users: Vec<RawUser>) {
        self.state.lock().unwrap().followees.insert(owner, users);
    }

    pub fn set_profile(&self, profile: RawProfile) {
        self.state
            .lock()
            .unwrap()
            .profiles
            .insert(profile.username.clone(), profile);
    }

    /// Every call made while `account` is active fails with `RateLimited`.
    pub fn rate_limit(&self, account: &str) {
        self.state
            .lock()
            .unwrap()
            .rate_limited
            .insert(account.to_string());
    }

    pub fn lift_rate_limits(&self) {
        self.state.lock().unwrap().rate_limited.clear();
    }

    /// Profile lookups for `handle` fail with `error` until cleared.
    pub fn fail_profile(&self, handle: &str, error: SourceError) {
        self.state
            .lock()
            .unwrap()
            .profile_errors
            .insert(handle.to_string(), error);
    }

    /// The next `times` fetches of page `page` (0-based) of any `data_type`
    /// listing fail with `error`.
    pub fn fail_page(&self, data_type: DataType, page: usize, error: SourceError, times: usize) {
        self.state.lock().unwrap().page_failures.push(PageFailure {
            data_type,
            page,
            error,
            remaining: times,
        });
    }

    // --- Inspection ---

    pub fn logins(&self) -> Vec<String> {
        self.state.lock().unwrap().logins.clone()
    }

    pub fn fetches(&self) -> Vec<PageFetch> {
        self.state.lock().unwrap().fetches.clone()
    }

    pub fn page_fetches(&self, data_type: DataType) -> usize {
        self.state
            .lock()
            .unwrap()
            .fetches
            .iter()
            .filter(|f| f.data_type == data_type)
            .count()
    }

    pub fn profile_calls(&self) -> usize {
        self.state.lock().unwrap().profile_calls
    }

    fn pages<T>(&self, data_type: DataType, owner: EntityId, select: Selector<T>) -> CursorPages<MockFetcher<T>>
    where
        T: Clone + Send + Sync + 'static,
    {
        CursorPages::new(MockFetcher {
            state: self.state.clone(),
            data_type,
            owner,
            select,
        })
    }
}

type Selector<T> = fn(&MockState, EntityId) -> Vec<T>;

struct MockFetcher<T> {
    state: Arc<Mutex<MockState>>,
    data_type: DataType,
    owner: EntityId,
    select: Selector<T>,
}

#[async_trait]
impl<T> PageFetcher for MockFetcher<T>
where
    T: Clone + Send + Sync + 'static,
{
    type Item = T;

    async fn fetch(&self, after: Option<&str>) -> Result<Page<T>, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.fetches.push(PageFetch {
            data_type: self.data_type,
            owner: self.owner,
            after: after.map(String::from),
        });
        state.check_rate_limit()?;

        let offset = match after {
            None => 0,
            Some(token) => token
                .strip_prefix("off:")
                .and_then(|n| n.parse::<usize>().ok())
                .ok_or_else(|| SourceError::InvalidCursor(token.to_string()))?,
        };
        let size = state.page_size;
        let page = offset / size;
        let data_type = self.data_type;
        if let Some(failure) = state
            .page_failures
            .iter_mut()
            .find(|f| f.data_type == data_type && f.page == page && f.remaining > 0)
        {
            failure.remaining -= 1;
            return Err(failure.error.clone());
        }

        let all = (self.select)(&state, self.owner);
        let end = (offset + size).min(all.len());
        let items = all.get(offset..end).map(<[T]>::to_vec).unwrap_or_default();
        Ok(Page {
            items,
            end_cursor: (end < all.len()).then(|| format!("off:{end}")),
        })
    }
}

#[async_trait]
impl SourceApi for MockSource {
    async fn login(&self, account: &str) -> Result<(), SourceError> {
        let mut state = self.state.lock().unwrap();
        state.logins.push(account.to_string());
        state.active = Some(account.to_string());
        Ok(())
    }

    async fn profile(&self, handle: &str) -> Result<RawProfile, SourceError> {
        let mut state = self.state.lock().unwrap();
        state.profile_calls += 1;
        state.check_rate_limit()?;
        if let Some(err) = state.profile_errors.get(handle) {
            return Err(err.clone());
        }
        state
            .profiles
            .get(handle)
            .cloned()
            .ok_or_else(|| SourceError::NotFound(handle.to_string()))
    }

    fn followers(&self, profile: &RawProfile) -> UserPages {
        Box::new(self.pages(DataType::Followers, profile.user_id, |s, id| {
            s.followers.get(&id).cloned().unwrap_or_default()
        }))
    }

    fn followees(&self, profile: &RawProfile) -> UserPages {
        Box::new(self.pages(DataType::Followees, profile.user_id, |s, id| {
            s.followees.get(&id).cloned().unwrap_or_default()
        }))
    }

    fn posts(&self, profile: &RawProfile) -> PostPages {
        Box::new(self.pages(DataType::Posts, profile.user_id, |s, id| {
            s.posts.get(&id).cloned().unwrap_or_default()
        }))
    }

    async fn post_comments(&self, post: &RawPost) -> Result<Vec<RawComment>, SourceError> {
        let state = self.state.lock().unwrap();
        state.check_rate_limit()?;
        Ok(state.comments.get(&post.media_id).cloned().unwrap_or_default())
    }

    async fn post_likers(&self, post: &RawPost) -> Result<Vec<RawUser>, SourceError> {
        let state = self.state.lock().unwrap();
        state.check_rate_limit()?;
        Ok(state.likers.get(&post.media_id).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// MockAnalyzer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzerCall {
    Image(String),
    Text(String),
}

/// Returns canned JSON. After `quota_after(n)` successful calls every call
/// fails with `QuotaExceeded`.
#[derive(Default)]
pub struct MockAnalyzer {
    calls: Mutex<Vec<AnalyzerCall>>,
    quota: Mutex<Option<usize>>,
}

impl MockAnalyzer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn quota_after(self, calls: usize) -> Self {
        *self.quota.lock().unwrap() = Some(calls);
        self
    }

    pub fn lift_quota(&self) {
        *self.quota.lock().unwrap() = None;
    }

    pub fn calls(&self) -> Vec<AnalyzerCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn image_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, AnalyzerCall::Image(_)))
            .count()
    }

    pub fn text_prompts(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                AnalyzerCall::Text(prompt) => Some(prompt),
                AnalyzerCall::Image(_) => None,
            })
            .collect()
    }

    fn record(&self, call: AnalyzerCall) -> Result<(), AnalyzerError> {
        let mut quota = self.quota.lock().unwrap();
        match quota.as_mut() {
            Some(0) => return Err(AnalyzerError::QuotaExceeded("mock quota".into())),
            Some(left) => *left -= 1,
            None => {}
        }
        self.calls.lock().unwrap().push(call);
        Ok(())
    }
}

#[async_trait]
impl ContentAnalyzer for MockAnalyzer {
    async fn analyze_image(&self, url: &str, _system: &str) -> Result<Value, AnalyzerError> {
        self.record(AnalyzerCall::Image(url.to_string()))?;
        Ok(json!({ "description": format!("image at {url}") }))
    }

    async fn analyze_text(&self, prompt: &str, _system: &str) -> Result<Value, AnalyzerError> {
        self.record(AnalyzerCall::Text(prompt.to_string()))?;
        Ok(json!({ "summary": "mock analysis" }))
    }
}

// ---------------------------------------------------------------------------
// RecordingSleeper
// ---------------------------------------------------------------------------

/// Records sleeps without waiting. `hang_at(n)` makes the n-th and later
/// calls block forever, standing in for a process stopped mid-stage.
#[derive(Default)]
pub struct RecordingSleeper {
    sleeps: Mutex<Vec<Duration>>,
    hang_at: Mutex<Option<usize>>,
    hung: tokio::sync::Notify,
}

impl RecordingSleeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sleeps(&self) -> Vec<Duration> {
        self.sleeps.lock().unwrap().clone()
    }

    /// How many times exactly `duration` was requested.
    pub fn count(&self, duration: Duration) -> usize {
        self.sleeps().iter().filter(|d| **d == duration).count()
    }

    pub fn hang_at(&self, call: usize) {
        *self.hang_at.lock().unwrap() = Some(call);
    }

    pub fn release(&self) {
        *self.hang_at.lock().unwrap() = None;
    }

    /// Resolves once a call has started hanging.
    pub async fn hung(&self) {
        self.hung.notified().await;
    }
}

#[async_trait]
impl Sleeper for RecordingSleeper {
    async fn sleep(&self, duration: Duration) {
        let calls = {
            let mut sleeps = self.sleeps.lock().unwrap();
            sleeps.push(duration);
            sleeps.len()
        };
        let hang = matches!(*self.hang_at.lock().unwrap(), Some(n) if calls >= n);
        if hang {
            self.hung.notify_one();
            std::future::pending::<()>().await;
        }
    }
}
