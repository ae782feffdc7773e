//! Scripted page source and in-memory storage for collector tests.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use igminer_core::{CollectionTarget, Comment, DelayRange, Post, UserProfile};
use igminer_db::{PostNeedingComments, Storage, StorageError, StorageStats, UpsertOutcome};
use igminer_scraper::{
    ApiError, AuthError, CookieJar, CredentialSource, Credentials, PageSource, RateController,
    RateLimits, RawPage, RawRecords, SessionContext,
};
use serde_json::json;

use crate::paginator::PagePolicy;

pub fn limits() -> RateLimits {
    RateLimits {
        page_delay: DelayRange::from_millis(1_500, 3_000),
        target_delay: DelayRange::from_secs(10, 25),
        cycle_delay: DelayRange::from_secs(300, 600),
        throttle_delay: DelayRange::from_secs(30, 60),
        max_throttle_retries: 3,
        max_escalation_steps: 4,
        decay_after_successes: 5,
    }
}

pub fn rate() -> RateController {
    RateController::with_seed(limits(), 42)
}

pub fn policy() -> PagePolicy {
    PagePolicy {
        max_pages_top: 20,
        max_pages_recent: 10,
        max_pages_comments: 3,
        max_network_retries: 2,
        network_backoff_base_ms: 1_000,
    }
}

pub fn cookies(session_id: &str) -> CookieJar {
    [("sessionid", session_id), ("csrftoken", "csrf")]
        .into_iter()
        .map(|(k, v)| (k.to_owned(), v.to_owned()))
        .collect()
}

pub fn session() -> SessionContext {
    SessionContext::new(
        Credentials {
            cookies: cookies("sess-1"),
            obtained_at: Utc::now(),
        },
        Duration::days(60),
    )
    .expect("valid session")
}

pub fn media_page(codes: &[&str], next: Option<&str>) -> RawPage {
    let items = codes
        .iter()
        .map(|code| {
            json!({
                "code": code,
                "user": {"username": format!("author_{code}")},
                "caption": {"text": "Golden hour #travel"},
                "like_count": 10,
                "comment_count": 2
            })
        })
        .collect();
    RawPage {
        records: RawRecords::Media(items),
        more_available: next.is_some(),
        next_cursor: next.map(str::to_owned),
    }
}

pub fn comments_page(ids: &[&str], next: Option<&str>) -> RawPage {
    let items = ids
        .iter()
        .map(|id| json!({"pk": id, "text": "nice", "user": {"username": "fan"}}))
        .collect();
    RawPage {
        records: RawRecords::Comments(items),
        more_available: next.is_some(),
        next_cursor: next.map(str::to_owned),
    }
}

/// Serves queued responses per target (keyed by its display form) and
/// records every request. An exhausted script yields an empty final page.
#[derive(Default)]
pub struct ScriptedSource {
    scripts: Mutex<HashMap<String, VecDeque<Result<RawPage, ApiError>>>>,
    calls: Mutex<Vec<(String, Option<String>)>>,
}

impl ScriptedSource {
    pub fn push(&self, target: &CollectionTarget, response: Result<RawPage, ApiError>) {
        self.scripts
            .lock()
            .unwrap()
            .entry(target.to_string())
            .or_default()
            .push_back(response);
    }

    pub fn calls(&self) -> Vec<(String, Option<String>)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, target: &CollectionTarget) -> Vec<Option<String>> {
        let key = target.to_string();
        self.calls()
            .into_iter()
            .filter(|(k, _)| *k == key)
            .map(|(_, cursor)| cursor)
            .collect()
    }
}

#[async_trait]
impl PageSource for ScriptedSource {
    async fn fetch_page(
        &self,
        target: &CollectionTarget,
        _session: &SessionContext,
    ) -> Result<RawPage, ApiError> {
        let key = target.to_string();
        self.calls
            .lock()
            .unwrap()
            .push((key.clone(), target.cursor.clone()));
        let next = self
            .scripts
            .lock()
            .unwrap()
            .get_mut(&key)
            .and_then(VecDeque::pop_front);
        next.unwrap_or_else(|| {
            Ok(RawPage {
                records: RawRecords::Media(Vec::new()),
                more_available: false,
                next_cursor: None,
            })
        })
    }
}

/// Hands out queued credential results, counting calls.
#[derive(Default)]
pub struct ScriptedCredentials {
    results: Mutex<VecDeque<Result<Credentials, AuthError>>>,
    calls: Mutex<u32>,
}

impl ScriptedCredentials {
    pub fn push(&self, result: Result<Credentials, AuthError>) {
        self.results.lock().unwrap().push_back(result);
    }

    pub fn fresh(&self, session_id: &str) {
        self.push(Ok(Credentials {
            cookies: cookies(session_id),
            obtained_at: Utc::now(),
        }));
    }

    pub fn calls(&self) -> u32 {
        *self.calls.lock().unwrap()
    }
}

#[async_trait]
impl CredentialSource for ScriptedCredentials {
    async fn obtain(&self) -> Result<Credentials, AuthError> {
        *self.calls.lock().unwrap() += 1;
        self.results
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Err(AuthError::Command("no credentials scripted".to_owned())))
    }

    fn describe(&self) -> String {
        "scripted".to_owned()
    }
}

#[derive(Default)]
struct MemoryState {
    posts: BTreeMap<String, Post>,
    comments: HashSet<(String, String)>,
    users: BTreeMap<String, UserProfile>,
}

/// In-memory [`Storage`]; `fail_writes` makes every upsert fail.
#[derive(Default)]
pub struct MemoryStorage {
    state: Mutex<MemoryState>,
    pub fail_writes: std::sync::atomic::AtomicBool,
}

impl MemoryStorage {
    pub fn post_codes(&self) -> Vec<String> {
        self.state.lock().unwrap().posts.keys().cloned().collect()
    }

    fn check_writable(&self) -> Result<(), StorageError> {
        if self.fail_writes.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StorageError::Config("storage offline".to_owned()));
        }
        Ok(())
    }
}

fn outcome(existed: bool) -> UpsertOutcome {
    if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn upsert_post(&self, post: &Post) -> Result<UpsertOutcome, StorageError> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let existed = match state.posts.remove(&post.code) {
            Some(stored) => {
                state.posts.insert(post.code.clone(), stored.merged_with(post.clone()));
                true
            }
            None => {
                state.posts.insert(post.code.clone(), post.clone());
                false
            }
        };
        Ok(outcome(existed))
    }

    async fn upsert_comment(&self, comment: &Comment) -> Result<UpsertOutcome, StorageError> {
        self.check_writable()?;
        let key = (comment.post_id.clone(), comment.id.clone());
        Ok(outcome(!self.state.lock().unwrap().comments.insert(key)))
    }

    async fn upsert_user(&self, user: &UserProfile) -> Result<UpsertOutcome, StorageError> {
        self.check_writable()?;
        let mut state = self.state.lock().unwrap();
        let existed = match state.users.remove(&user.username) {
            Some(stored) => {
                state
                    .users
                    .insert(user.username.clone(), stored.merged_with(user.clone()));
                true
            }
            None => {
                state.users.insert(user.username.clone(), user.clone());
                false
            }
        };
        Ok(outcome(existed))
    }

    async fn count_posts(&self) -> Result<u64, StorageError> {
        Ok(self.state.lock().unwrap().posts.len() as u64)
    }

    async fn existing_post_codes(&self) -> Result<HashSet<String>, StorageError> {
        Ok(self.state.lock().unwrap().posts.keys().cloned().collect())
    }

    async fn posts_needing_comments(
        &self,
        limit: usize,
    ) -> Result<Vec<PostNeedingComments>, StorageError> {
        let state = self.state.lock().unwrap();
        let mut posts: Vec<&Post> = state
            .posts
            .values()
            .filter(|p| {
                p.comments_count > 0 && !state.comments.iter().any(|(post, _)| *post == p.code)
            })
            .collect();
        posts.sort_by_key(|p| std::cmp::Reverse(p.likes.unwrap_or(0)));
        Ok(posts
            .into_iter()
            .take(limit)
            .map(|p| PostNeedingComments {
                code: p.code.clone(),
                comments_count: p.comments_count,
            })
            .collect())
    }

    async fn enriched_usernames(&self) -> Result<HashSet<String>, StorageError> {
        Ok(self
            .state
            .lock()
            .unwrap()
            .users
            .values()
            .filter(|u| u.is_enriched())
            .map(|u| u.username.clone())
            .collect())
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let state = self.state.lock().unwrap();
        Ok(StorageStats {
            posts: state.posts.len() as u64,
            comments: state.comments.len() as u64,
            users: state.users.len() as u64,
            enriched_users: state.users.values().filter(|u| u.is_enriched()).count() as u64,
        })
    }

    async fn store_image(
        &self,
        _bytes: &[u8],
        _filename: &str,
    ) -> Result<Option<String>, StorageError> {
        Ok(None)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
