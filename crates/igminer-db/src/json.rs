//! JSON file backend: `posts.json`, `comments.json` and `users.json` in one
//! output directory, held in memory and rewritten every
//! [`FLUSH_EVERY`] writes and whenever the store is flushed or closed.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use igminer_core::{Comment, Post, UserProfile};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex;

use crate::storage::{PostNeedingComments, Storage, StorageStats, UpsertOutcome};
use crate::StorageError;

pub const FLUSH_EVERY: usize = 100;

const POSTS_FILE: &str = "posts.json";
const COMMENTS_FILE: &str = "comments.json";
const USERS_FILE: &str = "users.json";

#[derive(Default)]
struct State {
    posts: BTreeMap<String, Post>,
    comments: BTreeMap<(String, String), Comment>,
    users: BTreeMap<String, UserProfile>,
    unflushed: usize,
}

pub struct JsonStore {
    dir: PathBuf,
    state: Mutex<State>,
}

impl JsonStore {
    /// Open `dir`, creating it if needed and loading any files a previous
    /// run left behind.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Io`] if the directory cannot be created or a
    /// file cannot be read, and [`StorageError::Json`] if a file is corrupt.
    pub async fn open(dir: &Path) -> Result<Self, StorageError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|e| StorageError::io(dir, e))?;

        let posts: Vec<Post> = read_array(&dir.join(POSTS_FILE)).await?;
        let comments: Vec<Comment> = read_array(&dir.join(COMMENTS_FILE)).await?;
        let users: Vec<UserProfile> = read_array(&dir.join(USERS_FILE)).await?;

        let state = State {
            posts: posts.into_iter().map(|p| (p.code.clone(), p)).collect(),
            comments: comments
                .into_iter()
                .map(|c| ((c.post_id.clone(), c.id.clone()), c))
                .collect(),
            users: users.into_iter().map(|u| (u.username.clone(), u)).collect(),
            unflushed: 0,
        };
        tracing::info!(
            dir = %dir.display(),
            posts = state.posts.len(),
            comments = state.comments.len(),
            users = state.users.len(),
            "json storage ready"
        );

        Ok(Self {
            dir: dir.to_path_buf(),
            state: Mutex::new(state),
        })
    }

    pub async fn get_post(&self, code: &str) -> Option<Post> {
        self.state.lock().await.posts.get(code).cloned()
    }

    pub async fn get_user(&self, username: &str) -> Option<UserProfile> {
        self.state.lock().await.users.get(username).cloned()
    }

    async fn after_write(&self, state: &mut State) -> Result<(), StorageError> {
        state.unflushed += 1;
        if state.unflushed >= FLUSH_EVERY {
            self.write_files(state).await?;
        }
        Ok(())
    }

    async fn write_files(&self, state: &mut State) -> Result<(), StorageError> {
        write_array(&self.dir.join(POSTS_FILE), state.posts.values()).await?;
        write_array(&self.dir.join(COMMENTS_FILE), state.comments.values()).await?;
        write_array(&self.dir.join(USERS_FILE), state.users.values()).await?;
        tracing::debug!(records = state.unflushed, "json storage flushed");
        state.unflushed = 0;
        Ok(())
    }
}

async fn read_array<T: DeserializeOwned>(path: &Path) -> Result<Vec<T>, StorageError> {
    let raw = match tokio::fs::read_to_string(path).await {
        Ok(raw) => raw,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(StorageError::io(path, e)),
    };
    serde_json::from_str(&raw).map_err(|e| StorageError::Json {
        context: path.display().to_string(),
        source: e,
    })
}

/// Write to `<path>.tmp` then rename over `path`.
async fn write_array<'a, T, I>(path: &Path, items: I) -> Result<(), StorageError>
where
    T: Serialize + 'a,
    I: Iterator<Item = &'a T>,
{
    let items: Vec<&T> = items.collect();
    let body = serde_json::to_vec_pretty(&items).map_err(|e| StorageError::Json {
        context: path.display().to_string(),
        source: e,
    })?;

    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, body)
        .await
        .map_err(|e| StorageError::io(&tmp, e))?;
    tokio::fs::rename(&tmp, path)
        .await
        .map_err(|e| StorageError::io(path, e))
}

#[async_trait]
impl Storage for JsonStore {
    fn name(&self) -> &'static str {
        "json"
    }

    async fn upsert_post(&self, post: &Post) -> Result<UpsertOutcome, StorageError> {
        let mut state = self.state.lock().await;
        let outcome = match state.posts.remove(&post.code) {
            Some(stored) => {
                let merged = stored.merged_with(post.clone());
                state.posts.insert(post.code.clone(), merged);
                UpsertOutcome::Updated
            }
            None => {
                state.posts.insert(post.code.clone(), post.clone());
                UpsertOutcome::Inserted
            }
        };
        self.after_write(&mut state).await?;
        Ok(outcome)
    }

    async fn upsert_comment(&self, comment: &Comment) -> Result<UpsertOutcome, StorageError> {
        let mut state = self.state.lock().await;
        let key = (comment.post_id.clone(), comment.id.clone());
        let outcome = if let Some(stored) = state.comments.get_mut(&key) {
            stored.likes = comment.likes;
            if stored.username.is_empty() {
                stored.username.clone_from(&comment.username);
            }
            if stored.posted_at.is_none() {
                stored.posted_at = comment.posted_at;
            }
            UpsertOutcome::Updated
        } else {
            state.comments.insert(key, comment.clone());
            UpsertOutcome::Inserted
        };
        self.after_write(&mut state).await?;
        Ok(outcome)
    }

    async fn upsert_user(&self, user: &UserProfile) -> Result<UpsertOutcome, StorageError> {
        let mut state = self.state.lock().await;
        let outcome = match state.users.remove(&user.username) {
            Some(stored) => {
                let merged = stored.merged_with(user.clone());
                state.users.insert(user.username.clone(), merged);
                UpsertOutcome::Updated
            }
            None => {
                state.users.insert(user.username.clone(), user.clone());
                UpsertOutcome::Inserted
            }
        };
        self.after_write(&mut state).await?;
        Ok(outcome)
    }

    async fn count_posts(&self) -> Result<u64, StorageError> {
        Ok(self.state.lock().await.posts.len() as u64)
    }

    async fn existing_post_codes(&self) -> Result<HashSet<String>, StorageError> {
        Ok(self.state.lock().await.posts.keys().cloned().collect())
    }

    async fn posts_needing_comments(
        &self,
        limit: usize,
    ) -> Result<Vec<PostNeedingComments>, StorageError> {
        let state = self.state.lock().await;
        let covered: HashSet<&str> = state.comments.keys().map(|(post, _)| post.as_str()).collect();

        let mut candidates: Vec<&Post> = state
            .posts
            .values()
            .filter(|p| p.comments_count > 0 && !covered.contains(p.code.as_str()))
            .collect();
        candidates.sort_by(|a, b| {
            b.likes
                .unwrap_or(0)
                .cmp(&a.likes.unwrap_or(0))
                .then_with(|| a.code.cmp(&b.code))
        });

        Ok(candidates
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
            .await
            .users
            .values()
            .filter(|u| u.is_enriched())
            .map(|u| u.username.clone())
            .collect())
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        let state = self.state.lock().await;
        Ok(StorageStats {
            posts: state.posts.len() as u64,
            comments: state.comments.len() as u64,
            users: state.users.len() as u64,
            enriched_users: state.users.values().filter(|u| u.is_enriched()).count() as u64,
        })
    }

    async fn store_image(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Option<String>, StorageError> {
        let image_dir = self.dir.join("images");
        tokio::fs::create_dir_all(&image_dir)
            .await
            .map_err(|e| StorageError::io(&image_dir, e))?;
        let path = image_dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(Some(path.display().to_string()))
    }

    async fn flush(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        if state.unflushed == 0 {
            return Ok(());
        }
        self.write_files(&mut state).await
    }

    async fn close(&self) -> Result<(), StorageError> {
        let mut state = self.state.lock().await;
        self.write_files(&mut state).await
    }
}
