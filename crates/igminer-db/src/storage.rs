use std::collections::HashSet;

use async_trait::async_trait;
use igminer_core::{Comment, Post, UserProfile};
use serde::Serialize;

use crate::StorageError;

/// Whether an upsert created the record or merged into an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
}

impl UpsertOutcome {
    #[must_use]
    pub fn is_new(self) -> bool {
        self == UpsertOutcome::Inserted
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PostNeedingComments {
    pub code: String,
    pub comments_count: i64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StorageStats {
    pub posts: u64,
    pub comments: u64,
    pub users: u64,
    pub enriched_users: u64,
}

/// Idempotent sink for collected records.
///
/// Every upsert is atomic per record and merges into any stored copy:
/// fields the incoming record leaves empty never overwrite stored values.
#[async_trait]
pub trait Storage: Send + Sync {
    fn name(&self) -> &'static str;

    async fn upsert_post(&self, post: &Post) -> Result<UpsertOutcome, StorageError>;

    async fn upsert_comment(&self, comment: &Comment) -> Result<UpsertOutcome, StorageError>;

    async fn upsert_user(&self, user: &UserProfile) -> Result<UpsertOutcome, StorageError>;

    async fn count_posts(&self) -> Result<u64, StorageError>;

    async fn existing_post_codes(&self) -> Result<HashSet<String>, StorageError>;

    /// Posts with a positive comment count and no stored comments, most
    /// liked first.
    async fn posts_needing_comments(
        &self,
        limit: usize,
    ) -> Result<Vec<PostNeedingComments>, StorageError>;

    /// Usernames whose full profile has been fetched.
    async fn enriched_usernames(&self) -> Result<HashSet<String>, StorageError>;

    async fn stats(&self) -> Result<StorageStats, StorageError>;

    /// Persist image bytes; returns where they ended up, if anywhere.
    async fn store_image(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Option<String>, StorageError>;

    /// Make every accepted write durable. Backends that write through
    /// have nothing to do.
    async fn flush(&self) -> Result<(), StorageError> {
        Ok(())
    }

    /// Flush buffered state and release resources.
    async fn close(&self) -> Result<(), StorageError>;
}
