//! SQLite backend: a single local database file plus an `images/` folder
//! next to it.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use igminer_core::{Comment, Post, UserProfile};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::types::Json;
use sqlx::SqlitePool;

use crate::storage::{PostNeedingComments, Storage, StorageStats, UpsertOutcome};
use crate::StorageError;

// Path relative to crates/igminer-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, sqlx::FromRow)]
struct PostRow {
    code: String,
    username: String,
    caption: Option<String>,
    hashtags: Json<Vec<String>>,
    likes: Option<i64>,
    comments_count: i64,
    views: Option<i64>,
    media_type: i64,
    image_url: Option<String>,
    storage_url: Option<String>,
    location_name: Option<String>,
    location_lat: Option<f64>,
    location_lng: Option<f64>,
    posted_at: Option<DateTime<Utc>>,
    word_count: i64,
}

impl From<PostRow> for Post {
    fn from(row: PostRow) -> Self {
        Post {
            code: row.code,
            username: row.username,
            caption: row.caption,
            hashtags: row.hashtags.0,
            likes: row.likes,
            comments_count: row.comments_count,
            views: row.views,
            media_type: i32::try_from(row.media_type).unwrap_or(1),
            image_url: row.image_url,
            storage_url: row.storage_url,
            location_name: row.location_name,
            location_lat: row.location_lat,
            location_lng: row.location_lng,
            posted_at: row.posted_at,
            word_count: row.word_count,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    username: String,
    full_name: Option<String>,
    bio: Option<String>,
    followers: Option<i64>,
    following: Option<i64>,
    post_count: Option<i64>,
    is_verified: bool,
    is_private: Option<bool>,
    profile_pic_url: Option<String>,
}

impl From<UserRow> for UserProfile {
    fn from(row: UserRow) -> Self {
        UserProfile {
            username: row.username,
            full_name: row.full_name,
            bio: row.bio,
            followers: row.followers,
            following: row.following,
            post_count: row.post_count,
            is_verified: row.is_verified,
            is_private: row.is_private,
            profile_pic_url: row.profile_pic_url,
        }
    }
}

pub struct SqliteStore {
    pool: SqlitePool,
    image_dir: PathBuf,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and apply migrations.
    ///
    /// # Errors
    ///
    /// Returns [`StorageError::Sqlx`] if the file cannot be opened, or
    /// [`StorageError::Migration`] if the schema cannot be applied.
    pub async fn open(path: &Path) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(10));
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;
        MIGRATOR.run(&pool).await?;

        let image_dir = path
            .parent()
            .map_or_else(|| PathBuf::from("images"), |p| p.join("images"));
        tracing::info!(path = %path.display(), "sqlite storage ready");
        Ok(Self { pool, image_dir })
    }

    /// Private in-memory database; images go under `image_dir`.
    ///
    /// # Errors
    ///
    /// Same as [`SqliteStore::open`].
    pub async fn in_memory(image_dir: PathBuf) -> Result<Self, StorageError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        MIGRATOR.run(&pool).await?;
        Ok(Self { pool, image_dir })
    }

    /// # Errors
    ///
    /// Returns [`StorageError::Sqlx`] if the query fails.
    pub async fn get_post(&self, code: &str) -> Result<Option<Post>, StorageError> {
        let row = sqlx::query_as::<_, PostRow>(
            "SELECT code, username, caption, hashtags, likes, comments_count, views, \
                    media_type, image_url, storage_url, location_name, location_lat, \
                    location_lng, posted_at, word_count \
             FROM posts WHERE code = ?",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Post::from))
    }

    /// # Errors
    ///
    /// Returns [`StorageError::Sqlx`] if the query fails.
    pub async fn get_user(&self, username: &str) -> Result<Option<UserProfile>, StorageError> {
        let row = sqlx::query_as::<_, UserRow>(
            "SELECT username, full_name, bio, followers, following, post_count, \
                    is_verified, is_private, profile_pic_url \
             FROM users WHERE username = ?",
        )
        .bind(username)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(UserProfile::from))
    }

    async fn count(&self, sql: &str) -> Result<u64, StorageError> {
        let n: i64 = sqlx::query_scalar(sql).fetch_one(&self.pool).await?;
        Ok(u64::try_from(n).unwrap_or(0))
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
impl Storage for SqliteStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    /// Counters (`likes`, `comments_count`, `views`) refresh from the
    /// incoming copy when it reports them; descriptive fields keep their
    /// first stored value.
    async fn upsert_post(&self, post: &Post) -> Result<UpsertOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existed = sqlx::query_scalar::<_, i64>("SELECT 1 FROM posts WHERE code = ?")
            .bind(&post.code)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        sqlx::query(
            "INSERT INTO posts \
                 (code, username, caption, hashtags, likes, comments_count, views, media_type, \
                  image_url, storage_url, location_name, location_lat, location_lng, \
                  posted_at, word_count) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (code) DO UPDATE SET \
                 username       = CASE WHEN posts.username = '' THEN excluded.username ELSE posts.username END, \
                 caption        = COALESCE(posts.caption, excluded.caption), \
                 hashtags       = CASE WHEN posts.hashtags = '[]' THEN excluded.hashtags ELSE posts.hashtags END, \
                 likes          = COALESCE(excluded.likes, posts.likes), \
                 comments_count = excluded.comments_count, \
                 views          = COALESCE(excluded.views, posts.views), \
                 image_url      = COALESCE(posts.image_url, excluded.image_url), \
                 storage_url    = COALESCE(excluded.storage_url, posts.storage_url), \
                 location_name  = COALESCE(posts.location_name, excluded.location_name), \
                 location_lat   = COALESCE(posts.location_lat, excluded.location_lat), \
                 location_lng   = COALESCE(posts.location_lng, excluded.location_lng), \
                 posted_at      = COALESCE(posts.posted_at, excluded.posted_at), \
                 updated_at     = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(&post.code)
        .bind(&post.username)
        .bind(&post.caption)
        .bind(Json(&post.hashtags))
        .bind(post.likes)
        .bind(post.comments_count)
        .bind(post.views)
        .bind(post.media_type)
        .bind(&post.image_url)
        .bind(&post.storage_url)
        .bind(&post.location_name)
        .bind(post.location_lat)
        .bind(post.location_lng)
        .bind(post.posted_at)
        .bind(post.word_count)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome(existed))
    }

    async fn upsert_comment(&self, comment: &Comment) -> Result<UpsertOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existed =
            sqlx::query_scalar::<_, i64>("SELECT 1 FROM comments WHERE post_id = ? AND id = ?")
                .bind(&comment.post_id)
                .bind(&comment.id)
                .fetch_optional(&mut *tx)
                .await?
                .is_some();

        sqlx::query(
            "INSERT INTO comments (post_id, id, username, text, likes, posted_at) \
             VALUES (?, ?, ?, ?, ?, ?) \
             ON CONFLICT (post_id, id) DO UPDATE SET \
                 username  = CASE WHEN comments.username = '' THEN excluded.username ELSE comments.username END, \
                 likes     = excluded.likes, \
                 posted_at = COALESCE(comments.posted_at, excluded.posted_at)",
        )
        .bind(&comment.post_id)
        .bind(&comment.id)
        .bind(&comment.username)
        .bind(&comment.text)
        .bind(comment.likes)
        .bind(comment.posted_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome(existed))
    }

    async fn upsert_user(&self, user: &UserProfile) -> Result<UpsertOutcome, StorageError> {
        let mut tx = self.pool.begin().await?;

        let existed = sqlx::query_scalar::<_, i64>("SELECT 1 FROM users WHERE username = ?")
            .bind(&user.username)
            .fetch_optional(&mut *tx)
            .await?
            .is_some();

        sqlx::query(
            "INSERT INTO users \
                 (username, full_name, bio, followers, following, post_count, \
                  is_verified, is_private, profile_pic_url) \
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?) \
             ON CONFLICT (username) DO UPDATE SET \
                 full_name       = COALESCE(excluded.full_name, users.full_name), \
                 bio             = COALESCE(excluded.bio, users.bio), \
                 followers       = COALESCE(excluded.followers, users.followers), \
                 following       = COALESCE(excluded.following, users.following), \
                 post_count      = COALESCE(excluded.post_count, users.post_count), \
                 is_verified     = excluded.is_verified, \
                 is_private      = COALESCE(excluded.is_private, users.is_private), \
                 profile_pic_url = COALESCE(excluded.profile_pic_url, users.profile_pic_url), \
                 updated_at      = strftime('%Y-%m-%dT%H:%M:%fZ', 'now')",
        )
        .bind(&user.username)
        .bind(&user.full_name)
        .bind(&user.bio)
        .bind(user.followers)
        .bind(user.following)
        .bind(user.post_count)
        .bind(user.is_verified)
        .bind(user.is_private)
        .bind(&user.profile_pic_url)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(outcome(existed))
    }

    async fn count_posts(&self) -> Result<u64, StorageError> {
        self.count("SELECT COUNT(*) FROM posts").await
    }

    async fn existing_post_codes(&self) -> Result<HashSet<String>, StorageError> {
        let codes: Vec<String> = sqlx::query_scalar("SELECT code FROM posts")
            .fetch_all(&self.pool)
            .await?;
        Ok(codes.into_iter().collect())
    }

    async fn posts_needing_comments(
        &self,
        limit: usize,
    ) -> Result<Vec<PostNeedingComments>, StorageError> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT p.code, p.comments_count FROM posts p \
             WHERE p.comments_count > 0 \
               AND NOT EXISTS (SELECT 1 FROM comments c WHERE c.post_id = p.code) \
             ORDER BY COALESCE(p.likes, 0) DESC, p.code \
             LIMIT ?",
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|(code, comments_count)| PostNeedingComments {
                code,
                comments_count,
            })
            .collect())
    }

    async fn enriched_usernames(&self) -> Result<HashSet<String>, StorageError> {
        let names: Vec<String> =
            sqlx::query_scalar("SELECT username FROM users WHERE followers IS NOT NULL")
                .fetch_all(&self.pool)
                .await?;
        Ok(names.into_iter().collect())
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            posts: self.count("SELECT COUNT(*) FROM posts").await?,
            comments: self.count("SELECT COUNT(*) FROM comments").await?,
            users: self.count("SELECT COUNT(*) FROM users").await?,
            enriched_users: self
                .count("SELECT COUNT(*) FROM users WHERE followers IS NOT NULL")
                .await?,
        })
    }

    async fn store_image(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Option<String>, StorageError> {
        tokio::fs::create_dir_all(&self.image_dir)
            .await
            .map_err(|e| StorageError::io(&self.image_dir, e))?;
        let path = self.image_dir.join(filename);
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|e| StorageError::io(&path, e))?;
        Ok(Some(path.display().to_string()))
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.pool.close().await;
        Ok(())
    }
}

#[cfg(test)]
#[path = "sqlite_test.rs"]
mod tests;
