//! Hosted backend speaking PostgREST, with optional image upload to an
//! object-storage bucket on the same project.
//!
//! Tables: `ig_posts`, `ig_comments`, `ig_users`. Writes use
//! `Prefer: resolution=merge-duplicates`; `null` fields are stripped from the
//! payload so a partial record never blanks a stored column.

use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use igminer_core::{Comment, Post, UserProfile};
use reqwest::{Client, RequestBuilder, Response, Url};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::storage::{PostNeedingComments, Storage, StorageStats, UpsertOutcome};
use crate::StorageError;

const POSTS: &str = "ig_posts";
const COMMENTS: &str = "ig_comments";
const USERS: &str = "ig_users";
const PAGE_SIZE: usize = 1000;

#[derive(Debug, Clone)]
pub struct HostedConfig {
    pub url: String,
    pub key: String,
    pub schema: String,
    pub bucket: Option<String>,
}

pub struct HostedStore {
    client: Client,
    base: String,
    key: String,
    schema: String,
    bucket: Option<String>,
}

#[derive(Deserialize)]
struct CodeRow {
    code: String,
    comments_count: i64,
}

impl HostedStore {
    /// # Errors
    ///
    /// Returns [`StorageError::Config`] for an unparseable URL or an empty
    /// key, or [`StorageError::Http`] if the HTTP client cannot be built.
    pub fn new(config: HostedConfig) -> Result<Self, StorageError> {
        let base = config.url.trim_end_matches('/').to_owned();
        Url::parse(&base)
            .map_err(|e| StorageError::Config(format!("invalid hosted URL {base:?}: {e}")))?;
        if config.key.trim().is_empty() {
            return Err(StorageError::Config("hosted key is empty".to_owned()));
        }

        let client = Client::builder().timeout(Duration::from_secs(30)).build()?;
        tracing::info!(url = %base, schema = %config.schema, "hosted storage ready");
        Ok(Self {
            client,
            base,
            key: config.key,
            schema: config.schema,
            bucket: config.bucket.filter(|b| !b.is_empty()),
        })
    }

    fn table_url(&self, table: &str) -> String {
        format!("{}/rest/v1/{table}", self.base)
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.key)
            .header(reqwest::header::AUTHORIZATION, format!("Bearer {}", self.key))
    }

    fn read(&self, builder: RequestBuilder) -> RequestBuilder {
        self.authed(builder).header("Accept-Profile", &self.schema)
    }

    async fn check(response: Response, resource: &str) -> Result<Response, StorageError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StorageError::Hosted {
            status: status.as_u16(),
            resource: resource.to_owned(),
            body: body.chars().take(200).collect(),
        })
    }

    async fn exists(&self, table: &str, filters: &[(&str, String)]) -> Result<bool, StorageError> {
        let mut query: Vec<(&str, String)> =
            vec![("select", "*".to_owned()), ("limit", "1".to_owned())];
        query.extend(filters.iter().cloned());
        let response = self
            .read(self.client.get(self.table_url(table)))
            .query(&query)
            .send()
            .await?;
        let rows: Vec<Value> = Self::check(response, table).await?.json().await?;
        Ok(!rows.is_empty())
    }

    async fn upsert(
        &self,
        table: &str,
        on_conflict: &str,
        payload: Value,
    ) -> Result<(), StorageError> {
        let response = self
            .authed(self.client.post(self.table_url(table)))
            .header("Content-Profile", &self.schema)
            .header("Prefer", "resolution=merge-duplicates,return=minimal")
            .query(&[("on_conflict", on_conflict)])
            .json(&[payload])
            .send()
            .await?;
        Self::check(response, table).await?;
        Ok(())
    }

    /// Exact row count from the `Content-Range` header.
    async fn count(&self, table: &str, filters: &[(&str, &str)]) -> Result<u64, StorageError> {
        let mut query = vec![("select", "*"), ("limit", "1")];
        query.extend_from_slice(filters);
        let response = self
            .read(self.client.get(self.table_url(table)))
            .header("Range-Unit", "items")
            .header("Range", "0-0")
            .header("Prefer", "count=exact")
            .query(&query)
            .send()
            .await?;
        let response = Self::check(response, table).await?;
        Ok(response
            .headers()
            .get(reqwest::header::CONTENT_RANGE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_content_range)
            .unwrap_or(0))
    }

    /// Every row of `table` matching `query`, fetched [`PAGE_SIZE`] at a time.
    async fn select_all<T: DeserializeOwned>(
        &self,
        table: &str,
        query: &[(&str, &str)],
    ) -> Result<Vec<T>, StorageError> {
        let mut rows = Vec::new();
        let mut offset = 0usize;
        loop {
            let limit = PAGE_SIZE.to_string();
            let from = offset.to_string();
            let mut params: Vec<(&str, &str)> = query.to_vec();
            params.push(("limit", limit.as_str()));
            params.push(("offset", from.as_str()));

            let response = self
                .read(self.client.get(self.table_url(table)))
                .query(&params)
                .send()
                .await?;
            let batch: Vec<T> = Self::check(response, table).await?.json().await?;
            let fetched = batch.len();
            rows.extend(batch);
            if fetched < PAGE_SIZE {
                return Ok(rows);
            }
            offset += PAGE_SIZE;
        }
    }

    async fn column_set(
        &self,
        table: &str,
        column: &str,
        filters: &[(&str, &str)],
    ) -> Result<HashSet<String>, StorageError> {
        let mut query = vec![("select", column)];
        query.extend_from_slice(filters);
        let rows: Vec<Value> = self.select_all(table, &query).await?;
        Ok(rows
            .into_iter()
            .filter_map(|row| row.get(column).and_then(Value::as_str).map(str::to_owned))
            .collect())
    }
}

fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit('/').next()?.trim().parse().ok()
}

/// Serialize `record` as a JSON object with `null` members removed.
fn payload<T: Serialize>(record: &T, resource: &str) -> Result<Value, StorageError> {
    let mut value = serde_json::to_value(record).map_err(|e| StorageError::Json {
        context: resource.to_owned(),
        source: e,
    })?;
    if let Value::Object(map) = &mut value {
        map.retain(|_, v| !v.is_null());
    }
    Ok(value)
}

fn outcome(existed: bool) -> UpsertOutcome {
    if existed {
        UpsertOutcome::Updated
    } else {
        UpsertOutcome::Inserted
    }
}

#[async_trait]
impl Storage for HostedStore {
    fn name(&self) -> &'static str {
        "hosted"
    }

    async fn upsert_post(&self, post: &Post) -> Result<UpsertOutcome, StorageError> {
        let existed = self.exists(POSTS, &[("code", format!("eq.{}", post.code))]).await?;
        let mut body = payload(post, POSTS)?;
        if let Value::Object(map) = &mut body {
            map.insert("id".to_owned(), Value::String(post.code.clone()));
        }
        self.upsert(POSTS, "code", body).await?;
        Ok(outcome(existed))
    }

    async fn upsert_comment(&self, comment: &Comment) -> Result<UpsertOutcome, StorageError> {
        // ig_comments.username references ig_users.
        if !comment.username.is_empty() {
            self.upsert(USERS, "username", serde_json::json!({ "username": comment.username }))
                .await?;
        }
        let existed = self
            .exists(
                COMMENTS,
                &[
                    ("post_id", format!("eq.{}", comment.post_id)),
                    ("id", format!("eq.{}", comment.id)),
                ],
            )
            .await?;
        self.upsert(COMMENTS, "post_id,id", payload(comment, COMMENTS)?)
            .await?;
        Ok(outcome(existed))
    }

    async fn upsert_user(&self, user: &UserProfile) -> Result<UpsertOutcome, StorageError> {
        let existed = self
            .exists(USERS, &[("username", format!("eq.{}", user.username))])
            .await?;
        self.upsert(USERS, "username", payload(user, USERS)?).await?;
        Ok(outcome(existed))
    }

    async fn count_posts(&self) -> Result<u64, StorageError> {
        self.count(POSTS, &[]).await
    }

    async fn existing_post_codes(&self) -> Result<HashSet<String>, StorageError> {
        self.column_set(POSTS, "code", &[]).await
    }

    async fn posts_needing_comments(
        &self,
        limit: usize,
    ) -> Result<Vec<PostNeedingComments>, StorageError> {
        let covered = self.column_set(COMMENTS, "post_id", &[]).await?;
        let rows: Vec<CodeRow> = self
            .select_all(
                POSTS,
                &[
                    ("select", "code,comments_count"),
                    ("comments_count", "gt.0"),
                    ("order", "likes.desc.nullslast,code.asc"),
                ],
            )
            .await?;

        Ok(rows
            .into_iter()
            .filter(|row| !covered.contains(&row.code))
            .take(limit)
            .map(|row| PostNeedingComments {
                code: row.code,
                comments_count: row.comments_count,
            })
            .collect())
    }

    async fn enriched_usernames(&self) -> Result<HashSet<String>, StorageError> {
        self.column_set(USERS, "username", &[("followers", "not.is.null")])
            .await
    }

    async fn stats(&self) -> Result<StorageStats, StorageError> {
        Ok(StorageStats {
            posts: self.count(POSTS, &[]).await?,
            comments: self.count(COMMENTS, &[]).await?,
            users: self.count(USERS, &[]).await?,
            enriched_users: self.count(USERS, &[("followers", "not.is.null")]).await?,
        })
    }

    /// Upload to the configured bucket. Without a bucket nothing is stored;
    /// a rejected upload is logged and reported as not stored.
    async fn store_image(
        &self,
        bytes: &[u8],
        filename: &str,
    ) -> Result<Option<String>, StorageError> {
        let Some(bucket) = &self.bucket else {
            return Ok(None);
        };

        let response = self
            .authed(
                self.client
                    .post(format!("{}/storage/v1/object/{bucket}/{filename}", self.base)),
            )
            .header(reqwest::header::CONTENT_TYPE, "image/jpeg")
            .body(bytes.to_vec())
            .send()
            .await?;
        let status = response.status();
        let public = format!("{}/storage/v1/object/public/{bucket}/{filename}", self.base);

        if status.is_success() {
            return Ok(Some(public));
        }
        let body = response.text().await.unwrap_or_default();
        if status == reqwest::StatusCode::BAD_REQUEST && body.contains("Duplicate") {
            return Ok(Some(public));
        }
        tracing::warn!(filename, status = status.as_u16(), "image upload rejected");
        Ok(None)
    }

    async fn close(&self) -> Result<(), StorageError> {
        Ok(())
    }
}
