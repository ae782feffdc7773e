//! Where normalized pages go: the storage port, plus optional image capture.

use std::collections::BTreeSet;
use std::sync::Mutex;

use async_trait::async_trait;
use igminer_db::{Storage, StorageError};
use igminer_scraper::{IgClient, NormalizedPage};

/// Persists normalized pages.
#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Store every record of `page`; returns how many posts and comments
    /// were new.
    ///
    /// # Errors
    ///
    /// Any [`StorageError`] aborts the page.
    async fn accept(&self, page: NormalizedPage) -> Result<u64, StorageError>;
}

pub struct StorageSink<'a> {
    storage: &'a dyn Storage,
    images: Option<&'a IgClient>,
    authors: Mutex<BTreeSet<String>>,
}

impl<'a> StorageSink<'a> {
    pub fn new(storage: &'a dyn Storage) -> Self {
        Self {
            storage,
            images: None,
            authors: Mutex::new(BTreeSet::new()),
        }
    }

    /// Download and store the image of every newly inserted post.
    #[must_use]
    pub fn with_images(mut self, client: &'a IgClient) -> Self {
        self.images = Some(client);
        self
    }

    /// Authors of every post accepted so far.
    pub fn authors(&self) -> BTreeSet<String> {
        self.authors
            .lock()
            .map(|set| set.clone())
            .unwrap_or_default()
    }

    async fn capture_image(&self, client: &IgClient, code: &str, url: &str) -> Option<String> {
        let bytes = match client.download_image(url).await {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(code, error = %e, "image download failed");
                return None;
            }
        };
        match self.storage.store_image(&bytes, &format!("{code}.jpg")).await {
            Ok(location) => location,
            Err(e) => {
                tracing::warn!(code, error = %e, "image could not be stored");
                None
            }
        }
    }
}

#[async_trait]
impl RecordSink for StorageSink<'_> {
    async fn accept(&self, page: NormalizedPage) -> Result<u64, StorageError> {
        let mut new_records = 0u64;

        // Authors first so posts and comments never reference an unknown user.
        for user in &page.users {
            self.storage.upsert_user(user).await?;
        }

        for post in page.posts {
            let outcome = self.storage.upsert_post(&post).await?;
            if let Ok(mut authors) = self.authors.lock() {
                if !post.username.is_empty() {
                    authors.insert(post.username.clone());
                }
            }
            if !outcome.is_new() {
                continue;
            }
            new_records += 1;

            if let (Some(client), Some(url)) = (self.images, post.image_url.as_deref()) {
                if let Some(location) = self.capture_image(client, &post.code, url).await {
                    let mut stored = post.clone();
                    stored.storage_url = Some(location);
                    self.storage.upsert_post(&stored).await?;
                }
            }
        }

        for comment in &page.comments {
            if self.storage.upsert_comment(comment).await?.is_new() {
                new_records += 1;
            }
        }

        Ok(new_records)
    }
}
