//! The page-fetching seam between the paginator and the HTTP client.

use async_trait::async_trait;
use igminer_core::{CollectionTarget, TargetKind};

use crate::client::IgClient;
use crate::error::ApiError;
use crate::session::SessionContext;
use crate::types::RawPage;

/// Fetches the page of `target` that follows its current cursor.
#[async_trait]
pub trait PageSource: Send + Sync {
    /// # Errors
    ///
    /// Returns [`ApiError`] for throttling, auth rejection, transport
    /// failure, or an unreadable page.
    async fn fetch_page(
        &self,
        target: &CollectionTarget,
        session: &SessionContext,
    ) -> Result<RawPage, ApiError>;
}

#[async_trait]
impl PageSource for IgClient {
    async fn fetch_page(
        &self,
        target: &CollectionTarget,
        session: &SessionContext,
    ) -> Result<RawPage, ApiError> {
        let cursor = target.cursor.as_deref();
        match target.kind {
            TargetKind::HashtagTop | TargetKind::HashtagRecent => {
                let tab = target.kind.tab().unwrap_or("top");
                self.fetch_hashtag_section(session, &target.key, tab, cursor)
                    .await
            }
            TargetKind::PostComments => {
                self.fetch_comments_page(session, &target.key, cursor).await
            }
            TargetKind::UserProfile => self.fetch_user_profile(session, &target.key).await,
        }
    }
}
