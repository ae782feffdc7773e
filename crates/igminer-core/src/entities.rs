//! Canonical records persisted by every storage backend.
//!
//! Counts the upstream API may omit are `Option` so that "unknown" stays
//! distinguishable from "zero" all the way to storage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A single media post, identified by its shortcode.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    pub code: String,
    pub username: String,
    pub caption: Option<String>,
    #[serde(default)]
    pub hashtags: Vec<String>,
    pub likes: Option<i64>,
    #[serde(default)]
    pub comments_count: i64,
    pub views: Option<i64>,
    #[serde(default = "default_media_type")]
    pub media_type: i32,
    pub image_url: Option<String>,
    /// Where the downloaded image ended up (local path or hosted URL).
    pub storage_url: Option<String>,
    pub location_name: Option<String>,
    pub location_lat: Option<f64>,
    pub location_lng: Option<f64>,
    pub posted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub word_count: i64,
}

fn default_media_type() -> i32 {
    1
}

/// A comment on a post. `id` is unique within `post_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: String,
    pub post_id: String,
    pub username: String,
    pub text: String,
    #[serde(default)]
    pub likes: i64,
    pub posted_at: Option<DateTime<Utc>>,
}

impl Comment {
    /// Deduplication key: comment id scoped to its post.
    #[must_use]
    pub fn key(&self) -> (&str, &str) {
        (self.post_id.as_str(), self.id.as_str())
    }
}

/// An account profile, identified by username.
///
/// Profiles seen only as a post author carry just the name and verified
/// flag; `followers` is populated once the profile endpoint has been read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub full_name: Option<String>,
    pub bio: Option<String>,
    pub followers: Option<i64>,
    pub following: Option<i64>,
    pub post_count: Option<i64>,
    #[serde(default)]
    pub is_verified: bool,
    pub is_private: Option<bool>,
    pub profile_pic_url: Option<String>,
}

impl UserProfile {
    /// Minimal author record derived from a post payload.
    #[must_use]
    pub fn stub(username: &str, full_name: Option<String>, is_verified: bool) -> Self {
        Self {
            username: username.to_owned(),
            full_name,
            bio: None,
            followers: None,
            following: None,
            post_count: None,
            is_verified,
            is_private: None,
            profile_pic_url: None,
        }
    }

    #[must_use]
    pub fn is_enriched(&self) -> bool {
        self.followers.is_some()
    }

    /// Overlay `update` on top of `self`: fields `update` leaves empty keep
    /// their stored value.
    #[must_use]
    pub fn merged_with(self, update: UserProfile) -> UserProfile {
        UserProfile {
            username: self.username,
            full_name: update.full_name.or(self.full_name),
            bio: update.bio.or(self.bio),
            followers: update.followers.or(self.followers),
            following: update.following.or(self.following),
            post_count: update.post_count.or(self.post_count),
            is_verified: update.is_verified,
            is_private: update.is_private.or(self.is_private),
            profile_pic_url: update.profile_pic_url.or(self.profile_pic_url),
        }
    }
}

impl Post {
    /// Overlay a re-fetched copy of this post: engagement counters are
    /// refreshed, everything else keeps its stored value unless the stored
    /// value is empty.
    #[must_use]
    pub fn merged_with(self, update: Post) -> Post {
        Post {
            code: self.code,
            username: if self.username.is_empty() {
                update.username
            } else {
                self.username
            },
            caption: self.caption.or(update.caption),
            hashtags: if self.hashtags.is_empty() {
                update.hashtags
            } else {
                self.hashtags
            },
            likes: update.likes.or(self.likes),
            comments_count: update.comments_count,
            views: update.views.or(self.views),
            media_type: self.media_type,
            image_url: self.image_url.or(update.image_url),
            storage_url: update.storage_url.or(self.storage_url),
            location_name: self.location_name.or(update.location_name),
            location_lat: self.location_lat.or(update.location_lat),
            location_lng: self.location_lng.or(update.location_lng),
            posted_at: self.posted_at.or(update.posted_at),
            word_count: self.word_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn post(code: &str) -> Post {
        Post {
            code: code.to_owned(),
            username: "wanderer".to_owned(),
            caption: Some("Golden hour #travel".to_owned()),
            hashtags: vec!["#travel".to_owned()],
            likes: Some(10),
            comments_count: 2,
            views: None,
            media_type: 1,
            image_url: Some("https://cdn.example/a.jpg".to_owned()),
            storage_url: None,
            location_name: None,
            location_lat: None,
            location_lng: None,
            posted_at: None,
            word_count: 3,
        }
    }

    #[test]
    fn post_merge_refreshes_counters_and_keeps_unknown_views() {
        let stored = Post {
            views: Some(500),
            ..post("C1")
        };
        let update = Post {
            likes: Some(42),
            comments_count: 9,
            views: None,
            ..post("C1")
        };
        let merged = stored.merged_with(update);
        assert_eq!(merged.likes, Some(42));
        assert_eq!(merged.comments_count, 9);
        assert_eq!(merged.views, Some(500), "absent views must not clobber");
    }

    #[test]
    fn profile_stub_does_not_erase_enriched_counts() {
        let enriched = UserProfile {
            followers: Some(1_200),
            following: Some(80),
            post_count: Some(31),
            bio: Some("photographer".to_owned()),
            ..UserProfile::stub("wanderer", Some("W".to_owned()), false)
        };
        let merged = enriched.merged_with(UserProfile::stub("wanderer", None, true));
        assert_eq!(merged.followers, Some(1_200));
        assert_eq!(merged.bio.as_deref(), Some("photographer"));
        assert_eq!(merged.full_name.as_deref(), Some("W"));
        assert!(merged.is_verified);
        assert!(merged.is_enriched());
    }

    #[test]
    fn missing_views_serializes_as_null() {
        let value = serde_json::to_value(post("C2")).unwrap();
        assert!(value["views"].is_null());
        assert_eq!(value["likes"], 10);
    }
}
