//! Normalization from raw API records to [`igminer_core`] entities.
//!
//! Each page is normalized independently: records are decoded one at a
//! time, malformed ones are logged and skipped, and no two emitted records
//! share a key.

use std::collections::HashSet;
use std::sync::LazyLock;

use chrono::{DateTime, Utc};
use igminer_core::{Comment, Post, UserProfile};
use regex::Regex;

use crate::types::{RawComment, RawMedia, RawProfileUser, RawRecords};

static HASHTAG_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"#\w+").expect("valid regex"));

/// Records produced from one page.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct NormalizedPage {
    pub posts: Vec<Post>,
    pub comments: Vec<Comment>,
    pub users: Vec<UserProfile>,
    /// Records dropped because they could not be decoded.
    pub skipped: usize,
}

impl NormalizedPage {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.posts.is_empty() && self.comments.is_empty() && self.users.is_empty()
    }
}

/// Hashtags in `caption` (`#` included, case kept), first occurrence order,
/// exact duplicates collapsed.
#[must_use]
pub fn extract_hashtags(caption: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    HASHTAG_RE
        .find_iter(caption)
        .map(|m| m.as_str())
        .filter(|tag| seen.insert(*tag))
        .map(str::to_owned)
        .collect()
}

#[must_use]
pub fn word_count(caption: &str) -> i64 {
    i64::try_from(caption.split_whitespace().count()).unwrap_or(i64::MAX)
}

fn from_epoch(secs: Option<i64>) -> Option<DateTime<Utc>> {
    secs.filter(|s| *s > 0)
        .and_then(|s| DateTime::from_timestamp(s, 0))
}

/// Dispatch on the record kind. `post_code` is the parent post for comments
/// and `username` the requested account for profiles.
#[must_use]
pub fn normalize_records(records: &RawRecords, key: &str) -> NormalizedPage {
    match records {
        RawRecords::Media(items) => normalize_media_page(items),
        RawRecords::Comments(items) => normalize_comments_page(key, items),
        RawRecords::Profile(user) => {
            let mut page = NormalizedPage::default();
            match user.as_ref().map(|u| normalize_profile(key, u)) {
                Some(Some(profile)) => page.users.push(profile),
                Some(None) => page.skipped += 1,
                None => {}
            }
            page
        }
    }
}

/// Normalize the `media` objects of one hashtag page, emitting author stubs
/// alongside the posts.
#[must_use]
pub fn normalize_media_page(items: &[serde_json::Value]) -> NormalizedPage {
    let mut page = NormalizedPage::default();
    let mut seen_codes = HashSet::new();
    let mut seen_users = HashSet::new();

    for item in items {
        let media = match serde_json::from_value::<RawMedia>(item.clone()) {
            Ok(media) if !media.code.is_empty() => media,
            Ok(_) => {
                tracing::warn!("skipping media record with empty code");
                page.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(error = %e, "skipping malformed media record");
                page.skipped += 1;
                continue;
            }
        };

        if !seen_codes.insert(media.code.clone()) {
            continue;
        }

        let (post, author) = normalize_media(media);
        if let Some(author) = author {
            if seen_users.insert(author.username.clone()) {
                page.users.push(author);
            }
        }
        page.posts.push(post);
    }

    page
}

/// Convert one decoded media object into a post and, when the author is
/// known, a profile stub.
#[must_use]
pub fn normalize_media(media: RawMedia) -> (Post, Option<UserProfile>) {
    let caption = media
        .caption
        .and_then(|c| c.text)
        .filter(|t| !t.is_empty());
    let text = caption.as_deref().unwrap_or("");

    let best_image = media
        .image_versions2
        .unwrap_or_default()
        .candidates
        .into_iter()
        .max_by_key(|c| c.width);

    let (location_name, location_lat, location_lng) = media
        .location
        .map_or((None, None, None), |l| (l.name, l.lat, l.lng));

    let (username, author) = match media.user {
        Some(user) if !user.username.is_empty() => {
            let stub = UserProfile::stub(
                &user.username,
                user.full_name.filter(|n| !n.is_empty()),
                user.is_verified,
            );
            (user.username, Some(stub))
        }
        _ => (String::new(), None),
    };

    let post = Post {
        hashtags: extract_hashtags(text),
        word_count: word_count(text),
        code: media.code,
        username,
        likes: media.like_count,
        comments_count: media.comment_count.unwrap_or(0),
        views: media.play_count.or(media.view_count),
        media_type: media.media_type.unwrap_or(1),
        image_url: best_image.map(|c| c.url).filter(|u| !u.is_empty()),
        storage_url: None,
        location_name,
        location_lat,
        location_lng,
        posted_at: from_epoch(media.taken_at),
        caption,
    };

    (post, author)
}

/// Normalize one page of comments for `post_code`.
#[must_use]
pub fn normalize_comments_page(post_code: &str, items: &[serde_json::Value]) -> NormalizedPage {
    let mut page = NormalizedPage::default();
    let mut seen = HashSet::new();

    for item in items {
        let raw = match serde_json::from_value::<RawComment>(item.clone()) {
            Ok(raw) if !raw.pk.is_empty() => raw,
            Ok(_) => {
                tracing::warn!(post = post_code, "skipping comment with empty id");
                page.skipped += 1;
                continue;
            }
            Err(e) => {
                tracing::warn!(post = post_code, error = %e, "skipping malformed comment");
                page.skipped += 1;
                continue;
            }
        };

        if !seen.insert(raw.pk.clone()) {
            continue;
        }

        page.comments.push(Comment {
            id: raw.pk,
            post_id: post_code.to_owned(),
            username: raw.user.map(|u| u.username).unwrap_or_default(),
            text: raw.text.unwrap_or_default(),
            likes: raw.comment_like_count.unwrap_or(0),
            posted_at: from_epoch(raw.created_at),
        });
    }

    page
}

/// Decode the `data.user` object of the profile endpoint.
#[must_use]
pub fn normalize_profile(username: &str, user: &serde_json::Value) -> Option<UserProfile> {
    let raw = match serde_json::from_value::<RawProfileUser>(user.clone()) {
        Ok(raw) => raw,
        Err(e) => {
            tracing::warn!(username, error = %e, "skipping malformed profile");
            return None;
        }
    };

    let count = |edge: Option<crate::types::EdgeCount>| edge.and_then(|e| e.count);

    Some(UserProfile {
        username: username.to_owned(),
        full_name: raw.full_name.filter(|s| !s.is_empty()),
        bio: raw.biography.filter(|s| !s.is_empty()),
        followers: count(raw.edge_followed_by),
        following: count(raw.edge_follow),
        post_count: count(raw.edge_owner_to_timeline_media),
        is_verified: raw.is_verified,
        is_private: raw.is_private,
        profile_pic_url: raw.profile_pic_url_hd.or(raw.profile_pic_url),
    })
}

#[cfg(test)]
#[path = "normalize_test.rs"]
mod tests;
