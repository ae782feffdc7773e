use std::fmt;

use serde::{Deserialize, Serialize};

/// What a [`CollectionTarget`] collects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetKind {
    HashtagTop,
    HashtagRecent,
    PostComments,
    UserProfile,
}

impl TargetKind {
    /// Section tab name sent to the hashtag endpoint, for hashtag kinds.
    #[must_use]
    pub fn tab(self) -> Option<&'static str> {
        match self {
            Self::HashtagTop => Some("top"),
            Self::HashtagRecent => Some("recent"),
            Self::PostComments | Self::UserProfile => None,
        }
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HashtagTop => "hashtag_top",
            Self::HashtagRecent => "hashtag_recent",
            Self::PostComments => "post_comments",
            Self::UserProfile => "user_profile",
        }
    }
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One unit of work in the orchestrator queue.
///
/// `cursor` is the opaque continuation token returned by the last page; it
/// only ever moves forward.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionTarget {
    pub kind: TargetKind,
    pub key: String,
    #[serde(default)]
    pub cursor: Option<String>,
    #[serde(default)]
    pub pages_fetched: u32,
    #[serde(default)]
    pub done: bool,
}

impl CollectionTarget {
    #[must_use]
    pub fn new(kind: TargetKind, key: impl Into<String>) -> Self {
        Self {
            kind,
            key: key.into(),
            cursor: None,
            pages_fetched: 0,
            done: false,
        }
    }

    /// Hashtag target; a leading `#` is stripped.
    #[must_use]
    pub fn hashtag_top(tag: &str) -> Self {
        Self::new(TargetKind::HashtagTop, normalize_tag(tag))
    }

    #[must_use]
    pub fn hashtag_recent(tag: &str) -> Self {
        Self::new(TargetKind::HashtagRecent, normalize_tag(tag))
    }

    #[must_use]
    pub fn post_comments(code: &str) -> Self {
        Self::new(TargetKind::PostComments, code)
    }

    #[must_use]
    pub fn user_profile(username: &str) -> Self {
        Self::new(TargetKind::UserProfile, username.trim_start_matches('@'))
    }

    /// Record a fetched page and the cursor for the next one.
    pub fn advance(&mut self, next_cursor: Option<String>) {
        self.pages_fetched += 1;
        if next_cursor.is_some() {
            self.cursor = next_cursor;
        }
    }

    pub fn mark_done(&mut self) {
        self.done = true;
    }
}

impl fmt::Display for CollectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            TargetKind::HashtagTop | TargetKind::HashtagRecent => {
                write!(f, "{}:#{}", self.kind, self.key)
            }
            TargetKind::UserProfile => write!(f, "{}:@{}", self.kind, self.key),
            TargetKind::PostComments => write!(f, "{}:{}", self.kind, self.key),
        }
    }
}

fn normalize_tag(tag: &str) -> String {
    tag.trim().trim_start_matches('#').to_lowercase()
}
