//! Wire shapes of the three API endpoints.
//!
//! Page envelopes are strict; individual records stay as raw JSON until the
//! normalizer decodes them one at a time, so a single malformed record never
//! sinks the page.

use serde::{Deserialize, Deserializer};

/// Records carried by one page, still undecoded.
#[derive(Debug, Clone)]
pub enum RawRecords {
    Media(Vec<serde_json::Value>),
    Comments(Vec<serde_json::Value>),
    Profile(Option<serde_json::Value>),
}

impl RawRecords {
    #[must_use]
    pub fn len(&self) -> usize {
        match self {
            RawRecords::Media(v) | RawRecords::Comments(v) => v.len(),
            RawRecords::Profile(p) => usize::from(p.is_some()),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// One fetched page plus its continuation state.
#[derive(Debug, Clone)]
pub struct RawPage {
    pub records: RawRecords,
    pub more_available: bool,
    pub next_cursor: Option<String>,
}

// ---------------------------------------------------------------------------
// POST /api/v1/tags/{tag}/sections/
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct SectionsResponse {
    #[serde(default)]
    pub sections: Vec<Section>,
    #[serde(default)]
    pub more_available: bool,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub next_max_id: Option<String>,
}

impl SectionsResponse {
    /// Every `media` object across all sections, in page order.
    #[must_use]
    pub fn into_medias(self) -> Vec<serde_json::Value> {
        self.sections
            .into_iter()
            .flat_map(|s| s.layout_content.medias)
            .filter_map(|m| m.media)
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct Section {
    #[serde(default)]
    pub layout_content: LayoutContent,
}

#[derive(Debug, Default, Deserialize)]
pub struct LayoutContent {
    #[serde(default)]
    pub medias: Vec<MediaEnvelope>,
}

#[derive(Debug, Deserialize)]
pub struct MediaEnvelope {
    pub media: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RawMedia {
    pub code: String,
    pub user: Option<RawUser>,
    pub caption: Option<RawCaption>,
    pub like_count: Option<i64>,
    pub comment_count: Option<i64>,
    pub play_count: Option<i64>,
    pub view_count: Option<i64>,
    pub media_type: Option<i32>,
    pub image_versions2: Option<ImageVersions>,
    pub location: Option<RawLocation>,
    pub taken_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct RawUser {
    #[serde(default)]
    pub username: String,
    pub full_name: Option<String>,
    #[serde(default)]
    pub is_verified: bool,
}

#[derive(Debug, Deserialize)]
pub struct RawCaption {
    pub text: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ImageVersions {
    #[serde(default)]
    pub candidates: Vec<ImageCandidate>,
}

#[derive(Debug, Deserialize)]
pub struct ImageCandidate {
    pub url: String,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
}

#[derive(Debug, Deserialize)]
pub struct RawLocation {
    pub name: Option<String>,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

// ---------------------------------------------------------------------------
// GET /api/v1/media/{pk}/comments/
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct CommentsResponse {
    #[serde(default)]
    pub comments: Vec<serde_json::Value>,
    #[serde(default)]
    pub has_more_comments: bool,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub next_min_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RawComment {
    #[serde(deserialize_with = "string_or_number")]
    pub pk: String,
    pub user: Option<RawUser>,
    pub text: Option<String>,
    pub comment_like_count: Option<i64>,
    pub created_at: Option<i64>,
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/web_profile_info/
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct ProfileResponse {
    pub data: Option<ProfileData>,
}

#[derive(Debug, Deserialize)]
pub struct ProfileData {
    pub user: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
pub struct RawProfileUser {
    pub full_name: Option<String>,
    pub biography: Option<String>,
    pub edge_followed_by: Option<EdgeCount>,
    pub edge_follow: Option<EdgeCount>,
    pub edge_owner_to_timeline_media: Option<EdgeCount>,
    #[serde(default)]
    pub is_verified: bool,
    pub is_private: Option<bool>,
    pub profile_pic_url_hd: Option<String>,
    pub profile_pic_url: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct EdgeCount {
    pub count: Option<i64>,
}

// ---------------------------------------------------------------------------
// Error envelope shared by all endpoints
// ---------------------------------------------------------------------------

/// Fields present on `{"status": "fail", ...}` bodies.
#[derive(Debug, Default, Deserialize)]
pub struct StatusEnvelope {
    pub status: Option<String>,
    pub message: Option<String>,
    #[serde(default)]
    pub spam: bool,
    #[serde(default)]
    pub require_login: bool,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    Str(String),
    Num(serde_json::Number),
}

impl From<StringOrNumber> for String {
    fn from(v: StringOrNumber) -> Self {
        match v {
            StringOrNumber::Str(s) => s,
            StringOrNumber::Num(n) => n.to_string(),
        }
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<String, D::Error> {
    StringOrNumber::deserialize(d).map(String::from)
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(Option::<StringOrNumber>::deserialize(d)?
        .map(String::from)
        .filter(|s| !s.is_empty()))
}
