pub mod client;
pub mod error;
pub mod normalize;
pub mod rate_limit;
pub mod session;
pub mod shortcode;
pub mod source;
pub mod types;

pub use client::IgClient;
pub use error::{ApiError, AuthError};
pub use normalize::{extract_hashtags, normalize_records, word_count, NormalizedPage};
pub use rate_limit::{retry_with_backoff, RateController, RateLimits, RateState};
pub use session::{
    save_cookies, CommandCredentialSource, CookieJar, CredentialSource, Credentials,
    FileCredentialSource, RefreshingCredentialSource, SessionContext,
};
pub use shortcode::shortcode_to_media_pk;
pub use source::PageSource;
pub use types::{RawPage, RawRecords};
