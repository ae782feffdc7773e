//! Conversion between post shortcodes and numeric media ids.
//!
//! A shortcode is the media id written in base 64 over the alphabet
//! `A-Z a-z 0-9 - _`, most significant digit first.

use crate::error::ApiError;

const ALPHABET: &[u8; 64] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789-_";

fn digit(c: u8) -> Option<u64> {
    ALPHABET.iter().position(|&a| a == c).map(|p| p as u64)
}

/// Decode a shortcode into the numeric media id used by the comments endpoint.
///
/// # Errors
///
/// Returns [`ApiError::InvalidShortcode`] when the code is empty, contains a
/// character outside the alphabet, or does not fit in 64 bits.
pub fn shortcode_to_media_pk(code: &str) -> Result<u64, ApiError> {
    let invalid = |reason: String| ApiError::InvalidShortcode {
        code: code.to_owned(),
        reason,
    };

    if code.is_empty() {
        return Err(invalid("empty".to_owned()));
    }

    code.bytes().try_fold(0u64, |pk, c| {
        let d = digit(c).ok_or_else(|| invalid(format!("unexpected character '{}'", c as char)))?;
        pk.checked_mul(64)
            .and_then(|v| v.checked_add(d))
            .ok_or_else(|| invalid("overflows a 64-bit media id".to_owned()))
    })
}
