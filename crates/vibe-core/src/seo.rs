//! # SEO Identifiers
//!
//! Human-readable permalink ids of the form `allbirds-2a2da9`: a slug derived
//! from the store's domain followed by a random six character suffix.

use once_cell::sync::Lazy;
use rand::Rng;
use regex::Regex;
use url::Url;

use crate::error::{AppError, Result};

/// Length of the random suffix appended to every slug.
pub const SUFFIX_LEN: usize = 6;

const SUFFIX_CHARSET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

static HAS_SCHEME: Lazy<Regex> = Lazy::new(|| Regex::new(r"^[a-zA-Z]+://").expect("scheme regex"));

static KNOWN_TLD: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\.(com|org|net|io|co|ca|us|uk|edu|gov|app|dev|shop|store|blog|me|info)$")
        .expect("tld regex")
});

static RAW_PREFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(https?://)?(www\.)?").expect("prefix regex"));

static LAST_SUFFIX: Lazy<Regex> = Lazy::new(|| Regex::new(r"\.[^/.]+$").expect("suffix regex"));

static SEO_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9-]+-[a-zA-Z0-9]{6}$").expect("seo id regex"));

/// Trims the input and ensures it carries a scheme, defaulting to `https://`.
pub fn normalize_store_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(AppError::ValidationError("storeUrl is required".to_string()));
    }
    if HAS_SCHEME.is_match(trimmed) {
        Ok(trimmed.to_string())
    } else {
        Ok(format!("https://{trimmed}"))
    }
}

/// Derives the slug part of an SEO id from a store URL.
///
/// `https://www.allbirds.com/collections` becomes `allbirds`,
/// `shop.example.co.uk` becomes `shop-example-co`.
pub fn domain_slug(url: &str) -> String {
    let candidate = if HAS_SCHEME.is_match(url) {
        url.to_string()
    } else {
        format!("https://{url}")
    };

    let base = match Url::parse(&candidate).ok().and_then(|u| u.host_str().map(str::to_ascii_lowercase)) {
        Some(host) => {
            let host = host.strip_prefix("www.").unwrap_or(&host);
            KNOWN_TLD.replace(host, "").replace('.', "-")
        }
        None => {
            let stripped = RAW_PREFIX.replace(url, "");
            LAST_SUFFIX.replace(&stripped, "").replace('.', "-")
        }
    };

    sanitize_slug(&base)
}

/// Restricts a slug to `[a-z0-9-]`, collapsing runs of separators.
fn sanitize_slug(raw: &str) -> String {
    let mut slug = String::with_capacity(raw.len());
    for ch in raw.chars() {
        let mapped = if ch.is_ascii_alphanumeric() { ch.to_ascii_lowercase() } else { '-' };
        if mapped == '-' && (slug.is_empty() || slug.ends_with('-')) {
            continue;
        }
        slug.push(mapped);
    }
    let slug = slug.trim_end_matches('-');
    if slug.is_empty() {
        "store".to_string()
    } else {
        slug.to_string()
    }
}

fn random_suffix() -> String {
    let mut rng = rand::rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.random_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

/// Creates a fresh SEO id for a store URL.
pub fn create_seo_id(url: &str) -> String {
    format!("{}-{}", domain_slug(url), random_suffix())
}

/// Validates that a string follows the SEO id grammar.
pub fn is_valid_seo_id(id: &str) -> bool {
    SEO_ID.is_match(id)
}
