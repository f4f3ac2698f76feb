//! # Domain Models
//!
//! These structs represent the core entities of the Store Vibe Generator.
//! Persisted records use UUID v7 for time-ordered, globally unique identification.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;

/// The stylistic lens a vibe is generated through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Mode {
    #[default]
    Moodboard,
    City,
    Cover,
}

/// Static wording attached to a [`Mode`].
#[derive(Debug)]
pub struct ModeProfile {
    /// Sent verbatim to the vision model alongside the screenshot.
    pub prompt_template: &'static str,
    /// Prefix of the image-generation prompt.
    pub image_instructions: &'static str,
    pub label: &'static str,
}

const MOODBOARD: ModeProfile = ModeProfile {
    prompt_template: "Describe this store as a visual brand moodboard. Include design elements like color palette, texture, tone, and shopper archetype. End with a dominant hex color.",
    image_instructions: "Generate a stylized brand mood board image based on this description:",
    label: "🧵 Moodboard",
};

const CITY: ModeProfile = ModeProfile {
    prompt_template: "Imagine this store as a physical city. Describe the atmosphere, architecture, and the kind of people you'd see there. Be poetic but vivid. End the description with a dominant hex color.",
    image_instructions: "Create a visual representation of a city based on this description:",
    label: "🏙 Store as a City",
};

const COVER: ModeProfile = ModeProfile {
    prompt_template: "Imagine this store had a magazine cover or album artwork. Describe the visual style, typography, imagery, and overall aesthetic it would have. Include what genre of magazine or music it would be. End with a dominant hex color.",
    image_instructions: "Create a stylish magazine cover or album artwork based on this description:",
    label: "🎭 Magazine/Album Cover",
};

impl Mode {
    pub const ALL: [Mode; 3] = [Mode::Moodboard, Mode::City, Mode::Cover];

    pub fn profile(self) -> &'static ModeProfile {
        match self {
            Mode::Moodboard => &MOODBOARD,
            Mode::City => &CITY,
            Mode::Cover => &COVER,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Mode::Moodboard => "moodboard",
            Mode::City => "city",
            Mode::Cover => "cover",
        }
    }

    /// Lenient parse used by gallery filters: unknown or empty values mean "no filter".
    pub fn parse_filter(raw: Option<&str>) -> Option<Mode> {
        raw.and_then(|value| value.parse().ok())
    }
}

impl fmt::Display for Mode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Mode {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "moodboard" => Ok(Mode::Moodboard),
            "city" => Ok(Mode::City),
            "cover" => Ok(Mode::Cover),
            other => Err(AppError::ValidationError(format!("unknown mode '{other}'"))),
        }
    }
}

/// A persisted generation result. Append-only: never mutated after insert.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VibeResult {
    pub id: Uuid,
    /// Permalink slug, e.g. "allbirds-2a2da9"
    pub seo_id: String,
    pub store_url: String,
    pub mode: Mode,
    pub vibe_prompt: String,
    /// Permanent URL (or the transient one when archiving failed)
    pub image_url: String,
    /// Originating client, kept for auditing
    pub ip_address: String,
    pub is_public: bool,
    pub created_at: DateTime<Utc>,
}

/// Inbound generation request.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateVibe {
    pub store_url: String,
    #[serde(default)]
    pub mode: Option<String>,
}

/// What the caller receives after a successful generation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GeneratedVibe {
    pub vibe_prompt: String,
    pub image_url: String,
    pub store_url: String,
    pub mode: Mode,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seo_id: Option<String>,
    pub rate_limit_remaining: u32,
    pub rate_limit_reset_at: DateTime<Utc>,
}

/// A single vibe plus its gallery neighbours, as served on the permalink page.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct VibeDetail {
    pub vibe: VibeResult,
    pub related_vibes: Vec<VibeResult>,
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub total: u64,
    pub page: u64,
    pub limit: u64,
    pub pages: u64,
}

impl<T> Page<T> {
    pub fn new(items: Vec<T>, total: u64, page: u64, limit: u64) -> Self {
        let pages = if limit == 0 { 0 } else { total.div_ceil(limit) };
        Self { items, total, page, limit, pages }
    }
}

/// Sliding-window limits for one action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitPolicy {
    pub limit: u32,
    pub window: Duration,
}

impl RateLimitPolicy {
    pub fn new(limit: u32, window: Duration) -> Self {
        Self { limit, window }
    }

    pub fn window_delta(&self) -> TimeDelta {
        TimeDelta::from_std(self.window).unwrap_or(TimeDelta::MAX)
    }
}

impl Default for RateLimitPolicy {
    /// 10 generations per 24 hours.
    fn default() -> Self {
        Self::new(10, Duration::from_secs(24 * 60 * 60))
    }
}

/// Result of a rate-limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RateLimitDecision {
    pub allowed: bool,
    pub remaining: u32,
    pub reset_at: DateTime<Utc>,
}

/// Stored request history for one `(identity, action)` pair.
///
/// Only constructed through [`RateLimitRecord::first`] and
/// [`RateLimitRecord::with_timestamps`], which keep `count` equal to the
/// number of timestamps.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RateLimitRecord {
    pub key: String,
    pub request_timestamps: Vec<DateTime<Utc>>,
    pub count: u32,
    pub updated_at: DateTime<Utc>,
    /// Bumped on every write; conditional updates compare against it.
    pub version: i64,
}

impl RateLimitRecord {
    pub fn key_for(identity: &str, action: &str) -> String {
        format!("{identity}:{action}")
    }

    pub fn first(key: String, now: DateTime<Utc>) -> Self {
        Self::with_timestamps(key, vec![now], now, 1)
    }

    pub fn with_timestamps(
        key: String,
        request_timestamps: Vec<DateTime<Utc>>,
        updated_at: DateTime<Utc>,
        version: i64,
    ) -> Self {
        let count = request_timestamps.len() as u32;
        Self { key, request_timestamps, count, updated_at, version }
    }
}
