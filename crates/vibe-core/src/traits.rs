//! # Core Traits (Ports)
//!
//! Any plugin must implement these traits to be used by the binary.

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::models::{Mode, RateLimitRecord, VibeResult};

/// Shared store backing the sliding-window rate limiter.
///
/// Writes are conditional so that two callers racing on the same key cannot
/// both succeed; the limiter re-reads and retries when a write reports `false`.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait RateLimitStore: Send + Sync {
    async fn load(&self, key: &str) -> anyhow::Result<Option<RateLimitRecord>>;

    /// Inserts a brand-new record. Returns `false` if the key already exists.
    async fn insert(&self, record: &RateLimitRecord) -> anyhow::Result<bool>;

    /// Replaces the stored record only if its version still equals `expected_version`.
    async fn replace(&self, record: &RateLimitRecord, expected_version: i64) -> anyhow::Result<bool>;

    /// Deletes records last updated before `cutoff`. Returns the number removed.
    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64>;
}

/// Persistence contract for generated vibes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VibeRepo: Send + Sync {
    /// Inserts a vibe. Returns `false` when its `seo_id` is already taken.
    async fn insert(&self, vibe: &VibeResult) -> anyhow::Result<bool>;

    /// Public vibes, newest first, optionally filtered by mode. Returns the page and the total match count.
    async fn find_public(&self, mode: Option<Mode>, offset: u64, limit: u64) -> anyhow::Result<(Vec<VibeResult>, u64)>;

    async fn find_by_seo_id(&self, seo_id: &str) -> anyhow::Result<Option<VibeResult>>;

    /// Public vibes sharing `mode`, excluding `exclude_id`, newest first.
    async fn find_related(&self, mode: Mode, exclude_id: Uuid, limit: u64) -> anyhow::Result<Vec<VibeResult>>;
}

/// Captures a storefront as image bytes.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ScreenshotProvider: Send + Sync {
    async fn capture(&self, url: &str) -> anyhow::Result<Bytes>;
}

/// Turns a screenshot into a natural-language description.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait VibeTextGenerator: Send + Sync {
    /// `prompt` is the mode's template; the returned text should end with a hex color.
    async fn describe(&self, screenshot: Bytes, prompt: &str) -> anyhow::Result<String>;
}

/// Produces an illustrative image and returns its (transient) URL.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ImageGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String>;
}

/// Re-hosts a transient image at a permanent URL.
#[cfg_attr(any(test, feature = "testing"), mockall::automock)]
#[async_trait]
pub trait ImageArchiver: Send + Sync {
    async fn archive(&self, transient_url: &str) -> anyhow::Result<String>;
}
