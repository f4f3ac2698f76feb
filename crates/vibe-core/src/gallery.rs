//! # Gallery
//!
//! Read side of the result store: the public explore listing, permalink
//! lookups, and "more like this" suggestions.

use std::sync::Arc;

use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::models::{Mode, Page, VibeDetail, VibeResult};
use crate::seo::is_valid_seo_id;
use crate::traits::VibeRepo;

pub const DEFAULT_PAGE_SIZE: u64 = 20;
pub const MAX_PAGE_SIZE: u64 = 100;
/// Number of related vibes shown next to a permalink.
pub const RELATED_LIMIT: u64 = 5;
/// Largest offset any backend accepts (SQL `OFFSET` is a signed 64-bit integer).
const MAX_OFFSET: u64 = i64::MAX as u64;

#[derive(Clone)]
pub struct Gallery {
    repo: Arc<dyn VibeRepo>,
}

impl Gallery {
    pub fn new(repo: Arc<dyn VibeRepo>) -> Self {
        Self { repo }
    }

    /// Public vibes, newest first. `page` is 1-based; both arguments are clamped to sane bounds.
    pub async fn find_public_by_mode(&self, mode: Option<Mode>, page: u64, limit: u64) -> Result<Page<VibeResult>> {
        let page = page.max(1);
        let limit = limit.clamp(1, MAX_PAGE_SIZE);
        let offset = (page - 1).saturating_mul(limit).min(MAX_OFFSET);

        let (items, total) = self.repo.find_public(mode, offset, limit).await.map_err(AppError::internal)?;
        Ok(Page::new(items, total, page, limit))
    }

    /// Looks a vibe up by its permalink slug. Malformed slugs are treated as
    /// not found without touching the store.
    pub async fn find_by_seo_id(&self, seo_id: &str) -> Result<Option<VibeResult>> {
        if !is_valid_seo_id(seo_id) {
            return Ok(None);
        }
        self.repo.find_by_seo_id(seo_id).await.map_err(AppError::internal)
    }

    pub async fn find_related(&self, mode: Mode, exclude_id: Uuid, limit: u64) -> Result<Vec<VibeResult>> {
        self.repo.find_related(mode, exclude_id, limit).await.map_err(AppError::internal)
    }

    /// A vibe together with up to [`RELATED_LIMIT`] public vibes of the same mode.
    pub async fn permalink(&self, seo_id: &str) -> Result<VibeDetail> {
        let Some(vibe) = self.find_by_seo_id(seo_id).await? else {
            return Err(AppError::NotFound("vibe".to_string(), seo_id.to_string()));
        };
        let related_vibes = self.find_related(vibe.mode, vibe.id, RELATED_LIMIT).await?;
        Ok(VibeDetail { vibe, related_vibes })
    }
}
