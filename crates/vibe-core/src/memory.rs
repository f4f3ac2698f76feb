//! # In-Memory Stores
//!
//! Process-local implementations of [`RateLimitStore`] and [`VibeRepo`].
//! Used when the binary is built without a database plugin, and by tests.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Mode, RateLimitRecord, VibeResult};
use crate::traits::{RateLimitStore, VibeRepo};

#[derive(Default)]
pub struct MemoryRateLimitStore {
    records: DashMap<String, RateLimitRecord>,
}

#[async_trait]
impl RateLimitStore for MemoryRateLimitStore {
    async fn load(&self, key: &str) -> anyhow::Result<Option<RateLimitRecord>> {
        Ok(self.records.get(key).map(|r| r.value().clone()))
    }

    async fn insert(&self, record: &RateLimitRecord) -> anyhow::Result<bool> {
        match self.records.entry(record.key.clone()) {
            Entry::Occupied(_) => Ok(false),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(true)
            }
        }
    }

    async fn replace(&self, record: &RateLimitRecord, expected_version: i64) -> anyhow::Result<bool> {
        match self.records.get_mut(&record.key) {
            Some(mut current) if current.version == expected_version => {
                *current = record.clone();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn purge_expired(&self, cutoff: DateTime<Utc>) -> anyhow::Result<u64> {
        let mut removed = 0;
        self.records.retain(|_, record| {
            let keep = record.updated_at >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        Ok(removed)
    }
}

/// Vibes kept in insertion order; reads sort newest first with `id` breaking ties.
#[derive(Default)]
pub struct MemoryVibeRepo {
    vibes: RwLock<Vec<VibeResult>>,
}

fn newest_first(vibes: &[VibeResult], keep: impl Fn(&VibeResult) -> bool) -> Vec<VibeResult> {
    let mut matching: Vec<VibeResult> = vibes.iter().filter(|v| keep(v)).cloned().collect();
    matching.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
    matching
}

#[async_trait]
impl VibeRepo for MemoryVibeRepo {
    async fn insert(&self, vibe: &VibeResult) -> anyhow::Result<bool> {
        let mut vibes = self.vibes.write().await;
        if vibes.iter().any(|v| v.seo_id == vibe.seo_id) {
            return Ok(false);
        }
        vibes.push(vibe.clone());
        Ok(true)
    }

    async fn find_public(&self, mode: Option<Mode>, offset: u64, limit: u64) -> anyhow::Result<(Vec<VibeResult>, u64)> {
        let vibes = self.vibes.read().await;
        let matching = newest_first(&vibes, |v| v.is_public && mode.map_or(true, |m| v.mode == m));
        let total = matching.len() as u64;
        let page = matching.into_iter().skip(offset as usize).take(limit as usize).collect();
        Ok((page, total))
    }

    async fn find_by_seo_id(&self, seo_id: &str) -> anyhow::Result<Option<VibeResult>> {
        let vibes = self.vibes.read().await;
        Ok(vibes.iter().find(|v| v.seo_id == seo_id).cloned())
    }

    async fn find_related(&self, mode: Mode, exclude_id: Uuid, limit: u64) -> anyhow::Result<Vec<VibeResult>> {
        let vibes = self.vibes.read().await;
        let related = newest_first(&vibes, |v| v.is_public && v.mode == mode && v.id != exclude_id);
        Ok(related.into_iter().take(limit as usize).collect())
    }
}
