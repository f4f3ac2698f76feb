//! store-vibe/crates/vibe-core/src/lib.rs
//!
//! The central domain logic and interface definitions for the Store Vibe Generator.

pub mod error;
pub mod gallery;
pub mod memory;
pub mod models;
pub mod orchestrator;
pub mod prompt;
pub mod rate_limit;
pub mod seo;
pub mod traits;

// Re-exporting for easier access in other crates
pub use error::*;
pub use gallery::Gallery;
pub use models::*;
pub use orchestrator::{Collaborators, PipelineSettings, VibeService, GENERATE_ACTION};
pub use rate_limit::RateLimiter;
pub use traits::*;

#[cfg(test)]
mod tests {
    use super::models::*;
    use chrono::Utc;
    use uuid::Uuid;

    #[test]
    fn vibe_result_serializes_camel_case() {
        let vibe = VibeResult {
            id: Uuid::now_v7(),
            seo_id: "allbirds-2a2da9".to_string(),
            store_url: "https://allbirds.com".to_string(),
            mode: Mode::City,
            vibe_prompt: "Wool clouds. #A3B18A".to_string(),
            image_url: "https://cdn.example/a.png".to_string(),
            ip_address: "127.0.0.1".to_string(),
            is_public: true,
            created_at: Utc::now(),
        };
        let json = serde_json::to_value(&vibe).unwrap();
        assert_eq!(json["seoId"], "allbirds-2a2da9");
        assert_eq!(json["mode"], "city");
        assert_eq!(json["isPublic"], true);
        assert!(json["createdAt"].as_str().unwrap().contains('T'));
    }

    #[test]
    fn mode_round_trips_through_str() {
        for mode in Mode::ALL {
            assert_eq!(mode.as_str().parse::<Mode>().unwrap(), mode);
        }
        assert!("poster".parse::<Mode>().is_err());
        assert_eq!(Mode::parse_filter(Some("")), None);
        assert_eq!(Mode::parse_filter(Some("cover")), Some(Mode::Cover));
    }

    #[test]
    fn rate_limit_record_keeps_count_in_sync() {
        let now = Utc::now();
        let record = RateLimitRecord::with_timestamps("ip:a".into(), vec![now, now], now, 3);
        assert_eq!(record.count as usize, record.request_timestamps.len());
        assert_eq!(RateLimitRecord::key_for("1.2.3.4", "generate-vibe"), "1.2.3.4:generate-vibe");
    }

    #[test]
    fn page_count_rounds_up() {
        let page: Page<u8> = Page::new(vec![1], 25, 3, 12);
        assert_eq!(page.pages, 3);
        assert_eq!(Page::<u8>::new(vec![], 0, 1, 20).pages, 0);
    }
}
