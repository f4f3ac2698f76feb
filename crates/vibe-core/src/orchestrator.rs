//! # Generation Orchestrator
//!
//! Drives one vibe generation end to end:
//! rate limit → screenshot → vibe text → image → archive → persist.
//!
//! The first three external stages are fatal on failure. Archiving and
//! persistence are best-effort: their outcomes are explicit values and the
//! orchestrator decides to continue without them.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result, Stage};
use crate::models::{GenerateVibe, GeneratedVibe, Mode, RateLimitPolicy, VibeResult};
use crate::prompt;
use crate::rate_limit::RateLimiter;
use crate::seo::{create_seo_id, normalize_store_url};
use crate::traits::{ImageArchiver, ImageGenerator, ScreenshotProvider, VibeRepo, VibeTextGenerator};

/// Rate-limit action name for generations.
pub const GENERATE_ACTION: &str = "generate-vibe";

#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub action: String,
    pub policy: RateLimitPolicy,
    /// Upper bound for every external call.
    pub stage_timeout: Duration,
    /// How many fresh SEO suffixes to try when an insert hits a taken slug.
    pub seo_attempts: usize,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            action: GENERATE_ACTION.to_string(),
            policy: RateLimitPolicy::default(),
            stage_timeout: Duration::from_secs(60),
            seo_attempts: 3,
        }
    }
}

/// The external services a generation talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub screenshots: Arc<dyn ScreenshotProvider>,
    pub writer: Arc<dyn VibeTextGenerator>,
    pub images: Arc<dyn ImageGenerator>,
    pub archiver: Arc<dyn ImageArchiver>,
    pub repo: Arc<dyn VibeRepo>,
}

/// Result of re-hosting the generated image.
#[derive(Debug, PartialEq)]
pub enum ArchiveOutcome {
    Archived(String),
    Fallback { transient_url: String, reason: String },
}

/// Result of writing the vibe to the store.
#[derive(Debug, PartialEq)]
pub enum PersistOutcome {
    Stored(VibeResult),
    Skipped { reason: String },
}

#[derive(Clone)]
pub struct VibeService {
    limiter: RateLimiter,
    services: Collaborators,
    settings: PipelineSettings,
}

impl VibeService {
    pub fn new(limiter: RateLimiter, services: Collaborators, settings: PipelineSettings) -> Self {
        Self { limiter, services, settings }
    }

    /// Runs the full pipeline for `client_ip`.
    pub async fn generate(&self, request: GenerateVibe, client_ip: &str) -> Result<GeneratedVibe> {
        let mode = match request.mode.as_deref().map(str::trim) {
            None | Some("") => Mode::default(),
            Some(raw) => raw.parse()?,
        };
        let store_url = normalize_store_url(&request.store_url)?;

        let decision = self.limiter.check(client_ip, &self.settings.action, &self.settings.policy).await?;
        if !decision.allowed {
            warn!(client_ip, reset_at = %decision.reset_at, "generation rate limited");
            return Err(AppError::RateLimitExceeded { remaining: decision.remaining, reset_at: decision.reset_at });
        }
        info!(client_ip, %store_url, %mode, remaining = decision.remaining, "generating vibe");

        let screenshot = self.stage(Stage::Screenshot, self.services.screenshots.capture(&store_url)).await?;

        let vibe_prompt = self
            .stage(Stage::VibeText, self.services.writer.describe(screenshot, prompt::vibe_prompt(mode)))
            .await?;

        let color = prompt::extract_hex_color(&vibe_prompt);
        if color.is_none() {
            debug!("description has no hex color, using fallback palette");
        }
        let image_prompt = prompt::image_prompt(mode, &vibe_prompt, color);
        let transient_url = self.stage(Stage::ImageGeneration, self.services.images.generate(&image_prompt)).await?;

        let image_url = match self.archive(transient_url).await {
            ArchiveOutcome::Archived(url) => url,
            ArchiveOutcome::Fallback { transient_url, reason } => {
                warn!(%reason, "image archiving failed, keeping transient url");
                transient_url
            }
        };

        let (id, seo_id) = match self.persist(&store_url, mode, &vibe_prompt, &image_url, client_ip).await {
            PersistOutcome::Stored(vibe) => {
                info!(seo_id = %vibe.seo_id, "vibe stored");
                (Some(vibe.id), Some(vibe.seo_id))
            }
            PersistOutcome::Skipped { reason } => {
                error!(%reason, "failed to store vibe, returning it without a permalink");
                (None, None)
            }
        };

        Ok(GeneratedVibe {
            vibe_prompt,
            image_url,
            store_url,
            mode,
            id,
            seo_id,
            rate_limit_remaining: decision.remaining,
            rate_limit_reset_at: decision.reset_at,
        })
    }

    /// Runs a fatal stage under the stage timeout.
    async fn stage<T>(&self, stage: Stage, call: impl Future<Output = anyhow::Result<T>>) -> Result<T> {
        let started = Instant::now();
        match tokio::time::timeout(self.settings.stage_timeout, call).await {
            Ok(Ok(value)) => {
                debug!(%stage, elapsed_ms = started.elapsed().as_millis() as u64, "stage finished");
                Ok(value)
            }
            Ok(Err(err)) => {
                error!(%stage, error = %format!("{err:#}"), "stage failed");
                Err(AppError::upstream(stage, err))
            }
            Err(_) => {
                error!(%stage, timeout = ?self.settings.stage_timeout, "stage timed out");
                Err(AppError::upstream(stage, format!("timed out after {:?}", self.settings.stage_timeout)))
            }
        }
    }

    async fn archive(&self, transient_url: String) -> ArchiveOutcome {
        match tokio::time::timeout(self.settings.stage_timeout, self.services.archiver.archive(&transient_url)).await {
            Ok(Ok(url)) => ArchiveOutcome::Archived(url),
            Ok(Err(err)) => ArchiveOutcome::Fallback { transient_url, reason: format!("{err:#}") },
            Err(_) => ArchiveOutcome::Fallback { transient_url, reason: "archiving timed out".to_string() },
        }
    }

    async fn persist(&self, store_url: &str, mode: Mode, vibe_prompt: &str, image_url: &str, client_ip: &str) -> PersistOutcome {
        for attempt in 1..=self.settings.seo_attempts {
            let vibe = VibeResult {
                id: Uuid::now_v7(),
                seo_id: create_seo_id(store_url),
                store_url: store_url.to_string(),
                mode,
                vibe_prompt: vibe_prompt.to_string(),
                image_url: image_url.to_string(),
                ip_address: client_ip.to_string(),
                is_public: true,
                created_at: Utc::now(),
            };

            match tokio::time::timeout(self.settings.stage_timeout, self.services.repo.insert(&vibe)).await {
                Ok(Ok(true)) => return PersistOutcome::Stored(vibe),
                Ok(Ok(false)) => debug!(seo_id = %vibe.seo_id, attempt, "seo id taken, retrying with a new suffix"),
                Ok(Err(err)) => return PersistOutcome::Skipped { reason: format!("{err:#}") },
                Err(_) => return PersistOutcome::Skipped { reason: "store write timed out".to_string() },
            }
        }
        PersistOutcome::Skipped { reason: format!("no free seo id after {} attempts", self.settings.seo_attempts) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::{MemoryRateLimitStore, MemoryVibeRepo};
    use crate::seo::is_valid_seo_id;
    use crate::traits::{
        MockImageArchiver, MockImageGenerator, MockRateLimitStore, MockScreenshotProvider, MockVibeRepo,
        MockVibeTextGenerator,
    };
    use async_trait::async_trait;
    use bytes::Bytes;

    const TRANSIENT: &str = "https://images.example/tmp/abc.png";
    const PERMANENT: &str = "https://cdn.example/ab/cd/abcd.png";
    const DESCRIPTION: &str = "A breezy harbor town of wool and sneakers. Dominant color: #3A5A40";

    fn screenshots() -> MockScreenshotProvider {
        let mut mock = MockScreenshotProvider::new();
        mock.expect_capture()
            .withf(|url| url == "https://allbirds.com")
            .times(1)
            .returning(|_| Ok(Bytes::from_static(b"\x89PNG")));
        mock
    }

    fn writer() -> MockVibeTextGenerator {
        let mut mock = MockVibeTextGenerator::new();
        mock.expect_describe()
            .withf(|shot, prompt| shot[..] == b"\x89PNG"[..] && prompt == Mode::City.profile().prompt_template)
            .times(1)
            .returning(|_, _| Ok(DESCRIPTION.to_string()));
        mock
    }

    fn images() -> MockImageGenerator {
        let mut mock = MockImageGenerator::new();
        mock.expect_generate()
            .withf(|prompt| prompt.contains("city") && prompt.contains(DESCRIPTION) && prompt.ends_with("Use #3A5A40 as the dominant color."))
            .times(1)
            .returning(|_| Ok(TRANSIENT.to_string()));
        mock
    }

    fn archiver(ok: bool) -> MockImageArchiver {
        let mut mock = MockImageArchiver::new();
        mock.expect_archive().withf(|url| url == TRANSIENT).times(1).returning(move |_| {
            if ok {
                Ok(PERMANENT.to_string())
            } else {
                Err(anyhow::anyhow!("bucket unavailable"))
            }
        });
        mock
    }

    fn service(services: Collaborators) -> VibeService {
        let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::default()));
        VibeService::new(limiter, services, PipelineSettings::default())
    }

    fn city_request() -> GenerateVibe {
        GenerateVibe { store_url: "allbirds.com".to_string(), mode: Some("city".to_string()) }
    }

    #[tokio::test]
    async fn generates_stores_and_returns_permalink() {
        let repo = Arc::new(MemoryVibeRepo::default());
        let svc = service(Collaborators {
            screenshots: Arc::new(screenshots()),
            writer: Arc::new(writer()),
            images: Arc::new(images()),
            archiver: Arc::new(archiver(true)),
            repo: repo.clone(),
        });

        let vibe = svc.generate(city_request(), "203.0.113.7").await.unwrap();

        assert_eq!(vibe.vibe_prompt, DESCRIPTION);
        assert_eq!(vibe.image_url, PERMANENT);
        assert_eq!(vibe.store_url, "https://allbirds.com");
        assert_eq!(vibe.mode, Mode::City);
        assert_eq!(vibe.rate_limit_remaining, 9);
        let seo_id = vibe.seo_id.clone().unwrap();
        assert!(seo_id.starts_with("allbirds-"));
        assert!(is_valid_seo_id(&seo_id));

        let stored = repo.find_by_seo_id(&seo_id).await.unwrap().unwrap();
        assert_eq!(Some(stored.id), vibe.id);
        assert_eq!(stored.ip_address, "203.0.113.7");
        assert!(stored.is_public);
    }

    #[tokio::test]
    async fn archive_failure_falls_back_to_transient_url() {
        let svc = service(Collaborators {
            screenshots: Arc::new(screenshots()),
            writer: Arc::new(writer()),
            images: Arc::new(images()),
            archiver: Arc::new(archiver(false)),
            repo: Arc::new(MemoryVibeRepo::default()),
        });

        let vibe = svc.generate(city_request(), "203.0.113.7").await.unwrap();

        assert_eq!(vibe.image_url, TRANSIENT);
        assert!(vibe.seo_id.is_some());
    }

    #[tokio::test]
    async fn persistence_failure_still_returns_vibe() {
        let mut repo = MockVibeRepo::new();
        repo.expect_insert().times(1).returning(|_| Err(anyhow::anyhow!("disk full")));
        let svc = service(Collaborators {
            screenshots: Arc::new(screenshots()),
            writer: Arc::new(writer()),
            images: Arc::new(images()),
            archiver: Arc::new(archiver(true)),
            repo: Arc::new(repo),
        });

        let vibe = svc.generate(city_request(), "203.0.113.7").await.unwrap();

        assert_eq!(vibe.vibe_prompt, DESCRIPTION);
        assert_eq!(vibe.image_url, PERMANENT);
        assert!(vibe.id.is_none());
        assert!(vibe.seo_id.is_none());
    }

    #[tokio::test]
    async fn seo_collision_retries_with_new_suffix() {
        let mut repo = MockVibeRepo::new();
        let mut taken = true;
        repo.expect_insert().times(2).returning(move |_| {
            let ok = !taken;
            taken = false;
            Ok(ok)
        });
        let svc = service(Collaborators {
            screenshots: Arc::new(screenshots()),
            writer: Arc::new(writer()),
            images: Arc::new(images()),
            archiver: Arc::new(archiver(true)),
            repo: Arc::new(repo),
        });

        let vibe = svc.generate(city_request(), "203.0.113.7").await.unwrap();
        assert!(vibe.seo_id.is_some());
    }

    #[tokio::test]
    async fn rate_limited_request_makes_no_external_calls() {
        let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::default()));
        let settings = PipelineSettings {
            policy: RateLimitPolicy::new(1, Duration::from_secs(3600)),
            ..PipelineSettings::default()
        };
        limiter.check("203.0.113.7", GENERATE_ACTION, &settings.policy).await.unwrap();

        // Mocks without expectations panic if called.
        let svc = VibeService::new(
            limiter,
            Collaborators {
                screenshots: Arc::new(MockScreenshotProvider::new()),
                writer: Arc::new(MockVibeTextGenerator::new()),
                images: Arc::new(MockImageGenerator::new()),
                archiver: Arc::new(MockImageArchiver::new()),
                repo: Arc::new(MockVibeRepo::new()),
            },
            settings,
        );

        let err = svc.generate(city_request(), "203.0.113.7").await.unwrap_err();
        assert!(matches!(err, AppError::RateLimitExceeded { remaining: 0, .. }));
    }

    #[tokio::test]
    async fn screenshot_failure_is_fatal() {
        let mut shots = MockScreenshotProvider::new();
        shots.expect_capture().returning(|_| Err(anyhow::anyhow!("502 from capture service")));
        let svc = service(Collaborators {
            screenshots: Arc::new(shots),
            writer: Arc::new(MockVibeTextGenerator::new()),
            images: Arc::new(MockImageGenerator::new()),
            archiver: Arc::new(MockImageArchiver::new()),
            repo: Arc::new(MockVibeRepo::new()),
        });

        let err = svc.generate(city_request(), "203.0.113.7").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { stage: Stage::Screenshot, ref message } if message.contains("502")));
    }

    struct StalledScreenshots;

    #[async_trait]
    impl ScreenshotProvider for StalledScreenshots {
        async fn capture(&self, _url: &str) -> anyhow::Result<Bytes> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Bytes::new())
        }
    }

    #[tokio::test]
    async fn stage_timeout_is_an_upstream_failure() {
        let limiter = RateLimiter::new(Arc::new(MemoryRateLimitStore::default()));
        let settings = PipelineSettings { stage_timeout: Duration::from_millis(20), ..PipelineSettings::default() };
        let svc = VibeService::new(
            limiter,
            Collaborators {
                screenshots: Arc::new(StalledScreenshots),
                writer: Arc::new(MockVibeTextGenerator::new()),
                images: Arc::new(MockImageGenerator::new()),
                archiver: Arc::new(MockImageArchiver::new()),
                repo: Arc::new(MockVibeRepo::new()),
            },
            settings,
        );

        let err = svc.generate(city_request(), "203.0.113.7").await.unwrap_err();
        assert!(matches!(err, AppError::Upstream { stage: Stage::Screenshot, .. }));
    }

    #[tokio::test]
    async fn missing_color_uses_fallback_palette() {
        let mut writer = MockVibeTextGenerator::new();
        writer.expect_describe().returning(|_, _| Ok("Muted, quiet, minimal.".to_string()));
        let mut images = MockImageGenerator::new();
        images
            .expect_generate()
            .withf(|prompt| prompt.starts_with("Generate a stylized brand mood board") && prompt.contains(prompt::FALLBACK_PALETTE))
            .returning(|_| Ok(TRANSIENT.to_string()));
        let svc = service(Collaborators {
            screenshots: Arc::new(screenshots()),
            writer: Arc::new(writer),
            images: Arc::new(images),
            archiver: Arc::new(archiver(true)),
            repo: Arc::new(MemoryVibeRepo::default()),
        });

        let request = GenerateVibe { store_url: "allbirds.com".to_string(), mode: None };
        let vibe = svc.generate(request, "203.0.113.7").await.unwrap();
        assert_eq!(vibe.mode, Mode::Moodboard);
    }

    #[tokio::test]
    async fn invalid_input_is_rejected_before_rate_limiting() {
        let limiter = RateLimiter::new(Arc::new(MockRateLimitStore::new()));
        let svc = VibeService::new(
            limiter,
            Collaborators {
                screenshots: Arc::new(MockScreenshotProvider::new()),
                writer: Arc::new(MockVibeTextGenerator::new()),
                images: Arc::new(MockImageGenerator::new()),
                archiver: Arc::new(MockImageArchiver::new()),
                repo: Arc::new(MockVibeRepo::new()),
            },
            PipelineSettings::default(),
        );

        let bad_mode = GenerateVibe { store_url: "allbirds.com".to_string(), mode: Some("poster".to_string()) };
        assert!(matches!(svc.generate(bad_mode, "ip").await, Err(AppError::ValidationError(_))));

        let no_url = GenerateVibe { store_url: "  ".to_string(), mode: None };
        assert!(matches!(svc.generate(no_url, "ip").await, Err(AppError::ValidationError(_))));
    }
}
