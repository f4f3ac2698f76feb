//! # Store Vibe Binary
//!
//! The entry point that assembles the application from configuration and
//! compile-time features.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tower_http::services::ServeDir;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use vibe_api::{build_router, AppState};
use vibe_archive_local::LocalImageArchiver;
use vibe_config::{LogSettings, Settings};
use vibe_core::{
    Collaborators, Gallery, PipelineSettings, RateLimitPolicy, RateLimitStore, RateLimiter, VibeRepo, VibeService,
};
use vibe_openai::{OpenAiClient, OpenAiOptions};
use vibe_screenshot::HttpScreenshotProvider;

#[cfg(feature = "db-sqlite")]
use vibe_db_sqlite::SqliteStore;

#[cfg(not(feature = "db-sqlite"))]
use vibe_core::memory::{MemoryRateLimitStore, MemoryVibeRepo};

fn init_tracing(log: &LogSettings) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log.filter));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    if log.json {
        subscriber.json().init();
    } else {
        subscriber.init();
    }
}

/// URL path the archive directory is served under, taken from its public base URL.
fn archive_mount_path(public_base_url: &str) -> Option<String> {
    let url = url::Url::parse(public_base_url).ok()?;
    let path = url.path().trim_end_matches('/');
    (!path.is_empty()).then(|| path.to_string())
}

/// Periodically deletes rate-limit records untouched for longer than `retention`.
fn spawn_sweeper(limiter: RateLimiter, retention: Duration, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            ticker.tick().await;
            match limiter.sweep(retention).await {
                Ok(0) => {}
                Ok(removed) => info!(removed, "purged expired rate-limit records"),
                Err(err) => warn!(error = %err, "rate-limit sweep failed"),
            }
        }
    })
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(error = %err, "failed to listen for ctrl-c");
    }
    info!("shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let settings = Settings::load().context("failed to load configuration")?;
    init_tracing(&settings.log);

    // 1. Initialize persistence
    #[cfg(feature = "db-sqlite")]
    let (limits, repo): (Arc<dyn RateLimitStore>, Arc<dyn VibeRepo>) = {
        let store = Arc::new(
            SqliteStore::new(&settings.database.url)
                .await
                .with_context(|| format!("failed to open database {}", settings.database.url))?,
        );
        let limits: Arc<dyn RateLimitStore> = store.clone();
        (limits, store)
    };

    #[cfg(not(feature = "db-sqlite"))]
    let (limits, repo): (Arc<dyn RateLimitStore>, Arc<dyn VibeRepo>) = {
        warn!("built without db-sqlite; vibes and rate limits are kept in memory");
        let limits: Arc<dyn RateLimitStore> = Arc::new(MemoryRateLimitStore::default());
        let repo: Arc<dyn VibeRepo> = Arc::new(MemoryVibeRepo::default());
        (limits, repo)
    };

    // 2. Initialize external collaborators
    let api_key = settings.openai.api_key.clone().context("openai.api_key is not set (VIBE__OPENAI__API_KEY)")?;
    let openai = Arc::new(OpenAiClient::new(
        api_key,
        OpenAiOptions {
            base_url: settings.openai.base_url.clone(),
            vision_model: settings.openai.vision_model.clone(),
            image_model: settings.openai.image_model.clone(),
            max_tokens: settings.openai.max_tokens,
            image_size: settings.openai.image_size.clone(),
            timeout: Duration::from_secs(settings.openai.timeout_secs),
        },
    )?);

    let screenshots = HttpScreenshotProvider::new(
        &settings.screenshot.endpoint,
        settings.screenshot.access_key.clone(),
        settings.screenshot.width,
        settings.screenshot.height,
        Duration::from_secs(settings.screenshot.timeout_secs),
    )?;

    let archive_root = PathBuf::from(&settings.archive.root);
    let archiver = LocalImageArchiver::new(
        archive_root.clone(),
        settings.archive.public_base_url.clone(),
        settings.pipeline.stage_timeout(),
    )?;

    // 3. Wire the core services
    let limiter = RateLimiter::new(limits);
    let pipeline = PipelineSettings {
        action: settings.rate_limit.action.clone(),
        policy: RateLimitPolicy::new(settings.rate_limit.limit, settings.rate_limit.window()),
        stage_timeout: settings.pipeline.stage_timeout(),
        seo_attempts: settings.pipeline.seo_attempts,
    };
    let services = Collaborators {
        screenshots: Arc::new(screenshots),
        writer: openai.clone(),
        images: openai,
        archiver: Arc::new(archiver),
        repo: repo.clone(),
    };
    let state = AppState {
        vibes: VibeService::new(limiter.clone(), services, pipeline),
        gallery: Gallery::new(repo),
    };

    let sweeper = spawn_sweeper(limiter, settings.rate_limit.retention(), settings.rate_limit.sweep_interval());

    let mut app = build_router(state);
    if let Some(mount) = archive_mount_path(&settings.archive.public_base_url) {
        info!(%mount, root = %archive_root.display(), "serving archived images");
        app = app.nest_service(&mount, ServeDir::new(&archive_root));
    }

    // 4. Serve
    let addr = format!("{}:{}", settings.server.host, settings.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("🚀 Store Vibe starting on http://{addr}");

    axum::serve(listener, app).with_graceful_shutdown(shutdown_signal()).await.context("server error")?;
    sweeper.abort();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mount_path_follows_public_base_url() {
        assert_eq!(archive_mount_path("http://127.0.0.1:8080/static/vibes/").as_deref(), Some("/static/vibes"));
        assert_eq!(archive_mount_path("https://cdn.example"), None);
        assert_eq!(archive_mount_path("not a url"), None);
    }
}
