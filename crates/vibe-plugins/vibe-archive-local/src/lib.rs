//! # vibe-archive-local
//! Local filesystem implementation of `ImageArchiver`.
//! Downloads the temporary generated image and stores it content-addressed
//! under a sharded directory, returning a stable public URL.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use image::ImageFormat;
use sha2::{Digest, Sha256};
use tokio::fs;
use tracing::debug;
use vibe_core::traits::ImageArchiver;

pub struct LocalImageArchiver {
    http: reqwest::Client,
    /// Root directory for archived images (e.g., "./data/vibes")
    root_path: PathBuf,
    /// Public URL prefix (e.g., "http://127.0.0.1:8080/static/vibes")
    url_prefix: String,
}

impl LocalImageArchiver {
    pub fn new(root: PathBuf, url_prefix: String, timeout: Duration) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, root_path: root, url_prefix: url_prefix.trim_end_matches('/').to_string() })
    }

    /// Relative sharded location: "ab/cd/abcd...hash.ext"
    fn relative_path(hash: &str, ext: &str) -> String {
        format!("{}/{}/{hash}.{ext}", &hash[0..2], &hash[2..4])
    }

    fn extension_for(data: &[u8]) -> &'static str {
        match image::guess_format(data) {
            Ok(ImageFormat::Jpeg) => "jpg",
            Ok(ImageFormat::WebP) => "webp",
            Ok(ImageFormat::Gif) => "gif",
            _ => "png",
        }
    }

    /// Writes `data` under its SHA-256 name and returns the public URL.
    /// Identical images share one file.
    async fn store_bytes(&self, data: &[u8]) -> anyhow::Result<String> {
        if data.is_empty() {
            bail!("refusing to archive an empty image");
        }
        let hash = hex::encode(Sha256::digest(data));
        let rel = Self::relative_path(&hash, Self::extension_for(data));
        let target = self.root_path.join(&rel);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .await
                .with_context(|| format!("failed creating {}", parent.display()))?;
        }
        if !exists(&target).await {
            fs::write(&target, data)
                .await
                .with_context(|| format!("failed writing {}", target.display()))?;
            debug!(path = %target.display(), bytes = data.len(), "archived image");
        }

        Ok(format!("{}/{rel}", self.url_prefix))
    }
}

async fn exists(path: &Path) -> bool {
    fs::try_exists(path).await.unwrap_or(false)
}

#[async_trait]
impl ImageArchiver for LocalImageArchiver {
    async fn archive(&self, image_url: &str) -> anyhow::Result<String> {
        let response = self
            .http
            .get(image_url)
            .send()
            .await
            .with_context(|| format!("image download failed for {image_url}"))?;
        let status = response.status();
        if !status.is_success() {
            bail!("image download returned {}", status.as_u16());
        }
        let data = response.bytes().await.context("failed reading image bytes")?;
        self.store_bytes(&data).await
    }
}
