//! # vibe-screenshot
//!
//! `ScreenshotProvider` backed by a hosted screenshot API
//! (`GET endpoint?access_key=..&url=..&format=png&width=..&height=..`).

use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use tracing::debug;
use url::Url;
use vibe_core::traits::ScreenshotProvider;

pub struct HttpScreenshotProvider {
    http: reqwest::Client,
    endpoint: Url,
    access_key: Option<SecretString>,
    width: u32,
    height: u32,
}

impl HttpScreenshotProvider {
    pub fn new(
        endpoint: &str,
        access_key: Option<SecretString>,
        width: u32,
        height: u32,
        timeout: Duration,
    ) -> anyhow::Result<Self> {
        let endpoint = Url::parse(endpoint).with_context(|| format!("invalid screenshot endpoint {endpoint}"))?;
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, endpoint, access_key, width, height })
    }

    fn request_url(&self, target: &str) -> Url {
        let mut url = self.endpoint.clone();
        {
            let mut query = url.query_pairs_mut();
            if let Some(key) = &self.access_key {
                query.append_pair("access_key", key.expose_secret());
            }
            query
                .append_pair("url", target)
                .append_pair("format", "png")
                .append_pair("width", &self.width.to_string())
                .append_pair("height", &self.height.to_string());
        }
        url
    }
}

#[async_trait]
impl ScreenshotProvider for HttpScreenshotProvider {
    async fn capture(&self, url: &str) -> anyhow::Result<Bytes> {
        debug!(target_url = url, "capturing screenshot");
        let response = self
            .http
            .get(self.request_url(url))
            .send()
            .await
            .with_context(|| format!("screenshot request failed for {url}"))?;

        let status = response.status();
        if !status.is_success() {
            bail!("screenshot service returned {}", status.as_u16());
        }
        let bytes = response.bytes().await.context("failed reading screenshot bytes")?;
        if bytes.is_empty() {
            bail!("screenshot service returned an empty body");
        }
        Ok(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_query_with_target_and_size() {
        let provider = HttpScreenshotProvider::new(
            "https://shots.example/v1/urltoimage",
            Some(SecretString::from("k3y".to_string())),
            1280,
            800,
            Duration::from_secs(5),
        )
        .unwrap();

        let url = provider.request_url("https://allbirds.com/?ref=a&b=c");
        let pairs: Vec<(String, String)> = url.query_pairs().into_owned().collect();

        assert_eq!(url.path(), "/v1/urltoimage");
        assert!(pairs.contains(&("access_key".to_string(), "k3y".to_string())));
        assert!(pairs.contains(&("url".to_string(), "https://allbirds.com/?ref=a&b=c".to_string())));
        assert!(pairs.contains(&("width".to_string(), "1280".to_string())));
        assert!(pairs.contains(&("format".to_string(), "png".to_string())));
    }

    #[test]
    fn access_key_is_optional() {
        let provider =
            HttpScreenshotProvider::new("http://localhost:3000/shot", None, 800, 600, Duration::from_secs(5)).unwrap();
        let url = provider.request_url("https://allbirds.com");
        assert!(!url.query_pairs().any(|(k, _)| k == "access_key"));
    }

    #[test]
    fn rejects_invalid_endpoint() {
        assert!(HttpScreenshotProvider::new("not a url", None, 1, 1, Duration::from_secs(1)).is_err());
    }
}
