//! # vibe-openai
//!
//! OpenAI-compatible implementation of `VibeTextGenerator` (vision chat
//! completion over the storefront screenshot) and `ImageGenerator`
//! (image generations endpoint).

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use async_trait::async_trait;
use base64::Engine;
use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;
use vibe_core::traits::{ImageGenerator, VibeTextGenerator};

/// Returned when the model answers with an empty message.
pub const EMPTY_SUMMARY: &str = "Visual summary unavailable.";

#[derive(Debug, Clone)]
pub struct OpenAiOptions {
    pub base_url: String,
    pub vision_model: String,
    pub image_model: String,
    pub max_tokens: u32,
    pub image_size: String,
    pub timeout: Duration,
}

impl Default for OpenAiOptions {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            vision_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            max_tokens: 300,
            image_size: "1024x1024".to_string(),
            timeout: Duration::from_secs(120),
        }
    }
}

pub struct OpenAiClient {
    http: reqwest::Client,
    api_key: SecretString,
    options: OpenAiOptions,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct ImageResponse {
    #[serde(default)]
    data: Vec<ImageDatum>,
}

#[derive(Deserialize)]
struct ImageDatum {
    url: Option<String>,
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut out: String = text.chars().take(max_chars).collect();
    out.push('…');
    out
}

/// Chat completion payload: one user turn with the instructions and the screenshot inline.
fn chat_payload(model: &str, max_tokens: u32, prompt: &str, screenshot: &[u8]) -> Value {
    let encoded = base64::engine::general_purpose::STANDARD.encode(screenshot);
    json!({
        "model": model,
        "messages": [{
            "role": "user",
            "content": [
                { "type": "text", "text": prompt },
                { "type": "image_url", "image_url": { "url": format!("data:image/png;base64,{encoded}") } },
            ],
        }],
        "max_tokens": max_tokens,
    })
}

fn image_payload(model: &str, size: &str, prompt: &str) -> Value {
    json!({
        "model": model,
        "prompt": prompt,
        "n": 1,
        "size": size,
    })
}

fn parse_chat_content(body: &str) -> anyhow::Result<String> {
    let parsed: ChatResponse = serde_json::from_str(body).context("failed parsing chat completion response")?;
    let content = parsed
        .choices
        .into_iter()
        .next()
        .and_then(|choice| choice.message.content)
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    Ok(content.unwrap_or_else(|| EMPTY_SUMMARY.to_string()))
}

fn parse_image_url(body: &str) -> anyhow::Result<String> {
    let parsed: ImageResponse = serde_json::from_str(body).context("failed parsing image generation response")?;
    parsed
        .data
        .into_iter()
        .find_map(|datum| datum.url)
        .ok_or_else(|| anyhow!("image generation response contained no url"))
}

impl OpenAiClient {
    pub fn new(api_key: SecretString, options: OpenAiOptions) -> anyhow::Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(options.timeout)
            .build()
            .context("failed to build http client")?;
        Ok(Self { http, api_key, options })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.options.base_url.trim_end_matches('/'), path)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> anyhow::Result<String> {
        let endpoint = self.endpoint(path);
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(self.api_key.expose_secret())
            .json(payload)
            .send()
            .await
            .with_context(|| format!("OpenAI request failed ({endpoint})"))?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            bail!("OpenAI request failed ({}): {}", status.as_u16(), truncate_text(&body, 512));
        }
        Ok(body)
    }
}

#[async_trait]
impl VibeTextGenerator for OpenAiClient {
    async fn describe(&self, screenshot: Bytes, prompt: &str) -> anyhow::Result<String> {
        debug!(model = %self.options.vision_model, bytes = screenshot.len(), "requesting vibe description");
        let payload = chat_payload(&self.options.vision_model, self.options.max_tokens, prompt, &screenshot);
        let body = self.post_json("v1/chat/completions", &payload).await?;
        parse_chat_content(&body)
    }
}

#[async_trait]
impl ImageGenerator for OpenAiClient {
    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        debug!(model = %self.options.image_model, "requesting image");
        let payload = image_payload(&self.options.image_model, &self.options.image_size, prompt);
        let body = self.post_json("v1/images/generations", &payload).await?;
        parse_image_url(&body)
    }
}
