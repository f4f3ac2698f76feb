//! # vibe-api Handlers
//!
//! This module coordinates the flow between HTTP requests and the core services.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Redirect, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use tracing::{error, warn};
use vibe_core::gallery::DEFAULT_PAGE_SIZE;
use vibe_core::seo::is_valid_seo_id;
use vibe_core::{AppError, Gallery, GenerateVibe, Mode, VibeService};

pub const RATE_LIMITED_MESSAGE: &str = "Rate limit exceeded. Please try again later.";
const FALLBACK_CLIENT_IP: &str = "127.0.0.1";

/// State shared across all request handlers.
#[derive(Clone)]
pub struct AppState {
    pub vibes: VibeService,
    pub gallery: Gallery,
}

fn error_body(status: StatusCode, message: impl Into<String>) -> Response {
    (status, Json(json!({ "error": message.into() }))).into_response()
}

/// Caller identity for rate limiting: first `X-Forwarded-For` hop, then
/// `X-Real-IP`, then loopback.
pub fn client_ip(headers: &HeaderMap) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(str::trim)
        .filter(|v| !v.is_empty());
    let real_ip = || {
        headers
            .get("x-real-ip")
            .and_then(|v| v.to_str().ok())
            .map(str::trim)
            .filter(|v| !v.is_empty())
    };
    forwarded.or_else(real_ip).unwrap_or(FALLBACK_CLIENT_IP).to_string()
}

fn generation_failure(err: AppError) -> Response {
    match err {
        AppError::RateLimitExceeded { remaining, reset_at } => (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": RATE_LIMITED_MESSAGE,
                "rateLimitInfo": { "remaining": remaining, "resetAt": reset_at },
            })),
        )
            .into_response(),
        AppError::ValidationError(message) => error_body(StatusCode::BAD_REQUEST, message),
        other => {
            error!(error = %other, "vibe generation failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Failed to generate store vibe", "details": other.to_string() })),
            )
                .into_response()
        }
    }
}

/// `POST /api/generate-vibe`
pub async fn generate_vibe(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Json<GenerateVibe>, JsonRejection>,
) -> Response {
    let Json(request) = match body {
        Ok(body) => body,
        Err(rejection) => {
            let reason = rejection.body_text();
            warn!(%reason, "rejected generate request body");
            return error_body(StatusCode::BAD_REQUEST, format!("Invalid request body: {reason}"));
        }
    };

    let ip = client_ip(&headers);
    match state.vibes.generate(request, &ip).await {
        Ok(generated) => Json(generated).into_response(),
        Err(err) => generation_failure(err),
    }
}

/// Gallery query. Values are parsed leniently: anything unparseable falls
/// back to its default.
#[derive(Debug, Default, Deserialize)]
pub struct ExploreQuery {
    pub mode: Option<String>,
    pub page: Option<String>,
    pub limit: Option<String>,
}

fn parse_number(raw: Option<&str>, default: u64) -> u64 {
    raw.and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

/// `GET /api/explore-vibes?mode&page&limit`
pub async fn explore_vibes(State(state): State<AppState>, Query(query): Query<ExploreQuery>) -> Response {
    let mode = Mode::parse_filter(query.mode.as_deref());
    let page = parse_number(query.page.as_deref(), 1);
    let limit = parse_number(query.limit.as_deref(), DEFAULT_PAGE_SIZE);

    match state.gallery.find_public_by_mode(mode, page, limit).await {
        Ok(page) => Json(json!({
            "vibes": page.items,
            "pagination": {
                "total": page.total,
                "page": page.page,
                "limit": page.limit,
                "pages": page.pages,
            },
        }))
        .into_response(),
        Err(err) => {
            error!(error = %err, "failed to fetch vibes");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch vibes")
        }
    }
}

/// `GET /api/vibes/{seo_id}`
pub async fn vibe_detail(State(state): State<AppState>, Path(seo_id): Path<String>) -> Response {
    if !is_valid_seo_id(&seo_id) {
        return error_body(StatusCode::BAD_REQUEST, "Invalid SEO ID format");
    }
    match state.gallery.permalink(&seo_id).await {
        Ok(detail) => Json(detail).into_response(),
        Err(AppError::NotFound(..)) => error_body(StatusCode::NOT_FOUND, "Vibe not found"),
        Err(err) => {
            error!(error = %err, %seo_id, "failed to fetch vibe");
            error_body(StatusCode::INTERNAL_SERVER_ERROR, "Failed to fetch vibe")
        }
    }
}

/// `GET /v/{seo_id}`: 303 to the vibe page, or to the gallery when unknown.
pub async fn permalink_redirect(State(state): State<AppState>, Path(seo_id): Path<String>) -> Redirect {
    match state.gallery.find_by_seo_id(&seo_id).await {
        Ok(Some(vibe)) => Redirect::to(&format!("/vibe/{}", vibe.seo_id)),
        Ok(None) => Redirect::to("/explore"),
        Err(err) => {
            error!(error = %err, %seo_id, "permalink lookup failed");
            Redirect::to("/explore")
        }
    }
}

/// `GET /api/modes`: selectable modes with their display labels.
pub async fn list_modes() -> Json<serde_json::Value> {
    let modes: Vec<_> = Mode::ALL
        .iter()
        .map(|mode| json!({ "mode": mode, "label": mode.profile().label }))
        .collect();
    Json(json!({ "modes": modes }))
}

pub async fn healthz() -> Json<serde_json::Value> {
    Json(json!({ "ok": true }))
}
