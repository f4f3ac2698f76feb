//! # AppError
//!
//! Centralized error handling for the Store Vibe Generator.
//! Maps domain-specific failures to actionable error types.

use std::fmt;

use chrono::{DateTime, Utc};
use thiserror::Error;

/// The external pipeline stages whose failure aborts a generation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Screenshot,
    VibeText,
    ImageGeneration,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::Screenshot => "screenshot",
            Stage::VibeText => "vibe text",
            Stage::ImageGeneration => "image generation",
        })
    }
}

/// The primary error type for all vibe-core operations.
#[derive(Error, Debug)]
pub enum AppError {
    /// Resource not found (e.g., unknown or malformed SEO id)
    #[error("{0} not found with ID {1}")]
    NotFound(String, String),

    /// Validation failure (e.g., empty store URL, unknown mode)
    #[error("validation error: {0}")]
    ValidationError(String),

    /// A screenshot, vision or image-generation call failed or timed out
    #[error("{stage} stage failed: {message}")]
    Upstream { stage: Stage, message: String },

    /// Infrastructure failure (e.g., store unavailable)
    #[error("internal service error: {0}")]
    Internal(String),

    /// Concurrent writers kept invalidating a conditional update
    #[error("conflict: {0}")]
    Conflict(String),

    /// Rate limit exceeded; no external calls were made
    #[error("too many requests: {remaining} remaining until {reset_at}")]
    RateLimitExceeded { remaining: u32, reset_at: DateTime<Utc> },
}

impl AppError {
    pub fn upstream(stage: Stage, err: impl fmt::Display) -> Self {
        AppError::Upstream { stage, message: format!("{err:#}") }
    }

    pub fn internal(err: impl fmt::Display) -> Self {
        AppError::Internal(format!("{err:#}"))
    }
}

/// A specialized Result type for Store Vibe logic.
pub type Result<T> = std::result::Result<T, AppError>;
