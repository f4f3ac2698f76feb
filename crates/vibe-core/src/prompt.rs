//! Prompt assembly for the vision and image-generation stages.

use once_cell::sync::Lazy;
use regex::Regex;

use crate::models::Mode;

static HEX_COLOR: Lazy<Regex> = Lazy::new(|| Regex::new(r"#[0-9a-fA-F]{6}\b").expect("hex color regex"));

/// Used in place of a color when the description did not end with one.
pub const FALLBACK_PALETTE: &str = "a color palette that fits the description";

/// Text sent to the vision model along with the screenshot.
pub fn vibe_prompt(mode: Mode) -> &'static str {
    mode.profile().prompt_template
}

/// Best-effort lookup of the dominant hex color. The models are asked to end
/// with one, so the last match wins.
pub fn extract_hex_color(text: &str) -> Option<&str> {
    HEX_COLOR.find_iter(text).last().map(|m| m.as_str())
}

/// Builds the image-generation prompt for a description.
pub fn image_prompt(mode: Mode, vibe_text: &str, color: Option<&str>) -> String {
    let palette = match color {
        Some(hex) => format!("Use {hex} as the dominant color."),
        None => format!("Use {FALLBACK_PALETTE}."),
    };
    format!("{} {} {}", mode.profile().image_instructions, vibe_text.trim(), palette)
}
