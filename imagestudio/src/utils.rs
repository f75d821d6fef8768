//! Shared helpers and constants.

use anyhow::{anyhow, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{SecondsFormat, Utc};

pub const APP_NAME: &str = "imagestudio";

/// Millisecond-precision UTC timestamp, e.g. `2025-01-01T12:00:00.123Z`.
pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn data_url(mime_type: &str, base64: &str) -> String {
    format!("data:{mime_type};base64,{base64}")
}

/// Splits a `data:<mime>;base64,<payload>` URI and decodes the payload.
pub fn decode_data_url(src: &str) -> Result<(String, Vec<u8>)> {
    let rest = src
        .strip_prefix("data:")
        .ok_or_else(|| anyhow!("not a data URI"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| anyhow!("data URI is missing its payload"))?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or_else(|| anyhow!("only base64 data URIs are supported"))?;
    let bytes = BASE64
        .decode(payload.trim())
        .context("data URI payload is not valid base64")?;
    Ok((mime_type.to_string(), bytes))
}

pub fn extension_for_mime(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        "image/gif" => "gif",
        _ => "png",
    }
}

/// Shortens long values (data URIs, prompts) for terminal output.
pub fn ellipsize(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    let head: String = value.chars().take(max_chars).collect();
    format!("{head}…")
}
