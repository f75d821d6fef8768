use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::{anyhow, bail, Context, Result};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

use crate::utils;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageModel {
    #[default]
    #[serde(rename = "gemini-2.5-flash-image")]
    Standard,
    #[serde(rename = "gemini-3-pro-image-preview")]
    Pro,
}

impl ImageModel {
    /// Model identifier sent to the generation API.
    pub fn id(&self) -> &'static str {
        match self {
            ImageModel::Standard => "gemini-2.5-flash-image",
            ImageModel::Pro => "gemini-3-pro-image-preview",
        }
    }

    pub fn is_pro(&self) -> bool {
        matches!(self, ImageModel::Pro)
    }
}

impl fmt::Display for ImageModel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ImageModel::Standard => write!(f, "standard ({})", self.id()),
            ImageModel::Pro => write!(f, "pro ({})", self.id()),
        }
    }
}

impl FromStr for ImageModel {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "standard" | "flash" | "gemini-2.5-flash-image" => Ok(ImageModel::Standard),
            "pro" | "gemini-3-pro-image-preview" => Ok(ImageModel::Pro),
            other => bail!("unknown model '{other}' (expected 'standard' or 'pro')"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum AspectRatio {
    #[default]
    #[serde(rename = "1:1")]
    Square,
    #[serde(rename = "16:9")]
    Wide,
    #[serde(rename = "9:16")]
    Tall,
    #[serde(rename = "4:3")]
    Classic,
    #[serde(rename = "3:4")]
    ClassicTall,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 5] = [
        AspectRatio::Square,
        AspectRatio::Wide,
        AspectRatio::Tall,
        AspectRatio::Classic,
        AspectRatio::ClassicTall,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            AspectRatio::Square => "1:1",
            AspectRatio::Wide => "16:9",
            AspectRatio::Tall => "9:16",
            AspectRatio::Classic => "4:3",
            AspectRatio::ClassicTall => "3:4",
        }
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        let trimmed = raw.trim();
        AspectRatio::ALL
            .into_iter()
            .find(|ratio| ratio.as_str() == trimmed)
            .ok_or_else(|| anyhow!("unsupported aspect ratio '{trimmed}' (expected 1:1, 16:9, 9:16, 4:3 or 3:4)"))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ImageSize {
    #[default]
    #[serde(rename = "1K")]
    OneK,
    #[serde(rename = "2K")]
    TwoK,
    #[serde(rename = "4K")]
    FourK,
}

impl ImageSize {
    pub fn as_str(&self) -> &'static str {
        match self {
            ImageSize::OneK => "1K",
            ImageSize::TwoK => "2K",
            ImageSize::FourK => "4K",
        }
    }
}

impl fmt::Display for ImageSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ImageSize {
    type Err = anyhow::Error;

    fn from_str(raw: &str) -> Result<Self> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "1K" => Ok(ImageSize::OneK),
            "2K" => Ok(ImageSize::TwoK),
            "4K" => Ok(ImageSize::FourK),
            other => bail!("unsupported image size '{other}' (expected 1K, 2K or 4K)"),
        }
    }
}

/// Reference image attached to a prompt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InputImage {
    pub data_url: String,
    pub base64: String,
    pub mime_type: String,
}

impl InputImage {
    pub fn from_bytes(bytes: &[u8], mime_type: impl Into<String>) -> Self {
        let mime_type = mime_type.into();
        let base64 = BASE64.encode(bytes);
        Self {
            data_url: utils::data_url(&mime_type, &base64),
            base64,
            mime_type,
        }
    }

    /// Reads an image from disk, sniffing its MIME type from the content.
    pub fn from_path(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read image {}", path.display()))?;
        let mime_type = infer::get(&bytes)
            .filter(|kind| kind.matcher_type() == infer::MatcherType::Image)
            .map(|kind| kind.mime_type())
            .ok_or_else(|| anyhow!("{} does not look like an image", path.display()))?;
        Ok(Self::from_bytes(&bytes, mime_type))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ImageSettings {
    pub prompt: String,
    pub model: ImageModel,
    pub aspect_ratio: AspectRatio,
    pub image_size: ImageSize,
    pub use_search: bool,
    pub input_image: Option<InputImage>,
}

impl ImageSettings {
    /// True when there is nothing to send: blank prompt and no reference image.
    pub fn is_empty_request(&self) -> bool {
        self.prompt.trim().is_empty() && self.input_image.is_none()
    }

    /// Returns a new settings value with every field present in `patch` replaced.
    pub fn merged(&self, patch: SettingsPatch) -> Self {
        let mut next = self.clone();
        if let Some(prompt) = patch.prompt {
            next.prompt = prompt;
        }
        if let Some(model) = patch.model {
            next.model = model;
        }
        if let Some(aspect_ratio) = patch.aspect_ratio {
            next.aspect_ratio = aspect_ratio;
        }
        if let Some(image_size) = patch.image_size {
            next.image_size = image_size;
        }
        if let Some(use_search) = patch.use_search {
            next.use_search = use_search;
        }
        if let Some(input_image) = patch.input_image {
            next.input_image = input_image;
        }
        next
    }
}

/// Partial update of [`ImageSettings`]. `None` leaves a field untouched;
/// `input_image: Some(None)` clears the reference image.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SettingsPatch {
    pub prompt: Option<String>,
    pub model: Option<ImageModel>,
    pub aspect_ratio: Option<AspectRatio>,
    pub image_size: Option<ImageSize>,
    pub use_search: Option<bool>,
    pub input_image: Option<Option<InputImage>>,
}

impl SettingsPatch {
    pub fn prompt(prompt: impl Into<String>) -> Self {
        Self {
            prompt: Some(prompt.into()),
            ..Default::default()
        }
    }

    pub fn aspect_ratio(aspect_ratio: AspectRatio) -> Self {
        Self {
            aspect_ratio: Some(aspect_ratio),
            ..Default::default()
        }
    }

    pub fn image_size(image_size: ImageSize) -> Self {
        Self {
            image_size: Some(image_size),
            ..Default::default()
        }
    }

    pub fn use_search(use_search: bool) -> Self {
        Self {
            use_search: Some(use_search),
            ..Default::default()
        }
    }

    pub fn input_image(input_image: Option<InputImage>) -> Self {
        Self {
            input_image: Some(input_image),
            ..Default::default()
        }
    }
}
