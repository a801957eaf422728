use std::fmt::{Display, Formatter};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const DEFAULT_MAX_WIDTH: u32 = 1280;
pub const DEFAULT_MAX_HEIGHT: u32 = 800;
pub const DEFAULT_FILE_NAME_PREFIX: &str = "s_";
pub const OUTPUT_FOLDER_NAME: &str = "imgfit";

/// File extensions offered to the user, in picker order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageExtension {
    Jpg,
    Png,
    Svg,
    Gif,
    Bmp,
    Tiff,
}

impl ImageExtension {
    pub fn all() -> [ImageExtension; 6] {
        [
            ImageExtension::Jpg,
            ImageExtension::Png,
            ImageExtension::Svg,
            ImageExtension::Gif,
            ImageExtension::Bmp,
            ImageExtension::Tiff,
        ]
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Jpg => "jpg",
            Self::Png => "png",
            Self::Svg => "svg",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Tiff => "tiff",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        let normalized = value.trim().trim_start_matches('.').to_ascii_lowercase();
        match normalized.as_str() {
            "jpg" | "jpeg" => Some(Self::Jpg),
            "png" => Some(Self::Png),
            "svg" => Some(Self::Svg),
            "gif" => Some(Self::Gif),
            "bmp" => Some(Self::Bmp),
            "tiff" | "tif" => Some(Self::Tiff),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension().and_then(|ext| ext.to_str()).and_then(Self::parse)
    }

    /// SVG is listed for selection but no raster codec handles it, so it
    /// fails at decode or encode time.
    pub fn is_raster(self) -> bool {
        !matches!(self, Self::Svg)
    }

    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Png | Self::Gif)
    }
}

impl Display for ImageExtension {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.extension())
    }
}

/// Bounding box an image must fit inside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SizeLimit {
    pub max_width: u32,
    pub max_height: u32,
}

impl SizeLimit {
    pub fn new(max_width: u32, max_height: u32) -> Self {
        Self { max_width, max_height }
    }

    pub fn validate(&self) -> Result<(), ConvertError> {
        if self.max_width == 0 || self.max_height == 0 {
            return Err(ConvertError::InvalidLimit {
                width: self.max_width,
                height: self.max_height,
            });
        }
        Ok(())
    }
}

impl Default for SizeLimit {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_WIDTH, DEFAULT_MAX_HEIGHT)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

impl Display for TargetSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Computes the size an image of `width` x `height` must be shrunk to so it
/// fits inside `limit`. Returns `None` when it already fits.
///
/// The axis checks run in a fixed order: both axes over, then width only,
/// then height only. The complementary dimension is truncated, and never
/// drops below one pixel.
pub fn fit_within(width: u32, height: u32, limit: SizeLimit) -> Option<TargetSize> {
    let over_width = width > limit.max_width;
    let over_height = height > limit.max_height;

    let target = if over_width && over_height {
        // min(max_w / w, max_h / h) compared without floating point.
        let width_bound = u64::from(limit.max_width) * u64::from(height);
        let height_bound = u64::from(limit.max_height) * u64::from(width);
        if width_bound <= height_bound {
            TargetSize::new(limit.max_width, scale_dimension(height, limit.max_width, width))
        } else {
            TargetSize::new(scale_dimension(width, limit.max_height, height), limit.max_height)
        }
    } else if over_width {
        TargetSize::new(limit.max_width, scale_dimension(height, limit.max_width, width))
    } else if over_height {
        TargetSize::new(scale_dimension(width, limit.max_height, height), limit.max_height)
    } else {
        return None;
    };
    Some(target)
}

/// floor(value * numerator / denominator), clamped to at least 1.
fn scale_dimension(value: u32, numerator: u32, denominator: u32) -> u32 {
    if denominator == 0 {
        return value.max(1);
    }
    let scaled = u64::from(value) * u64::from(numerator) / u64::from(denominator);
    u32::try_from(scaled).unwrap_or(u32::MAX).max(1)
}

/// Alpha is dropped only when a PNG source is written to a non-PNG target.
/// Other alpha-capable sources (GIF) are passed to the encoder untouched.
pub fn needs_alpha_flatten(input: &Path, output: &Path) -> bool {
    ImageExtension::from_path(input) == Some(ImageExtension::Png)
        && ImageExtension::from_path(output) != Some(ImageExtension::Png)
}

#[derive(Debug, Error)]
pub enum ConvertError {
    #[error("size limit must be positive on both axes (got {width}x{height})")]
    InvalidLimit { width: u32, height: u32 },
    #[error("failed to decode {}: {reason}", .path.display())]
    Decode { path: PathBuf, reason: String },
    #[error("failed to encode {}: {reason}", .path.display())]
    Encode { path: PathBuf, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidLimit,
    DecodeError,
    EncodeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl ConvertError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidLimit { .. } => ErrorCode::InvalidLimit,
            Self::Decode { .. } => ErrorCode::DecodeError,
            Self::Encode { .. } => ErrorCode::EncodeError,
        }
    }

    pub fn as_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

/// One file's worth of work handed from the front end to the converter.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionRequest {
    pub input: PathBuf,
    pub output: PathBuf,
    /// `None` disables resizing for this file.
    pub size_limit: Option<SizeLimit>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversionSummary {
    pub original: TargetSize,
    pub written: TargetSize,
    pub resized: bool,
    pub alpha_flattened: bool,
    pub duration_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConverterSettings {
    pub output_dir: PathBuf,
    pub target_extension: ImageExtension,
    pub convert_extension: bool,
    pub size_limit: SizeLimit,
    pub limit_size: bool,
    pub file_name_prefix: String,
    pub add_prefix: bool,
}

impl ConverterSettings {
    pub fn with_output_dir(output_dir: PathBuf) -> Self {
        Self {
            output_dir,
            target_extension: ImageExtension::Jpg,
            convert_extension: true,
            size_limit: SizeLimit::default(),
            limit_size: true,
            file_name_prefix: DEFAULT_FILE_NAME_PREFIX.to_string(),
            add_prefix: true,
        }
    }

    pub fn effective_size_limit(&self) -> Option<SizeLimit> {
        self.limit_size.then_some(self.size_limit)
    }

    pub fn effective_prefix(&self) -> &str {
        if self.add_prefix {
            &self.file_name_prefix
        } else {
            ""
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsOverrides {
    pub output_dir: Option<PathBuf>,
    pub target_extension: Option<String>,
    pub convert_extension: Option<bool>,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub limit_size: Option<bool>,
    pub file_name_prefix: Option<String>,
    pub add_prefix: Option<bool>,
}

#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("unknown image extension '{0}'; expected one of: jpg, png, svg, gif, bmp, tiff")]
    UnknownExtension(String),
}

/// Layers `overrides` over the defaults rooted at `default_output_dir`.
/// Blank strings fall back to the default value.
pub fn resolve_settings(default_output_dir: PathBuf, overrides: SettingsOverrides) -> Result<ConverterSettings, SettingsError> {
    let mut cfg = ConverterSettings::with_output_dir(default_output_dir);
    if let Some(dir) = overrides.output_dir.filter(|dir| !dir.as_os_str().is_empty()) {
        cfg.output_dir = dir;
    }
    if let Some(raw) = overrides.target_extension.filter(|raw| !raw.trim().is_empty()) {
        cfg.target_extension = ImageExtension::parse(&raw).ok_or(SettingsError::UnknownExtension(raw))?;
    }
    if let Some(convert_extension) = overrides.convert_extension {
        cfg.convert_extension = convert_extension;
    }
    if let Some(width) = overrides.max_width {
        cfg.size_limit.max_width = width;
    }
    if let Some(height) = overrides.max_height {
        cfg.size_limit.max_height = height;
    }
    if let Some(limit_size) = overrides.limit_size {
        cfg.limit_size = limit_size;
    }
    if let Some(prefix) = overrides.file_name_prefix.filter(|prefix| !prefix.trim().is_empty()) {
        cfg.file_name_prefix = prefix;
    }
    if let Some(add_prefix) = overrides.add_prefix {
        cfg.add_prefix = add_prefix;
    }
    Ok(cfg)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TelemetryEventType {
    BatchStart,
    BatchFinish,
    ConvertStart,
    ConvertSuccess,
    ConvertError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub input: Option<PathBuf>,
    pub duration_ms: Option<u64>,
    pub detail: Option<String>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}
