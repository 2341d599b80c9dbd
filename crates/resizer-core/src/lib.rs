use std::path::Path;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MAX_DIMENSION_CHOICES: [u32; 8] = [800, 700, 600, 500, 400, 300, 200, 100];
pub const DEFAULT_MAX_DIMENSION: u32 = 800;
pub const DEFAULT_JPEG_QUALITY: u8 = 85;
pub const DEFAULT_BACKGROUND: [u8; 3] = [255, 255, 255];
pub const DOWNLOAD_SUFFIX: &str = "_resized";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDimensions {
    pub width: u32,
    pub height: u32,
}

impl ImageDimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn longest_side(self) -> u32 {
        self.width.max(self.height)
    }

    pub fn is_empty(self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl std::fmt::Display for ImageDimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Upper bound for the longer side of a resized image. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct MaxDimension(u32);

impl MaxDimension {
    pub fn new(value: u32) -> Result<Self, CoreError> {
        if value == 0 {
            return Err(CoreError::InvalidInput(
                "max dimension must be a positive integer".to_string(),
            ));
        }
        Ok(Self(value))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for MaxDimension {
    fn default() -> Self {
        Self(DEFAULT_MAX_DIMENSION)
    }
}

impl TryFrom<u32> for MaxDimension {
    type Error = CoreError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<MaxDimension> for u32 {
    fn from(value: MaxDimension) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ImageFormatKind {
    Png,
    Jpeg,
}

impl ImageFormatKind {
    pub fn label(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpeg",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
        }
    }

    pub fn supports_alpha(self) -> bool {
        matches!(self, Self::Png)
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(Self::Png),
            "jpg" | "jpeg" => Some(Self::Jpeg),
            _ => None,
        }
    }
}

impl FromStr for ImageFormatKind {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        Self::from_extension(raw.trim()).ok_or_else(|| {
            CoreError::InvalidInput(format!(
                "unknown image format '{}'; expected one of: png, jpeg",
                raw
            ))
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PngCompression {
    Fast,
    Default,
    Best,
}

impl PngCompression {
    pub fn label(self) -> &'static str {
        match self {
            Self::Fast => "fast",
            Self::Default => "default",
            Self::Best => "best",
        }
    }
}

impl FromStr for PngCompression {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "fast" => Ok(Self::Fast),
            "default" => Ok(Self::Default),
            "best" | "optimize" => Ok(Self::Best),
            other => Err(CoreError::InvalidInput(format!(
                "unknown png compression '{}'; expected one of: fast, default, best",
                other
            ))),
        }
    }
}

/// What to do with transparency when the output format has no alpha channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AlphaPolicy {
    Flatten,
    Reject,
}

impl AlphaPolicy {
    pub fn label(self) -> &'static str {
        match self {
            Self::Flatten => "flatten",
            Self::Reject => "reject",
        }
    }
}

impl FromStr for AlphaPolicy {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "flatten" => Ok(Self::Flatten),
            "reject" => Ok(Self::Reject),
            other => Err(CoreError::InvalidInput(format!(
                "unknown alpha policy '{}'; expected one of: flatten, reject",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResampleFilter {
    Triangle,
    CatmullRom,
    Lanczos3,
}

impl ResampleFilter {
    pub fn label(self) -> &'static str {
        match self {
            Self::Triangle => "triangle",
            Self::CatmullRom => "catmull-rom",
            Self::Lanczos3 => "lanczos3",
        }
    }
}

impl FromStr for ResampleFilter {
    type Err = CoreError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "triangle" | "bilinear" => Ok(Self::Triangle),
            "catmull-rom" | "bicubic" => Ok(Self::CatmullRom),
            "lanczos3" | "lanczos" => Ok(Self::Lanczos3),
            other => Err(CoreError::InvalidInput(format!(
                "unknown resample filter '{}'; expected one of: triangle, catmull-rom, lanczos3",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncodeOptions {
    pub format: ImageFormatKind,
    pub jpeg_quality: u8,
    pub png_compression: PngCompression,
    pub alpha_policy: AlphaPolicy,
    pub background: [u8; 3],
}

impl Default for EncodeOptions {
    fn default() -> Self {
        Self {
            format: ImageFormatKind::Png,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            png_compression: PngCompression::Best,
            alpha_policy: AlphaPolicy::Flatten,
            background: DEFAULT_BACKGROUND,
        }
    }
}

impl EncodeOptions {
    pub fn validate(&self) -> Result<(), CoreError> {
        if !(1..=100).contains(&self.jpeg_quality) {
            return Err(CoreError::InvalidInput(format!(
                "jpeg quality must be within 1..=100 (received {})",
                self.jpeg_quality
            )));
        }
        Ok(())
    }
}

/// Encoded byte length of an image, with its KiB value (`bytes / 1024`).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SizeReport {
    pub bytes: u64,
    pub kib: f64,
}

impl SizeReport {
    pub fn from_byte_len(len: usize) -> Self {
        let bytes = len as u64;
        Self {
            bytes,
            kib: bytes as f64 / 1024.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeSettings {
    pub max_dimension: MaxDimension,
    pub filter: ResampleFilter,
    pub encode: EncodeOptions,
}

impl Default for ResizeSettings {
    fn default() -> Self {
        Self {
            max_dimension: MaxDimension::default(),
            filter: ResampleFilter::CatmullRom,
            encode: EncodeOptions::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeRequest {
    pub image_bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub declared_format: Option<ImageFormatKind>,
    pub settings: ResizeSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResizeResult {
    pub input_format: ImageFormatKind,
    pub original: ImageDimensions,
    pub resized: ImageDimensions,
    pub original_size: SizeReport,
    pub resized_size: SizeReport,
    pub output_format: ImageFormatKind,
    pub output_bytes: Vec<u8>,
    pub download_name: String,
    pub passthrough: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum PlatformTarget {
    Cli,
    Tauri,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TelemetryEventType {
    ResizeStart,
    ResizeSuccess,
    ResizeError,
}

/// What a finished resize produced, without the pixel data.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeOutcome {
    pub input_format: ImageFormatKind,
    pub original: ImageDimensions,
    pub resized: ImageDimensions,
    pub original_bytes: u64,
    pub output_format: ImageFormatKind,
    pub output_bytes: u64,
    pub passthrough: bool,
}

impl From<&ResizeResult> for ResizeOutcome {
    fn from(result: &ResizeResult) -> Self {
        Self {
            input_format: result.input_format,
            original: result.original,
            resized: result.resized,
            original_bytes: result.original_size.bytes,
            output_format: result.output_format,
            output_bytes: result.resized_size.bytes,
            passthrough: result.passthrough,
        }
    }
}

/// `outcome` is set on success and `error` on failure; start events carry neither.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TelemetryEvent {
    pub event_type: TelemetryEventType,
    pub platform: PlatformTarget,
    pub max_dimension: u32,
    pub file_name: Option<String>,
    pub duration_ms: Option<u64>,
    pub outcome: Option<ResizeOutcome>,
    pub error: Option<ErrorInfo>,
}

pub trait TelemetrySink: Send + Sync {
    fn emit(&self, event: TelemetryEvent);
}

/// Pixel-level operations the resize cycle needs.
///
/// `resize` takes the image by value so the caller never holds the decoded
/// original and the resized copy past the call.
pub trait ImageBackend {
    type Image;

    fn decode(
        &self,
        bytes: &[u8],
        declared: Option<ImageFormatKind>,
    ) -> Result<(Self::Image, ImageFormatKind), CoreError>;

    fn dimensions(&self, image: &Self::Image) -> ImageDimensions;

    fn resize(
        &self,
        image: Self::Image,
        target: ImageDimensions,
        filter: ResampleFilter,
    ) -> Result<Self::Image, CoreError>;

    fn encode(&self, image: &Self::Image, options: &EncodeOptions) -> Result<Vec<u8>, CoreError>;
}

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid input: {0}")]
    InvalidInput(String),
    #[error("failed to decode image: {0}")]
    Decode(String),
    #[error("failed to encode image: {0}")]
    Encode(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorCode {
    InvalidInput,
    DecodeError,
    EncodeError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorInfo {
    pub code: ErrorCode,
    pub message: String,
}

impl CoreError {
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::InvalidInput(_) => ErrorCode::InvalidInput,
            Self::Decode(_) => ErrorCode::DecodeError,
            Self::Encode(_) => ErrorCode::EncodeError,
        }
    }

    pub fn as_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.code(),
            message: self.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResizeConfig {
    pub max_dimension: u32,
    pub output_format: String,
    pub jpeg_quality: u8,
    pub png_compression: String,
    pub filter: String,
    pub alpha_policy: String,
    pub background: String,
}

impl Default for ResizeConfig {
    fn default() -> Self {
        Self {
            max_dimension: DEFAULT_MAX_DIMENSION,
            output_format: "png".to_string(),
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            png_compression: "best".to_string(),
            filter: "catmull-rom".to_string(),
            alpha_policy: "flatten".to_string(),
            background: "ffffff".to_string(),
        }
    }
}

impl ResizeConfig {
    pub fn into_settings(self) -> Result<ResizeSettings, CoreError> {
        let encode = EncodeOptions {
            format: self.output_format.parse()?,
            jpeg_quality: self.jpeg_quality,
            png_compression: self.png_compression.parse()?,
            alpha_policy: self.alpha_policy.parse()?,
            background: parse_hex_color(&self.background)?,
        };
        encode.validate()?;
        Ok(ResizeSettings {
            max_dimension: MaxDimension::new(self.max_dimension)?,
            filter: self.filter.parse()?,
            encode,
        })
    }
}

/// Fills blank string fields and a zero quality from the defaults.
///
/// `max_dimension` is taken as given so a zero bound still surfaces as
/// `InvalidInput` when the settings are built.
pub fn resolve_resize_config(overrides: ResizeConfig) -> ResizeConfig {
    let mut cfg = ResizeConfig::default();
    cfg.max_dimension = overrides.max_dimension;
    if !overrides.output_format.trim().is_empty() {
        cfg.output_format = overrides.output_format;
    }
    if overrides.jpeg_quality != 0 {
        cfg.jpeg_quality = overrides.jpeg_quality;
    }
    if !overrides.png_compression.trim().is_empty() {
        cfg.png_compression = overrides.png_compression;
    }
    if !overrides.filter.trim().is_empty() {
        cfg.filter = overrides.filter;
    }
    if !overrides.alpha_policy.trim().is_empty() {
        cfg.alpha_policy = overrides.alpha_policy;
    }
    if !overrides.background.trim().is_empty() {
        cfg.background = overrides.background;
    }
    cfg
}

pub fn parse_hex_color(raw: &str) -> Result<[u8; 3], CoreError> {
    let hex = raw.trim().trim_start_matches('#');
    let invalid = || {
        CoreError::InvalidInput(format!(
            "invalid background colour '{}'; expected six hex digits such as ffffff",
            raw
        ))
    };
    if hex.len() != 6 || !hex.is_ascii() {
        return Err(invalid());
    }
    let mut out = [0u8; 3];
    for (i, slot) in out.iter_mut().enumerate() {
        *slot = u8::from_str_radix(&hex[i * 2..i * 2 + 2], 16).map_err(|_| invalid())?;
    }
    Ok(out)
}

pub mod v1 {
    use super::*;

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResizeImageRequest {
        pub image_bytes: Vec<u8>,
        pub file_name: Option<String>,
        pub declared_format: Option<String>,
        pub max_dimension: u32,
        pub output_format: Option<String>,
        pub jpeg_quality: Option<u8>,
        pub png_compression: Option<String>,
        pub filter: Option<String>,
        pub alpha_policy: Option<String>,
        pub background: Option<String>,
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    #[serde(rename_all = "camelCase")]
    pub struct ResizeImageResponse {
        pub original_width: u32,
        pub original_height: u32,
        pub original_kib: f64,
        pub resized_width: u32,
        pub resized_height: u32,
        pub resized_kib: f64,
        pub image_bytes: Vec<u8>,
        pub mime_type: String,
        pub download_name: String,
        pub passthrough: bool,
    }
}

/// Largest dimensions with the input's aspect ratio that fit in a
/// `bound` x `bound` box. Never enlarges.
pub fn fit_within(original: ImageDimensions, bound: MaxDimension) -> Result<ImageDimensions, CoreError> {
    if original.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "image dimensions must be positive (received {})",
            original
        )));
    }
    let bound = bound.get();
    let longest = original.longest_side();
    if longest <= bound {
        return Ok(original);
    }
    let scale = bound as f64 / longest as f64;
    let side = |value: u32| ((value as f64 * scale).round() as u32).clamp(1, bound);
    Ok(ImageDimensions {
        width: side(original.width),
        height: side(original.height),
    })
}

pub fn download_file_name(original_name: Option<&str>, format: ImageFormatKind) -> String {
    let stem = original_name
        .map(Path::new)
        .and_then(|path| path.file_stem())
        .map(|stem| stem.to_string_lossy().trim().to_string())
        .filter(|stem| !stem.is_empty())
        .unwrap_or_else(|| "image".to_string());
    format!("{}{}.{}", stem, DOWNLOAD_SUFFIX, format.extension())
}

pub fn run_resize<B>(backend: &B, request: &ResizeRequest) -> Result<ResizeResult, CoreError>
where
    B: ImageBackend + ?Sized,
{
    run_resize_with_telemetry(backend, request, PlatformTarget::Cli, None)
}

pub fn run_resize_with_telemetry<B>(
    backend: &B,
    request: &ResizeRequest,
    platform: PlatformTarget,
    telemetry: Option<&dyn TelemetrySink>,
) -> Result<ResizeResult, CoreError>
where
    B: ImageBackend + ?Sized,
{
    let start = Instant::now();
    let event = |event_type: TelemetryEventType, outcome: Option<ResizeOutcome>, error: Option<ErrorInfo>| TelemetryEvent {
        event_type,
        platform,
        max_dimension: request.settings.max_dimension.get(),
        file_name: request.file_name.clone(),
        duration_ms: (event_type != TelemetryEventType::ResizeStart).then(|| start.elapsed().as_millis() as u64),
        outcome,
        error,
    };
    if let Some(sink) = telemetry {
        sink.emit(event(TelemetryEventType::ResizeStart, None, None));
    }
    match resize_cycle(backend, request) {
        Ok(result) => {
            tracing::debug!(
                original = %result.original,
                resized = %result.resized,
                bytes = result.resized_size.bytes,
                passthrough = result.passthrough,
                "resize cycle finished"
            );
            if let Some(sink) = telemetry {
                sink.emit(event(
                    TelemetryEventType::ResizeSuccess,
                    Some(ResizeOutcome::from(&result)),
                    None,
                ));
            }
            Ok(result)
        }
        Err(err) => {
            tracing::debug!(error = %err, "resize cycle failed");
            if let Some(sink) = telemetry {
                sink.emit(event(TelemetryEventType::ResizeError, None, Some(err.as_error_info())));
            }
            Err(err)
        }
    }
}

fn resize_cycle<B>(backend: &B, request: &ResizeRequest) -> Result<ResizeResult, CoreError>
where
    B: ImageBackend + ?Sized,
{
    let settings = &request.settings;
    settings.encode.validate()?;
    if request.image_bytes.is_empty() {
        return Err(CoreError::Decode("image bytes are empty".to_string()));
    }
    let (decoded, input_format) = backend.decode(&request.image_bytes, request.declared_format)?;
    let original = backend.dimensions(&decoded);
    let target = fit_within(original, settings.max_dimension)?;
    let passthrough = target == original;
    let resized = if passthrough {
        decoded
    } else {
        backend.resize(decoded, target, settings.filter)?
    };
    let output_bytes = backend.encode(&resized, &settings.encode)?;
    let resized_dims = backend.dimensions(&resized);
    drop(resized);

    Ok(ResizeResult {
        input_format,
        original,
        resized: resized_dims,
        original_size: SizeReport::from_byte_len(request.image_bytes.len()),
        resized_size: SizeReport::from_byte_len(output_bytes.len()),
        output_format: settings.encode.format,
        download_name: download_file_name(request.file_name.as_deref(), settings.encode.format),
        output_bytes,
        passthrough,
    })
}
