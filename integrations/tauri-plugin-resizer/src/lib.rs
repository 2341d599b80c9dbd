use serde::{Deserialize, Serialize};
use resizer_core::{
    resolve_resize_config, run_resize_with_telemetry, v1, AlphaPolicy, CoreError, ErrorInfo, ImageDimensions, ImageFormatKind,
    MaxDimension, PlatformTarget, PngCompression, ResampleFilter, ResizeConfig, ResizeRequest, ResizeSettings, EncodeOptions,
    DEFAULT_MAX_DIMENSION, MAX_DIMENSION_CHOICES,
};
use resizer_image::RasterBackend;
use resizer_telemetry::sink_from_env;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriResizeRequest {
    pub image_bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub declared_format: Option<ImageFormatKind>,
    pub max_dimension: u32,
    pub output_format: Option<ImageFormatKind>,
    pub jpeg_quality: Option<u8>,
    pub png_compression: Option<PngCompression>,
    pub filter: Option<ResampleFilter>,
    pub alpha_policy: Option<AlphaPolicy>,
    pub background: Option<[u8; 3]>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriResizeResponse {
    pub original: ImageDimensions,
    pub resized: ImageDimensions,
    pub original_kib: f64,
    pub resized_kib: f64,
    pub image_bytes: Vec<u8>,
    pub output_format: ImageFormatKind,
    pub download_name: String,
    pub passthrough: bool,
}

pub fn resize_image(request: TauriResizeRequest) -> Result<TauriResizeResponse, CoreError> {
    let defaults = EncodeOptions::default();
    let encode = EncodeOptions {
        format: request.output_format.unwrap_or(defaults.format),
        jpeg_quality: request.jpeg_quality.unwrap_or(defaults.jpeg_quality),
        png_compression: request.png_compression.unwrap_or(defaults.png_compression),
        alpha_policy: request.alpha_policy.unwrap_or(defaults.alpha_policy),
        background: request.background.unwrap_or(defaults.background),
    };
    let settings = ResizeSettings {
        max_dimension: MaxDimension::new(request.max_dimension)?,
        filter: request.filter.unwrap_or(ResampleFilter::CatmullRom),
        encode,
    };
    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let result = run_resize_with_telemetry(
        &RasterBackend,
        &ResizeRequest {
            image_bytes: request.image_bytes,
            file_name: request.file_name,
            declared_format: request.declared_format,
            settings,
        },
        PlatformTarget::Tauri,
        telemetry_ref,
    )?;
    Ok(TauriResizeResponse {
        original: result.original,
        resized: result.resized,
        original_kib: result.original_size.kib,
        resized_kib: result.resized_size.kib,
        image_bytes: result.output_bytes,
        output_format: result.output_format,
        download_name: result.download_name,
        passthrough: result.passthrough,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriCommandRequest {
    pub image_bytes: Vec<u8>,
    pub file_name: Option<String>,
    pub max_dimension: Option<u32>,
    pub output_format: Option<String>,
    pub jpeg_quality: Option<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TauriCommandResponse {
    pub original_width: u32,
    pub original_height: u32,
    pub original_kib: f64,
    pub resized_width: u32,
    pub resized_height: u32,
    pub resized_kib: f64,
    pub image_bytes: Vec<u8>,
    pub mime_type: String,
    pub download_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DimensionChoices {
    pub choices: Vec<u32>,
    pub default: u32,
}

pub fn dimension_choices() -> DimensionChoices {
    DimensionChoices {
        choices: MAX_DIMENSION_CHOICES.to_vec(),
        default: DEFAULT_MAX_DIMENSION,
    }
}

pub fn resize_image_command(request: TauriCommandRequest) -> Result<TauriCommandResponse, ErrorInfo> {
    let response = resize_image_v1(v1::ResizeImageRequest {
        image_bytes: request.image_bytes,
        file_name: request.file_name,
        declared_format: None,
        max_dimension: request.max_dimension.unwrap_or(DEFAULT_MAX_DIMENSION),
        output_format: request.output_format,
        jpeg_quality: request.jpeg_quality,
        png_compression: None,
        filter: None,
        alpha_policy: None,
        background: None,
    })?;
    Ok(TauriCommandResponse {
        original_width: response.original_width,
        original_height: response.original_height,
        original_kib: response.original_kib,
        resized_width: response.resized_width,
        resized_height: response.resized_height,
        resized_kib: response.resized_kib,
        image_bytes: response.image_bytes,
        mime_type: response.mime_type,
        download_name: response.download_name,
    })
}

pub fn resize_image_v1(request: v1::ResizeImageRequest) -> Result<v1::ResizeImageResponse, ErrorInfo> {
    v1_inner(request).map_err(|err| {
        tracing::warn!(error = %err, "resize command failed");
        err.as_error_info()
    })
}

fn v1_inner(request: v1::ResizeImageRequest) -> Result<v1::ResizeImageResponse, CoreError> {
    let settings = resolve_resize_config(ResizeConfig {
        max_dimension: request.max_dimension,
        output_format: request.output_format.unwrap_or_default(),
        jpeg_quality: request.jpeg_quality.unwrap_or(0),
        png_compression: request.png_compression.unwrap_or_default(),
        filter: request.filter.unwrap_or_default(),
        alpha_policy: request.alpha_policy.unwrap_or_default(),
        background: request.background.unwrap_or_default(),
    })
    .into_settings()?;
    let declared_format = request
        .declared_format
        .as_deref()
        .map(str::parse::<ImageFormatKind>)
        .transpose()?;
    let response = resize_image(TauriResizeRequest {
        image_bytes: request.image_bytes,
        file_name: request.file_name,
        declared_format,
        max_dimension: settings.max_dimension.get(),
        output_format: Some(settings.encode.format),
        jpeg_quality: Some(settings.encode.jpeg_quality),
        png_compression: Some(settings.encode.png_compression),
        filter: Some(settings.filter),
        alpha_policy: Some(settings.encode.alpha_policy),
        background: Some(settings.encode.background),
    })?;
    Ok(v1::ResizeImageResponse {
        original_width: response.original.width,
        original_height: response.original.height,
        original_kib: response.original_kib,
        resized_width: response.resized.width,
        resized_height: response.resized.height,
        resized_kib: response.resized_kib,
        mime_type: response.output_format.mime_type().to_string(),
        image_bytes: response.image_bytes,
        download_name: response.download_name,
        passthrough: response.passthrough,
    })
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_resize_image_command(request: TauriCommandRequest) -> Result<TauriCommandResponse, ErrorInfo> {
    resize_image_command(request)
}

#[cfg(feature = "tauri-plugin")]
#[tauri::command]
fn tauri_dimension_choices_command() -> DimensionChoices {
    dimension_choices()
}

#[cfg(feature = "tauri-plugin")]
pub fn init<R: tauri::Runtime>() -> tauri::plugin::TauriPlugin<R> {
    tauri::plugin::Builder::new("resizer")
        .invoke_handler(tauri::generate_handler![
            tauri_resize_image_command,
            tauri_dimension_choices_command
        ])
        .build()
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgba};
    use resizer_core::ErrorCode;

    fn sample_png(width: u32, height: u32) -> Vec<u8> {
        let img = ImageBuffer::from_fn(width, height, |x, y| {
            if (x + y) % 2 == 0 {
                Rgba([255, 255, 255, 255])
            } else {
                Rgba([10, 10, 10, 0])
            }
        });
        let mut out = Vec::new();
        DynamicImage::ImageRgba8(img)
            .write_to(&mut std::io::Cursor::new(&mut out), ImageFormat::Png)
            .expect("sample png");
        out
    }

    fn command(max_dimension: Option<u32>, output_format: Option<&str>) -> TauriCommandRequest {
        TauriCommandRequest {
            image_bytes: sample_png(100, 50),
            file_name: Some("upload.png".to_string()),
            max_dimension,
            output_format: output_format.map(str::to_string),
            jpeg_quality: None,
        }
    }

    #[test]
    fn command_resizes_and_names_download() {
        let response = resize_image_command(command(Some(40), None)).expect("command should succeed");
        assert_eq!((response.original_width, response.original_height), (100, 50));
        assert_eq!((response.resized_width, response.resized_height), (40, 20));
        assert_eq!(response.mime_type, "image/png");
        assert_eq!(response.download_name, "upload_resized.png");
        assert_eq!(response.resized_kib, response.image_bytes.len() as f64 / 1024.0);
    }

    #[test]
    fn command_flattens_transparency_for_jpeg() {
        let response = resize_image_command(command(None, Some("jpg"))).expect("jpeg output");
        assert_eq!(response.mime_type, "image/jpeg");
        assert_eq!(response.download_name, "upload_resized.jpg");
        let decoded = image::load_from_memory(&response.image_bytes).expect("decode");
        assert!(!decoded.color().has_alpha());
    }

    #[test]
    fn command_rejects_zero_bound() {
        let error = resize_image_command(command(Some(0), None)).expect_err("zero bound");
        assert_eq!(error.code, ErrorCode::InvalidInput);
    }

    #[test]
    fn command_rejects_unknown_format() {
        let error = resize_image_command(command(Some(100), Some("webp"))).expect_err("bad format");
        assert_eq!(error.code, ErrorCode::InvalidInput);
        assert!(error.message.contains("unknown image format"));
    }

    #[test]
    fn command_reports_decode_errors() {
        let error = resize_image_command(TauriCommandRequest {
            image_bytes: vec![1, 2, 3],
            file_name: None,
            max_dimension: None,
            output_format: None,
            jpeg_quality: None,
        })
        .expect_err("garbage bytes");
        assert_eq!(error.code, ErrorCode::DecodeError);
    }

    #[test]
    fn typed_request_rejects_transparency_when_asked() {
        let error = resize_image(TauriResizeRequest {
            image_bytes: sample_png(8, 8),
            file_name: None,
            declared_format: Some(ImageFormatKind::Png),
            max_dimension: 4,
            output_format: Some(ImageFormatKind::Jpeg),
            jpeg_quality: Some(70),
            png_compression: None,
            filter: Some(ResampleFilter::Lanczos3),
            alpha_policy: Some(AlphaPolicy::Reject),
            background: None,
        })
        .expect_err("reject");
        assert_eq!(error.code(), ErrorCode::EncodeError);
    }

    #[test]
    fn choices_match_core() {
        let choices = dimension_choices();
        assert_eq!(choices.default, 800);
        assert_eq!(choices.choices.first(), Some(&800));
        assert_eq!(choices.choices.last(), Some(&100));
    }
}
