use anyhow::Result;
use image::ImageFormat;
use resizer_core::{run_resize, ErrorCode, ImageDimensions, ImageFormatKind, ResizeRequest, ResizeSettings};
use resizer_image::{decode, dimensions_of, RasterBackend};
use smoke_tests::{cutout, encode, photo};
use tauri_plugin_resizer::{resize_image_command, resize_image_v1, TauriCommandRequest};

fn core_request(bytes: Vec<u8>, max_dimension: u32) -> Result<ResizeRequest> {
    Ok(ResizeRequest {
        image_bytes: bytes,
        file_name: Some("sample.jpeg".to_string()),
        declared_format: None,
        settings: ResizeSettings {
            max_dimension: resizer_core::MaxDimension::new(max_dimension)?,
            ..ResizeSettings::default()
        },
    })
}

#[test]
fn reference_scenarios_hold_end_to_end() -> Result<()> {
    let cases = [
        ((1600, 1200), 800, (800, 600)),
        ((400, 300), 800, (400, 300)),
        ((1000, 1000), 300, (300, 300)),
    ];
    for ((w, h), bound, (ew, eh)) in cases {
        let bytes = encode(&photo(w, h), ImageFormat::Jpeg)?;
        let result = run_resize(&RasterBackend, &core_request(bytes.clone(), bound)?)?;
        assert_eq!(result.original, ImageDimensions::new(w, h));
        assert_eq!(result.resized, ImageDimensions::new(ew, eh));
        assert_eq!(result.input_format, ImageFormatKind::Jpeg);
        assert_eq!(result.original_size.bytes, bytes.len() as u64);
        assert_eq!(result.resized_size.bytes, result.output_bytes.len() as u64);

        let (decoded, kind) = decode(&result.output_bytes, None)?;
        assert_eq!(kind, ImageFormatKind::Png);
        assert_eq!(dimensions_of(&decoded), result.resized);
    }
    Ok(())
}

#[test]
fn bridge_and_core_agree() -> Result<()> {
    let bytes = encode(&photo(900, 300), ImageFormat::Png)?;
    let core = run_resize(&RasterBackend, &core_request(bytes.clone(), 300)?)?;
    let bridge = resize_image_command(TauriCommandRequest {
        image_bytes: bytes,
        file_name: Some("sample.jpeg".to_string()),
        max_dimension: Some(300),
        output_format: None,
        jpeg_quality: None,
    })
    .map_err(|info| anyhow::anyhow!(info.message))?;

    assert_eq!((bridge.resized_width, bridge.resized_height), (300, 100));
    assert_eq!(bridge.image_bytes, core.output_bytes);
    assert_eq!(bridge.download_name, core.download_name);
    assert_eq!(bridge.original_kib, core.original_size.kib);
    Ok(())
}

#[test]
fn v1_request_round_trips_through_json() -> Result<()> {
    let request: resizer_core::v1::ResizeImageRequest = serde_json::from_value(serde_json::json!({
        "imageBytes": encode(&cutout(64, 48), ImageFormat::Png)?,
        "fileName": "logo.png",
        "declaredFormat": "png",
        "maxDimension": 32,
        "outputFormat": "jpeg",
        "jpegQuality": 90,
        "alphaPolicy": "flatten",
        "background": "#000000",
    }))?;
    let response = resize_image_v1(request).map_err(|info| anyhow::anyhow!(info.message))?;
    assert_eq!((response.resized_width, response.resized_height), (32, 24));
    assert_eq!(response.mime_type, "image/jpeg");
    assert_eq!(response.download_name, "logo_resized.jpg");

    let decoded = image::load_from_memory(&response.image_bytes)?.to_rgb8();
    // Left half was fully transparent and is flattened onto black.
    let left = decoded.get_pixel(2, 12);
    assert!(left.0.iter().all(|c| *c < 30));
    Ok(())
}

#[test]
fn v1_errors_carry_codes() -> Result<()> {
    let request: resizer_core::v1::ResizeImageRequest = serde_json::from_value(serde_json::json!({
        "imageBytes": encode(&cutout(8, 8), ImageFormat::Png)?,
        "maxDimension": 4,
        "outputFormat": "jpeg",
        "alphaPolicy": "reject",
    }))?;
    let error = resize_image_v1(request).expect_err("transparent jpeg must be rejected");
    assert_eq!(error.code, ErrorCode::EncodeError);
    assert_eq!(serde_json::to_value(&error)?["code"], "encode-error");
    Ok(())
}
