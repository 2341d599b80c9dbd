use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{Args, Parser, Subcommand};
use resizer_core::{
    download_file_name, resolve_resize_config, run_resize_with_telemetry, ImageFormatKind, PlatformTarget, ResizeConfig,
    ResizeRequest, SizeReport, DEFAULT_MAX_DIMENSION, MAX_DIMENSION_CHOICES,
};
use resizer_image::{dimensions_of, RasterBackend};
use resizer_telemetry::sink_from_env;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "resizer", version, about = "Shrink an image to fit a maximum dimension")]
struct Cli {
    #[command(subcommand)]
    command: TopLevelCommand,
}

#[derive(Subcommand, Debug)]
enum TopLevelCommand {
    /// Resize an image and write the result next to it (or to --output).
    Resize(ResizeArgs),
    /// Report the encoded size of an image without resizing it.
    Measure(MeasureArgs),
    /// List the suggested maximum dimensions.
    Choices,
}

#[derive(Args, Debug)]
struct EncodeArgs {
    /// Output format: png or jpeg. Inferred from --output when omitted.
    #[arg(long, short = 'f')]
    format: Option<String>,
    #[arg(long, short = 'q', default_value_t = resizer_core::DEFAULT_JPEG_QUALITY)]
    quality: u8,
    #[arg(long, default_value = "best")]
    png_compression: String,
    /// How to handle transparency when writing jpeg: flatten or reject.
    #[arg(long, default_value = "flatten")]
    alpha: String,
    /// Background colour used when flattening transparency.
    #[arg(long, default_value = "ffffff")]
    background: String,
}

#[derive(Args, Debug)]
struct ResizeArgs {
    #[arg(long, short = 'i')]
    input: PathBuf,
    #[arg(long, short = 'm', default_value_t = DEFAULT_MAX_DIMENSION)]
    max_dimension: u32,
    #[arg(long, default_value = "catmull-rom")]
    filter: String,
    #[command(flatten)]
    encode: EncodeArgs,
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    profile: bool,
}

#[derive(Args, Debug)]
struct MeasureArgs {
    #[arg(long, short = 'i')]
    input: PathBuf,
    #[command(flatten)]
    encode: EncodeArgs,
}

fn main() -> Result<()> {
    init_logging();
    let cli = Cli::parse();
    let report = execute(cli)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn init_logging() {
    let filter = EnvFilter::try_from_env("RESIZER_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn execute(cli: Cli) -> Result<serde_json::Value> {
    match cli.command {
        TopLevelCommand::Resize(args) => run_resize_command(&args),
        TopLevelCommand::Measure(args) => run_measure_command(&args),
        TopLevelCommand::Choices => Ok(serde_json::json!({
            "choices": MAX_DIMENSION_CHOICES,
            "default": DEFAULT_MAX_DIMENSION,
        })),
    }
}

fn run_resize_command(args: &ResizeArgs) -> Result<serde_json::Value> {
    let total_start = Instant::now();
    let format = resolve_output_format(args.encode.format.as_deref(), args.output.as_deref())?;
    let settings = resolve_resize_config(ResizeConfig {
        max_dimension: args.max_dimension,
        output_format: format.label().to_string(),
        jpeg_quality: args.encode.quality,
        png_compression: args.encode.png_compression.clone(),
        filter: args.filter.clone(),
        alpha_policy: args.encode.alpha.clone(),
        background: args.encode.background.clone(),
    })
    .into_settings()?;
    let output = resolve_output_path(&args.input, args.output.as_deref(), format)?;

    let read_start = Instant::now();
    let source = std::fs::read(&args.input).with_context(|| format!("failed to read input {}", args.input.display()))?;
    let read_done = Instant::now();

    let telemetry = sink_from_env();
    let telemetry_ref = telemetry.as_ref().map(|sink| sink.as_ref());
    let request = ResizeRequest {
        image_bytes: source,
        file_name: args.input.file_name().map(|name| name.to_string_lossy().into_owned()),
        declared_format: declared_format(&args.input),
        settings,
    };
    let result = run_resize_with_telemetry(&RasterBackend, &request, PlatformTarget::Cli, telemetry_ref)
        .with_context(|| format!("failed to resize {}", args.input.display()))?;
    drop(request);
    let resize_done = Instant::now();

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(&output, &result.output_bytes).with_context(|| format!("failed to write {}", output.display()))?;
    let write_done = Instant::now();
    tracing::info!(output = %output.display(), resized = %result.resized, "wrote resized image");

    let timings = args.profile.then(|| {
        serde_json::json!({
            "readInput": read_done.duration_since(read_start).as_millis(),
            "resize": resize_done.duration_since(read_done).as_millis(),
            "writeOutput": write_done.duration_since(resize_done).as_millis(),
            "total": write_done.duration_since(total_start).as_millis(),
        })
    });

    Ok(serde_json::json!({
        "input": args.input,
        "output": output,
        "inputFormat": result.input_format.label(),
        "outputFormat": result.output_format.label(),
        "mimeType": result.output_format.mime_type(),
        "maxDimension": args.max_dimension,
        "original": result.original,
        "resized": result.resized,
        "originalSize": size_json(&result.original_size),
        "resizedSize": size_json(&result.resized_size),
        "passthrough": result.passthrough,
        "downloadName": result.download_name,
        "timingsMs": timings,
    }))
}

fn run_measure_command(args: &MeasureArgs) -> Result<serde_json::Value> {
    let format = resolve_output_format(args.encode.format.as_deref(), None)?;
    let settings = resolve_resize_config(ResizeConfig {
        output_format: format.label().to_string(),
        jpeg_quality: args.encode.quality,
        png_compression: args.encode.png_compression.clone(),
        alpha_policy: args.encode.alpha.clone(),
        background: args.encode.background.clone(),
        ..ResizeConfig::default()
    })
    .into_settings()?;
    let source = std::fs::read(&args.input).with_context(|| format!("failed to read input {}", args.input.display()))?;
    let (image, input_format) = resizer_image::decode(&source, declared_format(&args.input))
        .with_context(|| format!("failed to decode {}", args.input.display()))?;
    let report = resizer_image::measure_encoded_size(&image, &settings.encode)?;
    Ok(serde_json::json!({
        "input": args.input,
        "inputFormat": input_format.label(),
        "dimensions": dimensions_of(&image),
        "uploadedSize": size_json(&SizeReport::from_byte_len(source.len())),
        "format": format.label(),
        "encodedSize": size_json(&report),
    }))
}

fn size_json(report: &SizeReport) -> serde_json::Value {
    serde_json::json!({
        "bytes": report.bytes,
        "kib": report.kib,
        "display": format!("{:.2} KB", report.kib),
    })
}

fn declared_format(path: &Path) -> Option<ImageFormatKind> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(ImageFormatKind::from_extension)
}

fn resolve_output_format(flag: Option<&str>, output: Option<&Path>) -> Result<ImageFormatKind> {
    if let Some(raw) = flag {
        return Ok(raw.parse()?);
    }
    Ok(output.and_then(declared_format).unwrap_or(ImageFormatKind::Png))
}

fn resolve_output_path(input: &Path, output: Option<&Path>, format: ImageFormatKind) -> Result<PathBuf> {
    if let Some(path) = output {
        validate_output_extension(path, format)?;
        return Ok(path.to_path_buf());
    }
    let name = input
        .file_name()
        .ok_or_else(|| anyhow!("input file must include a valid file name"))?
        .to_string_lossy();
    let filename = download_file_name(Some(&name), format);
    let out_path = match input.parent() {
        Some(parent) => parent.join(filename),
        None => PathBuf::from(filename),
    };
    Ok(out_path)
}

fn validate_output_extension(path: &Path, format: ImageFormatKind) -> Result<()> {
    if declared_format(path) != Some(format) {
        return Err(anyhow!(
            "output file extension must match the {} format (received: '{}')",
            format.label(),
            path.display()
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, ImageBuffer, ImageFormat, Rgb};

    fn write_sample_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
        let img = ImageBuffer::from_fn(width, height, |x, y| Rgb([(x % 256) as u8, (y % 256) as u8, 90]));
        let path = dir.join(name);
        DynamicImage::ImageRgb8(img)
            .save_with_format(&path, ImageFormat::Png)
            .expect("sample png");
        path
    }

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).expect("cli args")
    }

    #[test]
    fn default_output_sits_next_to_input() {
        let out = resolve_output_path(Path::new("photos/cat.jpeg"), None, ImageFormatKind::Png).expect("path");
        assert_eq!(out, PathBuf::from("photos/cat_resized.png"));
        let out = resolve_output_path(Path::new("cat.png"), None, ImageFormatKind::Jpeg).expect("path");
        assert_eq!(out, PathBuf::from("cat_resized.jpg"));
    }

    #[test]
    fn explicit_output_must_match_format() {
        assert!(resolve_output_path(Path::new("a.png"), Some(Path::new("b.jpg")), ImageFormatKind::Png).is_err());
        assert!(resolve_output_path(Path::new("a.png"), Some(Path::new("b.JPEG")), ImageFormatKind::Jpeg).is_ok());
    }

    #[test]
    fn format_is_inferred_from_output() {
        assert_eq!(resolve_output_format(None, Some(Path::new("x.jpg"))).expect("fmt"), ImageFormatKind::Jpeg);
        assert_eq!(resolve_output_format(None, None).expect("fmt"), ImageFormatKind::Png);
        assert_eq!(resolve_output_format(Some("jpeg"), None).expect("fmt"), ImageFormatKind::Jpeg);
        assert!(resolve_output_format(Some("webp"), None).is_err());
    }

    #[test]
    fn resize_command_writes_file_and_reports() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_sample_png(dir.path(), "wide.png", 1600, 1200);
        let cli = parse(&["resizer", "resize", "-i", input.to_str().expect("utf8 path"), "-m", "800"]);

        let report = execute(cli).expect("resize");
        let output = dir.path().join("wide_resized.png");
        assert!(output.exists());
        assert_eq!(report["resized"]["width"], 800);
        assert_eq!(report["resized"]["height"], 600);
        assert_eq!(report["passthrough"], false);
        assert_eq!(report["downloadName"], "wide_resized.png");

        let written = std::fs::read(&output).expect("output");
        assert_eq!(report["resizedSize"]["bytes"], written.len() as u64);
        assert!(report["timingsMs"].is_null());
    }

    #[test]
    fn resize_command_rejects_zero_bound() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_sample_png(dir.path(), "tiny.png", 10, 10);
        let cli = parse(&["resizer", "resize", "-i", input.to_str().expect("utf8 path"), "-m", "0"]);

        let err = execute(cli).expect_err("zero bound");
        assert!(err.to_string().contains("positive"));
        assert!(!dir.path().join("tiny_resized.png").exists());
    }

    #[test]
    fn resize_command_writes_jpeg_when_output_says_so() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_sample_png(dir.path(), "small.png", 400, 300);
        let output = dir.path().join("out").join("small.jpg");
        let cli = parse(&[
            "resizer",
            "resize",
            "-i",
            input.to_str().expect("utf8 path"),
            "-o",
            output.to_str().expect("utf8 path"),
            "--profile",
        ]);

        let report = execute(cli).expect("resize");
        assert_eq!(report["outputFormat"], "jpeg");
        assert_eq!(report["passthrough"], true);
        assert_eq!(report["resized"]["width"], 400);
        assert!(report["timingsMs"]["total"].is_u64());
        let decoded = image::open(&output).expect("jpeg output");
        assert_eq!((decoded.width(), decoded.height()), (400, 300));
    }

    #[test]
    fn measure_command_reports_encoded_size() {
        let dir = tempfile::tempdir().expect("tempdir");
        let input = write_sample_png(dir.path(), "m.png", 64, 32);
        let cli = parse(&["resizer", "measure", "-i", input.to_str().expect("utf8 path"), "-f", "jpeg", "-q", "60"]);

        let report = execute(cli).expect("measure");
        assert_eq!(report["dimensions"]["width"], 64);
        assert_eq!(report["format"], "jpeg");
        let bytes = report["encodedSize"]["bytes"].as_u64().expect("bytes");
        assert_eq!(report["encodedSize"]["kib"].as_f64().expect("kib"), bytes as f64 / 1024.0);
    }

    #[test]
    fn choices_lists_bounds() {
        let report = execute(parse(&["resizer", "choices"])).expect("choices");
        assert_eq!(report["default"], 800);
        assert_eq!(report["choices"].as_array().expect("array").len(), MAX_DIMENSION_CHOICES.len());
    }
}
