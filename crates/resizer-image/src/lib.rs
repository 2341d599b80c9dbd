use std::borrow::Cow;
use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::{self, FilterType};
use image::{
    ColorType, DynamicImage, ExtendedColorType, ImageBuffer, ImageEncoder, ImageFormat, Pixel, Primitive, Rgb,
    Rgba32FImage, RgbImage, RgbaImage,
};
use resizer_core::{
    fit_within, AlphaPolicy, CoreError, EncodeOptions, ImageBackend, ImageDimensions, ImageFormatKind, MaxDimension,
    PngCompression, ResampleFilter, SizeReport,
};

pub type RasterImage = DynamicImage;

pub fn dimensions_of(image: &RasterImage) -> ImageDimensions {
    ImageDimensions::new(image.width(), image.height())
}

pub fn estimate_rgba_bytes(size: ImageDimensions) -> u64 {
    (size.width as u64)
        .saturating_mul(size.height as u64)
        .saturating_mul(4)
}

/// Decodes PNG or JPEG bytes. The format is sniffed from the content; a
/// conflicting `declared` format is logged and otherwise ignored.
pub fn decode(bytes: &[u8], declared: Option<ImageFormatKind>) -> Result<(RasterImage, ImageFormatKind), CoreError> {
    if bytes.is_empty() {
        return Err(CoreError::Decode("image bytes are empty".to_string()));
    }
    let sniffed = image::guess_format(bytes).map_err(|e| CoreError::Decode(e.to_string()))?;
    let kind = match sniffed {
        ImageFormat::Png => ImageFormatKind::Png,
        ImageFormat::Jpeg => ImageFormatKind::Jpeg,
        other => {
            return Err(CoreError::Decode(format!(
                "unsupported image format {:?}; expected png or jpeg",
                other
            )))
        }
    };
    if let Some(declared) = declared {
        if declared != kind {
            tracing::warn!(
                declared = declared.label(),
                sniffed = kind.label(),
                "declared image format does not match content"
            );
        }
    }
    let image = image::load_from_memory_with_format(bytes, sniffed).map_err(|e| CoreError::Decode(e.to_string()))?;
    let dims = dimensions_of(&image);
    if dims.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "decoded image has no pixels ({})",
            dims
        )));
    }
    tracing::debug!(
        format = kind.label(),
        dimensions = %dims,
        estimated_rgba_bytes = estimate_rgba_bytes(dims),
        "decoded image"
    );
    Ok((image, kind))
}

/// Proportionally shrinks `image` so that neither side exceeds
/// `max_dimension`, using a Catmull-Rom (bicubic) filter.
///
/// Images already within the bound come back as an unresampled copy.
pub fn resize(image: &RasterImage, max_dimension: u32) -> Result<RasterImage, CoreError> {
    resize_with_filter(image, MaxDimension::new(max_dimension)?, ResampleFilter::CatmullRom)
}

pub fn resize_with_filter(
    image: &RasterImage,
    max_dimension: MaxDimension,
    filter: ResampleFilter,
) -> Result<RasterImage, CoreError> {
    let original = dimensions_of(image);
    let target = fit_within(original, max_dimension)?;
    if target == original {
        return Ok(image.clone());
    }
    if image.color().has_alpha() {
        return Ok(resample(image.clone(), target, filter_type(filter)));
    }
    Ok(image.resize_exact(target.width, target.height, filter_type(filter)))
}

/// Resamples to `target`. Images with alpha are filtered premultiplied so
/// fully transparent pixels do not bleed their colour into visible edges.
fn resample(image: RasterImage, target: ImageDimensions, filter: FilterType) -> RasterImage {
    match image {
        DynamicImage::ImageLumaA8(buffer) => DynamicImage::ImageLumaA8(resample_premultiplied(buffer, target, filter)),
        DynamicImage::ImageRgba8(buffer) => DynamicImage::ImageRgba8(resample_premultiplied(buffer, target, filter)),
        DynamicImage::ImageLumaA16(buffer) => {
            DynamicImage::ImageLumaA16(resample_premultiplied(buffer, target, filter))
        }
        DynamicImage::ImageRgba16(buffer) => DynamicImage::ImageRgba16(resample_premultiplied(buffer, target, filter)),
        DynamicImage::ImageRgba32F(buffer) => DynamicImage::ImageRgba32F(resample_premultiplied_f32(buffer, target, filter)),
        opaque => opaque.resize_exact(target.width, target.height, filter),
    }
}

/// Alpha is the last channel of `P`.
fn resample_premultiplied<P>(
    mut buffer: ImageBuffer<P, Vec<P::Subpixel>>,
    target: ImageDimensions,
    filter: FilterType,
) -> ImageBuffer<P, Vec<P::Subpixel>>
where
    P: Pixel + 'static,
    P::Subpixel: Into<u64> + TryFrom<u64> + 'static,
{
    let max: u64 = P::Subpixel::DEFAULT_MAX_VALUE.into();
    let channels = usize::from(P::CHANNEL_COUNT);
    let narrow = |value: u64| {
        <P::Subpixel as TryFrom<u64>>::try_from(value.min(max)).unwrap_or(P::Subpixel::DEFAULT_MAX_VALUE)
    };

    for px in buffer.chunks_exact_mut(channels) {
        if let Some((alpha, color)) = px.split_last_mut() {
            let alpha: u64 = (*alpha).into();
            for c in color {
                let value: u64 = (*c).into();
                *c = narrow((value * alpha + max / 2) / max);
            }
        }
    }
    let mut resized = imageops::resize(&buffer, target.width, target.height, filter);
    drop(buffer);
    for px in resized.chunks_exact_mut(channels) {
        if let Some((alpha, color)) = px.split_last_mut() {
            let alpha: u64 = (*alpha).into();
            for c in color {
                let value: u64 = (*c).into();
                *c = if alpha == 0 { narrow(0) } else { narrow((value * max + alpha / 2) / alpha) };
            }
        }
    }
    resized
}

fn resample_premultiplied_f32(mut buffer: Rgba32FImage, target: ImageDimensions, filter: FilterType) -> Rgba32FImage {
    for px in buffer.pixels_mut() {
        let alpha = px[3];
        px.0[..3].iter_mut().for_each(|c| *c *= alpha);
    }
    let mut resized = imageops::resize(&buffer, target.width, target.height, filter);
    drop(buffer);
    for px in resized.pixels_mut() {
        let alpha = px[3];
        px.0[..3]
            .iter_mut()
            .for_each(|c| *c = if alpha > 0.0 { (*c / alpha).min(1.0) } else { 0.0 });
    }
    resized
}

pub fn encode(image: &RasterImage, options: &EncodeOptions) -> Result<Vec<u8>, CoreError> {
    options.validate()?;
    let dims = dimensions_of(image);
    if dims.is_empty() {
        return Err(CoreError::InvalidInput(format!(
            "cannot encode an image without pixels ({})",
            dims
        )));
    }
    let mut buffer = Vec::new();
    match options.format {
        ImageFormatKind::Png => {
            let encoder = PngEncoder::new_with_quality(
                Cursor::new(&mut buffer),
                png_compression(options.png_compression),
                PngFilter::Adaptive,
            );
            write_png(image, encoder)?;
        }
        ImageFormatKind::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(Cursor::new(&mut buffer), options.jpeg_quality);
            let written = match image {
                DynamicImage::ImageLuma8(gray) => {
                    encoder.write_image(gray.as_raw(), dims.width, dims.height, ExtendedColorType::L8)
                }
                other => {
                    let rgb = opaque_rgb(other, options.alpha_policy, options.background)?;
                    encoder.write_image(rgb.as_raw(), rgb.width(), rgb.height(), ExtendedColorType::Rgb8)
                }
            };
            written.map_err(|e| CoreError::Encode(format!("jpeg: {}", e)))?;
        }
    }
    Ok(buffer)
}

/// Encodes into a scratch buffer and reports its length. The buffer does not
/// outlive the call.
pub fn measure_encoded_size(image: &RasterImage, options: &EncodeOptions) -> Result<SizeReport, CoreError> {
    let encoded = encode(image, options)?;
    Ok(SizeReport::from_byte_len(encoded.len()))
}

pub fn has_translucency(image: &RasterImage) -> bool {
    match image {
        DynamicImage::ImageLumaA8(buffer) => buffer.pixels().any(|px| px[1] < u8::MAX),
        DynamicImage::ImageRgba8(buffer) => buffer.pixels().any(|px| px[3] < u8::MAX),
        DynamicImage::ImageLumaA16(buffer) => buffer.pixels().any(|px| px[1] < u16::MAX),
        DynamicImage::ImageRgba16(buffer) => buffer.pixels().any(|px| px[3] < u16::MAX),
        DynamicImage::ImageRgba32F(buffer) => buffer.pixels().any(|px| px[3] < 1.0),
        other => other.color().has_alpha() && other.to_rgba16().pixels().any(|px| px[3] < u16::MAX),
    }
}

/// Composites every pixel over `background`, dropping the alpha channel.
pub fn flatten_alpha(image: &RasterImage, background: [u8; 3]) -> RgbImage {
    let rgba: Cow<'_, RgbaImage> = match image {
        DynamicImage::ImageRgba8(buffer) => Cow::Borrowed(buffer),
        other => Cow::Owned(other.to_rgba8()),
    };
    RgbImage::from_fn(rgba.width(), rgba.height(), |x, y| {
        let px = rgba.get_pixel(x, y);
        let alpha = px[3];
        Rgb([
            blend(px[0], background[0], alpha),
            blend(px[1], background[1], alpha),
            blend(px[2], background[2], alpha),
        ])
    })
}

fn blend(channel: u8, background: u8, alpha: u8) -> u8 {
    let alpha = alpha as u16;
    ((channel as u16 * alpha + background as u16 * (255 - alpha) + 127) / 255) as u8
}

fn opaque_rgb(image: &RasterImage, policy: AlphaPolicy, background: [u8; 3]) -> Result<Cow<'_, RgbImage>, CoreError> {
    if let DynamicImage::ImageRgb8(rgb) = image {
        return Ok(Cow::Borrowed(rgb));
    }
    if !has_translucency(image) {
        return Ok(Cow::Owned(image.to_rgb8()));
    }
    match policy {
        AlphaPolicy::Flatten => Ok(Cow::Owned(flatten_alpha(image, background))),
        AlphaPolicy::Reject => Err(CoreError::Encode(
            "jpeg cannot represent transparent pixels; use png output or the flatten alpha policy".to_string(),
        )),
    }
}

/// Writes the decoded sample layout as-is. Float images are widened to 16 bits.
fn write_png<W: std::io::Write>(image: &RasterImage, encoder: PngEncoder<W>) -> Result<(), CoreError> {
    let (width, height) = (image.width(), image.height());
    let result = match image.color() {
        color @ (ColorType::L8
        | ColorType::La8
        | ColorType::Rgb8
        | ColorType::Rgba8
        | ColorType::L16
        | ColorType::La16
        | ColorType::Rgb16
        | ColorType::Rgba16) => encoder.write_image(image.as_bytes(), width, height, color.into()),
        color => {
            let widened = if color.has_alpha() {
                DynamicImage::ImageRgba16(image.to_rgba16())
            } else {
                DynamicImage::ImageRgb16(image.to_rgb16())
            };
            encoder.write_image(widened.as_bytes(), width, height, widened.color().into())
        }
    };
    result.map_err(|e| CoreError::Encode(format!("png: {}", e)))
}

fn filter_type(filter: ResampleFilter) -> FilterType {
    match filter {
        ResampleFilter::Triangle => FilterType::Triangle,
        ResampleFilter::CatmullRom => FilterType::CatmullRom,
        ResampleFilter::Lanczos3 => FilterType::Lanczos3,
    }
}

fn png_compression(level: PngCompression) -> CompressionType {
    match level {
        PngCompression::Fast => CompressionType::Fast,
        PngCompression::Default => CompressionType::Default,
        PngCompression::Best => CompressionType::Best,
    }
}

/// [`ImageBackend`] over `image::DynamicImage`.
#[derive(Debug, Clone, Copy, Default)]
pub struct RasterBackend;

impl ImageBackend for RasterBackend {
    type Image = RasterImage;

    fn decode(
        &self,
        bytes: &[u8],
        declared: Option<ImageFormatKind>,
    ) -> Result<(Self::Image, ImageFormatKind), CoreError> {
        decode(bytes, declared)
    }

    fn dimensions(&self, image: &Self::Image) -> ImageDimensions {
        dimensions_of(image)
    }

    fn resize(
        &self,
        image: Self::Image,
        target: ImageDimensions,
        filter: ResampleFilter,
    ) -> Result<Self::Image, CoreError> {
        let original = dimensions_of(&image);
        if target.is_empty() || target.width > original.width || target.height > original.height {
            return Err(CoreError::InvalidInput(format!(
                "cannot resize {} to {}",
                original, target
            )));
        }
        if target == original {
            return Ok(image);
        }
        Ok(resample(image, target, filter_type(filter)))
    }

    fn encode(&self, image: &Self::Image, options: &EncodeOptions) -> Result<Vec<u8>, CoreError> {
        encode(image, options)
    }
}
