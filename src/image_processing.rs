use image::codecs::jpeg::JpegEncoder;
use image::imageops::{self, FilterType};
use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage};

use crate::error::NormalizeError;

pub const JPEG_QUALITY: u8 = 95;
pub const OUTPUT_MIME_TYPE: &str = "image/jpeg";
const WHITE: [u8; 3] = [255, 255, 255];

/// Target canvas for one placement: exact output size plus padding colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Canvas {
    pub width: i64,
    pub height: i64,
    pub background: [u8; 3],
}

impl Canvas {
    pub fn new(width: i64, height: i64) -> Self {
        Self {
            width,
            height,
            background: WHITE,
        }
    }

    pub fn with_background(mut self, background: [u8; 3]) -> Self {
        self.background = background;
        self
    }

    fn dimensions(&self) -> Result<(u32, u32), NormalizeError> {
        let invalid = || NormalizeError::InvalidDimensions {
            width: self.width,
            height: self.height,
        };
        if self.width <= 0 || self.height <= 0 {
            return Err(invalid());
        }
        let width = u32::try_from(self.width).map_err(|_| invalid())?;
        let height = u32::try_from(self.height).map_err(|_| invalid())?;
        Ok((width, height))
    }
}

/// JPEG bytes whose decoded size is exactly the canvas it was built for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NormalizedImage {
    pub bytes: Vec<u8>,
    pub width: u32,
    pub height: u32,
}

impl NormalizedImage {
    pub fn mime_type(&self) -> &'static str {
        OUTPUT_MIME_TYPE
    }
}

/// Size of the image pasted inside the canvas.
///
/// The wider side of the source (relative to the target ratio) fills the
/// canvas; the other side keeps the source ratio, rounded to the nearest pixel.
pub fn fit_within(source: (u32, u32), target: (u32, u32)) -> (u32, u32) {
    let (src_w, src_h) = source;
    let (tgt_w, tgt_h) = target;

    let source_ratio = src_w as f64 / src_h as f64;
    let target_ratio = tgt_w as f64 / tgt_h as f64;

    if source_ratio > target_ratio {
        let h = (tgt_w as f64 / source_ratio).round() as u32;
        (tgt_w, h.clamp(1, tgt_h))
    } else {
        let w = (tgt_h as f64 * source_ratio).round() as u32;
        (w.clamp(1, tgt_w), tgt_h)
    }
}

/// Top-left corner of a centered paste.
pub fn centered_offset(inner: (u32, u32), outer: (u32, u32)) -> (u32, u32) {
    (
        outer.0.saturating_sub(inner.0) / 2,
        outer.1.saturating_sub(inner.1) / 2,
    )
}

/// Letterbox `bytes` onto `canvas` and encode as JPEG.
pub fn normalize(bytes: &[u8], canvas: Canvas) -> Result<NormalizedImage, NormalizeError> {
    let (target_w, target_h) = canvas.dimensions()?;
    let decoded = decode(bytes)?;
    let source = flatten_onto(&decoded, canvas.background);

    let (scaled_w, scaled_h) = fit_within(source.dimensions(), (target_w, target_h));
    let scaled = if (scaled_w, scaled_h) == source.dimensions() {
        source
    } else {
        imageops::resize(&source, scaled_w, scaled_h, FilterType::Lanczos3)
    };

    let mut output = RgbImage::from_pixel(target_w, target_h, Rgb(canvas.background));
    let (x, y) = centered_offset((scaled_w, scaled_h), (target_w, target_h));
    imageops::replace(&mut output, &scaled, x as i64, y as i64);

    let bytes = encode_jpeg(&output)?;
    Ok(NormalizedImage {
        bytes,
        width: target_w,
        height: target_h,
    })
}

fn decode(bytes: &[u8]) -> Result<DynamicImage, NormalizeError> {
    let mime_type = detect_mime_type(bytes)
        .ok_or_else(|| NormalizeError::Decode("unrecognised image container".to_string()))?;
    let format = mime_to_format(mime_type)
        .ok_or_else(|| NormalizeError::Decode(format!("unsupported mime type: {mime_type}")))?;
    image::load_from_memory_with_format(bytes, format)
        .map_err(|err| NormalizeError::Decode(err.to_string()))
}

/// Converts to RGB, alpha-compositing onto `background`.
fn flatten_onto(image: &DynamicImage, background: [u8; 3]) -> RgbImage {
    if !image.color().has_alpha() {
        return image.to_rgb8();
    }
    let rgba = image.to_rgba8();
    let (width, height) = rgba.dimensions();
    let mut output = RgbImage::new(width, height);
    for (x, y, pixel) in rgba.enumerate_pixels() {
        let alpha = pixel[3] as u32;
        let blend = |channel: usize| -> u8 {
            let fg = pixel[channel] as u32 * alpha;
            let bg = background[channel] as u32 * (255 - alpha);
            ((fg + bg + 127) / 255) as u8
        };
        output.put_pixel(x, y, Rgb([blend(0), blend(1), blend(2)]));
    }
    output
}

fn encode_jpeg(image: &RgbImage) -> Result<Vec<u8>, NormalizeError> {
    let mut output = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut output, JPEG_QUALITY);
    image
        .write_with_encoder(encoder)
        .map_err(|err| NormalizeError::Encode(err.to_string()))?;
    Ok(output)
}

pub fn get_dimensions(bytes: &[u8]) -> Result<(u32, u32), NormalizeError> {
    Ok(decode(bytes)?.dimensions())
}

pub fn detect_mime_type(bytes: &[u8]) -> Option<&'static str> {
    if bytes.starts_with(&[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]) {
        return Some("image/png");
    }
    if bytes.starts_with(&[0xFF, 0xD8, 0xFF]) {
        return Some("image/jpeg");
    }
    if bytes.starts_with(b"GIF87a") || bytes.starts_with(b"GIF89a") {
        return Some("image/gif");
    }
    if bytes.len() >= 12 && &bytes[0..4] == b"RIFF" && &bytes[8..12] == b"WEBP" {
        return Some("image/webp");
    }
    if bytes.starts_with(b"BM") {
        return Some("image/bmp");
    }
    None
}

pub fn mime_to_format(mime_type: &str) -> Option<ImageFormat> {
    match mime_type {
        "image/png" => Some(ImageFormat::Png),
        "image/jpeg" | "image/jpg" => Some(ImageFormat::Jpeg),
        "image/gif" => Some(ImageFormat::Gif),
        "image/webp" => Some(ImageFormat::WebP),
        "image/bmp" => Some(ImageFormat::Bmp),
        _ => None,
    }
}

pub fn extension_for_mime_type(mime_type: &str) -> &'static str {
    match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/png" => "png",
        "image/webp" => "webp",
        "image/gif" => "gif",
        "image/bmp" => "bmp",
        _ => "bin",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};
    use std::io::Cursor;

    fn png_bytes(image: DynamicImage) -> Vec<u8> {
        let mut output = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut output), ImageFormat::Png)
            .unwrap();
        output
    }

    fn solid_png(width: u32, height: u32, color: [u8; 3]) -> Vec<u8> {
        png_bytes(DynamicImage::ImageRgb8(RgbImage::from_pixel(
            width,
            height,
            Rgb(color),
        )))
    }

    fn decode_rgb(bytes: &[u8]) -> RgbImage {
        image::load_from_memory(bytes).unwrap().to_rgb8()
    }

    fn close_to(pixel: &Rgb<u8>, expected: [u8; 3]) -> bool {
        pixel
            .0
            .iter()
            .zip(expected.iter())
            .all(|(a, b)| (*a as i16 - *b as i16).abs() <= 12)
    }

    // =========================================================================
    // fit_within
    // =========================================================================

    #[test]
    fn fit_landscape_into_square() {
        // 1600x900 → width fills, height = round(1080 / 1.777) = 608
        assert_eq!(fit_within((1600, 900), (1080, 1080)), (1080, 608));
    }

    #[test]
    fn fit_square_into_story() {
        // 1:1 is wider than 9:16, so width fills
        assert_eq!(fit_within((1024, 1024), (1080, 1920)), (1080, 1080));
    }

    #[test]
    fn fit_portrait_into_square() {
        assert_eq!(fit_within((900, 1600), (1080, 1080)), (608, 1080));
    }

    #[test]
    fn fit_same_ratio_fills_canvas() {
        assert_eq!(fit_within((540, 960), (1080, 1920)), (1080, 1920));
    }

    #[test]
    fn fit_extreme_strip_keeps_one_pixel() {
        assert_eq!(fit_within((10_000, 1), (100, 100)), (100, 1));
    }

    #[test]
    fn fit_preserves_aspect_ratio_within_rounding() {
        let sources = [(1600, 900), (900, 1600), (1024, 1792), (1792, 1024), (333, 777)];
        let targets = [(1080, 1080), (1080, 1920), (1080, 1350)];
        for &source in &sources {
            for &target in &targets {
                let (w, h) = fit_within(source, target);
                let ratio = source.0 as f64 / source.1 as f64;
                // one side fills the canvas, the other is within rounding of the ratio
                let deviation = if w == target.0 {
                    (h as f64 - w as f64 / ratio).abs()
                } else {
                    assert_eq!(h, target.1);
                    (w as f64 - h as f64 * ratio).abs()
                };
                assert!(
                    deviation <= 0.5 + 1e-9,
                    "source {source:?} target {target:?} got {w}x{h}"
                );
            }
        }
    }

    #[test]
    fn centered_offset_splits_remainder() {
        assert_eq!(centered_offset((1080, 608), (1080, 1080)), (0, 236));
        assert_eq!(centered_offset((607, 1080), (1080, 1080)), (236, 0));
    }

    // =========================================================================
    // normalize
    // =========================================================================

    #[test]
    fn normalize_rejects_non_positive_dimensions() {
        let input = solid_png(10, 10, [0, 0, 0]);
        for (w, h) in [(0, 10), (10, 0), (-5, 10)] {
            let err = normalize(&input, Canvas::new(w, h)).unwrap_err();
            assert!(matches!(err, NormalizeError::InvalidDimensions { .. }));
        }
    }

    #[test]
    fn normalize_rejects_unknown_container() {
        let err = normalize(b"definitely not an image", Canvas::new(100, 100)).unwrap_err();
        assert!(matches!(err, NormalizeError::Decode(_)));
    }

    #[test]
    fn normalize_rejects_truncated_png() {
        let mut input = solid_png(32, 32, [10, 20, 30]);
        input.truncate(20);
        let err = normalize(&input, Canvas::new(100, 100)).unwrap_err();
        assert!(matches!(err, NormalizeError::Decode(_)));
    }

    #[test]
    fn normalize_output_always_matches_canvas() {
        let input = solid_png(160, 90, [200, 30, 30]);
        for (w, h) in [(1080, 1080), (1080, 1920), (1080, 1350), (1, 1), (37, 91)] {
            let normalized = normalize(&input, Canvas::new(w, h)).unwrap();
            assert_eq!((normalized.width as i64, normalized.height as i64), (w, h));
            assert_eq!(
                get_dimensions(&normalized.bytes).unwrap(),
                (w as u32, h as u32)
            );
        }
    }

    #[test]
    fn normalize_letterboxes_landscape_into_square() {
        let input = solid_png(1600, 900, [200, 20, 20]);
        let normalized = normalize(&input, Canvas::new(1080, 1080)).unwrap();
        assert_eq!(detect_mime_type(&normalized.bytes), Some("image/jpeg"));

        let output = decode_rgb(&normalized.bytes);
        assert_eq!(output.dimensions(), (1080, 1080));
        // band occupies rows 236..844 across the full width
        assert!(close_to(output.get_pixel(540, 540), [200, 20, 20]));
        assert!(close_to(output.get_pixel(5, 540), [200, 20, 20]));
        assert!(close_to(output.get_pixel(1074, 540), [200, 20, 20]));
        assert!(close_to(output.get_pixel(540, 20), WHITE));
        assert!(close_to(output.get_pixel(540, 1060), WHITE));
    }

    #[test]
    fn normalize_uses_configured_background() {
        let input = solid_png(100, 100, [255, 255, 255]);
        let canvas = Canvas::new(100, 300).with_background([0, 0, 0]);
        let output = decode_rgb(&normalize(&input, canvas).unwrap().bytes);
        assert!(close_to(output.get_pixel(50, 10), [0, 0, 0]));
        assert!(close_to(output.get_pixel(50, 150), WHITE));
    }

    #[test]
    fn normalize_is_noop_for_correctly_sized_input() {
        let input = solid_png(64, 64, [40, 120, 220]);
        let output = decode_rgb(&normalize(&input, Canvas::new(64, 64)).unwrap().bytes);
        assert_eq!(output.dimensions(), (64, 64));
        for pixel in output.pixels() {
            assert!(close_to(pixel, [40, 120, 220]));
        }
    }

    #[test]
    fn normalize_composites_transparency_onto_background() {
        let transparent = RgbaImage::from_pixel(50, 50, Rgba([0, 0, 0, 0]));
        let input = png_bytes(DynamicImage::ImageRgba8(transparent));
        let canvas = Canvas::new(50, 50).with_background([0, 200, 0]);
        let output = decode_rgb(&normalize(&input, canvas).unwrap().bytes);
        assert!(close_to(output.get_pixel(25, 25), [0, 200, 0]));
    }

    #[test]
    fn normalize_is_deterministic() {
        let input = solid_png(300, 200, [90, 90, 10]);
        let first = normalize(&input, Canvas::new(120, 120)).unwrap();
        let second = normalize(&input, Canvas::new(120, 120)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn detect_mime_type_recognises_magic_bytes() {
        assert_eq!(detect_mime_type(&solid_png(1, 1, WHITE)), Some("image/png"));
        assert_eq!(detect_mime_type(&[0xFF, 0xD8, 0xFF, 0xE0]), Some("image/jpeg"));
        assert_eq!(detect_mime_type(b"GIF89a...."), Some("image/gif"));
        assert_eq!(detect_mime_type(b"hello"), None);
    }
}
