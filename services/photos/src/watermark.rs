//! Watermark rendering.
//!
//! Two lines of text are blended, centred and semi-transparent, over the
//! decoded image, which is then re-encoded at its original pixel size.

use crate::error::PhotoError;
use bytes::Bytes;
use font8x8::{UnicodeFonts, BASIC_FONTS};
use image::{DynamicImage, ImageFormat, Rgba, RgbaImage};
use resvg::{tiny_skia, usvg};
use std::io::Cursor;

/// Extensions accepted for processing
pub const SUPPORTED_EXTENSIONS: [&str; 8] =
    ["jpeg", "jpg", "png", "gif", "bmp", "webp", "tiff", "svg"];

const GLYPH_SIZE: u32 = 8;
const TEXT_OPACITY: f32 = 0.5;
const TEXT_COLOR: [u8; 3] = [255, 255, 255];
const SHADOW_COLOR: [u8; 3] = [0, 0, 0];

/// How a supported extension is decoded and re-encoded
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceFormat {
    Raster(ImageFormat),
    /// Rasterised, then encoded as PNG
    Svg,
}

impl SourceFormat {
    /// Resolve the format from an object key's extension
    pub fn from_key(key: &str) -> Result<Self, PhotoError> {
        let extension = key
            .rsplit_once('.')
            .map(|(_, ext)| ext.to_ascii_lowercase())
            .filter(|ext| !ext.contains('/'))
            .ok_or_else(|| PhotoError::Processing(format!("File has no extension: {key}")))?;

        if !SUPPORTED_EXTENSIONS.contains(&extension.as_str()) {
            return Err(PhotoError::Processing(format!(
                "Unsupported file type: .{extension}"
            )));
        }

        Ok(match extension.as_str() {
            "jpeg" | "jpg" => SourceFormat::Raster(ImageFormat::Jpeg),
            "png" => SourceFormat::Raster(ImageFormat::Png),
            "gif" => SourceFormat::Raster(ImageFormat::Gif),
            "bmp" => SourceFormat::Raster(ImageFormat::Bmp),
            "webp" => SourceFormat::Raster(ImageFormat::WebP),
            "tiff" => SourceFormat::Raster(ImageFormat::Tiff),
            _ => SourceFormat::Svg,
        })
    }

    fn output_format(&self) -> ImageFormat {
        match self {
            SourceFormat::Raster(format) => *format,
            SourceFormat::Svg => ImageFormat::Png,
        }
    }

    /// Content type of the re-encoded bytes
    pub fn content_type(&self) -> &'static str {
        self.output_format().to_mime_type()
    }
}

/// Result of watermarking one image
#[derive(Debug, Clone)]
pub struct WatermarkedImage {
    pub bytes: Bytes,
    pub content_type: &'static str,
    pub width: u32,
    pub height: u32,
}

/// Watermark text for an uploader and upload date
pub fn watermark_lines(given_name: &str, family_name: &str, date: chrono::NaiveDate) -> Vec<String> {
    vec![
        format!("Owner: {} {}", given_name, family_name),
        format!("Date of Upload: {}", date.format("%Y-%m-%d")),
    ]
}

/// Decode `data`, draw `lines` over it and re-encode it
pub fn apply_watermark(
    data: &[u8],
    format: SourceFormat,
    lines: &[String],
) -> Result<WatermarkedImage, PhotoError> {
    let mut canvas = decode(data, format)?;
    let (width, height) = canvas.dimensions();

    draw_text_block(&mut canvas, lines);

    let output_format = format.output_format();
    let image = match output_format {
        ImageFormat::Jpeg => DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(canvas).to_rgb8()),
        _ => DynamicImage::ImageRgba8(canvas),
    };

    let mut encoded = Cursor::new(Vec::new());
    image
        .write_to(&mut encoded, output_format)
        .map_err(|e| PhotoError::Processing(format!("Failed to encode image: {e}")))?;

    Ok(WatermarkedImage {
        bytes: Bytes::from(encoded.into_inner()),
        content_type: format.content_type(),
        width,
        height,
    })
}

fn decode(data: &[u8], format: SourceFormat) -> Result<RgbaImage, PhotoError> {
    match format {
        SourceFormat::Raster(format) => image::load_from_memory_with_format(data, format)
            .map(|image| image.to_rgba8())
            .map_err(|e| PhotoError::Processing(format!("Failed to decode image: {e}"))),
        SourceFormat::Svg => rasterize_svg(data),
    }
}

fn rasterize_svg(data: &[u8]) -> Result<RgbaImage, PhotoError> {
    let tree = usvg::Tree::from_data(data, &usvg::Options::default())
        .map_err(|e| PhotoError::Processing(format!("Failed to parse SVG: {e}")))?;

    let size = tree.size().to_int_size();
    let Some(mut pixmap) = tiny_skia::Pixmap::new(size.width(), size.height()) else {
        return Err(PhotoError::Processing("SVG has an empty canvas".to_string()));
    };

    resvg::render(&tree, tiny_skia::Transform::default(), &mut pixmap.as_mut());

    RgbaImage::from_raw(pixmap.width(), pixmap.height(), pixmap.data().to_vec())
        .ok_or_else(|| PhotoError::Processing("Failed to convert rasterised SVG".to_string()))
}

/// Glyph scale so the longest line spans at most ~60% of the width and the
/// block at most ~60% of the height. Never below 1.
fn glyph_scale(width: u32, height: u32, lines: &[String]) -> u32 {
    let longest = lines.iter().map(|l| l.chars().count()).max().unwrap_or(0) as u32;
    if longest == 0 {
        return 1;
    }
    let line_count = lines.len() as u32;
    let by_width = (width * 3 / 5) / (longest * GLYPH_SIZE);
    // each line is one glyph high, with half a glyph between lines
    let block_units = line_count * GLYPH_SIZE + (line_count - 1) * GLYPH_SIZE / 2;
    let by_height = (height * 3 / 5) / block_units.max(1);
    by_width.min(by_height).max(1)
}

fn draw_text_block(canvas: &mut RgbaImage, lines: &[String]) {
    let (width, height) = canvas.dimensions();
    let scale = glyph_scale(width, height, lines);
    let line_height = (GLYPH_SIZE * scale) as i64;
    let line_gap = (GLYPH_SIZE * scale / 2) as i64;
    let block_height =
        lines.len() as i64 * line_height + (lines.len() as i64 - 1).max(0) * line_gap;
    let shadow_offset = (scale / 4).max(1) as i64;

    let mut y = (height as i64 - block_height) / 2;
    for line in lines {
        let line_width = (line.chars().count() as u32 * GLYPH_SIZE * scale) as i64;
        let x = (width as i64 - line_width) / 2;

        draw_line(canvas, line, x + shadow_offset, y + shadow_offset, scale, SHADOW_COLOR);
        draw_line(canvas, line, x, y, scale, TEXT_COLOR);

        y += line_height + line_gap;
    }
}

fn draw_line(canvas: &mut RgbaImage, text: &str, x: i64, y: i64, scale: u32, color: [u8; 3]) {
    let advance = (GLYPH_SIZE * scale) as i64;
    for (index, ch) in text.chars().enumerate() {
        let glyph = BASIC_FONTS.get(ch).or_else(|| BASIC_FONTS.get('?'));
        let Some(glyph) = glyph else { continue };
        let origin_x = x + index as i64 * advance;

        for (row, bits) in glyph.iter().enumerate() {
            for col in 0..GLYPH_SIZE {
                if bits & (1u8 << col) == 0 {
                    continue;
                }
                let px = origin_x + (col * scale) as i64;
                let py = y + (row as u32 * scale) as i64;
                fill_cell(canvas, px, py, scale, color);
            }
        }
    }
}

fn fill_cell(canvas: &mut RgbaImage, x: i64, y: i64, size: u32, color: [u8; 3]) {
    let (width, height) = canvas.dimensions();
    for dy in 0..size as i64 {
        for dx in 0..size as i64 {
            let (px, py) = (x + dx, y + dy);
            if px < 0 || py < 0 || px >= width as i64 || py >= height as i64 {
                continue;
            }
            blend(canvas.get_pixel_mut(px as u32, py as u32), color);
        }
    }
}

fn blend(pixel: &mut Rgba<u8>, color: [u8; 3]) {
    for (channel, target) in pixel.0.iter_mut().take(3).zip(color) {
        let mixed = *channel as f32 * (1.0 - TEXT_OPACITY) + target as f32 * TEXT_OPACITY;
        *channel = mixed.round() as u8;
    }
    pixel.0[3] = pixel.0[3].max((TEXT_OPACITY * 255.0) as u8);
}
