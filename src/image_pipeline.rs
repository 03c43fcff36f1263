//! Cover decoding, power-of-two sampling, and atomic PNG writes.

use std::fs;
use std::io::Cursor;
use std::path::Path;

use image::{imageops::FilterType, DynamicImage, GenericImageView, ImageFormat, ImageReader};
use zune_core::{colorspace::ColorSpace, options::DecoderOptions};
use zune_jpeg::JpegDecoder;

const MAX_SAMPLE_EXPONENT: i32 = 16;

/// Turns raw cover bytes into images.
pub trait CoverDecoder: Send + Sync {
    /// Native `(width, height)` without a full decode when the format allows it.
    fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)>;

    /// Decodes at `1 / sample_factor` of the native size on each axis.
    fn decode(&self, bytes: &[u8], sample_factor: u32) -> Option<DynamicImage>;
}

/// Default decoder backed by `image`, with a lenient JPEG fallback.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImageCrateDecoder;

impl CoverDecoder for ImageCrateDecoder {
    fn dimensions(&self, bytes: &[u8]) -> Option<(u32, u32)> {
        let dimensions = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok())
            .or_else(|| decode_image_from_memory_with_fallback(bytes).map(|image| image.dimensions()))?;
        (dimensions.0 > 0 && dimensions.1 > 0).then_some(dimensions)
    }

    fn decode(&self, bytes: &[u8], sample_factor: u32) -> Option<DynamicImage> {
        let decoded = decode_image_from_memory_with_fallback(bytes)?;
        let (width, height) = decoded.dimensions();
        if width == 0 || height == 0 {
            return None;
        }
        let factor = sample_factor.max(1);
        if factor == 1 {
            return Some(decoded);
        }
        let (target_width, target_height) = sampled_dimensions(width, height, factor);
        Some(decoded.resize_exact(target_width, target_height, FilterType::Triangle))
    }
}

/// Dimensions produced by decoding at `factor`, never below one pixel.
pub fn sampled_dimensions(width: u32, height: u32, factor: u32) -> (u32, u32) {
    let factor = factor.max(1);
    (
        width.div_ceil(factor).max(1),
        height.div_ceil(factor).max(1),
    )
}

/// Smallest power-of-two factor that fits both axes within `max_size`.
///
/// Used for covers read back from local storage, where the result must honor
/// the bound exactly.
pub fn fit_sample_factor(width: u32, height: u32, max_size: u32) -> u32 {
    let max_size = max_size.max(1);
    let longest = width.max(height);
    if longest <= max_size {
        return 1;
    }
    let ratio = longest.div_ceil(max_size);
    ratio.checked_next_power_of_two().unwrap_or(1 << MAX_SAMPLE_EXPONENT)
}

/// Power of two nearest to `longest_edge / max_size`.
///
/// Used for the display copy of network covers; rounding may leave the copy
/// slightly above the bound, and a factor of 1 means no second decode.
pub fn nearest_sample_factor(width: u32, height: u32, max_size: u32) -> u32 {
    let longest = width.max(height);
    if longest == 0 || max_size == 0 || longest <= max_size {
        return 1;
    }
    let exponent = (f64::from(longest) / f64::from(max_size)).log2().round() as i32;
    if exponent <= 0 {
        1
    } else {
        1u32 << exponent.min(MAX_SAMPLE_EXPONENT)
    }
}

pub fn ensure_parent_dir(path: &Path) -> Result<(), String> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if !parent.exists() {
        fs::create_dir_all(parent)
            .map_err(|err| format!("failed to create {}: {err}", parent.display()))?;
    }
    Ok(())
}

/// Writes a PNG next to `target_path` and renames it into place.
pub fn save_png_atomic(image: &DynamicImage, target_path: &Path) -> Result<(), String> {
    ensure_parent_dir(target_path)?;
    let temp_path = target_path.with_extension("png.tmp");
    if temp_path.exists() {
        let _ = fs::remove_file(&temp_path);
    }
    image
        .save_with_format(&temp_path, ImageFormat::Png)
        .map_err(|err| format!("failed to encode {}: {err}", temp_path.display()))?;
    fs::rename(&temp_path, target_path).map_err(|err| {
        let _ = fs::remove_file(&temp_path);
        format!("failed to move cover into {}: {err}", target_path.display())
    })
}

fn looks_like_jpeg(bytes: &[u8]) -> bool {
    bytes.len() >= 2 && bytes[0] == 0xff && bytes[1] == 0xd8
}

fn decode_jpeg_non_strict(bytes: &[u8]) -> Option<DynamicImage> {
    if !looks_like_jpeg(bytes) {
        return None;
    }

    let options = DecoderOptions::new_cmd()
        .set_strict_mode(false)
        .jpeg_set_out_colorspace(ColorSpace::RGBA);
    let mut decoder = JpegDecoder::new_with_options(bytes, options);
    let pixels = decoder.decode().ok()?;
    let (width, height) = decoder.dimensions()?;
    let image = image::RgbaImage::from_raw(width as u32, height as u32, pixels)?;
    Some(DynamicImage::ImageRgba8(image))
}

pub fn decode_image_from_memory_with_fallback(bytes: &[u8]) -> Option<DynamicImage> {
    // Cover servers occasionally append junk after the JPEG EOI marker.
    image::load_from_memory(bytes)
        .ok()
        .or_else(|| decode_jpeg_non_strict(bytes))
}
