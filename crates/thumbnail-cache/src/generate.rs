//! Thumbnail generation from a decoded picture
//!
//! Resizes a decoded image to fit the configured bounding box and encodes it
//! as JPEG at the configured quality, plus the dominant color swatch used as a
//! placeholder background while the real picture loads.

use anyhow::{Context, Result};
use image::codecs::jpeg::JpegEncoder;
use image::{DynamicImage, GenericImageView};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;

/// Thumbnail size and encoding settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ThumbnailSettings {
    /// Long edge in pixels
    pub size: u32,
    /// JPEG quality, 1-100
    pub quality: u8,
}

impl Default for ThumbnailSettings {
    fn default() -> Self {
        Self {
            size: 256,
            quality: 80,
        }
    }
}

/// RGB color swatch extracted from the picture center
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColorSwatch {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl ColorSwatch {
    pub fn to_hex(&self) -> String {
        format!("#{:02x}{:02x}{:02x}", self.r, self.g, self.b)
    }

    /// Calculate perceived brightness using standard luminance weights
    pub fn brightness(&self) -> u8 {
        let luminance = 0.299 * self.r as f64 + 0.587 * self.g as f64 + 0.114 * self.b as f64;
        luminance.round() as u8
    }
}

/// Encode a thumbnail for an already decoded picture
pub fn encode_thumbnail(img: &DynamicImage, settings: &ThumbnailSettings) -> Result<Vec<u8>> {
    let resized = resize_image(img, settings.size);
    encode_jpeg(&resized, settings.quality)
}

/// Resize image to fit within `max_dim` while preserving aspect ratio
fn resize_image(img: &DynamicImage, max_dim: u32) -> Cow<'_, DynamicImage> {
    let (width, height) = img.dimensions();
    let max_existing = width.max(height);

    // If image is already smaller than target, don't upscale
    if max_dim == 0 || max_existing <= max_dim {
        return Cow::Borrowed(img);
    }

    let ratio = max_dim as f64 / max_existing as f64;
    let new_width = ((width as f64 * ratio).round() as u32).max(1);
    let new_height = ((height as f64 * ratio).round() as u32).max(1);

    Cow::Owned(img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3))
}

/// Encode image as JPEG with specified quality
fn encode_jpeg(img: &DynamicImage, quality: u8) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));

    // JPEG has no alpha channel
    DynamicImage::ImageRgb8(img.to_rgb8())
        .write_with_encoder(encoder)
        .context("Failed to encode JPEG")?;

    Ok(buffer)
}

/// Average color of the central quarter of `img`; gray for an empty image
pub fn extract_color_swatch(img: &DynamicImage) -> ColorSwatch {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return ColorSwatch { r: 128, g: 128, b: 128 };
    }

    let region_width = (width / 4).max(1);
    let region_height = (height / 4).max(1);
    let left = (width / 2).saturating_sub(region_width / 2);
    let top = (height / 2).saturating_sub(region_height / 2);
    let region = img.crop_imm(left, top, region_width, region_height).to_rgb8();

    let count = u64::from(region.width()) * u64::from(region.height());
    let sums = region.pixels().fold([0u64; 3], |mut sums, pixel| {
        for (sum, channel) in sums.iter_mut().zip(pixel.0) {
            *sum += u64::from(channel);
        }
        sums
    });
    let [r, g, b] = sums.map(|sum| (sum / count.max(1)) as u8);
    ColorSwatch { r, g, b }
}
