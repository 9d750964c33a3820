use image::{Rgb, RgbImage};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;

use super::outpaint::CanvasLayout;
use super::raster::Rect;
use super::resize::resize_image;

/// Feather used when the caller does not pick one
pub const DEFAULT_FEATHER: f32 = 16.0;

#[derive(Debug, Error)]
pub enum RecomposeError {
    #[error("failed to decode synthesized image: {0}")]
    Decode(#[from] image::ImageError),
    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to scale original into its placement: {0}")]
    Resize(String),
}

/// Opacity of the original at `(x, y)` for a placement
///
/// Fully opaque up to `radius - feather` from the placement center and fully
/// transparent from `radius` on, where `radius` is half the shorter side.
pub fn radial_alpha(placement: Rect, feather: f32, x: u32, y: u32) -> f32 {
    let (cx, cy) = placement.center();
    let radius = placement.width.min(placement.height) as f32 / 2.0;
    let inner = (radius - feather.max(0.0)).max(0.0);

    let dx = x as f32 - cx as f32;
    let dy = y as f32 - cy as f32;
    let distance = (dx * dx + dy * dy).sqrt();

    if distance <= inner {
        1.0
    } else if distance >= radius {
        0.0
    } else {
        (radius - distance) / (radius - inner)
    }
}

/// Composite `original` over `synthesized` at `placement` with a radial falloff
///
/// The output keeps the synthesized size; pixels outside the placement are
/// left untouched.
pub fn recompose(
    synthesized: &RgbImage,
    original: &RgbImage,
    placement: Rect,
    feather: f32,
) -> Result<RgbImage, RecomposeError> {
    let mut output = synthesized.clone();
    let placement = placement.clamp_to(synthesized.width(), synthesized.height());
    if placement.is_empty() {
        return Ok(output);
    }

    let scaled = resize_image(original, placement.width, placement.height)
        .map_err(|e| RecomposeError::Resize(e.to_string()))?;

    for (px, py, src) in scaled.enumerate_pixels() {
        let (x, y) = (placement.x + px, placement.y + py);
        let alpha = radial_alpha(placement, feather, x, y);
        if alpha <= 0.0 {
            continue;
        }
        let dst = output.get_pixel_mut(x, y);
        if alpha >= 1.0 {
            *dst = *src;
        } else {
            *dst = Rgb([0, 1, 2].map(|c| {
                (dst[c] as f32 * (1.0 - alpha) + src[c] as f32 * alpha).round() as u8
            }));
        }
    }

    Ok(output)
}

/// Like [`recompose`], taking the placement from a canvas layout
///
/// Synthesis services may return a different size than the canvas they were
/// given; the placement is rescaled to match.
pub fn recompose_with_layout(
    synthesized: &RgbImage,
    original: &RgbImage,
    layout: &CanvasLayout,
    feather: f32,
) -> Result<RgbImage, RecomposeError> {
    let (width, height) = synthesized.dimensions();
    let mut placement = layout.placement();

    if (width, height) != (layout.final_width, layout.final_height) && layout.final_width > 0 && layout.final_height > 0 {
        let sx = width as f64 / layout.final_width as f64;
        let sy = height as f64 / layout.final_height as f64;
        placement = placement.scaled(sx, sy).clamp_to(width, height);
        debug!(?placement, width, height, "rescaled placement to synthesized size");
    }

    recompose(synthesized, original, placement, feather)
}

pub fn decode_synthesized(bytes: &[u8]) -> Result<RgbImage, RecomposeError> {
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

pub fn load_synthesized(path: &Path) -> Result<RgbImage, RecomposeError> {
    let bytes = std::fs::read(path).map_err(|source| RecomposeError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    decode_synthesized(&bytes)
}
