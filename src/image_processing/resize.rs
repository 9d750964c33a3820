use anyhow::{Context, Result};
use fast_image_resize::{images::Image, PixelType, ResizeOptions, Resizer};
use image::{imageops, ImageBuffer, RgbImage};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use super::raster::{RasterCanvas, Rect};
use super::subject_detection::{FocalPoint, SubjectDetectionResult};

pub type CropRect = Rect;

/// Width:height aspect ratio such as `16:9`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct AspectRatio {
    pub width: u32,
    pub height: u32,
}

impl AspectRatio {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Aspect ratio terms must be positive, got {}:{}", width, height);
        }
        Ok(Self { width, height })
    }

    pub fn value(&self) -> f64 {
        self.width as f64 / self.height as f64
    }
}

impl FromStr for AspectRatio {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(':')
            .with_context(|| format!("Invalid aspect ratio '{}', expected W:H", s))?;
        let width = w
            .trim()
            .parse()
            .with_context(|| format!("Invalid aspect ratio width '{}'", w))?;
        let height = h
            .trim()
            .parse()
            .with_context(|| format!("Invalid aspect ratio height '{}'", h))?;
        Self::new(width, height)
    }
}

impl fmt::Display for AspectRatio {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.width, self.height)
    }
}

/// Exact output size of a smart crop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetSize {
    pub width: u32,
    pub height: u32,
}

impl TargetSize {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            anyhow::bail!("Target size must be positive, got {}x{}", width, height);
        }
        Ok(Self { width, height })
    }

    /// Size with the given width and the ratio's height, `round(width * H / W)`
    pub fn from_ratio(ratio: AspectRatio, width: u32) -> Result<Self> {
        let height = (width as f64 * ratio.height as f64 / ratio.width as f64).round() as u32;
        Self::new(width, height)
    }

    pub fn ratio(&self) -> f64 {
        self.width as f64 / self.height.max(1) as f64
    }
}

impl FromStr for TargetSize {
    type Err = anyhow::Error;

    /// Parses `WIDTHxHEIGHT`
    fn from_str(s: &str) -> Result<Self> {
        let (w, h) = s
            .split_once(['x', 'X'])
            .with_context(|| format!("Invalid size '{}', expected WIDTHxHEIGHT", s))?;
        let width = w.trim().parse().with_context(|| format!("Invalid width '{}'", w))?;
        let height = h.trim().parse().with_context(|| format!("Invalid height '{}'", h))?;
        Self::new(width, height)
    }
}

/// Tunables of the crop planner
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CropConfig {
    /// Ratios closer than this are treated as equal
    pub ratio_epsilon: f64,
    /// Both points are framed only when their span fits in this share of the crop
    pub dual_span_ratio: f64,
    /// Gaussian sigma of the blurred expansion background
    pub background_blur_sigma: f32,
}

impl Default for CropConfig {
    fn default() -> Self {
        Self {
            ratio_epsilon: 0.01,
            dual_span_ratio: 0.8,
            background_blur_sigma: 10.0,
        }
    }
}

/// Blur-pad layout used when the source is too small to crop
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ExpansionLayout {
    pub canvas_width: u32,
    pub canvas_height: u32,
    /// Scale at which the source covers the whole canvas
    pub cover_scale: f64,
    /// Where the sharp, fit-inside copy of the source is drawn
    pub placement: Rect,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CropPlan {
    Crop(CropRect),
    Expand(ExpansionLayout),
}

impl fmt::Display for CropPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CropPlan::Crop(r) => write!(f, "crop {}x{}+{}+{}", r.width, r.height, r.x, r.y),
            CropPlan::Expand(l) => write!(
                f,
                "expand {}x{} (image {}x{}+{}+{})",
                l.canvas_width,
                l.canvas_height,
                l.placement.width,
                l.placement.height,
                l.placement.x,
                l.placement.y
            ),
        }
    }
}

/// Decide how to reach `target` from an `original_width x original_height` image
///
/// Wider sources are cropped horizontally around the focal point. Taller
/// sources are cropped vertically, unless they are smaller than the target in
/// either dimension, in which case they are blur-padded instead.
pub fn plan_crop(
    original_width: u32,
    original_height: u32,
    target: TargetSize,
    primary: &FocalPoint,
    secondary: Option<&FocalPoint>,
    config: &CropConfig,
) -> CropPlan {
    let full = Rect::new(0, 0, original_width, original_height);
    if original_width == 0 || original_height == 0 {
        return CropPlan::Crop(full);
    }

    let original_ratio = original_width as f64 / original_height as f64;
    let target_ratio = target.ratio();

    if (original_ratio - target_ratio).abs() < config.ratio_epsilon {
        debug!(original_ratio, target_ratio, "ratios match, resizing only");
        return CropPlan::Crop(full);
    }

    if original_ratio > target_ratio {
        let crop_width = ((original_height as f64 * target_ratio).round() as u32).clamp(1, original_width);
        let center = focus_axis(primary.x, secondary.map(|s| s.x), crop_width, config);
        let x = clamp_offset(center, crop_width, original_width);
        return CropPlan::Crop(Rect::new(x, 0, crop_width, original_height));
    }

    if original_width < target.width || original_height < target.height {
        return CropPlan::Expand(plan_expansion(original_width, original_height, target, primary));
    }

    let crop_height = ((original_width as f64 / target_ratio).round() as u32).clamp(1, original_height);
    let center = focus_axis(primary.y, secondary.map(|s| s.y), crop_height, config);
    let y = clamp_offset(center, crop_height, original_height);
    CropPlan::Crop(Rect::new(0, y, original_width, crop_height))
}

/// Center coordinate along one axis, framing both subjects when they fit
fn focus_axis(primary: u32, secondary: Option<u32>, crop_size: u32, config: &CropConfig) -> u32 {
    let Some(secondary) = secondary else {
        return primary;
    };

    let span = primary.abs_diff(secondary);
    if span as f64 <= crop_size as f64 * config.dual_span_ratio {
        ((primary as u64 + secondary as u64) / 2) as u32
    } else {
        debug!(span, crop_size, "subjects too far apart, framing primary only");
        primary
    }
}

fn clamp_offset(center: u32, size: u32, limit: u32) -> u32 {
    let ideal = center as i64 - (size as f64 / 2.0).round() as i64;
    ideal.clamp(0, limit.saturating_sub(size) as i64) as u32
}

fn plan_expansion(
    original_width: u32,
    original_height: u32,
    target: TargetSize,
    primary: &FocalPoint,
) -> ExpansionLayout {
    let scale_x = target.width as f64 / original_width as f64;
    let scale_y = target.height as f64 / original_height as f64;
    let cover_scale = scale_x.max(scale_y);
    let fit_scale = scale_x.min(scale_y);

    let width = ((original_width as f64 * fit_scale).round() as u32).clamp(1, target.width);
    let height = ((original_height as f64 * fit_scale).round() as u32).clamp(1, target.height);

    let focal_x = primary.x as f64 * width as f64 / original_width as f64;
    let focal_y = primary.y as f64 * height as f64 / original_height as f64;

    let left = (target.width as f64 / 2.0 - focal_x).round() as i64;
    let top = (target.height as f64 / 2.0 - focal_y).round() as i64;

    let placement = Rect::new(
        left.clamp(0, (target.width - width) as i64) as u32,
        top.clamp(0, (target.height - height) as i64) as u32,
        width,
        height,
    );

    debug!(?placement, cover_scale, "expansion layout");
    ExpansionLayout {
        canvas_width: target.width,
        canvas_height: target.height,
        cover_scale,
        placement,
    }
}

/// Apply the crop plan for `detection` and return an image of exactly `target` size
pub fn smart_crop(
    img: &RgbImage,
    target: TargetSize,
    detection: &SubjectDetectionResult,
    config: &CropConfig,
) -> Result<RgbImage> {
    let (width, height) = img.dimensions();
    let plan = plan_crop(
        width,
        height,
        target,
        &detection.primary,
        detection.secondary.as_ref(),
        config,
    );

    apply_crop_plan(img, &plan, target, config)
}

/// Execute a plan from [`plan_crop`], producing an image of exactly `target` size
pub fn apply_crop_plan(img: &RgbImage, plan: &CropPlan, target: TargetSize, config: &CropConfig) -> Result<RgbImage> {
    match plan {
        CropPlan::Crop(rect) => {
            let cropped = crop_image(img, *rect)?;
            resize_image(&cropped, target.width, target.height)
        }
        CropPlan::Expand(layout) => compose_expansion(img, layout, config),
    }
}

/// Blurred cover-scaled background with the sharp fit-inside image on top
pub fn compose_expansion(img: &RgbImage, layout: &ExpansionLayout, config: &CropConfig) -> Result<RgbImage> {
    let (width, height) = img.dimensions();
    let (canvas_width, canvas_height) = (layout.canvas_width, layout.canvas_height);

    let bg_width = ((width as f64 * layout.cover_scale).ceil() as u32).max(canvas_width);
    let bg_height = ((height as f64 * layout.cover_scale).ceil() as u32).max(canvas_height);
    let background = resize_image(img, bg_width, bg_height).context("Failed to scale expansion background")?;

    let mut canvas = imageops::crop_imm(
        &background,
        (bg_width - canvas_width) / 2,
        (bg_height - canvas_height) / 2,
        canvas_width,
        canvas_height,
    )
    .to_image();
    canvas.blur(config.background_blur_sigma);
    canvas
        .draw_image(img, layout.placement)
        .context("Failed to draw image onto expansion canvas")?;

    Ok(canvas)
}

/// Copy the pixels of `rect` into a new image
pub fn crop_image(img: &RgbImage, rect: Rect) -> Result<RgbImage> {
    let (img_width, img_height) = img.dimensions();

    if rect.is_empty() || !rect.fits_within(img_width, img_height) {
        return Err(anyhow::anyhow!(
            "Crop dimensions exceed image bounds: crop({},{},{}x{}) on {}x{} image",
            rect.x,
            rect.y,
            rect.width,
            rect.height,
            img_width,
            img_height
        ));
    }

    Ok(imageops::crop_imm(img, rect.x, rect.y, rect.width, rect.height).to_image())
}

/// Resize an image to exact dimensions using high-quality algorithm
pub fn resize_image(img: &RgbImage, width: u32, height: u32) -> Result<RgbImage> {
    let (src_width, src_height) = img.dimensions();

    if src_width == width && src_height == height {
        return Ok(img.clone());
    }
    if src_width == 0 || src_height == 0 {
        return Err(anyhow::anyhow!("Source image is empty ({}x{})", src_width, src_height));
    }
    if width == 0 || height == 0 {
        return Err(anyhow::anyhow!("Target size is empty ({}x{})", width, height));
    }

    let src_image = Image::from_vec_u8(src_width, src_height, img.as_raw().clone(), PixelType::U8x3)?;
    let mut dst_image = Image::new(width, height, PixelType::U8x3);

    let mut resizer = Resizer::new();
    resizer.resize(&src_image, &mut dst_image, Some(&ResizeOptions::default()))?;

    ImageBuffer::from_raw(width, height, dst_image.buffer().to_vec())
        .ok_or_else(|| anyhow::anyhow!("Resized buffer does not match {}x{}", width, height))
}
