//! Expansion canvas and inpainting mask for generative outpainting
//!
//! The original image is scaled into a canvas of the target aspect ratio,
//! positioned by gravity, and paired with a mask where black marks pixels to
//! keep and white marks pixels for the synthesis service to fill.

use anyhow::{Context, Result};
use image::{GrayImage, Luma, Rgb, RgbImage};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumIter, EnumString};
use tracing::debug;

use super::raster::{feather_mask, RasterCanvas, Rect};
use super::resize::{resize_image, AspectRatio};
use super::subject_mask::subject_mask;

/// Where the original sits on the expanded canvas
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Gravity {
    #[default]
    Center,
    Left,
    Right,
    Top,
    Bottom,
}

/// Which part of the placed original the mask protects
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize, Display, EnumString, EnumIter,
)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum MaskStrategy {
    /// The whole placement
    #[default]
    Conservative,
    /// Central 60 %
    Smart,
    /// Central 40 %
    Aggressive,
    /// Central 30 %
    CenterOnly,
    /// Heuristic subject pixels only (experimental)
    Subject,
}

impl MaskStrategy {
    /// Share of each placement side kept, for rectangle strategies
    pub fn preserve_fraction(&self) -> Option<f64> {
        match self {
            MaskStrategy::Conservative => Some(1.0),
            MaskStrategy::Smart => Some(0.6),
            MaskStrategy::Aggressive => Some(0.4),
            MaskStrategy::CenterOnly => Some(0.3),
            MaskStrategy::Subject => None,
        }
    }
}

/// Neutral fill behind the placed original
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, Display, EnumString, EnumIter)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum CanvasBackground {
    /// Near-white, for edit-style backends that repaint the whole canvas
    #[default]
    GenerativeEdit,
    /// Mid gray, for masked-fill backends
    MaskedFill,
}

impl CanvasBackground {
    pub fn color(&self) -> Rgb<u8> {
        match self {
            CanvasBackground::GenerativeEdit => Rgb([0xf8, 0xf8, 0xf8]),
            CanvasBackground::MaskedFill => Rgb([0xc0, 0xc0, 0xc0]),
        }
    }
}

/// Size bounds accepted by the synthesis service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct CanvasLimits {
    pub min_dimension: u32,
    pub max_dimension: u32,
    /// Final dimensions are rounded down to a multiple of this
    pub block_size: u32,
}

impl Default for CanvasLimits {
    fn default() -> Self {
        Self {
            min_dimension: 512,
            max_dimension: 1800,
            block_size: 8,
        }
    }
}

impl CanvasLimits {
    /// The widest range providers accept
    pub fn provider() -> Self {
        Self {
            max_dimension: 4096,
            ..Self::default()
        }
    }

    /// No clamping or alignment at all
    pub fn unbounded() -> Self {
        Self {
            min_dimension: 1,
            max_dimension: u32::MAX,
            block_size: 1,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.block_size == 0 {
            anyhow::bail!("Canvas block size must be positive");
        }
        if self.min_dimension == 0 || self.min_dimension > self.max_dimension {
            anyhow::bail!(
                "Invalid canvas range {}..{}",
                self.min_dimension,
                self.max_dimension
            );
        }
        if self.aligned_min() > self.max_dimension {
            anyhow::bail!(
                "No multiple of block size {} lies in the canvas range {}..{}",
                self.block_size,
                self.min_dimension,
                self.max_dimension
            );
        }
        Ok(())
    }

    /// Smallest block multiple not below `min_dimension`
    fn aligned_min(&self) -> u32 {
        let block = self.block_size.max(1);
        self.min_dimension.max(1).div_ceil(block).saturating_mul(block)
    }

    fn align(&self, value: f64) -> u32 {
        let block = self.block_size.max(1);
        let lower = self.aligned_min();
        let upper = ((self.max_dimension / block) * block).max(lower);
        let value = if value.is_finite() { value.round() } else { lower as f64 };
        let clamped = value.clamp(lower as f64, upper as f64) as u32;
        (clamped / block) * block
    }
}

/// Canvas size and where the scaled original sits on it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CanvasLayout {
    pub final_width: u32,
    pub final_height: u32,
    pub original_x: u32,
    pub original_y: u32,
    pub original_width: u32,
    pub original_height: u32,
}

impl CanvasLayout {
    pub fn placement(&self) -> Rect {
        Rect::new(
            self.original_x,
            self.original_y,
            self.original_width,
            self.original_height,
        )
    }

    /// Bands of the canvas outside the placement: left, right, top, bottom
    pub fn expansion_bands(&self) -> [Rect; 4] {
        let p = self.placement();
        [
            Rect::new(0, p.y, p.x, p.height),
            Rect::new(p.right(), p.y, self.final_width - p.right(), p.height),
            Rect::new(p.x, 0, p.width, p.y),
            Rect::new(p.x, p.bottom(), p.width, self.final_height - p.bottom()),
        ]
    }
}

/// Compute the expanded canvas for an `original_width x original_height` image
///
/// The long side is kept and the short side grows to reach `target_ratio`;
/// the result is then scaled into the limits and rounded down to the block size.
pub fn compute_layout(
    original_width: u32,
    original_height: u32,
    target_ratio: f64,
    gravity: Gravity,
    limits: &CanvasLimits,
) -> CanvasLayout {
    let ow = original_width.max(1) as f64;
    let oh = original_height.max(1) as f64;
    let original_ratio = ow / oh;

    let (initial_w, initial_h) = if target_ratio > original_ratio {
        ((oh * target_ratio).round(), oh)
    } else if target_ratio < original_ratio {
        (ow, (ow / target_ratio).round())
    } else {
        (ow, oh)
    };

    // Extreme ratios can round the grown side down to nothing
    let (initial_w, initial_h) = (initial_w.max(1.0), initial_h.max(1.0));
    let (mut w, mut h) = (initial_w, initial_h);
    let max = limits.max_dimension as f64;
    let min = limits.min_dimension as f64;
    if w > max || h > max {
        let s = (max / w).min(max / h);
        w = (w * s).round().max(1.0);
        h = (h * s).round().max(1.0);
    }
    if w < min || h < min {
        let s = (min / w).max(min / h);
        w = (w * s).round();
        h = (h * s).round();
    }

    let final_width = limits.align(w);
    let final_height = limits.align(h);

    let (placed_w, placed_h) = if final_width as f64 == initial_w && final_height as f64 == initial_h {
        (ow as u32, oh as u32)
    } else {
        let s = (final_width as f64 / initial_w).min(final_height as f64 / initial_h);
        (
            ((ow * s).round() as u32).clamp(1, final_width),
            ((oh * s).round() as u32).clamp(1, final_height),
        )
    };
    let placed_w = placed_w.min(final_width);
    let placed_h = placed_h.min(final_height);

    let mut x = (final_width - placed_w) / 2;
    let mut y = (final_height - placed_h) / 2;
    match gravity {
        Gravity::Center => {}
        Gravity::Left => x = 0,
        Gravity::Right => x = final_width - placed_w,
        Gravity::Top => y = 0,
        Gravity::Bottom => y = final_height - placed_h,
    }

    let layout = CanvasLayout {
        final_width,
        final_height,
        original_x: x,
        original_y: y,
        original_width: placed_w,
        original_height: placed_h,
    };
    debug!(?layout, %gravity, target_ratio, "canvas layout");
    layout
}

/// Which sides of the original the synthesis service has to invent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display)]
#[serde(rename_all = "kebab-case")]
#[strum(serialize_all = "kebab-case")]
pub enum ExpandDirection {
    None,
    Left,
    Right,
    LeftAndRight,
    Top,
    Bottom,
    TopAndBottom,
}

pub fn expand_direction(gravity: Gravity, target_ratio: f64, original_ratio: f64) -> ExpandDirection {
    if (target_ratio - original_ratio).abs() < 0.01 {
        return ExpandDirection::None;
    }

    if target_ratio > original_ratio {
        match gravity {
            Gravity::Left => ExpandDirection::Right,
            Gravity::Right => ExpandDirection::Left,
            _ => ExpandDirection::LeftAndRight,
        }
    } else {
        match gravity {
            Gravity::Top => ExpandDirection::Bottom,
            Gravity::Bottom => ExpandDirection::Top,
            _ => ExpandDirection::TopAndBottom,
        }
    }
}

/// Aspect ratios reframing backends accept
pub const SUPPORTED_RATIOS: [(&str, f64); 7] = [
    ("1:1", 1.0),
    ("16:9", 16.0 / 9.0),
    ("9:16", 9.0 / 16.0),
    ("4:3", 4.0 / 3.0),
    ("3:4", 3.0 / 4.0),
    ("21:9", 21.0 / 9.0),
    ("9:21", 9.0 / 21.0),
];

/// Where the original sits inside the reframed output, in original pixels
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReframeAnchors {
    pub aspect_ratio: String,
    pub x_start: u32,
    pub x_end: u32,
    pub y_start: u32,
    pub y_end: u32,
}

/// Nearest supported ratio label, exact matches first
pub fn closest_supported_ratio(ratio: AspectRatio) -> &'static str {
    let divisor = gcd(ratio.width, ratio.height).max(1);
    let reduced = format!("{}:{}", ratio.width / divisor, ratio.height / divisor);
    if let Some((label, _)) = SUPPORTED_RATIOS.iter().find(|(label, _)| *label == reduced) {
        return label;
    }

    let value = ratio.value();
    SUPPORTED_RATIOS
        .iter()
        .fold(("1:1", (value - 1.0).abs()), |best, &(label, v)| {
            let diff = (value - v).abs();
            if diff < best.1 {
                (label, diff)
            } else {
                best
            }
        })
        .0
}

fn gcd(a: u32, b: u32) -> u32 {
    if b == 0 {
        a
    } else {
        gcd(b, a % b)
    }
}

/// Anchor box of the original within a reframe to `target`
pub fn reframe_anchors(
    original_width: u32,
    original_height: u32,
    target: AspectRatio,
    gravity: Gravity,
) -> ReframeAnchors {
    let ow = original_width as f64;
    let oh = original_height.max(1) as f64;
    let target_ratio = target.value();
    let current_ratio = ow / oh;

    let (x_start, y_start) = if target_ratio > current_ratio {
        let expansion = oh * target_ratio - ow;
        let x = match gravity {
            Gravity::Left => 0.0,
            Gravity::Right => expansion,
            _ => expansion / 2.0,
        };
        (x, 0.0)
    } else if target_ratio < current_ratio {
        let expansion = ow / target_ratio - oh;
        let y = match gravity {
            Gravity::Top => 0.0,
            Gravity::Bottom => expansion,
            _ => expansion / 2.0,
        };
        (0.0, y)
    } else {
        (0.0, 0.0)
    };

    ReframeAnchors {
        aspect_ratio: closest_supported_ratio(target).to_string(),
        x_start: x_start.round() as u32,
        x_end: (x_start + ow).round() as u32,
        y_start: y_start.round() as u32,
        y_end: (y_start + oh).round() as u32,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct OutpaintOptions {
    pub limits: CanvasLimits,
    pub background: CanvasBackground,
    /// Tint expansion bands with the average color of the adjacent image edge
    pub edge_hints: bool,
    pub edge_hint_alpha: f32,
    pub feather_radius: u32,
    pub mask_strategy: MaskStrategy,
}

impl Default for OutpaintOptions {
    fn default() -> Self {
        Self {
            limits: CanvasLimits::default(),
            background: CanvasBackground::default(),
            edge_hints: true,
            edge_hint_alpha: 0.3,
            feather_radius: 4,
            mask_strategy: MaskStrategy::default(),
        }
    }
}

/// Everything the synthesis service needs for one image
#[derive(Debug, Clone)]
pub struct OutpaintCanvas {
    pub canvas: RgbImage,
    pub mask: GrayImage,
    pub layout: CanvasLayout,
}

/// Build the seeded canvas, mask and layout for outpainting `img` to `target_ratio`
pub fn build_outpaint_canvas(
    img: &RgbImage,
    target_ratio: f64,
    gravity: Gravity,
    options: &OutpaintOptions,
) -> Result<OutpaintCanvas> {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        anyhow::bail!("Cannot outpaint an empty image ({}x{})", width, height);
    }
    if !(target_ratio.is_finite() && target_ratio > 0.0) {
        anyhow::bail!("Invalid target ratio {}", target_ratio);
    }

    let layout = compute_layout(width, height, target_ratio, gravity, &options.limits);
    let placement = layout.placement();

    let placed = resize_image(img, placement.width, placement.height)
        .context("Failed to scale original into canvas")?;

    let mut canvas = RgbImage::from_pixel(layout.final_width, layout.final_height, options.background.color());
    canvas.draw_image(&placed, placement)?;

    if options.edge_hints {
        add_edge_hints(&mut canvas, &placed, &layout, options.edge_hint_alpha);
    }

    let mask = build_mask(&layout, options.mask_strategy, options.feather_radius, &placed);

    Ok(OutpaintCanvas { canvas, mask, layout })
}

/// Blend each expansion band with the average color of the image edge it touches
fn add_edge_hints(canvas: &mut RgbImage, placed: &RgbImage, layout: &CanvasLayout, alpha: f32) {
    let (w, h) = placed.dimensions();
    let edges = [
        average_color(placed, Rect::new(0, 0, 1, h)),
        average_color(placed, Rect::new(w - 1, 0, 1, h)),
        average_color(placed, Rect::new(0, 0, w, 1)),
        average_color(placed, Rect::new(0, h - 1, w, 1)),
    ];

    for (band, color) in layout.expansion_bands().into_iter().zip(edges) {
        if !band.is_empty() {
            canvas.blend_rect(band, color, alpha);
        }
    }
}

fn average_color(img: &RgbImage, rect: Rect) -> Rgb<u8> {
    let rect = rect.clamp_to(img.width(), img.height());
    let mut sums = [0u64; 3];
    let mut count = 0u64;
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            let p = img.get_pixel(x, y);
            for c in 0..3 {
                sums[c] += p[c] as u64;
            }
            count += 1;
        }
    }
    if count == 0 {
        return Rgb([0, 0, 0]);
    }
    Rgb(sums.map(|s| (s / count) as u8))
}

/// Inpainting mask: white canvas, black preserve area, feathered seam
///
/// `placed` is the original at its placement size; only the subject
/// strategy reads it.
pub fn build_mask(layout: &CanvasLayout, strategy: MaskStrategy, feather_radius: u32, placed: &RgbImage) -> GrayImage {
    let placement = layout.placement();
    let mut mask = GrayImage::from_pixel(layout.final_width, layout.final_height, Luma([255]));

    match strategy.preserve_fraction() {
        Some(fraction) => {
            mask.fill_rect(placement.shrink_centered(fraction), Luma([0]));
        }
        None => {
            let subject = subject_mask(placed);
            for (x, y, pixel) in subject.enumerate_pixels() {
                let (mx, my) = (placement.x + x, placement.y + y);
                if pixel[0] == 0 && mx < layout.final_width && my < layout.final_height {
                    mask.put_pixel(mx, my, Luma([0]));
                }
            }
        }
    }

    feather_mask(&mask, feather_radius)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;
    use strum::IntoEnumIterator;

    fn create_test_image(width: u32, height: u32) -> RgbImage {
        ImageBuffer::from_fn(width, height, |x, y| {
            Rgb([(x % 256) as u8, (y % 256) as u8, ((x * y) % 256) as u8])
        })
    }

    #[test]
    fn test_unbounded_layout_keeps_original() {
        let layout = compute_layout(1000, 1000, 16.0 / 9.0, Gravity::Center, &CanvasLimits::unbounded());
        assert_eq!(
            layout,
            CanvasLayout {
                final_width: 1778,
                final_height: 1000,
                original_x: 389,
                original_y: 0,
                original_width: 1000,
                original_height: 1000,
            }
        );
    }

    #[test]
    fn test_layout_is_clamped_and_aligned() {
        let limits = CanvasLimits::default();
        let layout = compute_layout(4000, 3000, 16.0 / 9.0, Gravity::Center, &limits);

        assert!(layout.final_width <= 1800 && layout.final_height <= 1800);
        assert!(layout.final_width >= 512 && layout.final_height >= 512);
        assert_eq!(layout.final_width % 8, 0);
        assert_eq!(layout.final_height % 8, 0);
        assert!(layout.placement().fits_within(layout.final_width, layout.final_height));
    }

    #[test]
    fn test_small_image_scales_up() {
        let layout = compute_layout(100, 200, 1.0, Gravity::Center, &CanvasLimits::default());
        assert_eq!((layout.final_width, layout.final_height), (512, 512));
        assert_eq!(layout.original_height, 512);
        assert_eq!(layout.original_width, 256);
        assert_eq!(layout.original_x, 128);
    }

    #[test]
    fn test_gravity_pins_edges() {
        let limits = CanvasLimits::unbounded();

        let left = compute_layout(1000, 1000, 2.0, Gravity::Left, &limits);
        assert_eq!(left.original_x, 0);

        let right = compute_layout(1000, 1000, 2.0, Gravity::Right, &limits);
        assert_eq!(right.original_x + right.original_width, right.final_width);

        let top = compute_layout(1000, 1000, 0.5, Gravity::Top, &limits);
        assert_eq!(top.original_y, 0);

        let bottom = compute_layout(1000, 1000, 0.5, Gravity::Bottom, &limits);
        assert_eq!(bottom.original_y + bottom.original_height, bottom.final_height);

        // The other axis stays centered
        let top_wide = compute_layout(1000, 1000, 2.0, Gravity::Top, &limits);
        assert_eq!(top_wide.original_x, 500);
        assert_eq!(top_wide.original_y, 0);
    }

    #[test]
    fn test_layout_json_is_camel_case() {
        let layout = compute_layout(1000, 1000, 16.0 / 9.0, Gravity::Center, &CanvasLimits::unbounded());
        let json = serde_json::to_string(&layout).unwrap();
        assert!(json.contains("\"finalWidth\":1778"));
        assert!(json.contains("\"originalX\":389"));
    }

    #[test]
    fn test_expand_direction() {
        assert_eq!(expand_direction(Gravity::Center, 1.0, 1.0), ExpandDirection::None);
        assert_eq!(expand_direction(Gravity::Left, 2.0, 1.0), ExpandDirection::Right);
        assert_eq!(expand_direction(Gravity::Right, 2.0, 1.0), ExpandDirection::Left);
        assert_eq!(expand_direction(Gravity::Top, 2.0, 1.0), ExpandDirection::LeftAndRight);
        assert_eq!(expand_direction(Gravity::Top, 0.5, 1.0), ExpandDirection::Bottom);
        assert_eq!(expand_direction(Gravity::Center, 0.5, 1.0), ExpandDirection::TopAndBottom);
        assert_eq!(ExpandDirection::LeftAndRight.to_string(), "left-and-right");
    }

    #[test]
    fn test_closest_supported_ratio() {
        let ratio = |w, h| AspectRatio::new(w, h).unwrap();
        assert_eq!(closest_supported_ratio(ratio(1920, 1080)), "16:9");
        assert_eq!(closest_supported_ratio(ratio(2, 2)), "1:1");
        assert_eq!(closest_supported_ratio(ratio(3, 2)), "4:3");
        assert_eq!(closest_supported_ratio(ratio(5, 2)), "21:9");
        assert_eq!(closest_supported_ratio(ratio(1, 3)), "9:21");
    }

    #[test]
    fn test_reframe_anchors() {
        let anchors = reframe_anchors(1000, 1000, AspectRatio::new(2, 1).unwrap(), Gravity::Center);
        assert_eq!((anchors.x_start, anchors.x_end), (500, 1500));
        assert_eq!((anchors.y_start, anchors.y_end), (0, 1000));
        assert_eq!(anchors.aspect_ratio, "16:9");

        let anchors = reframe_anchors(1000, 1000, AspectRatio::new(1, 2).unwrap(), Gravity::Bottom);
        assert_eq!((anchors.y_start, anchors.y_end), (1000, 2000));
    }

    #[test]
    fn test_build_canvas_and_mask() {
        let img = create_test_image(300, 200);
        let options = OutpaintOptions::default();
        let out = build_outpaint_canvas(&img, 16.0 / 9.0, Gravity::Center, &options).unwrap();

        let layout = out.layout;
        assert_eq!(out.canvas.dimensions(), (layout.final_width, layout.final_height));
        assert_eq!(out.mask.dimensions(), (layout.final_width, layout.final_height));

        let (cx, cy) = layout.placement().center();
        assert_eq!(out.mask.get_pixel(cx, cy)[0], 0);
        assert_eq!(out.mask.get_pixel(0, 0)[0], 255);
        assert_eq!(out.mask.get_pixel(layout.final_width - 1, layout.final_height - 1)[0], 255);
    }

    #[test]
    fn test_edge_hints_tint_bands_only() {
        let img = RgbImage::from_pixel(200, 200, Rgb([0, 0, 255]));
        let mut options = OutpaintOptions::default();

        options.edge_hints = false;
        let plain = build_outpaint_canvas(&img, 2.0, Gravity::Center, &options).unwrap();
        assert_eq!(plain.canvas.get_pixel(0, 10), &Rgb([0xf8, 0xf8, 0xf8]));

        options.edge_hints = true;
        let hinted = build_outpaint_canvas(&img, 2.0, Gravity::Center, &options).unwrap();
        let band = hinted.canvas.get_pixel(0, 10);
        assert!(band[2] > band[0], "band should lean blue: {band:?}");

        let (cx, cy) = hinted.layout.placement().center();
        assert_eq!(hinted.canvas.get_pixel(cx, cy), plain.canvas.get_pixel(cx, cy));
    }

    #[test]
    fn test_mask_strategies_shrink_preserve_area() {
        let img = create_test_image(400, 400);
        let mut black_counts = Vec::new();

        for strategy in [
            MaskStrategy::Conservative,
            MaskStrategy::Smart,
            MaskStrategy::Aggressive,
            MaskStrategy::CenterOnly,
        ] {
            let options = OutpaintOptions {
                mask_strategy: strategy,
                feather_radius: 0,
                ..Default::default()
            };
            let out = build_outpaint_canvas(&img, 2.0, Gravity::Center, &options).unwrap();
            black_counts.push(out.mask.pixels().filter(|p| p[0] == 0).count());
        }

        assert!(black_counts.windows(2).all(|w| w[0] > w[1]), "{black_counts:?}");
    }

    #[test]
    fn test_subject_strategy_stays_inside_placement() {
        let img = create_test_image(300, 300);
        let options = OutpaintOptions {
            mask_strategy: MaskStrategy::Subject,
            feather_radius: 0,
            ..Default::default()
        };
        let out = build_outpaint_canvas(&img, 2.0, Gravity::Center, &options).unwrap();
        let placement = out.layout.placement();

        for (x, y, p) in out.mask.enumerate_pixels() {
            if p[0] == 0 {
                assert!(placement.contains(x, y));
            }
        }
    }

    #[test]
    fn test_enum_strings() {
        assert_eq!("center-only".parse::<MaskStrategy>().unwrap(), MaskStrategy::CenterOnly);
        assert_eq!(Gravity::iter().count(), 5);
        assert_eq!("left".parse::<Gravity>().unwrap(), Gravity::Left);
        assert_eq!(CanvasBackground::MaskedFill.to_string(), "masked-fill");
    }

    #[test]
    fn test_limits_validation() {
        assert!(CanvasLimits::default().validate().is_ok());
        assert!(CanvasLimits::provider().validate().is_ok());
        assert!(CanvasLimits { block_size: 0, ..Default::default() }.validate().is_err());
        assert!(CanvasLimits { min_dimension: 2000, ..Default::default() }.validate().is_err());

        let no_multiple = CanvasLimits {
            min_dimension: 100,
            max_dimension: 120,
            block_size: 64,
        };
        assert!(no_multiple.validate().is_err());
    }

    #[test]
    fn test_extreme_ratio_stays_within_limits() {
        let limits = CanvasLimits::default();
        for ratio in [1.0 / 4000.0, 4000.0] {
            let layout = compute_layout(100, 100, ratio, Gravity::Center, &limits);
            assert!(layout.final_width >= 512 && layout.final_width <= 1800, "{:?}", layout);
            assert!(layout.final_height >= 512 && layout.final_height <= 1800, "{:?}", layout);
            assert!(layout.placement().fits_within(layout.final_width, layout.final_height));
        }
    }

    #[test]
    fn test_unaligned_min_rounds_up() {
        let limits = CanvasLimits {
            min_dimension: 500,
            max_dimension: 1800,
            block_size: 64,
        };
        assert!(limits.validate().is_ok());

        let layout = compute_layout(50, 50, 1.0, Gravity::Center, &limits);
        assert_eq!((layout.final_width, layout.final_height), (512, 512));
    }

    #[test]
    fn test_empty_image_is_rejected() {
        let img = RgbImage::new(0, 0);
        assert!(build_outpaint_canvas(&img, 1.0, Gravity::Center, &OutpaintOptions::default()).is_err());
    }
}
