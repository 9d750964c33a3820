//! Minimal raster drawing surface shared by the crop, outpaint and
//! recomposition stages.

use anyhow::Result;
use image::imageops::{self, FilterType};
use image::{GrayImage, ImageBuffer, Luma, Pixel, Rgb, RgbImage};
use serde::{Deserialize, Serialize};

use super::resize::resize_image;

/// Axis-aligned rectangle in pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    /// Center pixel, using integer division
    pub fn center(&self) -> (u32, u32) {
        (self.x + self.width / 2, self.y + self.height / 2)
    }

    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Whether the rectangle lies entirely inside a `width x height` surface
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.right() <= width && self.bottom() <= height
    }

    /// Intersect with a `width x height` surface anchored at the origin
    pub fn clamp_to(&self, width: u32, height: u32) -> Rect {
        let x = self.x.min(width);
        let y = self.y.min(height);
        Rect::new(
            x,
            y,
            self.width.min(width - x),
            self.height.min(height - y),
        )
    }

    /// Scale position and size by independent factors, rounding to pixels
    pub fn scaled(&self, sx: f64, sy: f64) -> Rect {
        Rect::new(
            (self.x as f64 * sx).round() as u32,
            (self.y as f64 * sy).round() as u32,
            ((self.width as f64 * sx).round() as u32).max(1),
            ((self.height as f64 * sy).round() as u32).max(1),
        )
    }

    /// Centered sub-rectangle covering `fraction` of each side
    pub fn shrink_centered(&self, fraction: f64) -> Rect {
        let width = ((self.width as f64 * fraction).round() as u32).clamp(1, self.width.max(1));
        let height = ((self.height as f64 * fraction).round() as u32).clamp(1, self.height.max(1));
        Rect::new(
            self.x + ((self.width - width) as f64 / 2.0).round() as u32,
            self.y + ((self.height - height) as f64 / 2.0).round() as u32,
            width,
            height,
        )
    }
}

/// Drawing operations the composition stages rely on
pub trait RasterCanvas {
    type Pixel: Pixel<Subpixel = u8>;

    /// Overwrite every pixel inside `rect` (clipped to the canvas)
    fn fill_rect(&mut self, rect: Rect, color: Self::Pixel);

    /// Alpha-blend `color` over every pixel inside `rect`
    fn blend_rect(&mut self, rect: Rect, color: Self::Pixel, alpha: f32);

    /// Draw `src` into `at`, resampling when the sizes differ
    fn draw_image(&mut self, src: &ImageBuffer<Self::Pixel, Vec<u8>>, at: Rect) -> Result<()>;

    /// Gaussian blur with the given standard deviation; no-op for `sigma <= 0`
    fn blur(&mut self, sigma: f32);
}

fn fill_rect_impl<P: Pixel<Subpixel = u8>>(img: &mut ImageBuffer<P, Vec<u8>>, rect: Rect, color: P) {
    let rect = rect.clamp_to(img.width(), img.height());
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            img.put_pixel(x, y, color);
        }
    }
}

fn blend_rect_impl<P: Pixel<Subpixel = u8>>(
    img: &mut ImageBuffer<P, Vec<u8>>,
    rect: Rect,
    color: P,
    alpha: f32,
) {
    let alpha = alpha.clamp(0.0, 1.0);
    let rect = rect.clamp_to(img.width(), img.height());
    for y in rect.y..rect.bottom() {
        for x in rect.x..rect.right() {
            img.get_pixel_mut(x, y).apply2(&color, |dst, src| {
                (dst as f32 * (1.0 - alpha) + src as f32 * alpha).round() as u8
            });
        }
    }
}

impl RasterCanvas for RgbImage {
    type Pixel = Rgb<u8>;

    fn fill_rect(&mut self, rect: Rect, color: Rgb<u8>) {
        fill_rect_impl(self, rect, color);
    }

    fn blend_rect(&mut self, rect: Rect, color: Rgb<u8>, alpha: f32) {
        blend_rect_impl(self, rect, color, alpha);
    }

    fn draw_image(&mut self, src: &RgbImage, at: Rect) -> Result<()> {
        if at.is_empty() {
            return Ok(());
        }
        if src.dimensions() == (at.width, at.height) {
            imageops::replace(self, src, at.x as i64, at.y as i64);
        } else {
            let scaled = resize_image(src, at.width, at.height)?;
            imageops::replace(self, &scaled, at.x as i64, at.y as i64);
        }
        Ok(())
    }

    fn blur(&mut self, sigma: f32) {
        if sigma > 0.0 {
            *self = imageproc::filter::gaussian_blur_f32(self, sigma);
        }
    }
}

impl RasterCanvas for GrayImage {
    type Pixel = Luma<u8>;

    fn fill_rect(&mut self, rect: Rect, color: Luma<u8>) {
        fill_rect_impl(self, rect, color);
    }

    fn blend_rect(&mut self, rect: Rect, color: Luma<u8>, alpha: f32) {
        blend_rect_impl(self, rect, color, alpha);
    }

    fn draw_image(&mut self, src: &GrayImage, at: Rect) -> Result<()> {
        if at.is_empty() {
            return Ok(());
        }
        if src.dimensions() == (at.width, at.height) {
            imageops::replace(self, src, at.x as i64, at.y as i64);
        } else {
            let scaled = imageops::resize(src, at.width, at.height, FilterType::Triangle);
            imageops::replace(self, &scaled, at.x as i64, at.y as i64);
        }
        Ok(())
    }

    fn blur(&mut self, sigma: f32) {
        if sigma > 0.0 {
            *self = imageproc::filter::gaussian_blur_f32(self, sigma);
        }
    }
}

/// Soften a mask with a blur whose support never exceeds `radius` pixels
///
/// Two box passes approximate a Gaussian while keeping every pixel farther
/// than `radius` from a black/white boundary at its original value.
pub fn feather_mask(mask: &GrayImage, radius: u32) -> GrayImage {
    let first = radius / 2;
    let second = radius - first;

    let mut out = mask.clone();
    for pass in [first, second] {
        if pass > 0 {
            out = imageproc::filter::box_filter(&out, pass, pass);
        }
    }
    out
}
