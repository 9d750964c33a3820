use anyhow::Result;
use image::{Rgb, RgbImage};
use imageproc::drawing::draw_line_segment_mut;

use super::outpaint::CanvasLayout;
use super::raster::{RasterCanvas, Rect};

const PREVIEW_BACKGROUND: Rgb<u8> = Rgb([0xf0, 0xf0, 0xf0]);
const OUTLINE_COLOR: Rgb<u8> = Rgb([0x4c, 0xaf, 0x50]);
const DASH_ON: f32 = 10.0;
const DASH_OFF: f32 = 5.0;
const OUTLINE_INSET: u32 = 2;

/// Human-facing preview of an outpaint layout
///
/// Shows the placed original on a light gray canvas with dashed outlines
/// around the areas that will be synthesized.
pub fn build_preview(img: &RgbImage, layout: &CanvasLayout) -> Result<RgbImage> {
    let mut canvas = RgbImage::from_pixel(layout.final_width, layout.final_height, PREVIEW_BACKGROUND);
    canvas.draw_image(img, layout.placement())?;

    for band in layout.expansion_bands() {
        if band.width > 2 * OUTLINE_INSET && band.height > 2 * OUTLINE_INSET {
            let outline = Rect::new(
                band.x + OUTLINE_INSET,
                band.y + OUTLINE_INSET,
                band.width - 2 * OUTLINE_INSET,
                band.height - 2 * OUTLINE_INSET,
            );
            draw_dashed_rect(&mut canvas, outline, OUTLINE_COLOR);
        }
    }

    Ok(canvas)
}

/// Two-pixel dashed outline just inside `rect`
fn draw_dashed_rect(canvas: &mut RgbImage, rect: Rect, color: Rgb<u8>) {
    for inset in 0..2u32 {
        if rect.width <= 2 * inset || rect.height <= 2 * inset {
            break;
        }
        let left = (rect.x + inset) as f32;
        let top = (rect.y + inset) as f32;
        let right = (rect.right() - 1 - inset) as f32;
        let bottom = (rect.bottom() - 1 - inset) as f32;

        draw_dashed_line(canvas, (left, top), (right, top), color);
        draw_dashed_line(canvas, (right, top), (right, bottom), color);
        draw_dashed_line(canvas, (right, bottom), (left, bottom), color);
        draw_dashed_line(canvas, (left, bottom), (left, top), color);
    }
}

fn draw_dashed_line(canvas: &mut RgbImage, start: (f32, f32), end: (f32, f32), color: Rgb<u8>) {
    let (dx, dy) = (end.0 - start.0, end.1 - start.1);
    let length = (dx * dx + dy * dy).sqrt();
    if length == 0.0 {
        return;
    }
    let (ux, uy) = (dx / length, dy / length);

    let mut offset = 0.0;
    while offset < length {
        let dash_end = (offset + DASH_ON).min(length);
        draw_line_segment_mut(
            canvas,
            (start.0 + ux * offset, start.1 + uy * offset),
            (start.0 + ux * dash_end, start.1 + uy * dash_end),
            color,
        );
        offset += DASH_ON + DASH_OFF;
    }
}
