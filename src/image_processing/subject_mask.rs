//! Experimental per-pixel subject mask
//!
//! Each pixel gets a score from its distance to the image center, skin tone,
//! Sobel edge strength and similarity to its neighbourhood. Pixels scoring
//! above the threshold are treated as subject and preserved (black).

use image::imageops::{self, FilterType};
use image::{GrayImage, Luma, RgbImage};

use super::region::is_strict_skin_tone;

/// Longest side the heuristic runs at; the mask is scaled back afterwards
const WORKING_MAX: u32 = 512;

const CENTRAL_WEIGHT: f32 = 0.3;
const SKIN_WEIGHT: f32 = 0.4;
const EDGE_WEIGHT: f32 = 0.2;
const SIMILARITY_WEIGHT: f32 = 0.1;

const EDGE_THRESHOLD: u16 = 30;
const SIMILARITY_RADIUS: i64 = 3;
const SIMILARITY_THRESHOLD: i32 = 50;
const SUBJECT_THRESHOLD: f32 = 0.25;

/// Mask of `img`'s size: 0 where a subject is likely, 255 elsewhere
pub fn subject_mask(img: &RgbImage) -> GrayImage {
    let (width, height) = img.dimensions();
    if width == 0 || height == 0 {
        return GrayImage::new(width, height);
    }

    let scale = (WORKING_MAX as f64 / width.max(height) as f64).min(1.0);
    let work_w = ((width as f64 * scale).round() as u32).max(1);
    let work_h = ((height as f64 * scale).round() as u32).max(1);
    let working = if scale < 1.0 {
        imageops::resize(img, work_w, work_h, FilterType::Triangle)
    } else {
        img.clone()
    };

    let gray = imageops::grayscale(&working);
    let gradients = imageproc::gradients::sobel_gradients(&gray);

    let cx = work_w as f32 / 2.0;
    let cy = work_h as f32 / 2.0;
    let max_distance = (cx * cx + cy * cy).sqrt().max(1.0);
    let window = ((2 * SIMILARITY_RADIUS + 1) * (2 * SIMILARITY_RADIUS + 1)) as f32;

    let mask = GrayImage::from_fn(work_w, work_h, |x, y| {
        let pixel = working.get_pixel(x, y);

        let dx = x as f32 - cx;
        let dy = y as f32 - cy;
        let central = (1.0 - (dx * dx + dy * dy).sqrt() / max_distance).max(0.0);
        let mut score = central * CENTRAL_WEIGHT;

        if is_strict_skin_tone(pixel) {
            score += SKIN_WEIGHT;
        }

        if gradients.get_pixel(x, y)[0] > EDGE_THRESHOLD {
            score += EDGE_WEIGHT;
        }

        let (xi, yi) = (x as i64, y as i64);
        if xi >= SIMILARITY_RADIUS
            && yi >= SIMILARITY_RADIUS
            && xi + SIMILARITY_RADIUS < work_w as i64
            && yi + SIMILARITY_RADIUS < work_h as i64
        {
            let mut similar = 0usize;
            for ny in yi - SIMILARITY_RADIUS..=yi + SIMILARITY_RADIUS {
                for nx in xi - SIMILARITY_RADIUS..=xi + SIMILARITY_RADIUS {
                    let other = working.get_pixel(nx as u32, ny as u32);
                    let diff: i32 = (0..3).map(|c| (pixel[c] as i32 - other[c] as i32).abs()).sum();
                    if diff < SIMILARITY_THRESHOLD {
                        similar += 1;
                    }
                }
            }
            score += similar as f32 / window * SIMILARITY_WEIGHT;
        }

        if score > SUBJECT_THRESHOLD {
            Luma([0])
        } else {
            Luma([255])
        }
    });

    if (work_w, work_h) == (width, height) {
        mask
    } else {
        imageops::resize(&mask, width, height, FilterType::Nearest)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_center_is_preserved() {
        let img = RgbImage::from_pixel(64, 48, Rgb([30, 60, 200]));
        let mask = subject_mask(&img);

        assert_eq!(mask.dimensions(), (64, 48));
        assert_eq!(mask.get_pixel(32, 24)[0], 0);
        assert_eq!(mask.get_pixel(0, 0)[0], 255);
    }

    #[test]
    fn test_skin_in_corner_is_preserved() {
        let img = ImageBuffer::from_fn(100, 100, |x, y| {
            if x < 20 && y < 20 {
                Rgb([224, 172, 105])
            } else {
                Rgb([30, 60, 200])
            }
        });
        let mask = subject_mask(&img);

        assert_eq!(mask.get_pixel(10, 10)[0], 0);
        assert_eq!(mask.get_pixel(99, 99)[0], 255);
    }

    #[test]
    fn test_large_image_mask_matches_size() {
        let img = RgbImage::from_pixel(1200, 600, Rgb([30, 60, 200]));
        let mask = subject_mask(&img);
        assert_eq!(mask.dimensions(), (1200, 600));
    }
}
