//! Pixel region analysis for focal point scoring
//!
//! Every metric here is a pure function over a rectangular window of RGB
//! pixels and returns a value in `[0, 1]`. An empty region scores 0 on every
//! metric.
use image::{Rgb, RgbImage};

/// Channel-sum difference above which two neighbours count as an edge
const EDGE_THRESHOLD: i32 = 20;

/// Achromatic pixels (`max - min` at or below this) never pass the YCbCr test
const YCBCR_MIN_CHROMA: u8 = 6;

/// A rectangular window of pixels read from a raster
#[derive(Debug, Clone, Default)]
pub struct Region {
    pub pixels: Vec<Rgb<u8>>,
    pub width: u32,
}

impl Region {
    /// Copy the window at `(x, y)` of size `width x height`, clipped to the image bounds
    ///
    /// Negative origins are clipped as well, so the returned region may be
    /// narrower than requested near the borders.
    pub fn from_image(img: &RgbImage, x: i64, y: i64, width: u32, height: u32) -> Self {
        let (img_width, img_height) = img.dimensions();

        let x0 = x.clamp(0, img_width as i64) as u32;
        let y0 = y.clamp(0, img_height as i64) as u32;
        let x1 = (x + width as i64).clamp(0, img_width as i64) as u32;
        let y1 = (y + height as i64).clamp(0, img_height as i64) as u32;

        if x1 <= x0 || y1 <= y0 {
            return Self::default();
        }

        let mut pixels = Vec::with_capacity(((x1 - x0) * (y1 - y0)) as usize);
        for py in y0..y1 {
            for px in x0..x1 {
                pixels.push(*img.get_pixel(px, py));
            }
        }

        Self {
            pixels,
            width: x1 - x0,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.pixels.is_empty()
    }

    pub fn skin_score(&self) -> f32 {
        skin_score(&self.pixels)
    }

    pub fn strict_skin_score(&self) -> f32 {
        strict_skin_score(&self.pixels)
    }

    pub fn contrast(&self) -> f32 {
        contrast(&self.pixels)
    }

    pub fn edge_density(&self) -> f32 {
        edge_density(&self.pixels, self.width)
    }

    pub fn color_variance(&self) -> f32 {
        color_variance(&self.pixels)
    }

    pub fn mean_luminance(&self) -> f32 {
        mean_luminance(&self.pixels)
    }
}

/// NTSC luminance
pub fn luminance(pixel: &Rgb<u8>) -> f32 {
    0.299 * pixel[0] as f32 + 0.587 * pixel[1] as f32 + 0.114 * pixel[2] as f32
}

/// Convert RGB to HSV with hue in degrees `[0, 360)` and s/v in `[0, 1]`
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> (f32, f32, f32) {
    let r = pixel[0] as f32 / 255.0;
    let g = pixel[1] as f32 / 255.0;
    let b = pixel[2] as f32 / 255.0;

    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = max - min;

    let mut hue = if diff == 0.0 {
        0.0
    } else if max == r {
        ((g - b) / diff) % 6.0
    } else if max == g {
        (b - r) / diff + 2.0
    } else {
        (r - g) / diff + 4.0
    };
    hue = (hue * 60.0).round();
    if hue < 0.0 {
        hue += 360.0;
    }

    let saturation = if max == 0.0 { 0.0 } else { diff / max };
    (hue, saturation, max)
}

/// Convert RGB to the (Cb, Cr) chroma pair of YCbCr
pub fn rgb_to_cbcr(pixel: &Rgb<u8>) -> (f32, f32) {
    let (r, g, b) = (pixel[0] as f32, pixel[1] as f32, pixel[2] as f32);
    let cb = 128.0 - 0.168736 * r - 0.331264 * g + 0.5 * b;
    let cr = 128.0 + 0.5 * r - 0.418688 * g - 0.081312 * b;
    (cb, cr)
}

fn channel_range(pixel: &Rgb<u8>) -> u8 {
    let max = pixel[0].max(pixel[1]).max(pixel[2]);
    let min = pixel[0].min(pixel[1]).min(pixel[2]);
    max - min
}

/// Permissive skin classifier: any one of four independent tests is enough
pub fn is_skin_tone(pixel: &Rgb<u8>) -> bool {
    let (r, g, b) = (pixel[0] as i32, pixel[1] as i32, pixel[2] as i32);
    let range = channel_range(pixel);

    // RGB dominance
    if r > 60 && g > 30 && b > 15 && r > g && r > b && range > 10 && (r - g).abs() > 8 {
        return true;
    }

    // HSV warm bands
    let (hue, saturation, value) = rgb_to_hsv(pixel);
    if (hue <= 60.0 || hue >= 300.0) && (0.15..=0.8).contains(&saturation) && value >= 0.2 {
        return true;
    }

    // YCbCr box
    let (cb, cr) = rgb_to_cbcr(pixel);
    if range > YCBCR_MIN_CHROMA && (70.0..=135.0).contains(&cb) && (125.0..=180.0).contains(&cr) {
        return true;
    }

    // General warmth
    r > b && (r + g) as f32 > b as f32 * 1.5 && r > 80
}

/// Tighter skin classifier used by the person strategy
pub fn is_strict_skin_tone(pixel: &Rgb<u8>) -> bool {
    let (r, g, b) = (pixel[0] as i32, pixel[1] as i32, pixel[2] as i32);
    let range = channel_range(pixel);

    if r > 95 && g > 40 && b > 20 && r > g && r > b && range > 15 && (r - g).abs() > 15 {
        return true;
    }

    let (hue, saturation, _) = rgb_to_hsv(pixel);
    if hue <= 50.0 && (0.23..=0.68).contains(&saturation) {
        return true;
    }

    let (cb, cr) = rgb_to_cbcr(pixel);
    range > YCBCR_MIN_CHROMA && (77.0..=127.0).contains(&cb) && (133.0..=173.0).contains(&cr)
}

fn fraction_matching(pixels: &[Rgb<u8>], predicate: impl Fn(&Rgb<u8>) -> bool) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }
    let matching = pixels.iter().filter(|p| predicate(p)).count();
    matching as f32 / pixels.len() as f32
}

/// Fraction of skin-toned pixels
pub fn skin_score(pixels: &[Rgb<u8>]) -> f32 {
    fraction_matching(pixels, is_skin_tone)
}

/// Fraction of pixels passing the strict skin tests
pub fn strict_skin_score(pixels: &[Rgb<u8>]) -> f32 {
    fraction_matching(pixels, is_strict_skin_tone)
}

/// `(max - min) / max` over NTSC luminance
pub fn contrast(pixels: &[Rgb<u8>]) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }

    let (min, max) = pixels
        .iter()
        .map(luminance)
        .fold((f32::MAX, 0.0f32), |(lo, hi), l| (lo.min(l), hi.max(l)));

    if max > 0.0 {
        (max - min) / max
    } else {
        0.0
    }
}

/// Fraction of interior pixels whose right or lower neighbour differs by more
/// than the edge threshold (sum of absolute channel differences)
pub fn edge_density(pixels: &[Rgb<u8>], row_width: u32) -> f32 {
    let width = row_width as usize;
    if width == 0 || pixels.len() < width * 2 {
        return 0.0;
    }

    let height = pixels.len() / width;
    let diff = |a: &Rgb<u8>, b: &Rgb<u8>| -> i32 {
        (0..3).map(|c| (a[c] as i32 - b[c] as i32).abs()).sum()
    };

    let mut edges = 0usize;
    for y in 1..height.saturating_sub(1) {
        for x in 1..width.saturating_sub(1) {
            let idx = y * width + x;
            let current = &pixels[idx];
            let right = &pixels[idx + 1];
            let below = &pixels[idx + width];

            if diff(current, right) > EDGE_THRESHOLD || diff(current, below) > EDGE_THRESHOLD {
                edges += 1;
            }
        }
    }

    edges as f32 / pixels.len() as f32
}

/// Standard deviation of colors around the region mean, normalized by 255
pub fn color_variance(pixels: &[Rgb<u8>]) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }

    let count = pixels.len() as f64;
    let mut sums = [0f64; 3];
    for p in pixels {
        for (c, sum) in sums.iter_mut().enumerate() {
            *sum += p[c] as f64;
        }
    }
    let means = sums.map(|s| s / count);

    let variance = pixels
        .iter()
        .map(|p| {
            (0..3)
                .map(|c| {
                    let d = p[c] as f64 - means[c];
                    d * d
                })
                .sum::<f64>()
        })
        .sum::<f64>()
        / count;

    (variance.sqrt() / 255.0).min(1.0) as f32
}

/// Average NTSC luminance normalized to `[0, 1]`
pub fn mean_luminance(pixels: &[Rgb<u8>]) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }
    let sum: f32 = pixels.iter().map(luminance).sum();
    sum / pixels.len() as f32 / 255.0
}

/// Luminance spread of the region normalized to `[0, 1]`
pub fn luminance_range(pixels: &[Rgb<u8>]) -> f32 {
    if pixels.is_empty() {
        return 0.0;
    }
    let (min, max) = pixels
        .iter()
        .map(luminance)
        .fold((f32::MAX, 0.0f32), |(lo, hi), l| (lo.min(l), hi.max(l)));
    (max - min) / 255.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::ImageBuffer;

    fn uniform(count: usize, color: [u8; 3]) -> Vec<Rgb<u8>> {
        vec![Rgb(color); count]
    }

    #[test]
    fn test_empty_region_scores_zero() {
        let empty: Vec<Rgb<u8>> = Vec::new();
        assert_eq!(skin_score(&empty), 0.0);
        assert_eq!(strict_skin_score(&empty), 0.0);
        assert_eq!(contrast(&empty), 0.0);
        assert_eq!(edge_density(&empty, 0), 0.0);
        assert_eq!(edge_density(&empty, 8), 0.0);
        assert_eq!(color_variance(&empty), 0.0);
        assert_eq!(mean_luminance(&empty), 0.0);
    }

    #[test]
    fn test_skin_tone_detection() {
        // Typical light and medium skin tones
        assert!(is_skin_tone(&Rgb([224, 172, 105])));
        assert!(is_skin_tone(&Rgb([198, 134, 66])));
        assert!(is_strict_skin_tone(&Rgb([224, 172, 105])));

        // Saturated blue and green never count
        assert!(!is_skin_tone(&Rgb([0, 0, 200])));
        assert!(!is_skin_tone(&Rgb([0, 180, 0])));
    }

    #[test]
    fn test_neutral_gray_is_not_skin() {
        for level in [0u8, 40, 128, 200, 255] {
            assert!(!is_skin_tone(&Rgb([level, level, level])), "gray {}", level);
        }
    }

    #[test]
    fn test_skin_pixel_counted_once() {
        // Passes several independent tests but still contributes 1/N
        let mut pixels = uniform(3, [0, 0, 200]);
        pixels.push(Rgb([224, 172, 105]));
        assert!((skin_score(&pixels) - 0.25).abs() < f32::EPSILON);
    }

    #[test]
    fn test_contrast() {
        assert_eq!(contrast(&uniform(10, [120, 120, 120])), 0.0);
        assert_eq!(contrast(&uniform(10, [0, 0, 0])), 0.0);

        let pixels = vec![Rgb([0, 0, 0]), Rgb([255, 255, 255])];
        assert!((contrast(&pixels) - 1.0).abs() < 1e-4);
    }

    #[test]
    fn test_edge_density_on_stripes() {
        // Vertical stripes: every interior pixel differs from its right neighbour
        let img: RgbImage = ImageBuffer::from_fn(10, 10, |x, _| {
            if x % 2 == 0 {
                Rgb([0, 0, 0])
            } else {
                Rgb([255, 255, 255])
            }
        });
        let region = Region::from_image(&img, 0, 0, 10, 10);
        let density = region.edge_density();

        // 8x8 interior pixels out of 100
        assert!((density - 0.64).abs() < 1e-4);

        let flat = Region::from_image(&RgbImage::from_pixel(10, 10, Rgb([90, 90, 90])), 0, 0, 10, 10);
        assert_eq!(flat.edge_density(), 0.0);
    }

    #[test]
    fn test_color_variance() {
        assert_eq!(color_variance(&uniform(16, [10, 200, 30])), 0.0);

        let pixels = vec![Rgb([0, 0, 0]), Rgb([255, 255, 255])];
        let variance = color_variance(&pixels);
        // sqrt(3 * 127.5^2) / 255
        assert!((variance - 0.866).abs() < 1e-3);
    }

    #[test]
    fn test_region_clipped_to_bounds() {
        let img = RgbImage::from_pixel(20, 10, Rgb([1, 2, 3]));

        let region = Region::from_image(&img, -5, -5, 10, 10);
        assert_eq!(region.width, 5);
        assert_eq!(region.pixels.len(), 25);

        let outside = Region::from_image(&img, 30, 0, 5, 5);
        assert!(outside.is_empty());
    }
}
