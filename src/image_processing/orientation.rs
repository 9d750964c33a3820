use anyhow::{Context, Result};
use exif::{In, Reader, Tag, Value};
use image::{imageops, RgbImage};
use std::path::Path;
use tracing::debug;

/// EXIF orientation values
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExifOrientation {
    /// No orientation specified or undefined
    Undefined = 0,
    /// Normal orientation (0 degrees)
    TopLeft = 1,
    /// Horizontally flipped
    TopRight = 2,
    /// Rotated 180 degrees
    BottomRight = 3,
    /// Vertically flipped
    BottomLeft = 4,
    /// Mirrored across the top-left to bottom-right diagonal
    LeftTop = 5,
    /// Rotated 90 degrees CW
    RightTop = 6,
    /// Mirrored across the top-right to bottom-left diagonal
    RightBottom = 7,
    /// Rotated 90 degrees CCW
    LeftBottom = 8,
}

impl From<u32> for ExifOrientation {
    fn from(value: u32) -> Self {
        match value {
            1 => ExifOrientation::TopLeft,
            2 => ExifOrientation::TopRight,
            3 => ExifOrientation::BottomRight,
            4 => ExifOrientation::BottomLeft,
            5 => ExifOrientation::LeftTop,
            6 => ExifOrientation::RightTop,
            7 => ExifOrientation::RightBottom,
            8 => ExifOrientation::LeftBottom,
            _ => ExifOrientation::Undefined,
        }
    }
}

impl ExifOrientation {
    pub fn description(&self) -> &'static str {
        match self {
            ExifOrientation::Undefined => "Undefined",
            ExifOrientation::TopLeft => "Normal",
            ExifOrientation::TopRight => "Horizontally flipped",
            ExifOrientation::BottomRight => "Rotated 180°",
            ExifOrientation::BottomLeft => "Vertically flipped",
            ExifOrientation::LeftTop => "Transposed",
            ExifOrientation::RightTop => "Rotated 90° CW",
            ExifOrientation::RightBottom => "Transversed",
            ExifOrientation::LeftBottom => "Rotated 90° CCW",
        }
    }

    /// Whether displaying the image swaps its width and height
    pub fn swaps_dimensions(&self) -> bool {
        matches!(
            self,
            ExifOrientation::LeftTop
                | ExifOrientation::RightTop
                | ExifOrientation::RightBottom
                | ExifOrientation::LeftBottom
        )
    }

    /// Turn stored pixels into display orientation
    pub fn apply(&self, img: RgbImage) -> RgbImage {
        match self {
            ExifOrientation::Undefined | ExifOrientation::TopLeft => img,
            ExifOrientation::TopRight => imageops::flip_horizontal(&img),
            ExifOrientation::BottomRight => imageops::rotate180(&img),
            ExifOrientation::BottomLeft => imageops::flip_vertical(&img),
            ExifOrientation::LeftTop => imageops::flip_horizontal(&imageops::rotate90(&img)),
            ExifOrientation::RightTop => imageops::rotate90(&img),
            ExifOrientation::RightBottom => imageops::flip_horizontal(&imageops::rotate270(&img)),
            ExifOrientation::LeftBottom => imageops::rotate270(&img),
        }
    }
}

/// Read the EXIF orientation tag, `Undefined` when absent
pub fn read_exif_orientation(image_path: &Path) -> Result<ExifOrientation> {
    let file = std::fs::File::open(image_path).with_context(|| {
        format!(
            "Failed to open image for EXIF reading: {}",
            image_path.display()
        )
    })?;

    let mut buf_reader = std::io::BufReader::new(file);
    let exif = Reader::new()
        .read_from_container(&mut buf_reader)
        .context("Failed to read EXIF data")?;

    if let Some(field) = exif.get_field(Tag::Orientation, In::PRIMARY) {
        if let Value::Short(values) = &field.value {
            if let Some(&orientation_value) = values.first() {
                return Ok(ExifOrientation::from(orientation_value as u32));
            }
        }
    }

    Ok(ExifOrientation::Undefined)
}

/// Decode an image as RGB and rotate it upright according to its EXIF tag
pub fn load_oriented(image_path: &Path) -> Result<RgbImage> {
    let img = image::open(image_path)
        .with_context(|| format!("Failed to decode image: {}", image_path.display()))?
        .to_rgb8();

    // Most PNG/WebP files carry no EXIF block at all
    let orientation = read_exif_orientation(image_path).unwrap_or(ExifOrientation::Undefined);
    if orientation != ExifOrientation::Undefined && orientation != ExifOrientation::TopLeft {
        debug!(path = %image_path.display(), orientation = orientation.description(), "applying EXIF orientation");
    }

    Ok(orientation.apply(img))
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{ImageBuffer, Rgb};

    #[test]
    fn test_exif_orientation_from_u32() {
        assert_eq!(ExifOrientation::from(1), ExifOrientation::TopLeft);
        assert_eq!(ExifOrientation::from(6), ExifOrientation::RightTop);
        assert_eq!(ExifOrientation::from(8), ExifOrientation::LeftBottom);
        assert_eq!(ExifOrientation::from(99), ExifOrientation::Undefined);
    }

    #[test]
    fn test_swaps_dimensions() {
        assert!(!ExifOrientation::TopLeft.swaps_dimensions());
        assert!(!ExifOrientation::BottomRight.swaps_dimensions());
        assert!(ExifOrientation::RightTop.swaps_dimensions());
        assert!(ExifOrientation::LeftTop.swaps_dimensions());
    }

    #[test]
    fn test_apply_rotation() {
        let img: RgbImage = ImageBuffer::from_fn(4, 2, |x, _| Rgb([x as u8, 0, 0]));

        let rotated = ExifOrientation::RightTop.apply(img.clone());
        assert_eq!(rotated.dimensions(), (2, 4));

        let flipped = ExifOrientation::TopRight.apply(img.clone());
        assert_eq!(flipped.get_pixel(0, 0)[0], 3);

        let unchanged = ExifOrientation::Undefined.apply(img.clone());
        assert_eq!(unchanged, img);
    }

    #[test]
    fn test_apply_maps_every_orientation() {
        let (w, h) = (3u32, 2u32);
        let img: RgbImage = ImageBuffer::from_fn(w, h, |x, y| Rgb([x as u8, y as u8, 0]));

        // Display pixel (x, y) comes from stored pixel source(x, y)
        let cases: [(u32, fn(u32, u32) -> (u32, u32)); 8] = [
            (1, |x, y| (x, y)),
            (2, |x, y| (2 - x, y)),
            (3, |x, y| (2 - x, 1 - y)),
            (4, |x, y| (x, 1 - y)),
            (5, |x, y| (y, x)),
            (6, |x, y| (y, 1 - x)),
            (7, |x, y| (2 - y, 1 - x)),
            (8, |x, y| (2 - y, x)),
        ];

        for (tag, source) in cases {
            let orientation = ExifOrientation::from(tag);
            let out = orientation.apply(img.clone());
            let expected = if orientation.swaps_dimensions() { (h, w) } else { (w, h) };
            assert_eq!(out.dimensions(), expected, "orientation {}", tag);

            for (x, y, pixel) in out.enumerate_pixels() {
                let (sx, sy) = source(x, y);
                assert_eq!(pixel, img.get_pixel(sx, sy), "orientation {} at ({}, {})", tag, x, y);
            }
        }
    }

    #[test]
    fn test_load_oriented_png_without_exif() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plain.png");
        let img: RgbImage = ImageBuffer::from_pixel(6, 3, Rgb([1, 2, 3]));
        img.save(&path).unwrap();

        let loaded = load_oriented(&path).unwrap();
        assert_eq!(loaded, img);
    }

    #[test]
    fn test_load_missing_file_fails() {
        assert!(load_oriented(Path::new("/nonexistent/image.jpg")).is_err());
    }
}
