//! Property-based tests for the reframing pipeline
//!
//! These check the geometric invariants of crop planning, canvas layout,
//! mask generation and recomposition over arbitrary sizes.

use image::{ImageBuffer, Rgb, RgbImage};
use proptest::prelude::*;
use reframe_processor::image_processing::outpaint::build_mask;
use reframe_processor::image_processing::raster::Rect;
use reframe_processor::image_processing::resize::CropConfig;
use reframe_processor::{
    compute_layout, plan_crop, recompose, CanvasLimits, CropPlan, FocalPoint, FocalPointScanner, Gravity,
    MaskStrategy, ScanOptions, TargetSize,
};

fn gravity() -> impl Strategy<Value = Gravity> {
    prop_oneof![
        Just(Gravity::Center),
        Just(Gravity::Left),
        Just(Gravity::Right),
        Just(Gravity::Top),
        Just(Gravity::Bottom),
    ]
}

/// Ratios spread evenly in log space, from about 1:8000 to 8000:1
fn extreme_ratio() -> impl Strategy<Value = f64> {
    (-9.0f64..9.0).prop_map(f64::exp)
}

/// Valid limits, including minimums that are not a block multiple
fn canvas_limits() -> impl Strategy<Value = CanvasLimits> {
    prop_oneof![
        Just(CanvasLimits::default()),
        Just(CanvasLimits::provider()),
        (1u32..=1000, 0u32..=3000, 1u32..=64).prop_map(|(min, span, block)| CanvasLimits {
            min_dimension: min,
            max_dimension: min + span,
            block_size: block,
        }),
    ]
    .prop_filter("limits must admit a block multiple", |l| l.validate().is_ok())
}

/// Original size plus a focal point inside it
fn image_with_focal() -> impl Strategy<Value = (u32, u32, FocalPoint)> {
    (1u32..=3000, 1u32..=3000).prop_flat_map(|(w, h)| {
        (Just(w), Just(h), 0..w, 0..h, 0.0f32..50.0)
            .prop_map(|(w, h, x, y, score)| (w, h, FocalPoint { x, y, score }))
    })
}

fn create_test_image(width: u32, height: u32) -> RgbImage {
    ImageBuffer::from_fn(width, height, |x, y| {
        Rgb([(x * 13 % 256) as u8, (y * 7 % 256) as u8, ((x ^ y) % 256) as u8])
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn crop_stays_in_bounds_and_keeps_ratio(
        (width, height, primary) in image_with_focal(),
        target_w in 1u32..=2000,
        target_h in 1u32..=2000,
    ) {
        let target = TargetSize::new(target_w, target_h).unwrap();
        let config = CropConfig::default();
        let ratio = target.ratio();

        match plan_crop(width, height, target, &primary, None, &config) {
            CropPlan::Crop(rect) => {
                prop_assert!(!rect.is_empty());
                prop_assert!(rect.fits_within(width, height), "{:?} outside {}x{}", rect, width, height);

                let original_ratio = width as f64 / height as f64;
                if (original_ratio - ratio).abs() < config.ratio_epsilon {
                    prop_assert_eq!(rect, Rect::new(0, 0, width, height));
                } else if original_ratio > ratio {
                    prop_assert_eq!(rect.height, height);
                    prop_assert!((rect.width as f64 - height as f64 * ratio).abs() <= 1.0);
                } else {
                    prop_assert_eq!(rect.width, width);
                    prop_assert!((rect.height as f64 - width as f64 / ratio).abs() <= 1.0);
                }
            }
            CropPlan::Expand(layout) => {
                prop_assert!(width < target_w || height < target_h);
                prop_assert_eq!((layout.canvas_width, layout.canvas_height), (target_w, target_h));
                prop_assert!(layout.placement.fits_within(target_w, target_h));
                prop_assert!(layout.cover_scale * width as f64 >= target_w as f64 - 1e-6);
                prop_assert!(layout.cover_scale * height as f64 >= target_h as f64 - 1e-6);
            }
        }
    }

    #[test]
    fn dual_crop_stays_in_bounds(
        (width, height, primary) in image_with_focal(),
        sx in 0.0f64..1.0,
        sy in 0.0f64..1.0,
        target_w in 1u32..=2000,
        target_h in 1u32..=2000,
    ) {
        let secondary = FocalPoint {
            x: (sx * (width - 1) as f64) as u32,
            y: (sy * (height - 1) as f64) as u32,
            score: 1.0,
        };
        let target = TargetSize::new(target_w, target_h).unwrap();

        if let CropPlan::Crop(rect) = plan_crop(width, height, target, &primary, Some(&secondary), &CropConfig::default()) {
            prop_assert!(rect.fits_within(width, height));
        }
    }

    #[test]
    fn canvas_layout_respects_limits(
        width in 1u32..=5000,
        height in 1u32..=5000,
        ratio in extreme_ratio(),
        gravity in gravity(),
        limits in canvas_limits(),
    ) {
        let layout = compute_layout(width, height, ratio, gravity, &limits);

        prop_assert!(layout.final_width >= limits.min_dimension && layout.final_width <= limits.max_dimension);
        prop_assert!(layout.final_height >= limits.min_dimension && layout.final_height <= limits.max_dimension);
        prop_assert_eq!(layout.final_width % limits.block_size, 0);
        prop_assert_eq!(layout.final_height % limits.block_size, 0);
        prop_assert!(layout.original_width > 0 && layout.original_height > 0);
        prop_assert!(layout.placement().fits_within(layout.final_width, layout.final_height));
    }

    #[test]
    fn mask_is_binary_away_from_the_seam(
        width in 8u32..=80,
        height in 8u32..=80,
        ratio in 0.4f64..2.5,
        gravity in gravity(),
        feather in 0u32..=6,
    ) {
        let layout = compute_layout(width, height, ratio, gravity, &CanvasLimits::unbounded());
        let placement = layout.placement();
        let placed = RgbImage::new(placement.width, placement.height);
        let mask = build_mask(&layout, MaskStrategy::Conservative, feather, &placed);

        prop_assert_eq!(mask.dimensions(), (layout.final_width, layout.final_height));

        for (x, y, pixel) in mask.enumerate_pixels() {
            let (x, y) = (x as i64, y as i64);
            let (left, top) = (placement.x as i64, placement.y as i64);
            let (right, bottom) = (placement.right() as i64, placement.bottom() as i64);

            // Chebyshev distance to the nearest pixel of the other color
            let inside = placement.contains(x as u32, y as u32);
            let distance = if inside {
                let mut d = i64::MAX;
                // Edges touching the canvas border have no white neighbor
                if left > 0 { d = d.min(x - left + 1); }
                if top > 0 { d = d.min(y - top + 1); }
                if right < layout.final_width as i64 { d = d.min(right - x); }
                if bottom < layout.final_height as i64 { d = d.min(bottom - y); }
                d
            } else {
                let dx = if x < left { left - x } else if x >= right { x - right + 1 } else { 0 };
                let dy = if y < top { top - y } else if y >= bottom { y - bottom + 1 } else { 0 };
                dx.max(dy)
            };

            if distance > feather as i64 {
                let expected = if inside { 0 } else { 255 };
                prop_assert_eq!(pixel[0], expected, "pixel ({}, {}) at distance {}", x, y, distance);
            }
        }
    }

    #[test]
    fn recompose_center_matches_original(
        synth_w in 4u32..=120,
        synth_h in 4u32..=120,
        fx in 0.0f64..1.0,
        fy in 0.0f64..1.0,
        fw in 0.1f64..1.0,
        fh in 0.1f64..1.0,
        feather in 0.0f32..500.0,
    ) {
        let width = ((synth_w as f64 * fw) as u32).max(1);
        let height = ((synth_h as f64 * fh) as u32).max(1);
        let x = ((synth_w - width) as f64 * fx) as u32;
        let y = ((synth_h - height) as f64 * fy) as u32;
        let placement = Rect::new(x, y, width, height);

        let synthesized = RgbImage::from_pixel(synth_w, synth_h, Rgb([3, 2, 1]));
        let original = create_test_image(width, height);
        let out = recompose(&synthesized, &original, placement, feather).unwrap();

        prop_assert_eq!(out.dimensions(), (synth_w, synth_h));
        let (cx, cy) = placement.center();
        prop_assert_eq!(out.get_pixel(cx, cy), original.get_pixel(cx - x, cy - y));
    }

    #[test]
    fn flat_gray_images_fall_back_to_center(
        width in 1u32..=700,
        height in 1u32..=500,
        level in any::<u8>(),
        sensitivity in 1u8..=10,
        protect_faces in any::<bool>(),
    ) {
        let img = RgbImage::from_pixel(width, height, Rgb([level, level, level]));
        let options = ScanOptions { sensitivity, protect_faces, ..Default::default() };
        let result = FocalPointScanner::default().scan(&img, &options);

        prop_assert_eq!(result.primary, FocalPoint::center(width, height));
    }
}
