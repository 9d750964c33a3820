//! Heuristic focal point detection
//!
//! The scanner slides a window over a downsampled copy of the image and
//! scores every position with the region metrics. With face protection on,
//! a person strategy and a rule-of-thirds composition strategy are tried
//! before the general scan.

use std::borrow::Cow;
use std::sync::Arc;

use image::{DynamicImage, ImageBuffer, RgbImage, RgbaImage};
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use thiserror::Error;
use tracing::{debug, warn};

use super::batch::BatchCache;
use super::region::{luminance_range, Region};
use super::resize::resize_image;

/// Current layout of [`ScannerConfig`]
pub const SCANNER_CONFIG_VERSION: u32 = 1;

/// Weights and thresholds of the focal point heuristics
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ScannerConfig {
    pub version: u32,

    /// Working resolution the image is downsampled to fit inside
    pub max_working_width: u32,
    pub max_working_height: u32,
    /// Shorter working side divided by this gives the scan step (sensitivity 5)
    pub grid_divisor: f32,
    pub min_step: u32,
    /// Window side in steps
    pub window_steps: u32,

    pub skin_weight: f32,
    pub contrast_weight: f32,
    pub edge_weight: f32,
    pub variance_weight: f32,
    pub protect_faces_skin_boost: f32,

    /// Below this skin score a window is treated as an object candidate
    pub object_skin_threshold: f32,
    pub object_contrast_weight: f32,
    pub object_edge_weight: f32,

    pub upper_half_bonus: f32,
    pub middle_third_bonus: f32,
    /// Multiplier applied at the very border
    pub border_penalty: f32,
    /// Distance, in steps, over which the border penalty fades out
    pub border_ramp_steps: f32,

    pub refine: bool,
    pub refine_divisor: u32,

    pub person_min_skin: f32,
    pub person_skin_weight: f32,
    pub person_face_weight: f32,
    pub person_floor: f32,

    pub composition_contrast_weight: f32,
    pub composition_edge_weight: f32,
    pub composition_brightness_weight: f32,
    pub composition_floor: f32,

    /// Exclusion radius around the primary, as a fraction of the shorter working side
    pub secondary_exclusion_ratio: f32,
    pub secondary_contrast_weight: f32,
    pub secondary_edge_weight: f32,
    pub secondary_variance_weight: f32,
    pub secondary_low_skin_weight: f32,
    pub secondary_min_score: f32,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            version: SCANNER_CONFIG_VERSION,
            max_working_width: 600,
            max_working_height: 400,
            grid_divisor: 30.0,
            min_step: 4,
            window_steps: 3,
            skin_weight: 10.0,
            contrast_weight: 5.0,
            edge_weight: 3.0,
            variance_weight: 2.0,
            protect_faces_skin_boost: 1.5,
            object_skin_threshold: 0.1,
            object_contrast_weight: 2.0,
            object_edge_weight: 2.0,
            upper_half_bonus: 1.4,
            middle_third_bonus: 1.2,
            border_penalty: 0.7,
            border_ramp_steps: 2.0,
            refine: true,
            refine_divisor: 3,
            person_min_skin: 0.3,
            person_skin_weight: 10.0,
            person_face_weight: 4.0,
            person_floor: 6.0,
            composition_contrast_weight: 4.0,
            composition_edge_weight: 3.0,
            composition_brightness_weight: 1.0,
            composition_floor: 2.0,
            secondary_exclusion_ratio: 0.2,
            secondary_contrast_weight: 4.0,
            secondary_edge_weight: 3.0,
            secondary_variance_weight: 2.0,
            secondary_low_skin_weight: 1.0,
            secondary_min_score: 2.5,
        }
    }
}

/// Per-call scan switches
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanOptions {
    /// 1 (coarse, strict) to 10 (fine, permissive)
    pub sensitivity: u8,
    pub protect_faces: bool,
    pub dual_mode: bool,
    pub batch_id: Option<String>,
    /// Return the batch's cached result instead of scanning, when present
    pub use_cached: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            sensitivity: 5,
            protect_faces: false,
            dual_mode: false,
            batch_id: None,
            use_cached: false,
        }
    }
}

/// A point of interest in original-image pixel coordinates
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalPoint {
    pub x: u32,
    pub y: u32,
    /// Heuristic confidence; exactly 0 for the center fallback
    pub score: f32,
}

impl FocalPoint {
    pub fn center(width: u32, height: u32) -> Self {
        Self {
            x: width / 2,
            y: height / 2,
            score: 0.0,
        }
    }

    pub fn is_fallback(&self) -> bool {
        self.score == 0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DetectionMethod {
    Person,
    Composition,
    General,
    Fallback,
}

/// Outcome of one scan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubjectDetectionResult {
    pub primary: FocalPoint,
    pub secondary: Option<FocalPoint>,
    pub method: DetectionMethod,
}

impl SubjectDetectionResult {
    pub fn fallback(width: u32, height: u32) -> Self {
        Self {
            primary: FocalPoint::center(width, height),
            secondary: None,
            method: DetectionMethod::Fallback,
        }
    }
}

/// Internal scan failures; callers only ever see the fallback result
#[derive(Debug, Error)]
pub enum ScanError {
    #[error("image has zero size ({width}x{height})")]
    EmptyImage { width: u32, height: u32 },
    #[error("raw buffer of {actual} bytes does not hold a {width}x{height} image with {channels} channels")]
    InvalidBuffer {
        width: u32,
        height: u32,
        channels: u8,
        actual: usize,
    },
    #[error("failed to downsample to working resolution: {0}")]
    Downsample(String),
}

/// A scored position in working-image coordinates
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub x: u32,
    pub y: u32,
    pub score: f32,
}

/// Everything a strategy needs to score the working image
pub struct ScanContext<'a> {
    pub image: &'a RgbImage,
    pub config: &'a ScannerConfig,
    pub options: &'a ScanOptions,
    pub step: u32,
    pub window: u32,
    /// Multiplier for strategy confidence floors, lower at high sensitivity
    pub floor_scale: f32,
}

impl<'a> ScanContext<'a> {
    fn new(image: &'a RgbImage, config: &'a ScannerConfig, options: &'a ScanOptions) -> Self {
        let sensitivity = options.sensitivity.clamp(1, 10) as f32;
        let divisor = (config.grid_divisor * (0.6 + 0.08 * sensitivity)).max(1.0);
        let shorter = image.width().min(image.height()) as f32;
        let step = ((shorter / divisor) as u32).max(config.min_step).max(1);

        Self {
            image,
            config,
            options,
            step,
            window: step * config.window_steps.max(1),
            floor_scale: 1.5 - 0.1 * sensitivity,
        }
    }

    pub fn radius(&self) -> u32 {
        self.window / 2
    }

    /// Window centered on `(x, y)`
    pub fn region_at(&self, x: u32, y: u32) -> Region {
        let radius = self.radius() as i64;
        Region::from_image(
            self.image,
            x as i64 - radius,
            y as i64 - radius,
            self.window,
            self.window,
        )
    }

    /// Window centers on the scan grid, row by row
    pub fn grid_positions(&self) -> Vec<(u32, u32)> {
        let (width, height) = self.image.dimensions();
        let radius = self.radius();
        if width <= 2 * radius || height <= 2 * radius {
            return Vec::new();
        }

        (radius..height - radius)
            .step_by(self.step as usize)
            .flat_map(|y| {
                (radius..width - radius)
                    .step_by(self.step as usize)
                    .map(move |x| (x, y))
            })
            .collect()
    }

    pub fn composition_bonus(&self, y: u32) -> f32 {
        let height = self.image.height() as f32;
        let y = y as f32;
        if y < height / 2.0 {
            self.config.upper_half_bonus
        } else if y < height * 2.0 / 3.0 {
            self.config.middle_third_bonus
        } else {
            1.0
        }
    }

    /// Multiplier rising from the border penalty at the edge to 1.0 further in
    pub fn edge_factor(&self, x: u32, y: u32) -> f32 {
        let (width, height) = self.image.dimensions();
        let right = width.saturating_sub(1).saturating_sub(x);
        let bottom = height.saturating_sub(1).saturating_sub(y);
        let distance = x.min(right).min(y).min(bottom);
        let ramp = (self.config.border_ramp_steps * self.step as f32).max(1.0);
        let t = (distance as f32 / ramp).min(1.0);
        self.config.border_penalty + (1.0 - self.config.border_penalty) * t
    }

    /// General interest score of the window at `(x, y)`
    pub fn general_score(&self, x: u32, y: u32) -> f32 {
        let config = self.config;
        let region = self.region_at(x, y);
        if region.is_empty() {
            return 0.0;
        }

        let skin = region.skin_score();
        let contrast = region.contrast();
        let edges = region.edge_density();
        let variance = region.color_variance();

        let skin_weight = if self.options.protect_faces {
            config.skin_weight * config.protect_faces_skin_boost
        } else {
            config.skin_weight
        };

        let mut score = skin * skin_weight
            + contrast * config.contrast_weight
            + edges * config.edge_weight
            + variance * config.variance_weight;

        if skin < config.object_skin_threshold {
            score += contrast * config.object_contrast_weight + edges * config.object_edge_weight;
        }

        score * self.composition_bonus(y) * self.edge_factor(x, y)
    }

    /// Score every position in parallel and keep the first strict maximum
    fn best_of<F>(&self, positions: &[(u32, u32)], start: Option<Candidate>, score: F) -> Option<Candidate>
    where
        F: Fn(u32, u32) -> f32 + Sync,
    {
        let scored: Vec<Candidate> = positions
            .par_iter()
            .map(|&(x, y)| Candidate {
                x,
                y,
                score: score(x, y),
            })
            .collect();

        scored.into_iter().fold(start, |best, candidate| match best {
            Some(b) if candidate.score <= b.score => Some(b),
            _ => Some(candidate),
        })
    }
}

/// One way of locating the primary subject
pub trait FocalStrategy: Send + Sync {
    fn method(&self) -> DetectionMethod;

    fn locate(&self, ctx: &ScanContext<'_>) -> Option<Candidate>;

    /// Minimum score for this strategy's answer to be accepted
    fn confidence_floor(&self, ctx: &ScanContext<'_>) -> f32;
}

/// Strict skin plus a face-likeness term
pub struct PersonStrategy;

impl PersonStrategy {
    fn face_likeness(region: &Region) -> f32 {
        let range = luminance_range(&region.pixels);
        let range_score = if (0.15..=0.7).contains(&range) { 1.0 } else { 0.4 };
        let consistency = (1.0 - region.color_variance() * 2.0).clamp(0.0, 1.0);
        range_score * consistency
    }
}

impl FocalStrategy for PersonStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Person
    }

    fn locate(&self, ctx: &ScanContext<'_>) -> Option<Candidate> {
        let config = ctx.config;
        let positions = ctx.grid_positions();

        ctx.best_of(&positions, None, |x, y| {
            let region = ctx.region_at(x, y);
            let skin = region.strict_skin_score();
            if skin < config.person_min_skin {
                return 0.0;
            }
            let face = Self::face_likeness(&region);
            (skin * config.person_skin_weight + face * config.person_face_weight)
                * ctx.composition_bonus(y)
                * ctx.edge_factor(x, y)
        })
    }

    fn confidence_floor(&self, ctx: &ScanContext<'_>) -> f32 {
        ctx.config.person_floor * ctx.floor_scale
    }
}

/// Rule-of-thirds intersections scored by structure and exposure
pub struct CompositionStrategy;

impl FocalStrategy for CompositionStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::Composition
    }

    fn locate(&self, ctx: &ScanContext<'_>) -> Option<Candidate> {
        let config = ctx.config;
        let (width, height) = ctx.image.dimensions();
        let positions = [
            (width / 3, height / 3),
            (width * 2 / 3, height / 3),
            (width / 2, height / 3),
            (width / 3, height * 2 / 3),
            (width * 2 / 3, height * 2 / 3),
            (width / 2, height / 2),
        ];

        ctx.best_of(&positions, None, |x, y| {
            let region = ctx.region_at(x, y);
            let contrast = region.contrast();
            let edges = region.edge_density();
            // A flat window is never a composition anchor
            if contrast == 0.0 && edges == 0.0 {
                return 0.0;
            }
            let brightness = 1.0 - (region.mean_luminance() - 0.5).abs() * 2.0;
            contrast * config.composition_contrast_weight
                + edges * config.composition_edge_weight
                + brightness * config.composition_brightness_weight
        })
    }

    fn confidence_floor(&self, ctx: &ScanContext<'_>) -> f32 {
        ctx.config.composition_floor * ctx.floor_scale
    }
}

/// Exhaustive weighted scan with a refinement pass
pub struct GeneralStrategy;

impl GeneralStrategy {
    fn refine(ctx: &ScanContext<'_>, best: Candidate) -> Candidate {
        let (width, height) = ctx.image.dimensions();
        let radius = ctx.radius();
        let fine = (ctx.step / ctx.config.refine_divisor.max(1)).max(1) as i64;
        let reach = ctx.step as i64;

        let mut positions = Vec::new();
        let mut dy = -reach;
        while dy <= reach {
            let mut dx = -reach;
            while dx <= reach {
                let x = best.x as i64 + dx;
                let y = best.y as i64 + dy;
                if x >= radius as i64
                    && y >= radius as i64
                    && x < (width - radius) as i64
                    && y < (height - radius) as i64
                {
                    positions.push((x as u32, y as u32));
                }
                dx += fine;
            }
            dy += fine;
        }

        ctx.best_of(&positions, Some(best), |x, y| ctx.general_score(x, y))
            .unwrap_or(best)
    }
}

impl FocalStrategy for GeneralStrategy {
    fn method(&self) -> DetectionMethod {
        DetectionMethod::General
    }

    fn locate(&self, ctx: &ScanContext<'_>) -> Option<Candidate> {
        let (width, height) = ctx.image.dimensions();
        let center = Candidate {
            x: width / 2,
            y: height / 2,
            score: 0.0,
        };
        let positions = ctx.grid_positions();

        let scored: Vec<Candidate> = positions
            .par_iter()
            .map(|&(x, y)| Candidate {
                x,
                y,
                score: ctx.general_score(x, y),
            })
            .collect();

        let mut top: Vec<&Candidate> = scored.iter().filter(|c| c.score > 0.0).collect();
        top.sort_by(|a, b| b.score.total_cmp(&a.score));
        for (rank, c) in top.iter().take(3).enumerate() {
            debug!(rank, x = c.x, y = c.y, score = c.score, "scan candidate");
        }

        let best = scored.iter().fold(center, |best, candidate| {
            if candidate.score > best.score {
                *candidate
            } else {
                best
            }
        });

        if best.score > 0.0 && ctx.config.refine {
            Some(Self::refine(ctx, best))
        } else {
            Some(best)
        }
    }

    fn confidence_floor(&self, _ctx: &ScanContext<'_>) -> f32 {
        0.0
    }
}

fn strategy_chain(protect_faces: bool) -> Vec<Box<dyn FocalStrategy>> {
    if protect_faces {
        vec![
            Box::new(PersonStrategy),
            Box::new(CompositionStrategy),
            Box::new(GeneralStrategy),
        ]
    } else {
        vec![Box::new(GeneralStrategy)]
    }
}

/// Focal point scanner with an optional shared batch cache
pub struct FocalPointScanner {
    config: ScannerConfig,
    cache: Option<Arc<BatchCache>>,
}

impl Default for FocalPointScanner {
    fn default() -> Self {
        Self::new(ScannerConfig::default())
    }
}

impl FocalPointScanner {
    pub fn new(config: ScannerConfig) -> Self {
        Self {
            config,
            cache: None,
        }
    }

    pub fn with_cache(mut self, cache: Arc<BatchCache>) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn config(&self) -> &ScannerConfig {
        &self.config
    }

    /// Locate the primary (and optionally secondary) focal point
    ///
    /// Never fails: any internal problem yields the image center with score 0.
    pub fn scan(&self, img: &RgbImage, options: &ScanOptions) -> SubjectDetectionResult {
        let (width, height) = img.dimensions();
        self.scan_cached(options, || self.detect_or_fallback(img, width, height, options))
    }

    /// Same as [`scan`](Self::scan) for a raw interleaved RGB or RGBA buffer
    pub fn scan_raw(
        &self,
        buffer: &[u8],
        width: u32,
        height: u32,
        channels: u8,
        options: &ScanOptions,
    ) -> SubjectDetectionResult {
        self.scan_cached(options, || match decode_raw(buffer, width, height, channels) {
            Ok(img) => self.detect_or_fallback(&img, width, height, options),
            Err(e) => {
                warn!(error = %e, "focal point scan failed, using image center");
                SubjectDetectionResult::fallback(width, height)
            }
        })
    }

    fn scan_cached<F>(&self, options: &ScanOptions, compute: F) -> SubjectDetectionResult
    where
        F: FnOnce() -> SubjectDetectionResult,
    {
        match (&self.cache, options.batch_id.as_deref()) {
            (Some(cache), Some(batch_id)) if options.use_cached => {
                cache.get_or_insert_with(batch_id, compute)
            }
            (Some(cache), Some(batch_id)) => {
                let result = compute();
                if cache.insert_if_absent(batch_id, result.clone()) {
                    debug!(batch_id, "stored batch focal point");
                }
                result
            }
            _ => compute(),
        }
    }

    fn detect_or_fallback(
        &self,
        img: &RgbImage,
        width: u32,
        height: u32,
        options: &ScanOptions,
    ) -> SubjectDetectionResult {
        match self.detect(img, options) {
            Ok(result) => result,
            Err(e) => {
                warn!(error = %e, "focal point scan failed, using image center");
                SubjectDetectionResult::fallback(width, height)
            }
        }
    }

    fn detect(&self, img: &RgbImage, options: &ScanOptions) -> Result<SubjectDetectionResult, ScanError> {
        let (width, height) = img.dimensions();
        if width == 0 || height == 0 {
            return Err(ScanError::EmptyImage { width, height });
        }

        let working = self.working_image(img)?;
        let ctx = ScanContext::new(&working, &self.config, options);
        debug!(
            working_width = working.width(),
            working_height = working.height(),
            step = ctx.step,
            window = ctx.window,
            "scanning"
        );

        let mut found = None;
        for strategy in strategy_chain(options.protect_faces) {
            let floor = strategy.confidence_floor(&ctx);
            match strategy.locate(&ctx) {
                Some(candidate) if candidate.score >= floor => {
                    debug!(strategy = %strategy.method(), score = candidate.score, "strategy accepted");
                    found = Some((candidate, strategy.method()));
                    break;
                }
                Some(candidate) => {
                    debug!(strategy = %strategy.method(), score = candidate.score, floor, "below confidence floor");
                }
                None => {}
            }
        }

        let to_original = |c: Candidate| FocalPoint {
            x: scale_coordinate(c.x, working.width(), width),
            y: scale_coordinate(c.y, working.height(), height),
            score: c.score,
        };

        let (primary, method) = match found {
            Some((candidate, method)) if candidate.score > 0.0 => (candidate, method),
            _ => return Ok(SubjectDetectionResult::fallback(width, height)),
        };

        let secondary = if options.dual_mode {
            find_secondary(&ctx, primary).map(to_original)
        } else {
            None
        };

        Ok(SubjectDetectionResult {
            primary: to_original(primary),
            secondary,
            method,
        })
    }

    /// Downsample to fit inside the working resolution, never upscaling
    fn working_image<'a>(&self, img: &'a RgbImage) -> Result<Cow<'a, RgbImage>, ScanError> {
        let (width, height) = img.dimensions();
        let max_w = self.config.max_working_width.max(1) as f64;
        let max_h = self.config.max_working_height.max(1) as f64;
        let scale = (max_w / width as f64).min(max_h / height as f64);
        if scale >= 1.0 {
            return Ok(Cow::Borrowed(img));
        }

        let target_w = ((width as f64 * scale).round() as u32).max(1);
        let target_h = ((height as f64 * scale).round() as u32).max(1);
        resize_image(img, target_w, target_h)
            .map(Cow::Owned)
            .map_err(|e| ScanError::Downsample(e.to_string()))
    }
}

/// Best low-skin, high-structure position outside the primary's exclusion disk
fn find_secondary(ctx: &ScanContext<'_>, primary: Candidate) -> Option<Candidate> {
    let config = ctx.config;
    let shorter = ctx.image.width().min(ctx.image.height()) as f32;
    let exclusion = shorter * config.secondary_exclusion_ratio;

    let positions: Vec<(u32, u32)> = ctx
        .grid_positions()
        .into_iter()
        .filter(|&(x, y)| {
            let dx = x as f32 - primary.x as f32;
            let dy = y as f32 - primary.y as f32;
            (dx * dx + dy * dy).sqrt() >= exclusion
        })
        .collect();

    let best = ctx.best_of(&positions, None, |x, y| {
        let region = ctx.region_at(x, y);
        if region.is_empty() {
            return 0.0;
        }
        (region.contrast() * config.secondary_contrast_weight
            + region.edge_density() * config.secondary_edge_weight
            + region.color_variance() * config.secondary_variance_weight
            + (1.0 - region.skin_score()) * config.secondary_low_skin_weight)
            * ctx.edge_factor(x, y)
    })?;

    if best.score >= config.secondary_min_score {
        Some(best)
    } else {
        debug!(score = best.score, "no secondary subject above threshold");
        None
    }
}

fn scale_coordinate(value: u32, working: u32, original: u32) -> u32 {
    if working == original || working == 0 {
        return value.min(original.saturating_sub(1));
    }
    let scaled = (value as f64 * original as f64 / working as f64).round() as u32;
    scaled.min(original.saturating_sub(1))
}

fn decode_raw(buffer: &[u8], width: u32, height: u32, channels: u8) -> Result<RgbImage, ScanError> {
    let invalid = || ScanError::InvalidBuffer {
        width,
        height,
        channels,
        actual: buffer.len(),
    };
    let expected = width as usize * height as usize * channels as usize;
    if buffer.len() != expected {
        return Err(invalid());
    }

    match channels {
        3 => ImageBuffer::from_raw(width, height, buffer.to_vec()).ok_or_else(invalid),
        4 => {
            let rgba: RgbaImage =
                ImageBuffer::from_raw(width, height, buffer.to_vec()).ok_or_else(invalid)?;
            Ok(DynamicImage::ImageRgba8(rgba).to_rgb8())
        }
        _ => Err(invalid()),
    }
}
