pub mod batch;
pub mod orientation;
pub mod outpaint;
pub mod preview;
pub mod raster;
pub mod recompose;
pub mod region;
pub mod report;
pub mod resize;
pub mod subject_detection;
pub mod subject_mask;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use walkdir::WalkDir;

use crate::utils::{has_valid_extension, verbose_println};
use batch::{
    process_files_ordered, BatchCache, BatchId, CacheSweeper, OutputNames, DEFAULT_RETENTION, DEFAULT_SWEEP_INTERVAL,
};
use outpaint::{
    build_outpaint_canvas, expand_direction, reframe_anchors, CanvasLayout, ExpandDirection, Gravity, MaskStrategy,
    OutpaintOptions, ReframeAnchors,
};
use recompose::{load_synthesized, recompose_with_layout};
use resize::{apply_crop_plan, plan_crop, AspectRatio, CropConfig, TargetSize};
use subject_detection::{DetectionMethod, FocalPointScanner, ScanOptions, ScannerConfig, SubjectDetectionResult};

#[derive(Debug, Clone)]
pub struct ProcessingConfig {
    pub extensions: Vec<String>,
    pub verbose: bool,
    pub parallel_jobs: usize,
    pub scanner: ScannerConfig,
    pub scan_options: ScanOptions,
    /// Scan only the first image and reuse its focal point for the batch
    pub consistent_batch: bool,
    pub crop: CropConfig,
    pub outpaint: OutpaintOptions,
    pub cache_retention: Duration,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            extensions: ["jpg", "jpeg", "png", "webp", "tiff"]
                .iter()
                .map(|e| e.to_string())
                .collect(),
            verbose: false,
            parallel_jobs: num_cpus::get(),
            scanner: ScannerConfig::default(),
            scan_options: ScanOptions::default(),
            consistent_batch: false,
            crop: CropConfig::default(),
            outpaint: OutpaintOptions::default(),
            cache_retention: DEFAULT_RETENTION,
        }
    }
}

/// Per-run outpaint choices shared by every image
#[derive(Debug, Clone, Copy)]
pub struct OutpaintRequest {
    pub ratio: AspectRatio,
    pub gravity: Gravity,
    pub preview: bool,
    pub anchors: bool,
}

/// Contents of `<stem>_layout.json`
///
/// The layout fields sit at the top level so the file also reads back as a
/// plain [`CanvasLayout`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutManifest {
    #[serde(flatten)]
    pub layout: CanvasLayout,
    pub target_ratio: String,
    pub gravity: Gravity,
    pub mask_strategy: MaskStrategy,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expand_direction: Option<ExpandDirection>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reframe_anchors: Option<ReframeAnchors>,
}

pub struct ProcessingEngine {
    config: ProcessingConfig,
    pool: rayon::ThreadPool,
    scanner: FocalPointScanner,
    cache: Arc<BatchCache>,
    _sweeper: CacheSweeper,
}

impl ProcessingEngine {
    pub fn new(config: ProcessingConfig) -> Result<Self> {
        // Own pool so several engines (and tests) can coexist in one process
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.parallel_jobs)
            .thread_name(|i| format!("reframe-worker-{}", i))
            .build()
            .context("Failed to initialize thread pool")?;

        let cache = Arc::new(BatchCache::new(config.cache_retention));
        let sweeper = cache
            .spawn_sweeper(DEFAULT_SWEEP_INTERVAL)
            .context("Failed to start batch cache sweeper")?;
        let scanner = FocalPointScanner::new(config.scanner.clone()).with_cache(Arc::clone(&cache));

        Ok(Self {
            config,
            pool,
            scanner,
            cache,
            _sweeper: sweeper,
        })
    }

    pub fn config(&self) -> &ProcessingConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<BatchCache> {
        &self.cache
    }

    /// Discover all image files in the input paths
    ///
    /// Files named directly are taken as long as their extension matches.
    pub fn discover_images(&self, input_paths: &[PathBuf]) -> Result<Vec<PathBuf>> {
        let mut image_files = Vec::new();

        for input_path in input_paths {
            if input_path.is_file() {
                if has_valid_extension(input_path, &self.config.extensions) {
                    image_files.push(input_path.clone());
                }
                continue;
            }

            verbose_println(self.config.verbose, &format!("Scanning directory: {}", input_path.display()));

            let walker = WalkDir::new(input_path).follow_links(false).max_depth(10);

            for entry in walker {
                let entry = entry.context("Failed to read directory entry")?;
                let path = entry.path();

                if path.is_file() && has_valid_extension(path, &self.config.extensions) {
                    image_files.push(path.to_path_buf());
                }
            }
        }

        // Sort for consistent processing order
        image_files.sort();
        image_files.dedup();

        verbose_println(self.config.verbose, &format!("Found {} image files", image_files.len()));
        Ok(image_files)
    }

    /// Scan options for each file of a batch
    ///
    /// In consistent mode the first file seeds the cache and every later file
    /// asks for the cached result.
    fn batch_scan_options(&self) -> (ScanOptions, ScanOptions) {
        let base = self.config.scan_options.clone();
        if !self.config.consistent_batch {
            return (base.clone(), base);
        }

        let batch_id = base
            .batch_id
            .clone()
            .map(BatchId::from)
            .unwrap_or_else(BatchId::generate);
        debug!(%batch_id, "consistent batch");

        let first = ScanOptions {
            batch_id: Some(batch_id.to_string()),
            use_cached: false,
            ..base.clone()
        };
        let rest = ScanOptions {
            use_cached: true,
            ..first.clone()
        };
        (first, rest)
    }

    fn run_batch<T, F, P>(&self, files: &[PathBuf], process_fn: F, progress_callback: P) -> Vec<Result<T>>
    where
        T: Send,
        F: Fn(&Path, &ScanOptions) -> Result<T> + Send + Sync,
        P: Fn(usize, f64, Option<Duration>) + Send + Sync,
    {
        let (first_options, rest_options) = self.batch_scan_options();
        let first = files.first().cloned();

        self.pool.install(|| {
            process_files_ordered(
                files,
                |path| {
                    let options = if Some(path) == first.as_deref() {
                        &first_options
                    } else {
                        &rest_options
                    };
                    process_fn(path, options)
                },
                progress_callback,
            )
        })
    }

    /// Scan every file and report its focal points
    pub fn detect_batch<P>(&self, files: &[PathBuf], progress_callback: P) -> Vec<Result<ProcessingResult>>
    where
        P: Fn(usize, f64, Option<Duration>) + Send + Sync,
    {
        self.run_batch(files, |path, options| self.detect_single(path, options), progress_callback)
    }

    /// Smart crop every file to `target`, writing `<stem>_crop.png` into `output_dir`
    pub fn crop_batch<P>(
        &self,
        files: &[PathBuf],
        output_dir: &Path,
        target: TargetSize,
        progress_callback: P,
    ) -> Vec<Result<ProcessingResult>>
    where
        P: Fn(usize, f64, Option<Duration>) + Send + Sync,
    {
        let names = OutputNames::new(files);
        self.run_batch(
            files,
            |path, options| self.crop_single(path, output_dir, &names, target, options),
            progress_callback,
        )
    }

    /// Build canvas, mask and layout for every file
    pub fn outpaint_batch<P>(
        &self,
        files: &[PathBuf],
        output_dir: &Path,
        request: &OutpaintRequest,
        progress_callback: P,
    ) -> Vec<Result<ProcessingResult>>
    where
        P: Fn(usize, f64, Option<Duration>) + Send + Sync,
    {
        let names = OutputNames::new(files);
        self.run_batch(
            files,
            |path, _| self.outpaint_single(path, output_dir, &names, request),
            progress_callback,
        )
    }

    fn detect_single(&self, input_path: &Path, options: &ScanOptions) -> Result<ProcessingResult> {
        let start = Instant::now();
        let img = orientation::load_oriented(input_path)?;
        let detection = self.scanner.scan(&img, options);

        Ok(ProcessingResult {
            input_path: input_path.to_path_buf(),
            output_paths: Vec::new(),
            dimensions: img.dimensions(),
            decision: format!("focal {},{}", detection.primary.x, detection.primary.y),
            detection: Some(detection),
            processing_time: start.elapsed(),
        })
    }

    fn crop_single(
        &self,
        input_path: &Path,
        output_dir: &Path,
        names: &OutputNames,
        target: TargetSize,
        options: &ScanOptions,
    ) -> Result<ProcessingResult> {
        let start = Instant::now();
        verbose_println(self.config.verbose, &format!("Processing: {}", input_path.display()));

        let img = orientation::load_oriented(input_path)?;
        let (width, height) = img.dimensions();
        let detection = self.scanner.scan(&img, options);

        let plan = plan_crop(
            width,
            height,
            target,
            &detection.primary,
            detection.secondary.as_ref(),
            &self.config.crop,
        );
        debug!(path = %input_path.display(), %plan, "crop plan");

        let out_path = names.path(output_dir, input_path, "_crop", "png")?;
        let output = apply_crop_plan(&img, &plan, target, &self.config.crop)
            .with_context(|| format!("Failed to crop {}", input_path.display()))?;

        output
            .save(&out_path)
            .with_context(|| format!("Failed to save PNG: {}", out_path.display()))?;

        Ok(ProcessingResult {
            input_path: input_path.to_path_buf(),
            output_paths: vec![out_path],
            dimensions: (width, height),
            detection: Some(detection),
            decision: plan.to_string(),
            processing_time: start.elapsed(),
        })
    }

    fn outpaint_single(
        &self,
        input_path: &Path,
        output_dir: &Path,
        names: &OutputNames,
        request: &OutpaintRequest,
    ) -> Result<ProcessingResult> {
        let start = Instant::now();
        verbose_println(self.config.verbose, &format!("Processing: {}", input_path.display()));

        let img = orientation::load_oriented(input_path)?;
        let (width, height) = img.dimensions();
        let options = &self.config.outpaint;

        let built = build_outpaint_canvas(&img, request.ratio.value(), request.gravity, options)
            .with_context(|| format!("Failed to build outpaint canvas for {}", input_path.display()))?;

        let canvas_path = names.path(output_dir, input_path, "_canvas", "png")?;
        let mask_path = names.path(output_dir, input_path, "_mask", "png")?;
        let layout_path = names.path(output_dir, input_path, "_layout", "json")?;

        built
            .canvas
            .save(&canvas_path)
            .with_context(|| format!("Failed to save canvas: {}", canvas_path.display()))?;
        built
            .mask
            .save(&mask_path)
            .with_context(|| format!("Failed to save mask: {}", mask_path.display()))?;

        let manifest = LayoutManifest {
            layout: built.layout,
            target_ratio: request.ratio.to_string(),
            gravity: request.gravity,
            mask_strategy: options.mask_strategy,
            expand_direction: request.anchors.then(|| {
                expand_direction(
                    request.gravity,
                    request.ratio.value(),
                    width as f64 / height as f64,
                )
            }),
            reframe_anchors: request
                .anchors
                .then(|| reframe_anchors(width, height, request.ratio, request.gravity)),
        };
        let json = serde_json::to_string_pretty(&manifest).context("Failed to serialize layout")?;
        fs::write(&layout_path, json).with_context(|| format!("Failed to save layout: {}", layout_path.display()))?;

        let mut output_paths = vec![canvas_path, mask_path, layout_path];

        if request.preview {
            let preview_path = names.path(output_dir, input_path, "_preview", "png")?;
            preview::build_preview(&img, &built.layout)?
                .save(&preview_path)
                .with_context(|| format!("Failed to save preview: {}", preview_path.display()))?;
            output_paths.push(preview_path);
        }

        Ok(ProcessingResult {
            input_path: input_path.to_path_buf(),
            output_paths,
            dimensions: (width, height),
            detection: None,
            decision: format!(
                "canvas {}x{} at {},{}",
                built.layout.final_width, built.layout.final_height, built.layout.original_x, built.layout.original_y
            ),
            processing_time: start.elapsed(),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomposeOutcome {
    /// Original composited over the synthesized image
    Protected,
    /// Synthesized bytes copied unchanged
    Unprotected { reason: String },
}

impl RecomposeOutcome {
    pub fn is_protected(&self) -> bool {
        matches!(self, Self::Protected)
    }

    /// Report line, e.g. `protected (feather 16)`
    pub fn decision(&self, feather: f32) -> String {
        match self {
            Self::Protected => format!("protected (feather {})", feather),
            Self::Unprotected { reason } => format!("unprotected: {}", reason),
        }
    }
}

/// Protective recomposition of one synthesized file
///
/// When the synthesized image cannot be decoded or composited the output is
/// a byte copy of it, so the caller still gets a result.
pub fn recompose_file(
    synthesized_path: &Path,
    original_path: &Path,
    layout_path: &Path,
    output: &Path,
    feather: f32,
) -> Result<RecomposeOutcome> {
    let layout_json = fs::read_to_string(layout_path)
        .with_context(|| format!("Failed to read layout: {}", layout_path.display()))?;
    let layout: CanvasLayout = serde_json::from_str(&layout_json)
        .with_context(|| format!("Failed to parse layout: {}", layout_path.display()))?;
    let original = orientation::load_oriented(original_path)?;

    let recomposed = load_synthesized(synthesized_path)
        .and_then(|synthesized| recompose_with_layout(&synthesized, &original, &layout, feather));

    match recomposed {
        Ok(img) => {
            img.save(output)
                .with_context(|| format!("Failed to save PNG: {}", output.display()))?;
            Ok(RecomposeOutcome::Protected)
        }
        Err(e) => {
            warn!(error = %e, path = %synthesized_path.display(), "recomposition failed, keeping synthesized result");
            fs::copy(synthesized_path, output).with_context(|| {
                format!(
                    "Failed to copy {} to {}",
                    synthesized_path.display(),
                    output.display()
                )
            })?;
            Ok(RecomposeOutcome::Unprotected { reason: e.to_string() })
        }
    }
}

#[derive(Debug)]
pub struct ProcessingResult {
    pub input_path: PathBuf,
    pub output_paths: Vec<PathBuf>,
    /// Upright dimensions of the input
    pub dimensions: (u32, u32),
    pub detection: Option<SubjectDetectionResult>,
    /// Human-readable summary of what was done
    pub decision: String,
    pub processing_time: Duration,
}

impl ProcessingResult {
    pub fn is_fallback(&self) -> bool {
        self.detection
            .as_ref()
            .is_some_and(|d| d.method == DetectionMethod::Fallback)
    }
}
