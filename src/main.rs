use anyhow::{Context, Result};
use clap::Parser;
use console::style;
use std::path::{Path, PathBuf};
use std::time::Instant;

use reframe_processor::cli::{Args, Command, DetectionArgs, InputArgs, OutpaintArgs, RecomposeArgs};
use reframe_processor::config_file::TuningSettings;
use reframe_processor::image_processing::batch::calculate_final_stats;
use reframe_processor::image_processing::outpaint::{CanvasLimits, OutpaintOptions};
use reframe_processor::image_processing::report::{extract_filename, ReframeReport, ReportEntry};
use reframe_processor::image_processing::subject_detection::ScanOptions;
use reframe_processor::utils::{
    create_progress_bar, error_println, format_duration, init_tracing, validate_batch_settings,
    validate_input_paths, verbose_println, warn_println,
};
use reframe_processor::{
    recompose_file, JsonMessage, OutpaintRequest, ProcessingConfig, ProcessingEngine, ProcessingResult,
    RecomposeOutcome,
};

fn main() -> Result<()> {
    let mut args = Args::parse();
    init_tracing(args.verbose);

    let tuning = args.load_and_merge_config()?;

    if !args.json_progress {
        println!("{}", style("Reframe Processor").bold().blue());
        println!("{}", style("Focal-point cropping and outpaint preparation").dim());
        println!();
    }

    let result = match &args.command {
        Command::Detect(detect) => run_batch(&args, &tuning, BatchKind::Detect, &detect.input, Some(&detect.detection)),
        Command::Crop(crop) => {
            let target = crop.target()?;
            std::fs::create_dir_all(&crop.output_dir).context("Failed to create output directory")?;
            run_batch(
                &args,
                &tuning,
                BatchKind::Crop {
                    output_dir: &crop.output_dir,
                    target,
                },
                &crop.input,
                Some(&crop.detection),
            )
        }
        Command::Outpaint(outpaint) => {
            let request = OutpaintRequest {
                ratio: outpaint.aspect_ratio()?,
                gravity: outpaint.gravity.into(),
                preview: outpaint.preview,
                anchors: outpaint.anchors,
            };
            std::fs::create_dir_all(&outpaint.output_dir).context("Failed to create output directory")?;
            run_batch(
                &args,
                &tuning,
                BatchKind::Outpaint {
                    output_dir: &outpaint.output_dir,
                    request,
                    options: outpaint_options(outpaint, &tuning),
                },
                &outpaint.input,
                None,
            )
        }
        Command::Recompose(recompose) => run_recompose(&args, recompose),
    };

    if let Err(e) = &result {
        if args.json_progress {
            JsonMessage::FileFailed {
                input_path: String::new(),
                error: format!("{:#}", e),
            }
            .emit();
        }
    }
    result
}

enum BatchKind<'a> {
    Detect,
    Crop {
        output_dir: &'a Path,
        target: reframe_processor::TargetSize,
    },
    Outpaint {
        output_dir: &'a Path,
        request: OutpaintRequest,
        options: OutpaintOptions,
    },
}

impl BatchKind<'_> {
    fn label(&self) -> &'static str {
        match self {
            BatchKind::Detect => "Scanning",
            BatchKind::Crop { .. } => "Cropping",
            BatchKind::Outpaint { .. } => "Building canvases",
        }
    }

    fn output_dir(&self) -> Option<&Path> {
        match self {
            BatchKind::Detect => None,
            BatchKind::Crop { output_dir, .. } | BatchKind::Outpaint { output_dir, .. } => Some(*output_dir),
        }
    }
}

fn outpaint_options(outpaint: &OutpaintArgs, tuning: &TuningSettings) -> OutpaintOptions {
    let limits = tuning.canvas.unwrap_or_else(|| {
        if outpaint.provider_limits {
            CanvasLimits::provider()
        } else {
            CanvasLimits::default()
        }
    });

    OutpaintOptions {
        limits,
        background: outpaint.background.into(),
        edge_hints: !outpaint.no_edge_hints,
        feather_radius: outpaint.feather,
        mask_strategy: outpaint.mask_strategy.into(),
        ..OutpaintOptions::default()
    }
}

fn build_config(
    args: &Args,
    tuning: &TuningSettings,
    input: &InputArgs,
    detection: Option<&DetectionArgs>,
) -> Result<ProcessingConfig> {
    let extensions = input.parse_extensions();
    let sensitivity = detection.map(|d| d.sensitivity).unwrap_or(5);
    validate_input_paths(&input.input_paths)?;
    validate_batch_settings(sensitivity, args.jobs, &extensions)?;

    let defaults = ProcessingConfig::default();
    Ok(ProcessingConfig {
        extensions,
        verbose: args.verbose && !args.json_progress,
        parallel_jobs: args.parallel_jobs(),
        scanner: tuning.scanner.clone(),
        scan_options: ScanOptions {
            sensitivity,
            protect_faces: detection.is_some_and(|d| d.protect_faces),
            dual_mode: detection.is_some_and(|d| d.dual),
            batch_id: detection.and_then(|d| d.batch_id.clone()),
            use_cached: false,
        },
        consistent_batch: detection.is_some_and(|d| d.consistent),
        crop: tuning.crop.clone(),
        cache_retention: tuning.cache_retention.unwrap_or(defaults.cache_retention),
        ..defaults
    })
}

fn run_batch(
    args: &Args,
    tuning: &TuningSettings,
    kind: BatchKind<'_>,
    input: &InputArgs,
    detection: Option<&DetectionArgs>,
) -> Result<()> {
    let start_time = Instant::now();
    let mut config = build_config(args, tuning, input, detection)?;
    if let BatchKind::Outpaint { options, .. } = &kind {
        options.limits.validate()?;
        config.outpaint = options.clone();
    }

    if config.verbose {
        println!("{}", style("Configuration:").bold());
        println!("  Parallel jobs: {}", config.parallel_jobs);
        println!("  Extensions: {:?}", config.extensions);
        println!("  Sensitivity: {}", config.scan_options.sensitivity);
        println!("  Protect faces: {}", config.scan_options.protect_faces);
        println!("  Dual subjects: {}", config.scan_options.dual_mode);
        println!("  Consistent batch: {}", config.consistent_batch);
        if let BatchKind::Outpaint { options, request, .. } = &kind {
            println!("  Target ratio: {}", request.ratio);
            println!("  Gravity: {}", request.gravity);
            println!("  Mask strategy: {}", options.mask_strategy);
            println!(
                "  Canvas limits: {}-{} px, block {}",
                options.limits.min_dimension, options.limits.max_dimension, options.limits.block_size
            );
        }
        println!();
    }

    let engine = ProcessingEngine::new(config)?;
    let image_files = engine.discover_images(&input.input_paths)?;

    if image_files.is_empty() {
        if args.json_progress {
            JsonMessage::summary(0, 0, 0, 0, start_time.elapsed().as_secs_f64());
        } else {
            println!("{}", style("No images found with specified extensions").red());
        }
        return Ok(());
    }

    let total = image_files.len();
    let json = args.json_progress;
    let progress_bar = (!json).then(|| {
        let pb = create_progress_bar(total as u64);
        pb.set_message(kind.label());
        pb
    });

    let progress = |completed: usize, _fraction: f64, eta: Option<std::time::Duration>| {
        if json {
            JsonMessage::progress(completed, total, format!("{} {}/{}", kind.label(), completed, total));
        } else if let Some(pb) = &progress_bar {
            pb.set_position(completed as u64);
            if let Some(eta) = eta {
                pb.set_message(format!("{} (~{} left)", kind.label(), format_duration(eta)));
            }
        }
    };

    let results = match &kind {
        BatchKind::Detect => engine.detect_batch(&image_files, progress),
        BatchKind::Crop { output_dir, target } => engine.crop_batch(&image_files, output_dir, *target, progress),
        BatchKind::Outpaint {
            output_dir, request, ..
        } => engine.outpaint_batch(&image_files, output_dir, request, progress),
    };

    if let Some(pb) = &progress_bar {
        pb.finish_with_message("✓ Processing complete!");
        println!();
    }

    let fallbacks = results
        .iter()
        .filter(|r| r.as_ref().is_ok_and(|r| r.is_fallback()))
        .count();
    let stats = calculate_final_stats(&results, start_time.elapsed(), fallbacks);

    if json {
        for (path, result) in image_files.iter().zip(&results) {
            match result {
                Ok(r) => {
                    if let Some(detection) = &r.detection {
                        JsonMessage::detection(path, r.dimensions, detection);
                    }
                    JsonMessage::file_completed(path, &r.output_paths, r.processing_time.as_millis());
                }
                Err(e) => JsonMessage::file_failed(path, format!("{:#}", e)),
            }
        }
        JsonMessage::summary(
            stats.total_files,
            stats.successful,
            stats.failed,
            stats.fallbacks,
            stats.total_duration.as_secs_f64(),
        );
        return Ok(());
    }

    print_results(&image_files, &results);

    println!();
    println!("{}", style("Results Summary:").bold().green());
    println!("  Successfully processed: {}", style(stats.successful).bold().green());
    if stats.failed > 0 {
        println!("  Failed: {}", style(stats.failed).bold().red());
    }
    if stats.fallbacks > 0 {
        println!(
            "  Center fallbacks (no subject found): {}",
            style(stats.fallbacks).bold().yellow()
        );
    }
    println!("  Success rate: {:.1}%", stats.success_rate());

    println!();
    println!("{}", style("Performance:").bold().blue());
    println!(
        "  Total processing time: {}",
        style(format_duration(stats.total_duration)).bold()
    );
    println!(
        "  Average time per image: {}",
        style(format_duration(stats.average_duration())).dim()
    );

    if let Some(output_dir) = kind.output_dir() {
        println!();
        println!("{}", style("Output files:").bold().green());
        println!("  All files: {}", output_dir.display());
    }

    if stats.failed > 0 {
        println!();
        println!("{}", style("Errors encountered:").bold().red());
        let mut error_count = 0;
        for (path, result) in image_files.iter().zip(&results) {
            if let Err(e) = result {
                error_count += 1;
                println!(
                    "  {}: {} - {:#}",
                    style(format!("#{}", error_count)).dim(),
                    style(extract_filename(path)).bold().red(),
                    e
                );
            }
        }
        println!();
        println!("  Check image files and try again with --verbose for more details");
    }

    if args.report {
        let mut report = ReframeReport::new();
        for result in results.iter().flatten() {
            report.add(ReportEntry {
                input_filename: extract_filename(&result.input_path),
                output_filename: result
                    .output_paths
                    .first()
                    .map(|p| extract_filename(p.as_path()))
                    .unwrap_or_else(|| "-".to_string()),
                detection: result.detection.clone(),
                decision: result.decision.clone(),
            });
        }
        report.print();
    }

    Ok(())
}

fn print_results(image_files: &[PathBuf], results: &[Result<ProcessingResult>]) {
    let successful: Vec<_> = results.iter().flatten().collect();
    if successful.is_empty() {
        return;
    }

    println!("{}", style("Detailed Processing Results:").bold().blue());
    for (i, result) in successful.iter().enumerate() {
        let filename = extract_filename(&result.input_path);
        let (width, height) = result.dimensions;

        let detection_info = match &result.detection {
            Some(d) if d.primary.is_fallback() => style("○ center fallback".to_string()).dim(),
            Some(d) => {
                let mut info = format!(
                    "✓ focal ({}, {}) score {:.2} [{}]",
                    d.primary.x, d.primary.y, d.primary.score, d.method
                );
                if let Some(s) = d.secondary {
                    info.push_str(&format!(", secondary ({}, {})", s.x, s.y));
                }
                style(info).green()
            }
            None => style(result.decision.clone()).cyan(),
        };

        println!(
            "  {}: {} {} - {}",
            style(format!("#{}", i + 1)).dim(),
            style(filename).bold(),
            style(format!("{}x{}", width, height)).dim(),
            detection_info
        );
    }

    let failed = image_files.len().saturating_sub(successful.len());
    if failed > 0 {
        warn_println(&format!("{} of {} images failed", failed, image_files.len()));
    }
}

fn run_recompose(args: &Args, recompose: &RecomposeArgs) -> Result<()> {
    let start_time = Instant::now();
    for path in [&recompose.synthesized, &recompose.original, &recompose.layout] {
        if !path.is_file() {
            return Err(anyhow::anyhow!("Input file does not exist: {}", path.display()));
        }
    }
    if recompose.feather < 0.0 {
        return Err(anyhow::anyhow!("Feather must not be negative, got: {}", recompose.feather));
    }

    verbose_println(
        args.verbose && !args.json_progress,
        &format!(
            "Recomposing {} over {} (feather {})",
            recompose.original.display(),
            recompose.synthesized.display(),
            recompose.feather
        ),
    );

    let outcome = recompose_file(
        &recompose.synthesized,
        &recompose.original,
        &recompose.layout,
        &recompose.output,
        recompose.feather,
    )?;

    if args.json_progress {
        JsonMessage::recomposed(
            &recompose.synthesized,
            &recompose.output,
            &outcome,
            start_time.elapsed().as_millis(),
        );
        return Ok(());
    }

    match &outcome {
        RecomposeOutcome::Protected => println!(
            "{} {}",
            style("✓ Recomposed:").bold().green(),
            recompose.output.display()
        ),
        RecomposeOutcome::Unprotected { reason } => {
            error_println(&format!("Recomposition failed: {}", reason));
            warn_println(&format!(
                "Wrote the synthesized image unchanged to {}",
                recompose.output.display()
            ));
        }
    }
    println!(
        "  Total processing time: {}",
        style(format_duration(start_time.elapsed())).bold()
    );

    if args.report {
        let mut report = ReframeReport::new();
        report.add(ReportEntry {
            input_filename: extract_filename(&recompose.synthesized),
            output_filename: extract_filename(&recompose.output),
            detection: None,
            decision: outcome.decision(recompose.feather),
        });
        report.print();
    }

    Ok(())
}
