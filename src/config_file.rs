use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::{Args, Command, DetectionArgs, InputArgs, DEFAULT_EXTENSIONS};
use crate::image_processing::outpaint::{CanvasBackground, CanvasLimits, Gravity, MaskStrategy};
use crate::image_processing::resize::CropConfig;
use crate::image_processing::subject_detection::{ScannerConfig, SCANNER_CONFIG_VERSION};

/// Saved settings file
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigFile {
    pub name: Option<String>,
    pub last_modified: Option<String>,
    #[serde(default)]
    pub config: ReframeConfigJson,
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReframeConfigJson {
    pub input_path: Option<String>,
    pub output_path: Option<String>,
    pub extensions: Option<String>,
    pub jobs: Option<usize>,
    pub report: Option<bool>,
    pub sensitivity: Option<u8>,
    pub protect_faces: Option<bool>,
    pub dual_mode: Option<bool>,
    pub consistent: Option<bool>,
    pub ratio: Option<String>,
    pub width: Option<u32>,
    pub gravity: Option<Gravity>,
    pub mask_strategy: Option<MaskStrategy>,
    pub background: Option<CanvasBackground>,
    pub feather_radius: Option<u32>,
    pub edge_hints: Option<bool>,
    pub recompose_feather: Option<f32>,
    pub cache_retention_secs: Option<u64>,
    /// Full scanner weight set
    pub scanner: Option<ScannerConfig>,
    pub crop: Option<CropConfig>,
    pub canvas: Option<CanvasLimits>,
}

/// Settings only the config file can provide
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TuningSettings {
    pub scanner: ScannerConfig,
    pub crop: CropConfig,
    /// Overrides the limits picked by `--provider-limits`
    pub canvas: Option<CanvasLimits>,
    pub cache_retention: Option<Duration>,
}

impl Args {
    /// Load configuration from a JSON file and merge with command-line arguments
    /// Command-line arguments take precedence over config file values
    pub fn load_and_merge_config(&mut self) -> Result<TuningSettings> {
        let Some(config_path) = self.config_file.clone() else {
            return Ok(TuningSettings::default());
        };

        let contents = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: ConfigFile = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        let args_from_cli = std::env::args().collect::<Vec<_>>();
        let tuning = self.merge_from_config(config.config, &args_from_cli)?;

        tracing::debug!(path = ?config_path, "loaded configuration");
        Ok(tuning)
    }

    /// Fill every value the command line left at its default
    pub fn merge_from_config(
        &mut self,
        config: ReframeConfigJson,
        args_from_cli: &[String],
    ) -> Result<TuningSettings> {
        let given = |flags: &[&str]| {
            args_from_cli.iter().any(|a| {
                flags
                    .iter()
                    .any(|flag| a == flag || a.starts_with(&format!("{}=", flag)))
            })
        };

        if self.jobs == 0 {
            if let Some(jobs) = config.jobs {
                self.jobs = jobs;
            }
        }

        if !self.report {
            self.report = config.report.unwrap_or(false);
        }

        match &mut self.command {
            Command::Detect(detect) => {
                merge_input(&mut detect.input, &config);
                merge_detection(&mut detect.detection, &config, &given);
            }
            Command::Crop(crop) => {
                merge_input(&mut crop.input, &config);
                merge_detection(&mut crop.detection, &config, &given);

                if !given(&["-o", "--output"]) {
                    if let Some(output) = &config.output_path {
                        crop.output_dir = PathBuf::from(output);
                    }
                }
                if !given(&["-r", "--ratio"]) {
                    if let Some(ratio) = &config.ratio {
                        crop.ratio = ratio.clone();
                    }
                }
                if !given(&["-w", "--width"]) {
                    if let Some(width) = config.width {
                        crop.width = width;
                    }
                }
            }
            Command::Outpaint(outpaint) => {
                merge_input(&mut outpaint.input, &config);

                if !given(&["-o", "--output"]) {
                    if let Some(output) = &config.output_path {
                        outpaint.output_dir = PathBuf::from(output);
                    }
                }
                if !given(&["-r", "--ratio"]) {
                    if let Some(ratio) = &config.ratio {
                        outpaint.ratio = ratio.clone();
                    }
                }
                if !given(&["-g", "--gravity"]) {
                    if let Some(gravity) = config.gravity {
                        outpaint.gravity = gravity.into();
                    }
                }
                if !given(&["--mask-strategy"]) {
                    if let Some(strategy) = config.mask_strategy {
                        outpaint.mask_strategy = strategy.into();
                    }
                }
                if !given(&["--background"]) {
                    if let Some(background) = config.background {
                        outpaint.background = background.into();
                    }
                }
                if !given(&["--feather"]) {
                    if let Some(radius) = config.feather_radius {
                        outpaint.feather = radius;
                    }
                }
                if !outpaint.no_edge_hints {
                    outpaint.no_edge_hints = config.edge_hints == Some(false);
                }
            }
            Command::Recompose(recompose) => {
                if !given(&["--feather"]) {
                    if let Some(feather) = config.recompose_feather {
                        recompose.feather = feather;
                    }
                }
            }
        }

        let scanner = config.scanner.unwrap_or_default();
        if scanner.version > SCANNER_CONFIG_VERSION {
            return Err(anyhow::anyhow!(
                "Scanner config version {} is newer than supported version {}",
                scanner.version,
                SCANNER_CONFIG_VERSION
            ));
        }

        if let Some(canvas) = &config.canvas {
            canvas.validate().context("Invalid canvas limits in config file")?;
        }

        Ok(TuningSettings {
            scanner,
            crop: config.crop.unwrap_or_default(),
            canvas: config.canvas,
            cache_retention: config.cache_retention_secs.map(Duration::from_secs),
        })
    }
}

fn merge_input(input: &mut InputArgs, config: &ReframeConfigJson) {
    if input.input_paths.is_empty() {
        if let Some(path) = &config.input_path {
            input.input_paths = vec![PathBuf::from(path)];
        }
    }

    if input.extensions_str == DEFAULT_EXTENSIONS {
        if let Some(ext) = &config.extensions {
            input.extensions_str = ext.clone();
        }
    }
}

fn merge_detection<F>(detection: &mut DetectionArgs, config: &ReframeConfigJson, given: &F)
where
    F: Fn(&[&str]) -> bool,
{
    if !given(&["--sensitivity"]) {
        if let Some(sensitivity) = config.sensitivity {
            detection.sensitivity = sensitivity;
        }
    }

    // Boolean flags - only apply if currently false (default)
    if !detection.protect_faces {
        detection.protect_faces = config.protect_faces.unwrap_or(false);
    }
    if !detection.dual {
        detection.dual = config.dual_mode.unwrap_or(false);
    }
    if !detection.consistent {
        detection.consistent = config.consistent.unwrap_or(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::{GravityArg, MaskStrategyArg};
    use clap::Parser;

    fn cli(args: &[&str]) -> (Args, Vec<String>) {
        let parsed = Args::parse_from(args);
        (parsed, args.iter().map(|a| a.to_string()).collect())
    }

    #[test]
    fn test_config_fills_defaults() {
        let (mut args, raw) = cli(&["reframe-processor", "crop"]);
        let config: ReframeConfigJson = serde_json::from_str(
            r#"{
                "inputPath": "/photos",
                "outputPath": "/out",
                "ratio": "4:5",
                "width": 800,
                "sensitivity": 8,
                "dualMode": true,
                "jobs": 3,
                "scanner": { "skinWeight": 12.0 }
            }"#,
        )
        .unwrap();

        let tuning = args.merge_from_config(config, &raw).unwrap();
        assert_eq!(args.jobs, 3);
        assert_eq!(tuning.scanner.skin_weight, 12.0);
        assert_eq!(tuning.scanner.contrast_weight, ScannerConfig::default().contrast_weight);

        let Command::Crop(crop) = args.command else {
            panic!("expected crop command");
        };
        assert_eq!(crop.input.input_paths, vec![PathBuf::from("/photos")]);
        assert_eq!(crop.output_dir, PathBuf::from("/out"));
        assert_eq!(crop.ratio, "4:5");
        assert_eq!(crop.width, 800);
        assert_eq!(crop.detection.sensitivity, 8);
        assert!(crop.detection.dual);
    }

    #[test]
    fn test_command_line_wins() {
        let (mut args, raw) = cli(&[
            "reframe-processor",
            "outpaint",
            "-i",
            "a.jpg",
            "--gravity",
            "right",
            "--feather=2",
        ]);
        let config: ReframeConfigJson = serde_json::from_str(
            r#"{
                "gravity": "top",
                "maskStrategy": "center-only",
                "featherRadius": 9,
                "edgeHints": false
            }"#,
        )
        .unwrap();

        args.merge_from_config(config, &raw).unwrap();
        let Command::Outpaint(outpaint) = args.command else {
            panic!("expected outpaint command");
        };
        assert_eq!(outpaint.gravity, GravityArg::Right);
        assert_eq!(outpaint.feather, 2);
        assert_eq!(outpaint.mask_strategy, MaskStrategyArg::CenterOnly);
        assert!(outpaint.no_edge_hints);
        assert_eq!(outpaint.input.input_paths, vec![PathBuf::from("a.jpg")]);
    }

    #[test]
    fn test_rejects_bad_canvas_and_future_scanner() {
        let (mut args, raw) = cli(&["reframe-processor", "detect"]);
        let config: ReframeConfigJson =
            serde_json::from_str(r#"{ "canvas": { "minDimension": 900, "maxDimension": 100 } }"#).unwrap();
        assert!(args.merge_from_config(config, &raw).is_err());

        let (mut args, raw) = cli(&["reframe-processor", "detect"]);
        let config: ReframeConfigJson = serde_json::from_str(r#"{ "scanner": { "version": 99 } }"#).unwrap();
        assert!(args.merge_from_config(config, &raw).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        fs::write(
            &path,
            r#"{ "name": "burst", "config": { "cacheRetentionSecs": 30, "crop": { "dualSpanRatio": 0.5 } } }"#,
        )
        .unwrap();

        let (mut args, _) = cli(&["reframe-processor", "detect"]);
        args.config_file = Some(path);
        let tuning = args.load_and_merge_config().unwrap();
        assert_eq!(tuning.cache_retention, Some(Duration::from_secs(30)));
        assert_eq!(tuning.crop.dual_span_ratio, 0.5);
        assert_eq!(tuning.crop.ratio_epsilon, CropConfig::default().ratio_epsilon);

        args.config_file = Some(dir.path().join("missing.json"));
        assert!(args.load_and_merge_config().is_err());
    }
}
