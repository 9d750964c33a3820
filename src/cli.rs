use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

use crate::image_processing::outpaint::{CanvasBackground, Gravity, MaskStrategy};
use crate::image_processing::recompose::DEFAULT_FEATHER;
use crate::image_processing::resize::{AspectRatio, TargetSize};

pub const DEFAULT_EXTENSIONS: &str = "jpg,jpeg,png,webp,tiff";

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum GravityArg {
    #[value(name = "center")]
    Center,
    /// Pin the original to the left edge, expand to the right
    #[value(name = "left")]
    Left,
    #[value(name = "right")]
    Right,
    /// Pin the original to the top edge, expand downwards
    #[value(name = "top")]
    Top,
    #[value(name = "bottom")]
    Bottom,
}

impl From<GravityArg> for Gravity {
    fn from(arg: GravityArg) -> Self {
        match arg {
            GravityArg::Center => Gravity::Center,
            GravityArg::Left => Gravity::Left,
            GravityArg::Right => Gravity::Right,
            GravityArg::Top => Gravity::Top,
            GravityArg::Bottom => Gravity::Bottom,
        }
    }
}

impl From<Gravity> for GravityArg {
    fn from(gravity: Gravity) -> Self {
        match gravity {
            Gravity::Center => GravityArg::Center,
            Gravity::Left => GravityArg::Left,
            Gravity::Right => GravityArg::Right,
            Gravity::Top => GravityArg::Top,
            Gravity::Bottom => GravityArg::Bottom,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum MaskStrategyArg {
    /// Keep the whole placed original
    #[value(name = "conservative")]
    Conservative,
    /// Keep the central 60 %
    #[value(name = "smart")]
    Smart,
    /// Keep the central 40 %
    #[value(name = "aggressive")]
    Aggressive,
    /// Keep the central 30 %
    #[value(name = "center-only")]
    CenterOnly,
    /// Keep heuristic subject pixels only (experimental)
    #[value(name = "subject")]
    Subject,
}

impl From<MaskStrategyArg> for MaskStrategy {
    fn from(arg: MaskStrategyArg) -> Self {
        match arg {
            MaskStrategyArg::Conservative => MaskStrategy::Conservative,
            MaskStrategyArg::Smart => MaskStrategy::Smart,
            MaskStrategyArg::Aggressive => MaskStrategy::Aggressive,
            MaskStrategyArg::CenterOnly => MaskStrategy::CenterOnly,
            MaskStrategyArg::Subject => MaskStrategy::Subject,
        }
    }
}

impl From<MaskStrategy> for MaskStrategyArg {
    fn from(strategy: MaskStrategy) -> Self {
        match strategy {
            MaskStrategy::Conservative => MaskStrategyArg::Conservative,
            MaskStrategy::Smart => MaskStrategyArg::Smart,
            MaskStrategy::Aggressive => MaskStrategyArg::Aggressive,
            MaskStrategy::CenterOnly => MaskStrategyArg::CenterOnly,
            MaskStrategy::Subject => MaskStrategyArg::Subject,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
pub enum BackgroundArg {
    /// Near-white fill for edit-style backends
    #[value(name = "generative-edit")]
    GenerativeEdit,
    /// Mid gray fill for masked-fill backends
    #[value(name = "masked-fill")]
    MaskedFill,
}

impl From<BackgroundArg> for CanvasBackground {
    fn from(arg: BackgroundArg) -> Self {
        match arg {
            BackgroundArg::GenerativeEdit => CanvasBackground::GenerativeEdit,
            BackgroundArg::MaskedFill => CanvasBackground::MaskedFill,
        }
    }
}

impl From<CanvasBackground> for BackgroundArg {
    fn from(background: CanvasBackground) -> Self {
        match background {
            CanvasBackground::GenerativeEdit => BackgroundArg::GenerativeEdit,
            CanvasBackground::MaskedFill => BackgroundArg::MaskedFill,
        }
    }
}

#[derive(Parser, Debug)]
#[command(
    name = "reframe-processor",
    version,
    about = "Focal-point smart cropping and outpaint canvas preparation",
    long_about = "
Reframe Processor

Finds the most interesting region of each photo with a heuristic scanner (skin
tones, contrast, edges, color variety) and uses it to crop to a new aspect
ratio, or prepares a canvas and mask for an external outpainting service and
recomposes the original over the synthesized result.

Example Usage:
  # Print focal points for a folder
  reframe-processor detect -i ~/Photos

  # Square crops, 1080 px wide, favoring faces
  reframe-processor crop -i ~/Photos -o ~/square --ratio 1:1 --width 1080 --protect-faces

  # Same focal point for every image of a burst
  reframe-processor crop -i ~/Burst -o ~/wide --ratio 16:9 --consistent

  # Canvas, mask and layout for a 16:9 outpaint, original pinned left
  reframe-processor outpaint -i photo.jpg -o ~/canvas --ratio 16:9 --gravity left --preview

  # Put the original back over the synthesized image
  reframe-processor recompose --synthesized out.png --original photo.jpg \\
    --layout ~/canvas/photo_layout.json -o final.png"
)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output with detailed progress information
    #[arg(short = 'v', long = "verbose", global = true)]
    pub verbose: bool,

    /// Emit progress and results as JSON lines on stdout
    #[arg(long = "json-progress", global = true)]
    pub json_progress: bool,

    /// JSON configuration file; command-line values take precedence
    #[arg(short = 'c', long = "config", value_name = "FILE", global = true)]
    pub config_file: Option<PathBuf>,

    /// Number of parallel processing jobs (0 = auto-detect CPU cores)
    #[arg(short = 'j', long = "jobs", default_value = "0", value_name = "N", global = true)]
    pub jobs: usize,

    /// Display a table of per-image decisions at the end
    #[arg(long = "report", global = true)]
    pub report: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Scan images and print their focal points
    Detect(DetectArgs),
    /// Crop images to a new aspect ratio around their focal point
    Crop(CropArgs),
    /// Build outpaint canvas, mask and layout for each image
    Outpaint(OutpaintArgs),
    /// Composite the original back over a synthesized result
    Recompose(RecomposeArgs),
}

#[derive(ClapArgs, Debug, Clone)]
pub struct InputArgs {
    /// Input directories or single image files (can be specified multiple times)
    #[arg(short = 'i', long = "input", value_name = "DIR|FILE")]
    pub input_paths: Vec<PathBuf>,

    /// Comma-separated list of image extensions to process
    #[arg(long = "extensions", default_value = DEFAULT_EXTENSIONS)]
    pub extensions_str: String,
}

impl InputArgs {
    /// Parse the extensions string into a vector
    pub fn parse_extensions(&self) -> Vec<String> {
        self.extensions_str
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DetectionArgs {
    /// Scan sensitivity, 1 (coarse) to 10 (fine)
    #[arg(long = "sensitivity", default_value = "5", value_name = "1-10")]
    pub sensitivity: u8,

    /// Try person and composition strategies before the general scan
    #[arg(long = "protect-faces")]
    pub protect_faces: bool,

    /// Look for a second subject and frame both when they fit
    #[arg(long = "dual")]
    pub dual: bool,

    /// Reuse the first image's focal point for the whole batch
    #[arg(long = "consistent")]
    pub consistent: bool,

    /// Batch identifier for --consistent (generated when omitted)
    #[arg(long = "batch-id", value_name = "ID", requires = "consistent")]
    pub batch_id: Option<String>,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct DetectArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub detection: DetectionArgs,
}

#[derive(ClapArgs, Debug, Clone)]
pub struct CropArgs {
    #[command(flatten)]
    pub input: InputArgs,

    #[command(flatten)]
    pub detection: DetectionArgs,

    /// Output directory for cropped images
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Target aspect ratio (format: W:H, e.g., 16:9)
    #[arg(short = 'r', long = "ratio", default_value = "1:1", value_name = "W:H")]
    pub ratio: String,

    /// Output width in pixels; height follows from the ratio
    #[arg(short = 'w', long = "width", default_value = "1024", value_name = "PX")]
    pub width: u32,

    /// Exact output size, overrides --ratio and --width (format: WIDTHxHEIGHT)
    #[arg(short = 's', long = "size", value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,
}

impl CropArgs {
    pub fn target(&self) -> Result<TargetSize> {
        match &self.size {
            Some(size) => size.parse(),
            None => {
                let ratio: AspectRatio = self.ratio.parse()?;
                TargetSize::from_ratio(ratio, self.width)
            }
        }
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct OutpaintArgs {
    #[command(flatten)]
    pub input: InputArgs,

    /// Output directory for canvas, mask and layout files
    #[arg(short = 'o', long = "output", value_name = "DIR", default_value = ".")]
    pub output_dir: PathBuf,

    /// Target aspect ratio (format: W:H, e.g., 16:9)
    #[arg(short = 'r', long = "ratio", default_value = "16:9", value_name = "W:H")]
    pub ratio: String,

    /// Where the original sits on the expanded canvas
    #[arg(short = 'g', long = "gravity", default_value = "center")]
    pub gravity: GravityArg,

    /// Which part of the original the mask keeps
    #[arg(long = "mask-strategy", default_value = "conservative")]
    pub mask_strategy: MaskStrategyArg,

    /// Canvas fill behind the original
    #[arg(long = "background", default_value = "generative-edit")]
    pub background: BackgroundArg,

    /// Mask seam feather radius in pixels
    #[arg(long = "feather", default_value = "4", value_name = "PX")]
    pub feather: u32,

    /// Leave expansion areas plain instead of tinting them with edge colors
    #[arg(long = "no-edge-hints")]
    pub no_edge_hints: bool,

    /// Allow canvases up to the provider maximum (4096 px) instead of 1800 px
    #[arg(long = "provider-limits")]
    pub provider_limits: bool,

    /// Also write a preview with the expansion areas outlined
    #[arg(long = "preview")]
    pub preview: bool,

    /// Add reframe anchors and expand direction to the layout JSON
    #[arg(long = "anchors")]
    pub anchors: bool,
}

impl OutpaintArgs {
    pub fn aspect_ratio(&self) -> Result<AspectRatio> {
        self.ratio
            .parse()
            .with_context(|| format!("Invalid --ratio '{}'", self.ratio))
    }
}

#[derive(ClapArgs, Debug, Clone)]
pub struct RecomposeArgs {
    /// Image returned by the synthesis service
    #[arg(long = "synthesized", value_name = "FILE")]
    pub synthesized: PathBuf,

    /// The untouched original image
    #[arg(long = "original", value_name = "FILE")]
    pub original: PathBuf,

    /// Layout JSON written by the outpaint command
    #[arg(long = "layout", value_name = "FILE")]
    pub layout: PathBuf,

    /// Output PNG path
    #[arg(short = 'o', long = "output", value_name = "FILE")]
    pub output: PathBuf,

    /// Width of the radial blend between original and synthesized pixels
    #[arg(long = "feather", default_value_t = DEFAULT_FEATHER, value_name = "PX")]
    pub feather: f32,
}

impl Args {
    pub fn parallel_jobs(&self) -> usize {
        if self.jobs == 0 {
            num_cpus::get()
        } else {
            self.jobs
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_crop_command() {
        let args = Args::parse_from([
            "reframe-processor",
            "crop",
            "-i",
            "photos",
            "--ratio",
            "16:9",
            "--width",
            "1920",
            "--dual",
            "-v",
        ]);
        assert!(args.verbose);
        let Command::Crop(crop) = args.command else {
            panic!("expected crop command");
        };
        assert!(crop.detection.dual);
        assert_eq!(crop.detection.sensitivity, 5);
        let target = crop.target().unwrap();
        assert_eq!((target.width, target.height), (1920, 1080));
    }

    #[test]
    fn test_size_overrides_ratio() {
        let args = Args::parse_from(["reframe-processor", "crop", "-i", "a.jpg", "--size", "800x480"]);
        let Command::Crop(crop) = args.command else {
            panic!("expected crop command");
        };
        let target = crop.target().unwrap();
        assert_eq!((target.width, target.height), (800, 480));
    }

    #[test]
    fn test_parse_outpaint_enums() {
        let args = Args::parse_from([
            "reframe-processor",
            "outpaint",
            "-i",
            "a.jpg",
            "--gravity",
            "left",
            "--mask-strategy",
            "center-only",
            "--background",
            "masked-fill",
        ]);
        let Command::Outpaint(outpaint) = args.command else {
            panic!("expected outpaint command");
        };
        assert_eq!(Gravity::from(outpaint.gravity), Gravity::Left);
        assert_eq!(MaskStrategy::from(outpaint.mask_strategy), MaskStrategy::CenterOnly);
        assert_eq!(CanvasBackground::from(outpaint.background), CanvasBackground::MaskedFill);
        assert_eq!(outpaint.aspect_ratio().unwrap().value(), 16.0 / 9.0);
    }

    #[test]
    fn test_batch_id_requires_consistent() {
        let parsed = Args::try_parse_from(["reframe-processor", "detect", "-i", "a", "--batch-id", "x"]);
        assert!(parsed.is_err());
    }

    #[test]
    fn test_parse_extensions() {
        let input = InputArgs {
            input_paths: vec![],
            extensions_str: "JPG, PNG , webp ,".to_string(),
        };
        assert_eq!(input.parse_extensions(), vec!["jpg", "png", "webp"]);
    }
}
