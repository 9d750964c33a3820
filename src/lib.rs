// Library exports for reuse by other applications
pub mod cli;
pub mod config_file;
pub mod image_processing;
pub mod json_output;
pub mod utils;

// Re-export commonly used types
pub use image_processing::outpaint::{
    build_outpaint_canvas, compute_layout, CanvasLayout, CanvasLimits, Gravity, MaskStrategy, OutpaintCanvas,
    OutpaintOptions,
};
pub use image_processing::recompose::{recompose, recompose_with_layout, RecomposeError};
pub use image_processing::resize::{plan_crop, smart_crop, AspectRatio, CropPlan, CropRect, TargetSize};
pub use image_processing::subject_detection::{
    DetectionMethod, FocalPoint, FocalPointScanner, ScanOptions, ScannerConfig, SubjectDetectionResult,
};
pub use image_processing::{
    recompose_file, OutpaintRequest, ProcessingConfig, ProcessingEngine, ProcessingResult, RecomposeOutcome,
};
pub use json_output::JsonMessage;
