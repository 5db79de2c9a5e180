//! # shelfscan
//!
//! Multi-pass localisation and OCR validation of retail beverage products in a
//! single shelf photograph.
//!
//! ## Pipeline
//!
//! - **Region partitioning**: when the whole-image detector pass returns nothing or one
//!   oversized box, the image is split into an overlapping grid and every cell is searched again
//! - **Detection**: any [`ObjectDetector`] (an external command by default) with relaxed thresholds on grid cells
//! - **Duplicate resolution**: IoU and centre-distance merging across passes
//! - **Text validation**: OCR on several enhanced variants of each crop, matched against a brand dictionary
//! - **Ranking**: area, confidence and aspect filters, a composite score and a result cap
//!
//! ## Quick Start
//!
//! ```ignore
//! use std::path::Path;
//! use std::sync::Arc;
//! use shelfscan::prelude::*;
//!
//! let detector = Arc::new(CommandDetector::new("yolo-detect"));
//! let validator = TextValidator::new(
//!     Arc::new(TesseractEngine::new()),
//!     Arc::new(SubstringMatcher),
//!     Arc::new(BrandDictionary::builtin()),
//! );
//! let pipeline = Pipeline::new(detector).with_validator(validator);
//!
//! let image = load_image(Path::new("shelf.jpg"))?;
//! let result = pipeline.run_with_presets(&image, &PipelineConfig::presets()).await?;
//! for product in &result.products {
//!     println!("#{} {} {:.0}%", product.index, product.final_label, product.confidence * 100.0);
//! }
//! ```

pub mod annotate;
pub mod brand;
pub mod config;
pub mod dedup;
pub mod detector;
pub mod error;
pub mod geometry;
pub mod model;
pub mod partition;
pub mod pipeline;
pub mod preprocess;
pub mod ranker;
pub mod report;
pub mod validator;

// Re-export commonly used types at the root level
pub use brand::{BrandDictionary, BrandMatch, BrandMatcher, CharOverlapMatcher, PackageKind, SubstringMatcher};
pub use config::{ConfigFile, PipelineConfig};
pub use dedup::{resolve_duplicates, DedupConfig, GenericBoxPolicy};
pub use detector::{CommandDetector, DetectionConfig, DetectionError, ObjectDetector, RawDetection, Thresholds};
pub use error::PipelineError;
pub use geometry::BBox;
pub use model::{Detection, FinalProduct, LabelStatus, RecognizedText, Region, ValidatedDetection, WHOLE_IMAGE};
pub use partition::{partition, plan, GridConfig, GridTrigger, PartitionPlan};
pub use pipeline::{load_image, Diagnostics, Outcome, Pipeline, RunResult};
pub use preprocess::PreprocessVariant;
pub use ranker::{rank, RankConfig, RankOutcome, Summary};
pub use report::{write_run, RunReport};
pub use validator::{OcrConfig, OverridePolicy, TextValidator};
pub use shelfscan_ocr::{OcrEngine, OcrError, PageLayout, TesseractEngine};

/// Prelude module for convenient imports
///
/// ```ignore
/// use shelfscan::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        load_image, BBox, BrandDictionary, BrandMatcher, CommandDetector, Detection, FinalProduct, LabelStatus,
        ObjectDetector, OcrEngine, Outcome, Pipeline, PipelineConfig, PipelineError, RunResult, SubstringMatcher,
        TesseractEngine, TextValidator,
    };
}
