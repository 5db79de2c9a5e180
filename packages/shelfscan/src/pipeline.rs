//! End-to-end control flow for one image: whole-image pass, optional grid
//! pass, duplicate resolution, OCR cross-check, ranking.
use std::path::Path;
use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use log::{debug, info, warn};
use serde::Serialize;

use crate::config::PipelineConfig;
use crate::dedup::resolve_duplicates;
use crate::detector::{DetectorAdapter, ObjectDetector};
use crate::error::PipelineError;
use crate::model::{Detection, FinalProduct, ValidatedDetection};
use crate::partition::{plan, GridTrigger};
use crate::ranker::{rank, Rejections, Summary};
use crate::validator::TextValidator;

const RELAX_HINT: &str =
    "no products passed the filters; try lowering --min-confidence or ranking.min_area, or widen ranking.aspect_bounds";

pub fn load_image(path: &Path) -> Result<DynamicImage, PipelineError> {
    image::open(path).map_err(|source| PipelineError::ImageLoad {
        path: path.to_path_buf(),
        source,
    })
}

/// Counters describing what every stage did during one run.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Diagnostics {
    pub image_width: u32,
    pub image_height: u32,
    pub preset: String,
    /// Presets tried before this result was accepted.
    pub attempts: usize,
    pub grid_trigger: Option<GridTrigger>,
    pub regions_searched: usize,
    pub failed_passes: usize,
    pub whole_image_detections: usize,
    pub grid_detections: usize,
    pub duplicates_removed: usize,
    pub candidates_before_filter: usize,
    pub candidates_after_filter: usize,
    pub ocr_attempts: usize,
    pub ocr_failures: usize,
    pub rejections: Rejections,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum Outcome {
    Found { count: usize },
    NoProductsFound { hint: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunResult {
    pub outcome: Outcome,
    pub products: Vec<FinalProduct>,
    pub summary: Summary,
    pub diagnostics: Diagnostics,
}

impl RunResult {
    pub fn has_products(&self) -> bool {
        !self.products.is_empty()
    }
}

/// Detector and OCR handles reused across every image of a session.
pub struct Pipeline {
    detector: Arc<dyn ObjectDetector>,
    validator: Option<TextValidator>,
}

impl Pipeline {
    pub fn new(detector: Arc<dyn ObjectDetector>) -> Self {
        Self {
            detector,
            validator: None,
        }
    }

    pub fn with_validator(mut self, validator: TextValidator) -> Self {
        self.validator = Some(validator);
        self
    }

    pub async fn run(&self, image: &DynamicImage, config: &PipelineConfig) -> Result<RunResult, PipelineError> {
        config.validate()?;
        let (width, height) = image.dimensions();
        let mut diagnostics = Diagnostics {
            image_width: width,
            image_height: height,
            preset: config.name.clone(),
            attempts: 1,
            ..Diagnostics::default()
        };
        info!("processing {}x{} image with preset {}", width, height, config.name);

        let adapter = DetectorAdapter::new(self.detector.as_ref(), &config.detection);
        let whole = match adapter.detect_whole(image).await {
            Ok(detections) => detections,
            Err(e) => {
                warn!("whole-image pass failed: {}", e);
                diagnostics.failed_passes += 1;
                Vec::new()
            }
        };
        diagnostics.whole_image_detections = whole.len();

        let partition = plan(width, height, &whole, &config.grid);
        diagnostics.grid_trigger = partition.trigger;
        let mut candidates: Vec<Detection> = whole;
        if partition.grid_required {
            info!(
                "grid search triggered ({:?}), scanning {} regions",
                partition.trigger,
                partition.regions.len()
            );
            for region in &partition.regions {
                diagnostics.regions_searched += 1;
                match adapter.detect_region(image, region).await {
                    Ok(found) => {
                        diagnostics.grid_detections += found.len();
                        candidates.extend(found);
                    }
                    Err(e) => {
                        warn!("region {} failed: {}", region.name, e);
                        diagnostics.failed_passes += 1;
                    }
                }
            }
        }

        let before_dedup = candidates.len();
        let unique = resolve_duplicates(candidates, width, height, &config.dedup);
        diagnostics.duplicates_removed = before_dedup - unique.len();
        info!("{} candidates after removing {} duplicates", unique.len(), diagnostics.duplicates_removed);

        let validated = self.validate_all(image, unique, config, &mut diagnostics).await;

        diagnostics.candidates_before_filter = validated.len();
        let ranked = rank(validated, &config.ranking);
        diagnostics.candidates_after_filter = ranked.products.len();
        diagnostics.rejections = ranked.rejections;
        info!(
            "candidates before filtering: {}, after: {}",
            diagnostics.candidates_before_filter, diagnostics.candidates_after_filter
        );

        let summary = Summary::of(&ranked.products);
        let outcome = if ranked.products.is_empty() {
            Outcome::NoProductsFound {
                hint: RELAX_HINT.to_string(),
            }
        } else {
            Outcome::Found {
                count: ranked.products.len(),
            }
        };
        Ok(RunResult {
            outcome,
            products: ranked.products,
            summary,
            diagnostics,
        })
    }

    async fn validate_all(
        &self,
        image: &DynamicImage,
        detections: Vec<Detection>,
        config: &PipelineConfig,
        diagnostics: &mut Diagnostics,
    ) -> Vec<ValidatedDetection> {
        let validator = match &self.validator {
            Some(validator) if config.ocr.enabled => validator,
            _ => {
                debug!("OCR disabled, labels pass through unverified");
                return detections.into_iter().map(ValidatedDetection::unverified).collect();
            }
        };
        let mut validated = Vec::with_capacity(detections.len());
        for detection in detections {
            let result = validator.validate(image, detection, &config.ocr).await;
            diagnostics.ocr_attempts += result.attempts;
            diagnostics.ocr_failures += result.failed_attempts;
            validated.push(result.validated);
        }
        if diagnostics.ocr_failures > 0 {
            warn!(
                "{} of {} OCR attempts failed or timed out",
                diagnostics.ocr_failures, diagnostics.ocr_attempts
            );
        }
        validated
    }

    /// Tries each preset in order and returns the first run that found
    /// products, or the last run when none did.
    pub async fn run_with_presets(
        &self,
        image: &DynamicImage,
        presets: &[PipelineConfig],
    ) -> Result<RunResult, PipelineError> {
        let mut last = None;
        for (attempt, preset) in presets.iter().enumerate() {
            let mut result = self.run(image, preset).await?;
            result.diagnostics.attempts = attempt + 1;
            if result.has_products() {
                return Ok(result);
            }
            info!("preset {} found no products", preset.name);
            last = Some(result);
        }
        last.ok_or_else(|| PipelineError::Config("no presets to run".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::{DetectionError, RawDetection, Thresholds};
    use crate::model::LabelStatus;
    use async_trait::async_trait;

    /// Returns its boxes only when the threshold is at most `max_confidence`.
    struct ShyDetector {
        whole: Vec<RawDetection>,
        max_confidence: f32,
    }

    #[async_trait]
    impl ObjectDetector for ShyDetector {
        async fn detect(&self, image: &DynamicImage, thresholds: Thresholds) -> Result<Vec<RawDetection>, DetectionError> {
            if image.width() < 600 {
                return Err(DetectionError::Unavailable("crop".to_string()));
            }
            if thresholds.confidence > self.max_confidence {
                return Ok(Vec::new());
            }
            Ok(self.whole.clone())
        }
    }

    fn raw(label: &str, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            label: label.to_string(),
            confidence,
            bbox,
        }
    }

    #[tokio::test]
    async fn test_failed_region_passes_are_absorbed() {
        let detector = ShyDetector {
            whole: vec![raw("corona", 0.9, [10.0, 10.0, 590.0, 590.0])],
            max_confidence: 1.0,
        };
        let pipeline = Pipeline::new(Arc::new(detector));
        let image = DynamicImage::new_rgb8(600, 600);

        let result = pipeline.run(&image, &PipelineConfig::default()).await.unwrap();
        assert!(matches!(result.diagnostics.grid_trigger, Some(GridTrigger::OversizedBox { .. })));
        assert_eq!(result.diagnostics.regions_searched, 9);
        assert_eq!(result.diagnostics.failed_passes, 9);
        assert_eq!(result.products.len(), 1);
        assert_eq!(result.products[0].status, LabelStatus::Unverified);
        assert_eq!(result.outcome, Outcome::Found { count: 1 });
    }

    #[tokio::test]
    async fn test_no_products_is_not_an_error() {
        let detector = ShyDetector {
            whole: Vec::new(),
            max_confidence: 1.0,
        };
        let pipeline = Pipeline::new(Arc::new(detector));
        let result = pipeline
            .run(&DynamicImage::new_rgb8(600, 600), &PipelineConfig::default())
            .await
            .unwrap();
        assert!(matches!(result.outcome, Outcome::NoProductsFound { .. }));
        assert_eq!(result.diagnostics.grid_trigger, Some(GridTrigger::NoDetections));
    }

    #[tokio::test]
    async fn test_presets_retry_until_products() {
        let detector = ShyDetector {
            whole: vec![raw("skol", 0.2, [100.0, 100.0, 180.0, 300.0])],
            max_confidence: 0.1,
        };
        let pipeline = Pipeline::new(Arc::new(detector));
        let image = DynamicImage::new_rgb8(600, 600);

        let result = pipeline.run_with_presets(&image, &PipelineConfig::presets()).await.unwrap();
        assert_eq!(result.diagnostics.preset, "permissive");
        assert_eq!(result.diagnostics.attempts, 3);
        assert_eq!(result.products.len(), 1);
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let pipeline = Pipeline::new(Arc::new(ShyDetector {
            whole: Vec::new(),
            max_confidence: 1.0,
        }));
        let mut config = PipelineConfig::default();
        config.ranking.max_results = 0;
        let err = pipeline.run(&DynamicImage::new_rgb8(600, 600), &config).await.unwrap_err();
        assert!(matches!(err, PipelineError::Config(_)));
        assert!(pipeline
            .run_with_presets(&DynamicImage::new_rgb8(600, 600), &[])
            .await
            .is_err());
    }

    #[test]
    fn test_load_missing_image() {
        let err = load_image(Path::new("/nonexistent/shelf.jpg")).unwrap_err();
        assert!(matches!(err, PipelineError::ImageLoad { .. }));
        assert!(err.to_string().contains("failed to load image"));
    }
}
