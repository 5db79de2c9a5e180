//! OCR cross-check: reads the label text inside each detection and reconciles
//! it with the detector's class.
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;

use image::{DynamicImage, GenericImageView, ImageFormat};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use shelfscan_ocr::{OcrEngine, OcrError, OcrInput, PageLayout};

use crate::brand::{normalize_text, parse_package, parse_volume_ml, BrandDictionary, BrandMatcher};
use crate::model::{Detection, LabelStatus, RecognizedText, ValidatedDetection};
use crate::preprocess::{prepare_crop, PreprocessVariant};

/// Whether a disagreeing OCR brand replaces the detector's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverridePolicy {
    /// Only when the match confidence beats the detector's confidence.
    #[default]
    WhenMoreConfident,
    AlwaysPreferOcr,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OcrConfig {
    pub enabled: bool,
    /// Crop margin as a fraction of the box size on every side.
    pub margin: f32,
    pub upscale: f32,
    pub variants: Vec<PreprocessVariant>,
    pub layouts: Vec<PageLayout>,
    pub timeout_secs: u64,
    /// Normalised text shorter than this counts as no text.
    pub min_text_len: usize,
    pub override_policy: OverridePolicy,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            margin: 0.1,
            upscale: 3.0,
            variants: PreprocessVariant::defaults(),
            layouts: vec![PageLayout::SingleBlock, PageLayout::SparseText, PageLayout::SingleLine],
            timeout_secs: 8,
            min_text_len: 3,
            override_policy: OverridePolicy::WhenMoreConfident,
        }
    }
}

/// Per-detection OCR outcome with attempt bookkeeping.
#[derive(Debug, Clone)]
pub struct Validation {
    pub validated: ValidatedDetection,
    pub attempts: usize,
    pub failed_attempts: usize,
}

/// Detector label and OCR brand name agree when the normalised label contains
/// the normalised brand (`heineken_long_neck` names `HEINEKEN`).
pub fn label_names_brand(label: &str, brand: &str) -> bool {
    let brand = normalize_text(brand);
    !brand.is_empty() && normalize_text(label).contains(&brand)
}

/// Applies the override policy to one detection and its recognised text.
pub fn reconcile(detection: Detection, text: RecognizedText, policy: OverridePolicy) -> ValidatedDetection {
    let (final_label, status) = match text.matched_brand.as_deref() {
        None => (detection.label.clone(), LabelStatus::Unverified),
        Some(brand) if label_names_brand(&detection.label, brand) => {
            (detection.label.clone(), LabelStatus::Confirmed)
        }
        Some(brand) => {
            let replace = match policy {
                OverridePolicy::WhenMoreConfident => text.match_confidence > detection.confidence,
                OverridePolicy::AlwaysPreferOcr => true,
                OverridePolicy::Never => false,
            };
            if replace {
                (brand.to_string(), LabelStatus::Corrected)
            } else {
                (detection.label.clone(), LabelStatus::Disputed)
            }
        }
    };
    ValidatedDetection {
        detection,
        text,
        final_label,
        status,
    }
}

pub struct TextValidator {
    engine: Arc<dyn OcrEngine>,
    matcher: Arc<dyn BrandMatcher>,
    dictionary: Arc<BrandDictionary>,
}

impl TextValidator {
    pub fn new(
        engine: Arc<dyn OcrEngine>,
        matcher: Arc<dyn BrandMatcher>,
        dictionary: Arc<BrandDictionary>,
    ) -> Self {
        Self {
            engine,
            matcher,
            dictionary,
        }
    }

    pub fn dictionary(&self) -> &BrandDictionary {
        &self.dictionary
    }

    /// Matches already extracted text; exposed so text from any source can be scored.
    pub fn recognize_text(&self, raw_text: String, config: &OcrConfig) -> RecognizedText {
        if normalize_text(&raw_text).chars().count() < config.min_text_len {
            return RecognizedText {
                raw_text,
                ..RecognizedText::default()
            };
        }
        let found = self.matcher.best_match(&raw_text, &self.dictionary);
        RecognizedText {
            volume_ml: parse_volume_ml(&raw_text),
            package: parse_package(&raw_text),
            matched_brand: found.as_ref().map(|m| m.brand.clone()),
            match_confidence: found.map_or(0.0, |m| m.confidence),
            raw_text,
        }
    }

    async fn read_once(&self, png: &[u8], layout: PageLayout, timeout: Duration) -> Result<String, OcrError> {
        let input = OcrInput::Bytes(png.to_vec());
        match tokio::time::timeout(timeout, self.engine.recognize(&input, layout)).await {
            Ok(result) => result.map(|output| output.text),
            Err(_) => Err(OcrError::Timeout(timeout)),
        }
    }

    /// Reads every variant/layout combination of the detection's crop.
    ///
    /// A failing combination is logged and skipped; the others still count.
    pub async fn validate(&self, image: &DynamicImage, detection: Detection, config: &OcrConfig) -> Validation {
        let (width, height) = image.dimensions();
        let Some(window) = detection.bounding_box.expand(config.margin, width, height) else {
            return Validation {
                validated: ValidatedDetection::unverified(detection),
                attempts: 0,
                failed_attempts: 0,
            };
        };
        let (x, y, w, h) = window.pixel_window();
        let crop = image.crop_imm(x, y, w.min(width.saturating_sub(x)), h.min(height.saturating_sub(y)));
        let prepared = prepare_crop(&crop, config.upscale);
        let timeout = Duration::from_secs(config.timeout_secs.max(1));

        let mut texts = Vec::new();
        let mut attempts = 0;
        let mut failed_attempts = 0;
        for variant in &config.variants {
            let processed = variant.apply(&prepared);
            let mut png = Vec::new();
            if let Err(e) = DynamicImage::ImageLuma8(processed).write_to(&mut Cursor::new(&mut png), ImageFormat::Png) {
                warn!("could not encode {} crop: {}", variant.name(), e);
                continue;
            }
            for layout in &config.layouts {
                attempts += 1;
                match self.read_once(&png, *layout, timeout).await {
                    Ok(text) => {
                        if !text.trim().is_empty() {
                            texts.push(text);
                        }
                    }
                    Err(e) => {
                        failed_attempts += 1;
                        debug!("OCR {} / psm {} failed: {}", variant.name(), layout.psm(), e);
                    }
                }
            }
        }

        let text = self.recognize_text(texts.join("\n"), config);
        debug!(
            "{} at {:?}: text {:?}, brand {:?} ({:.2})",
            detection.label, detection.bounding_box, text.raw_text, text.matched_brand, text.match_confidence
        );

        Validation {
            validated: reconcile(detection, text, config.override_policy),
            attempts,
            failed_attempts,
        }
    }
}
