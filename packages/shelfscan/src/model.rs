//! Records passed between pipeline stages. All of them are plain values owned by
//! a single pipeline invocation.
use serde::{Deserialize, Serialize};

use crate::brand::PackageKind;
use crate::geometry::BBox;

/// `source_region` of detections produced by the whole-image pass.
pub const WHOLE_IMAGE: &str = "whole";

/// One candidate object instance, always in whole-image coordinates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Detection {
    pub bounding_box: BBox,
    pub label: String,
    pub confidence: f32,
    pub source_region: String,
}

impl Detection {
    pub fn is_whole_image(&self) -> bool {
        self.source_region == WHOLE_IMAGE
    }
}

/// Sub-window of the source image used for a second detection pass.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Region {
    pub name: String,
    pub bounds: BBox,
}

/// OCR output tied to one detection.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RecognizedText {
    pub raw_text: String,
    /// Brand chosen by the active `BrandMatcher`. With the default
    /// `SubstringMatcher` the normalised text contains a known spelling of it;
    /// `CharOverlapMatcher` also accepts near misses.
    pub matched_brand: Option<String>,
    pub match_confidence: f32,
    pub volume_ml: Option<u32>,
    pub package: Option<PackageKind>,
}

/// How the OCR cross-check related to the detector's label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelStatus {
    /// OCR found the same brand the detector reported.
    Confirmed,
    /// OCR found a different brand and its label replaced the detector's.
    Corrected,
    /// OCR found a different brand but the detector's label was kept.
    Disputed,
    /// No usable OCR text, or OCR disabled.
    Unverified,
}

/// A detection after label reconciliation, before ranking.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedDetection {
    pub detection: Detection,
    pub text: RecognizedText,
    pub final_label: String,
    pub status: LabelStatus,
}

impl ValidatedDetection {
    /// Wraps a detection that never went through OCR.
    pub fn unverified(detection: Detection) -> Self {
        Self {
            final_label: detection.label.clone(),
            detection,
            text: RecognizedText::default(),
            status: LabelStatus::Unverified,
        }
    }
}

/// Output unit surfaced to the caller.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FinalProduct {
    /// 1-based position in the ranked result.
    pub index: usize,
    #[serde(rename = "label")]
    pub final_label: String,
    pub detector_label: String,
    pub confidence: f32,
    pub bounding_box: BBox,
    pub matched_brand: Option<String>,
    pub match_confidence: f32,
    #[serde(rename = "region_of_origin")]
    pub source_region: String,
    pub status: LabelStatus,
    pub volume_ml: Option<u32>,
    pub package: Option<PackageKind>,
}

impl FinalProduct {
    pub fn from_validated(index: usize, validated: ValidatedDetection) -> Self {
        let ValidatedDetection {
            detection,
            text,
            final_label,
            status,
        } = validated;
        Self {
            index,
            final_label,
            detector_label: detection.label,
            confidence: detection.confidence,
            bounding_box: detection.bounding_box,
            matched_brand: text.matched_brand,
            match_confidence: text.match_confidence,
            source_region: detection.source_region,
            status,
            volume_ml: text.volume_ml,
            package: text.package,
        }
    }
}
