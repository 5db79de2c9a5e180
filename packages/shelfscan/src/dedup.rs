//! Collapses detections that refer to the same physical object.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::geometry::diagonal;
use crate::model::Detection;

/// What happens to a whole-image box when grid cells found objects inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericBoxPolicy {
    /// Plain confidence ordering; whole-image boxes win ties.
    #[default]
    ConfidenceWins,
    /// Drop a whole-image box that contains the center of any grid detection.
    PreferGrid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub iou_threshold: f32,
    /// Center distance below this fraction of the image diagonal means "same object"
    /// for detections coming from different passes.
    pub center_distance_fraction: f32,
    pub policy: GenericBoxPolicy,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.3,
            center_distance_fraction: 0.15,
            policy: GenericBoxPolicy::ConfidenceWins,
        }
    }
}

fn same_object(a: &Detection, b: &Detection, max_center_distance: f32, config: &DedupConfig) -> bool {
    if a.bounding_box.iou(&b.bounding_box) > config.iou_threshold {
        return true;
    }
    a.source_region != b.source_region
        && a.bounding_box.center_distance(&b.bounding_box) < max_center_distance
}

fn drop_generic_boxes(detections: Vec<Detection>) -> Vec<Detection> {
    let grid_centers: Vec<(f32, f32)> = detections
        .iter()
        .filter(|d| !d.is_whole_image())
        .map(|d| d.bounding_box.center())
        .collect();
    if grid_centers.is_empty() {
        return detections;
    }
    detections
        .into_iter()
        .filter(|d| {
            let generic = d.is_whole_image()
                && grid_centers
                    .iter()
                    .any(|&(x, y)| d.bounding_box.contains_point(x, y));
            if generic {
                debug!("dropping generic whole-image box {:?}", d.bounding_box);
            }
            !generic
        })
        .collect()
}

/// Keeps the most confident detection of every group of duplicates.
///
/// Input order is the discovery order (whole-image pass first); the sort is
/// stable so it decides ties. The result is pairwise non-duplicate, which makes
/// the operation idempotent.
pub fn resolve_duplicates(
    detections: Vec<Detection>,
    width: u32,
    height: u32,
    config: &DedupConfig,
) -> Vec<Detection> {
    let input_len = detections.len();
    let mut candidates = match config.policy {
        GenericBoxPolicy::ConfidenceWins => detections,
        GenericBoxPolicy::PreferGrid => drop_generic_boxes(detections),
    };
    candidates.sort_by(|a, b| {
        b.confidence
            .partial_cmp(&a.confidence)
            .unwrap_or(std::cmp::Ordering::Equal)
    });

    let max_center_distance = diagonal(width, height) * config.center_distance_fraction;
    let mut kept: Vec<Detection> = Vec::with_capacity(candidates.len());
    for candidate in candidates {
        if kept
            .iter()
            .any(|k| same_object(k, &candidate, max_center_distance, config))
        {
            continue;
        }
        kept.push(candidate);
    }

    debug!("dedup: {} -> {} detections", input_len, kept.len());
    kept
}
