//! Final filtering, scoring and capping of validated detections.
use std::collections::BTreeMap;

use log::debug;
use serde::{Deserialize, Serialize};

use crate::model::{FinalProduct, ValidatedDetection};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RankConfig {
    /// Boxes smaller than this many square pixels are discarded.
    pub min_area: f32,
    pub min_confidence: f32,
    /// Accepted `height / width` range; `None` disables the check.
    pub aspect_bounds: Option<[f32; 2]>,
    pub max_results: usize,
    /// Weight of the normalised box area in the score.
    pub area_weight: f32,
}

impl Default for RankConfig {
    fn default() -> Self {
        Self {
            min_area: 2000.0,
            min_confidence: 0.25,
            aspect_bounds: Some([0.3, 6.0]),
            max_results: 4,
            area_weight: 0.3,
        }
    }
}

/// How many candidates each filter removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Rejections {
    pub too_small: usize,
    pub low_confidence: usize,
    pub bad_aspect: usize,
    pub over_limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Summary {
    pub total: usize,
    pub per_label: BTreeMap<String, usize>,
    pub mean_confidence: f32,
}

impl Summary {
    pub fn of(products: &[FinalProduct]) -> Self {
        let mut per_label = BTreeMap::new();
        for product in products {
            *per_label.entry(product.final_label.clone()).or_insert(0) += 1;
        }
        let mean_confidence = if products.is_empty() {
            0.0
        } else {
            products.iter().map(|p| p.confidence).sum::<f32>() / products.len() as f32
        };
        Self {
            total: products.len(),
            per_label,
            mean_confidence,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RankOutcome {
    pub products: Vec<FinalProduct>,
    pub rejections: Rejections,
}

/// `confidence + area_weight * area / max_area`.
pub fn score(candidate: &ValidatedDetection, max_area: f32, area_weight: f32) -> f32 {
    let area_term = if max_area > 0.0 {
        candidate.detection.bounding_box.area() / max_area
    } else {
        0.0
    };
    candidate.detection.confidence + area_weight * area_term
}

/// Filters, orders by descending score and keeps at most `max_results`.
///
/// Indices in the output are 1-based and follow the ranking.
pub fn rank(candidates: Vec<ValidatedDetection>, config: &RankConfig) -> RankOutcome {
    let mut rejections = Rejections::default();
    let survivors: Vec<ValidatedDetection> = candidates
        .into_iter()
        .filter(|c| {
            let bbox = &c.detection.bounding_box;
            if bbox.area() < config.min_area {
                rejections.too_small += 1;
                return false;
            }
            if c.detection.confidence < config.min_confidence {
                rejections.low_confidence += 1;
                return false;
            }
            if let Some([min, max]) = config.aspect_bounds {
                let aspect = bbox.aspect_ratio();
                if aspect < min || aspect > max {
                    rejections.bad_aspect += 1;
                    return false;
                }
            }
            true
        })
        .collect();

    let max_area = survivors
        .iter()
        .map(|c| c.detection.bounding_box.area())
        .fold(0.0f32, f32::max);
    let mut scored: Vec<(f32, ValidatedDetection)> = survivors
        .into_iter()
        .map(|c| (score(&c, max_area, config.area_weight), c))
        .collect();
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));

    let limit = config.max_results.max(1);
    if scored.len() > limit {
        rejections.over_limit = scored.len() - limit;
        scored.truncate(limit);
    }

    debug!("ranking kept {} products, rejected {:?}", scored.len(), rejections);
    RankOutcome {
        products: scored
            .into_iter()
            .enumerate()
            .map(|(i, (_, c))| FinalProduct::from_validated(i + 1, c))
            .collect(),
        rejections,
    }
}
