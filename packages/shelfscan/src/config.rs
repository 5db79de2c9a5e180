//! Immutable pipeline configuration and the ordered retry presets.
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::dedup::DedupConfig;
use crate::detector::DetectionConfig;
use crate::error::PipelineError;
use crate::partition::GridConfig;
use crate::ranker::RankConfig;
use crate::validator::OcrConfig;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Preset name, reported with the result.
    pub name: String,
    pub detection: DetectionConfig,
    pub grid: GridConfig,
    pub dedup: DedupConfig,
    pub ocr: OcrConfig,
    pub ranking: RankConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            name: "standard".to_string(),
            detection: DetectionConfig::default(),
            grid: GridConfig::default(),
            dedup: DedupConfig::default(),
            ocr: OcrConfig::default(),
            ranking: RankConfig::default(),
        }
    }
}

fn check_fraction(name: &str, value: f32) -> Result<(), PipelineError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(PipelineError::Config(format!("{} must be within [0, 1], got {}", name, value)))
    }
}

fn check_bounds(name: &str, bounds: Option<[f32; 2]>) -> Result<(), PipelineError> {
    match bounds {
        Some([min, max]) if !(min.is_finite() && max.is_finite() && min >= 0.0 && min <= max) => Err(
            PipelineError::Config(format!("{} must be an ordered pair, got [{}, {}]", name, min, max)),
        ),
        _ => Ok(()),
    }
}

/// Contents of a `--config` file: one configuration, or an explicit retry
/// list such as the output of `shelfscan presets`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigFile {
    Presets(Vec<PipelineConfig>),
    Single(PipelineConfig),
}

impl ConfigFile {
    /// Parses and validates every configuration in the file.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let value: serde_json::Value = serde_json::from_str(json).context("Failed to parse pipeline config JSON")?;
        let file = if value.is_array() {
            ConfigFile::Presets(serde_json::from_value(value).context("Failed to parse pipeline config list")?)
        } else {
            ConfigFile::Single(serde_json::from_value(value).context("Failed to parse pipeline config JSON")?)
        };
        match &file {
            ConfigFile::Presets(list) if list.is_empty() => {
                return Err(PipelineError::Config("config list is empty".to_string()).into());
            }
            ConfigFile::Presets(list) => {
                for config in list {
                    config.validate()?;
                }
            }
            ConfigFile::Single(config) => config.validate()?,
        }
        Ok(file)
    }

    pub fn from_json_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        Self::from_json_str(&json).with_context(|| format!("Invalid config file {}", path.display()))
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), PipelineError> {
        let d = &self.detection;
        check_fraction("detection.confidence", d.confidence)?;
        check_fraction("detection.iou", d.iou)?;
        check_fraction("detection.region_confidence_factor", d.region_confidence_factor)?;
        check_fraction("detection.region_iou_factor", d.region_iou_factor)?;
        check_fraction("detection.region_max_fill", d.region_max_fill)?;
        check_bounds("detection.region_aspect", d.region_aspect)?;

        let g = &self.grid;
        if g.rows == 0 || g.cols == 0 {
            return Err(PipelineError::Config("grid rows and cols must be at least 1".to_string()));
        }
        if !(0.0..1.0).contains(&g.overlap) {
            return Err(PipelineError::Config(format!("grid.overlap must be within [0, 1), got {}", g.overlap)));
        }
        check_fraction("grid.trigger_area_fraction", g.trigger_area_fraction)?;

        check_fraction("dedup.iou_threshold", self.dedup.iou_threshold)?;
        check_fraction("dedup.center_distance_fraction", self.dedup.center_distance_fraction)?;

        check_fraction("ocr.margin", self.ocr.margin)?;
        if !(self.ocr.upscale.is_finite() && self.ocr.upscale > 0.0) {
            return Err(PipelineError::Config(format!("ocr.upscale must be positive, got {}", self.ocr.upscale)));
        }

        let r = &self.ranking;
        check_fraction("ranking.min_confidence", r.min_confidence)?;
        check_bounds("ranking.aspect_bounds", r.aspect_bounds)?;
        if r.max_results == 0 {
            return Err(PipelineError::Config("ranking.max_results must be at least 1".to_string()));
        }
        if r.min_area.is_nan() || r.min_area < 0.0 {
            return Err(PipelineError::Config(format!("ranking.min_area must be non-negative, got {}", r.min_area)));
        }
        Ok(())
    }

    /// Same configuration with looser detection and ranking thresholds.
    fn relaxed(&self, name: &str, factor: f32) -> Self {
        let mut config = self.clone();
        config.name = name.to_string();
        config.detection.confidence *= factor;
        config.ranking.min_confidence *= factor;
        config.ranking.min_area *= factor;
        config
    }

    /// Ordered retry list: `standard`, `relaxed`, `permissive`, each derived
    /// from `self` with progressively lower thresholds.
    pub fn presets_from(&self) -> Vec<PipelineConfig> {
        vec![
            self.clone(),
            self.relaxed("relaxed", 0.6),
            self.relaxed("permissive", 0.3),
        ]
    }

    pub fn presets() -> Vec<PipelineConfig> {
        PipelineConfig::default().presets_from()
    }
}
