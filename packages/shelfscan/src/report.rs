//! Run artifacts: `result.json`, `summary.txt` and `annotated.jpg` inside a
//! timestamped folder per image.
use std::fmt::Write as _;
use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::FontVec;
use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use image::DynamicImage;
use serde::Serialize;

use crate::annotate::{annotate, save_annotated};
use crate::error::PipelineError;
use crate::pipeline::{Outcome, RunResult};

pub const RESULT_FILE: &str = "result.json";
pub const SUMMARY_FILE: &str = "summary.txt";
pub const ANNOTATED_FILE: &str = "annotated.jpg";

#[derive(Debug, Serialize)]
pub struct RunReport<'a> {
    pub image: String,
    pub generated_at: String,
    #[serde(flatten)]
    pub result: &'a RunResult,
}

impl<'a> RunReport<'a> {
    pub fn new(image_path: &Path, result: &'a RunResult, now: DateTime<Local>) -> Self {
        Self {
            image: image_path.display().to_string(),
            generated_at: now.to_rfc3339(),
            result,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize run report")
    }
}

/// `<output_dir>/<image stem>_<YYYYmmdd_HHMMSS>`
pub fn run_dir(output_dir: &Path, image_path: &Path, now: DateTime<Local>) -> PathBuf {
    let stem = image_path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "image".to_string());
    output_dir.join(format!("{}_{}", stem, now.format("%Y%m%d_%H%M%S")))
}

/// Human-readable summary, also what the CLI prints.
pub fn render_summary(image_path: &Path, result: &RunResult) -> String {
    let d = &result.diagnostics;
    let mut out = String::new();
    let _ = writeln!(out, "Image: {} ({}x{})", image_path.display(), d.image_width, d.image_height);
    let _ = writeln!(out, "Preset: {} (attempt {})", d.preset, d.attempts);
    match &d.grid_trigger {
        Some(trigger) => {
            let _ = writeln!(out, "Grid search: {} regions ({:?})", d.regions_searched, trigger);
        }
        None => {
            let _ = writeln!(out, "Grid search: not needed");
        }
    }
    let _ = writeln!(
        out,
        "Detections: {} whole-image, {} grid, {} duplicates removed, {} failed passes",
        d.whole_image_detections, d.grid_detections, d.duplicates_removed, d.failed_passes
    );
    if d.ocr_attempts > 0 {
        let _ = writeln!(out, "OCR attempts: {} ({} failed)", d.ocr_attempts, d.ocr_failures);
    }
    let _ = writeln!(
        out,
        "Candidates before filtering: {}, after: {}",
        d.candidates_before_filter, d.candidates_after_filter
    );

    match &result.outcome {
        Outcome::NoProductsFound { hint } => {
            let _ = writeln!(out, "No products found: {}", hint);
        }
        Outcome::Found { count } => {
            let _ = writeln!(out, "Products: {}", count);
            for p in &result.products {
                let brand = p.matched_brand.as_deref().unwrap_or("-");
                let _ = writeln!(
                    out,
                    "  #{} {} {:.0}% [{:?}] brand={} region={} box=({:.0}, {:.0}, {:.0}, {:.0})",
                    p.index,
                    p.final_label,
                    p.confidence * 100.0,
                    p.status,
                    brand,
                    p.source_region,
                    p.bounding_box.x1,
                    p.bounding_box.y1,
                    p.bounding_box.x2,
                    p.bounding_box.y2
                );
            }
            for (label, count) in &result.summary.per_label {
                let _ = writeln!(out, "  {}: {}", label, count);
            }
            let _ = writeln!(out, "Mean confidence: {:.1}%", result.summary.mean_confidence * 100.0);
        }
    }
    out
}

fn write_artifacts(
    dir: &Path,
    image_path: &Path,
    image: &DynamicImage,
    result: &RunResult,
    font: Option<&FontVec>,
    now: DateTime<Local>,
) -> Result<()> {
    fs::create_dir_all(dir).with_context(|| format!("Failed to create {}", dir.display()))?;
    let json = RunReport::new(image_path, result, now).to_json()?;
    fs::write(dir.join(RESULT_FILE), json).context("Failed to write result.json")?;
    fs::write(dir.join(SUMMARY_FILE), render_summary(image_path, result)).context("Failed to write summary.txt")?;
    let canvas = annotate(image, &result.products, font);
    save_annotated(&canvas, &dir.join(ANNOTATED_FILE))
}

/// Writes every artifact of one run and returns the run folder.
pub fn write_run(
    output_dir: &Path,
    image_path: &Path,
    image: &DynamicImage,
    result: &RunResult,
    font: Option<&FontVec>,
) -> Result<PathBuf, PipelineError> {
    let now = Local::now();
    let dir = run_dir(output_dir, image_path, now);
    write_artifacts(&dir, image_path, image, result, font, now)
        .map_err(|e| PipelineError::Report(format!("{:#}", e)))?;
    Ok(dir)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;
    use crate::model::{FinalProduct, LabelStatus};
    use crate::pipeline::Diagnostics;
    use crate::ranker::Summary;
    use chrono::TimeZone;

    fn result() -> RunResult {
        let products = vec![FinalProduct {
            index: 1,
            final_label: "HEINEKEN".to_string(),
            detector_label: "heineken_lata".to_string(),
            confidence: 0.8,
            bounding_box: BBox::new(2.0, 2.0, 20.0, 30.0).unwrap(),
            matched_brand: Some("HEINEKEN".to_string()),
            match_confidence: 0.38,
            source_region: "top-left".to_string(),
            status: LabelStatus::Confirmed,
            volume_ml: Some(350),
            package: None,
        }];
        RunResult {
            outcome: Outcome::Found { count: 1 },
            summary: Summary::of(&products),
            products,
            diagnostics: Diagnostics {
                image_width: 32,
                image_height: 32,
                preset: "standard".to_string(),
                attempts: 1,
                candidates_before_filter: 3,
                candidates_after_filter: 1,
                ..Diagnostics::default()
            },
        }
    }

    #[test]
    fn test_run_dir_name() {
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let dir = run_dir(Path::new("out"), Path::new("/photos/shelf_01.jpg"), now);
        assert_eq!(dir, Path::new("out").join("shelf_01_20240309_140507"));
    }

    #[test]
    fn test_summary_mentions_counts() {
        let text = render_summary(Path::new("shelf.jpg"), &result());
        assert!(text.contains("Candidates before filtering: 3, after: 1"));
        assert!(text.contains("#1 HEINEKEN 80%"));
        assert!(text.contains("region=top-left"));
    }

    #[test]
    fn test_report_json_shape() {
        let result = result();
        let now = Local.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let json = RunReport::new(Path::new("shelf.jpg"), &result, now).to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["image"], "shelf.jpg");
        assert_eq!(value["outcome"]["kind"], "found");
        let product = &value["products"][0];
        assert_eq!(product["label"], "HEINEKEN");
        assert_eq!(product["matched_brand"], "HEINEKEN");
        assert_eq!(product["region_of_origin"], "top-left");
        assert_eq!(product["status"], "confirmed");
        assert_eq!(value["summary"]["per_label"]["HEINEKEN"], 1);
        assert_eq!(value["diagnostics"]["candidates_before_filter"], 3);
    }

    #[test]
    fn test_write_run_creates_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let image = DynamicImage::new_rgb8(32, 32);
        let run = write_run(dir.path(), Path::new("shelf.jpg"), &image, &result(), None).unwrap();
        for name in [RESULT_FILE, SUMMARY_FILE, ANNOTATED_FILE] {
            assert!(run.join(name).exists(), "{}", name);
        }
    }
}
