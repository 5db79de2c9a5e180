//! Object detector seam plus the adapter that runs it on the whole image or on a
//! grid region and maps results back to whole-image coordinates.
use std::io::Cursor;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use image::{DynamicImage, GenericImageView, ImageFormat};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::geometry::BBox;
use crate::model::{Detection, Region, WHOLE_IMAGE};

/// Every variant means "no detections for this pass" to the pipeline.
#[derive(Debug, Error)]
pub enum DetectionError {
    #[error("detector unavailable: {0}")]
    Unavailable(String),
    #[error("invalid detector input: {0}")]
    InvalidInput(String),
    #[error("malformed detector output: {0}")]
    MalformedOutput(String),
}

/// Thresholds handed to the detector's own confidence filter and NMS.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    pub confidence: f32,
    pub iou: f32,
}

/// Detection in the coordinates of the image the detector was given.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawDetection {
    pub label: String,
    pub confidence: f32,
    #[serde(rename = "box")]
    pub bbox: [f32; 4],
}

#[async_trait]
pub trait ObjectDetector: Send + Sync {
    async fn detect(
        &self,
        image: &DynamicImage,
        thresholds: Thresholds,
    ) -> Result<Vec<RawDetection>, DetectionError>;
}

/// Detector thresholds and the per-region relaxation policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub confidence: f32,
    pub iou: f32,
    /// Multiplier on `confidence` for region passes.
    pub region_confidence_factor: f32,
    /// Multiplier on `iou` for region passes.
    pub region_iou_factor: f32,
    /// Region-local boxes filling more than this fraction of the region are dropped.
    pub region_max_fill: f32,
    /// Accepted height/width range for region-local boxes; `None` disables the check.
    pub region_aspect: Option<[f32; 2]>,
    pub timeout_secs: u64,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            confidence: 0.25,
            iou: 0.45,
            region_confidence_factor: 0.5,
            region_iou_factor: 0.8,
            region_max_fill: 0.9,
            region_aspect: Some([1.2, 10.0]),
            timeout_secs: 30,
        }
    }
}

impl DetectionConfig {
    pub fn whole_thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence,
            iou: self.iou,
        }
    }

    pub fn region_thresholds(&self) -> Thresholds {
        Thresholds {
            confidence: self.confidence * self.region_confidence_factor,
            iou: self.iou * self.region_iou_factor,
        }
    }
}

/// Runs an [`ObjectDetector`] on whole images and regions.
pub struct DetectorAdapter<'a> {
    detector: &'a dyn ObjectDetector,
    config: &'a DetectionConfig,
}

impl<'a> DetectorAdapter<'a> {
    pub fn new(detector: &'a dyn ObjectDetector, config: &'a DetectionConfig) -> Self {
        Self { detector, config }
    }

    /// First pass over the full frame.
    pub async fn detect_whole(&self, image: &DynamicImage) -> Result<Vec<Detection>, DetectionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidInput("empty image".to_string()));
        }
        let raw = self.detector.detect(image, self.config.whole_thresholds()).await?;
        let detections: Vec<Detection> = raw
            .into_iter()
            .filter_map(|r| to_detection(r, width, height, 0.0, 0.0, WHOLE_IMAGE))
            .collect();
        debug!("whole-image pass: {} detections", detections.len());
        Ok(detections)
    }

    /// Second pass over one grid cell with relaxed thresholds.
    pub async fn detect_region(
        &self,
        image: &DynamicImage,
        region: &Region,
    ) -> Result<Vec<Detection>, DetectionError> {
        let (x, y, width, height) = region.bounds.pixel_window();
        let (image_width, image_height) = image.dimensions();
        if width == 0 || height == 0 || x >= image_width || y >= image_height {
            return Err(DetectionError::InvalidInput(format!(
                "region {} outside the image",
                region.name
            )));
        }
        let width = width.min(image_width - x);
        let height = height.min(image_height - y);

        let crop = image.crop_imm(x, y, width, height);
        let raw = self.detector.detect(&crop, self.config.region_thresholds()).await?;
        let region_area = width as f32 * height as f32;

        let detections: Vec<Detection> = raw
            .into_iter()
            .filter_map(|r| to_detection(r, width, height, x as f32, y as f32, &region.name))
            .filter(|d| {
                let local_fill = d.bounding_box.area() / region_area;
                if local_fill > self.config.region_max_fill {
                    debug!("{}: dropping box filling {:.0}% of the region", region.name, local_fill * 100.0);
                    return false;
                }
                match self.config.region_aspect {
                    Some([min, max]) => {
                        let aspect = d.bounding_box.aspect_ratio();
                        let keep = aspect >= min && aspect <= max;
                        if !keep {
                            debug!("{}: dropping box with aspect {:.2}", region.name, aspect);
                        }
                        keep
                    }
                    None => true,
                }
            })
            .collect();

        debug!("region {}: {} detections", region.name, detections.len());
        Ok(detections)
    }
}

/// Clips a raw box to its frame and translates it to whole-image coordinates.
fn to_detection(
    raw: RawDetection,
    frame_width: u32,
    frame_height: u32,
    offset_x: f32,
    offset_y: f32,
    source: &str,
) -> Option<Detection> {
    let [x1, y1, x2, y2] = raw.bbox;
    let local = BBox::new(x1, y1, x2, y2)?.clip(frame_width, frame_height)?;
    if !raw.confidence.is_finite() {
        return None;
    }
    Some(Detection {
        bounding_box: local.translate(offset_x, offset_y),
        label: raw.label,
        confidence: raw.confidence.clamp(0.0, 1.0),
        source_region: source.to_string(),
    })
}

/// Detector backed by an external program.
///
/// The image is written to the program's stdin as PNG; the program gets
/// `--confidence <c> --iou <i>` appended to its arguments and must print a JSON
/// array of [`RawDetection`] on stdout.
pub struct CommandDetector {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
}

impl CommandDetector {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            timeout: Duration::from_secs(30),
        }
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    async fn run(&self, png: Vec<u8>, thresholds: Thresholds) -> Result<Vec<u8>, DetectionError> {
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .args(["--confidence", &thresholds.confidence.to_string()])
            .args(["--iou", &thresholds.iou.to_string()])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DetectionError::Unavailable(format!("{}: {}", self.program.display(), e)))?;

        if let Some(mut stdin) = child.stdin.take() {
            tokio::spawn(async move {
                if let Err(e) = stdin.write_all(&png).await {
                    debug!("detector stdin closed early: {}", e);
                }
            });
        }

        let output = tokio::time::timeout(self.timeout, child.wait_with_output())
            .await
            .map_err(|_| DetectionError::Unavailable(format!("timed out after {:?}", self.timeout)))?
            .map_err(|e| DetectionError::Unavailable(e.to_string()))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("detector exited with {}: {}", output.status, stderr.trim());
            return Err(DetectionError::Unavailable(format!("exit status {}", output.status)));
        }
        Ok(output.stdout)
    }
}

/// Parses the JSON detection list printed by an external detector.
pub fn parse_detections(stdout: &[u8]) -> Result<Vec<RawDetection>, DetectionError> {
    serde_json::from_slice(stdout).map_err(|e| DetectionError::MalformedOutput(e.to_string()))
}

#[async_trait]
impl ObjectDetector for CommandDetector {
    async fn detect(
        &self,
        image: &DynamicImage,
        thresholds: Thresholds,
    ) -> Result<Vec<RawDetection>, DetectionError> {
        let (width, height) = image.dimensions();
        if width == 0 || height == 0 {
            return Err(DetectionError::InvalidInput("empty image".to_string()));
        }
        let mut png = Vec::new();
        image
            .write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
            .map_err(|e| DetectionError::InvalidInput(e.to_string()))?;

        let stdout = self.run(png, thresholds).await?;
        parse_detections(&stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Replays canned answers and records the thresholds it was called with.
    struct RecordingDetector {
        answer: Vec<RawDetection>,
        calls: Mutex<Vec<(u32, u32, Thresholds)>>,
    }

    impl RecordingDetector {
        fn new(answer: Vec<RawDetection>) -> Self {
            Self {
                answer,
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl ObjectDetector for RecordingDetector {
        async fn detect(
            &self,
            image: &DynamicImage,
            thresholds: Thresholds,
        ) -> Result<Vec<RawDetection>, DetectionError> {
            let (w, h) = image.dimensions();
            self.calls.lock().unwrap().push((w, h, thresholds));
            Ok(self.answer.clone())
        }
    }

    fn raw(label: &str, confidence: f32, bbox: [f32; 4]) -> RawDetection {
        RawDetection {
            label: label.to_string(),
            confidence,
            bbox,
        }
    }

    fn region(name: &str, x1: f32, y1: f32, x2: f32, y2: f32) -> Region {
        Region {
            name: name.to_string(),
            bounds: BBox::new(x1, y1, x2, y2).unwrap(),
        }
    }

    #[tokio::test]
    async fn test_whole_pass_uses_base_thresholds() {
        let detector = RecordingDetector::new(vec![raw("heineken", 0.9, [10.0, 10.0, 50.0, 150.0])]);
        let config = DetectionConfig::default();
        let adapter = DetectorAdapter::new(&detector, &config);
        let image = DynamicImage::new_rgb8(200, 200);

        let detections = adapter.detect_whole(&image).await.unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].source_region, WHOLE_IMAGE);

        let calls = detector.calls.lock().unwrap();
        assert_eq!(calls[0], (200, 200, Thresholds { confidence: 0.25, iou: 0.45 }));
    }

    #[tokio::test]
    async fn test_region_pass_translates_and_relaxes() {
        let detector = RecordingDetector::new(vec![raw("corona", 0.4, [5.0, 10.0, 25.0, 70.0])]);
        let config = DetectionConfig::default();
        let adapter = DetectorAdapter::new(&detector, &config);
        let image = DynamicImage::new_rgb8(300, 300);

        let cell = region("center", 100.0, 120.0, 200.0, 220.0);
        let detections = adapter.detect_region(&image, &cell).await.unwrap();

        assert_eq!(detections.len(), 1);
        assert_eq!(
            detections[0].bounding_box,
            BBox::new(105.0, 130.0, 125.0, 190.0).unwrap()
        );
        assert_eq!(detections[0].source_region, "center");

        let calls = detector.calls.lock().unwrap();
        let (w, h, thresholds) = calls[0];
        assert_eq!((w, h), (100, 100));
        assert!((thresholds.confidence - 0.125).abs() < 1e-6);
        assert!((thresholds.iou - 0.36).abs() < 1e-6);
    }

    #[tokio::test]
    async fn test_region_pass_drops_border_and_wrong_aspect() {
        let detector = RecordingDetector::new(vec![
            // fills the whole cell
            raw("bottle", 0.8, [0.0, 0.0, 100.0, 100.0]),
            // lying flat
            raw("bottle", 0.8, [10.0, 10.0, 70.0, 30.0]),
            raw("bottle", 0.8, [10.0, 10.0, 30.0, 70.0]),
        ]);
        let config = DetectionConfig::default();
        let adapter = DetectorAdapter::new(&detector, &config);
        let image = DynamicImage::new_rgb8(100, 100);

        let detections = adapter
            .detect_region(&image, &region("top-left", 0.0, 0.0, 100.0, 100.0))
            .await
            .unwrap();
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bounding_box.aspect_ratio(), 3.0);
    }

    #[tokio::test]
    async fn test_aspect_policy_can_be_disabled() {
        let detector = RecordingDetector::new(vec![raw("can", 0.8, [10.0, 10.0, 70.0, 30.0])]);
        let config = DetectionConfig {
            region_aspect: None,
            ..DetectionConfig::default()
        };
        let adapter = DetectorAdapter::new(&detector, &config);
        let image = DynamicImage::new_rgb8(100, 100);
        let detections = adapter
            .detect_region(&image, &region("r0c0", 0.0, 0.0, 100.0, 100.0))
            .await
            .unwrap();
        assert_eq!(detections.len(), 1);
    }

    #[tokio::test]
    async fn test_degenerate_boxes_dropped() {
        let detector = RecordingDetector::new(vec![
            raw("x", 0.5, [50.0, 50.0, 40.0, 60.0]),
            raw("y", f32::NAN, [1.0, 1.0, 10.0, 30.0]),
            raw("z", 0.5, [500.0, 500.0, 600.0, 700.0]),
        ]);
        let config = DetectionConfig::default();
        let adapter = DetectorAdapter::new(&detector, &config);
        let detections = adapter.detect_whole(&DynamicImage::new_rgb8(100, 100)).await.unwrap();
        assert!(detections.is_empty());
    }

    #[tokio::test]
    async fn test_empty_image_is_invalid_input() {
        let detector = RecordingDetector::new(Vec::new());
        let config = DetectionConfig::default();
        let adapter = DetectorAdapter::new(&detector, &config);
        let result = adapter.detect_whole(&DynamicImage::new_rgb8(0, 0)).await;
        assert!(matches!(result, Err(DetectionError::InvalidInput(_))));
    }

    #[test]
    fn test_parse_detections() {
        let json = br#"[{"label": "skol_lata", "confidence": 0.71, "box": [1, 2, 30, 90]}]"#;
        let parsed = parse_detections(json).unwrap();
        assert_eq!(parsed, vec![raw("skol_lata", 0.71, [1.0, 2.0, 30.0, 90.0])]);

        assert!(matches!(
            parse_detections(b"not json"),
            Err(DetectionError::MalformedOutput(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_program_is_unavailable() {
        let detector = CommandDetector::new("/nonexistent/shelfscan-detector");
        let result = detector
            .detect(&DynamicImage::new_rgb8(8, 8), Thresholds { confidence: 0.5, iou: 0.5 })
            .await;
        assert!(matches!(result, Err(DetectionError::Unavailable(_))));
    }
}
