//! Decides whether the whole-image pass can be trusted and, when it cannot,
//! lays out the overlapping grid of regions for a second detection pass.
use log::debug;
use serde::{Deserialize, Serialize};

use crate::geometry::BBox;
use crate::model::{Detection, Region};

/// Grid layout and trigger threshold.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridConfig {
    /// When false the grid pass never runs.
    pub enabled: bool,
    pub rows: u32,
    pub cols: u32,
    /// Fraction of a cell shared with its neighbour, in `[0, 1)`.
    pub overlap: f32,
    /// A whole-image box larger than this fraction of the frame triggers the grid.
    pub trigger_area_fraction: f32,
}

impl Default for GridConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            rows: 3,
            cols: 3,
            overlap: 0.3,
            trigger_area_fraction: 0.7,
        }
    }
}

/// Why the grid pass was requested.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum GridTrigger {
    NoDetections,
    OversizedBox { area_fraction: f32 },
}

#[derive(Debug, Clone, PartialEq)]
pub struct PartitionPlan {
    pub grid_required: bool,
    pub trigger: Option<GridTrigger>,
    pub regions: Vec<Region>,
}

/// Returns the trigger that makes the whole-image pass untrustworthy, if any.
pub fn grid_trigger(
    width: u32,
    height: u32,
    detections: &[Detection],
    config: &GridConfig,
) -> Option<GridTrigger> {
    if detections.is_empty() {
        return Some(GridTrigger::NoDetections);
    }
    let frame_area = width as f32 * height as f32;
    if frame_area <= 0.0 {
        return None;
    }
    detections
        .iter()
        .map(|d| d.bounding_box.area() / frame_area)
        .filter(|fraction| *fraction > config.trigger_area_fraction)
        .fold(None, |largest: Option<f32>, fraction| {
            Some(largest.map_or(fraction, |l| l.max(fraction)))
        })
        .map(|area_fraction| GridTrigger::OversizedBox { area_fraction })
}

/// Start/end offsets of `cells` overlapping spans covering `[0, length]`.
fn axis_spans(length: u32, cells: u32, overlap: f32) -> Vec<(u32, u32)> {
    if length == 0 || cells == 0 {
        return Vec::new();
    }
    let overlap = overlap.clamp(0.0, 0.99);
    let n = cells as f32;
    let cell = length as f32 / (n - (n - 1.0) * overlap);
    let step = cell * (1.0 - overlap);

    (0..cells)
        .map(|i| {
            let start = (i as f32 * step).floor().max(0.0) as u32;
            let end = if i + 1 == cells {
                length
            } else {
                ((i as f32 * step + cell).ceil() as u32).min(length)
            };
            (start.min(length), end)
        })
        .collect()
}

fn cell_name(row: u32, rows: u32, col: u32, cols: u32) -> String {
    const ROW_TAGS: [&str; 3] = ["top", "middle", "bottom"];
    const COL_TAGS: [&str; 3] = ["left", "center", "right"];
    if rows == 3 && cols == 3 {
        if row == 1 && col == 1 {
            return "center".to_string();
        }
        return format!("{}-{}", ROW_TAGS[row as usize], COL_TAGS[col as usize]);
    }
    format!("r{}c{}", row, col)
}

/// Lays out the grid, clipped to the image. Cells with no area are dropped.
pub fn partition(width: u32, height: u32, config: &GridConfig) -> Vec<Region> {
    let rows = axis_spans(height, config.rows, config.overlap);
    let cols = axis_spans(width, config.cols, config.overlap);

    let mut regions = Vec::with_capacity(rows.len() * cols.len());
    for (row, &(y1, y2)) in rows.iter().enumerate() {
        for (col, &(x1, x2)) in cols.iter().enumerate() {
            let Some(bounds) = BBox::new(x1 as f32, y1 as f32, x2 as f32, y2 as f32)
                .and_then(|b| b.clip(width, height))
            else {
                continue;
            };
            regions.push(Region {
                name: cell_name(row as u32, config.rows, col as u32, config.cols),
                bounds,
            });
        }
    }
    regions
}

/// Pure function of the image size and the whole-image detections.
pub fn plan(width: u32, height: u32, detections: &[Detection], config: &GridConfig) -> PartitionPlan {
    let trigger = if config.enabled {
        grid_trigger(width, height, detections, config)
    } else {
        None
    };

    let regions = match trigger {
        Some(_) => partition(width, height, config),
        None => Vec::new(),
    };

    debug!(
        "partition {}x{}: trigger={:?}, {} regions",
        width,
        height,
        trigger,
        regions.len()
    );

    PartitionPlan {
        grid_required: trigger.is_some(),
        trigger,
        regions,
    }
}
