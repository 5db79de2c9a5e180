//! Axis-aligned box arithmetic shared by every pipeline stage.
use serde::{Deserialize, Serialize};

/// Rectangle in image pixel coordinates, `x2 > x1` and `y2 > y1`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
}

impl BBox {
    /// Builds a box, rejecting degenerate or non-finite corners.
    pub fn new(x1: f32, y1: f32, x2: f32, y2: f32) -> Option<Self> {
        let finite = [x1, y1, x2, y2].iter().all(|v| v.is_finite());
        (finite && x2 > x1 && y2 > y1).then_some(Self { x1, y1, x2, y2 })
    }

    pub fn from_xywh(x: f32, y: f32, width: f32, height: f32) -> Option<Self> {
        Self::new(x, y, x + width, y + height)
    }

    /// The full frame of a `width` x `height` image.
    pub fn frame(width: u32, height: u32) -> Option<Self> {
        Self::new(0.0, 0.0, width as f32, height as f32)
    }

    pub fn width(&self) -> f32 {
        self.x2 - self.x1
    }

    pub fn height(&self) -> f32 {
        self.y2 - self.y1
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }

    /// Height over width; upright bottles and cans are above 1.
    pub fn aspect_ratio(&self) -> f32 {
        self.height() / self.width()
    }

    pub fn contains_point(&self, x: f32, y: f32) -> bool {
        x >= self.x1 && x <= self.x2 && y >= self.y1 && y <= self.y2
    }

    pub fn intersection(&self, other: &BBox) -> Option<BBox> {
        BBox::new(
            self.x1.max(other.x1),
            self.y1.max(other.y1),
            self.x2.min(other.x2),
            self.y2.min(other.y2),
        )
    }

    pub fn iou(&self, other: &BBox) -> f32 {
        let inter = self.intersection(other).map_or(0.0, |b| b.area());
        let union = self.area() + other.area() - inter;
        if union <= 0.0 {
            0.0
        } else {
            inter / union
        }
    }

    pub fn center_distance(&self, other: &BBox) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        ((ax - bx).powi(2) + (ay - by).powi(2)).sqrt()
    }

    pub fn translate(&self, dx: f32, dy: f32) -> BBox {
        BBox {
            x1: self.x1 + dx,
            y1: self.y1 + dy,
            x2: self.x2 + dx,
            y2: self.y2 + dy,
        }
    }

    /// Clips to `[0, width] x [0, height]`; `None` when nothing is left.
    pub fn clip(&self, width: u32, height: u32) -> Option<BBox> {
        BBox::new(
            self.x1.max(0.0),
            self.y1.max(0.0),
            self.x2.min(width as f32),
            self.y2.min(height as f32),
        )
    }

    /// Grows every side by `margin` times the box size, then clips to the image.
    pub fn expand(&self, margin: f32, width: u32, height: u32) -> Option<BBox> {
        let dx = self.width() * margin;
        let dy = self.height() * margin;
        BBox::new(self.x1 - dx, self.y1 - dy, self.x2 + dx, self.y2 + dy)?.clip(width, height)
    }

    /// Integer pixel window `(x, y, width, height)` fully covering the box.
    pub fn pixel_window(&self) -> (u32, u32, u32, u32) {
        let x = self.x1.max(0.0).floor() as u32;
        let y = self.y1.max(0.0).floor() as u32;
        let x2 = self.x2.max(0.0).ceil() as u32;
        let y2 = self.y2.max(0.0).ceil() as u32;
        (x, y, x2.saturating_sub(x), y2.saturating_sub(y))
    }
}

/// Length of the image diagonal in pixels.
pub fn diagonal(width: u32, height: u32) -> f32 {
    ((width as f32).powi(2) + (height as f32).powi(2)).sqrt()
}
