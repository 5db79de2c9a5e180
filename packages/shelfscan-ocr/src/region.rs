/// Word box in the pixel coordinates of the image handed to the engine.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundingBox {
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

#[derive(Debug, Clone)]
pub struct TextRegion {
    pub text: String,
    pub bounding_box: Option<BoundingBox>,
    /// Engine confidence normalised to `[0, 1]`.
    pub confidence: Option<f32>,
}
