pub mod engine;
pub mod region;
pub mod tesseract;

pub use engine::{OcrEngine, OcrError, OcrInput, OcrOutput, PageLayout};
pub use region::{BoundingBox, TextRegion};
pub use tesseract::TesseractEngine;
