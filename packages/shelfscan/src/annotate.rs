//! Draws the ranked products onto a copy of the source image.
use std::path::Path;

use ab_glyph::FontVec;
use anyhow::{anyhow, Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut, draw_text_mut, text_size};
use imageproc::rect::Rect;

use crate::model::{FinalProduct, LabelStatus};

const STROKE: i32 = 3;
const LABEL_SCALE: f32 = 18.0;
/// Pixel size of one dot of the built-in caption font.
const DOT: i32 = 2;
const GLYPH_WIDTH: i32 = 5;
const GLYPH_HEIGHT: i32 = 7;

fn status_color(status: LabelStatus) -> Rgb<u8> {
    match status {
        LabelStatus::Confirmed => Rgb([0, 200, 0]),
        LabelStatus::Corrected => Rgb([0, 120, 255]),
        LabelStatus::Disputed => Rgb([255, 140, 0]),
        LabelStatus::Unverified => Rgb([255, 0, 0]),
    }
}

/// Caption drawn above each box, e.g. `#1 HEINEKEN 87%`.
pub fn caption(product: &FinalProduct) -> String {
    format!(
        "#{} {} {:.0}%",
        product.index,
        product.final_label,
        product.confidence * 100.0
    )
}

pub fn load_font(path: &Path) -> Result<FontVec> {
    let bytes = std::fs::read(path).with_context(|| format!("Failed to read font {}", path.display()))?;
    FontVec::try_from_vec(bytes).map_err(|e| anyhow!("Invalid font {}: {}", path.display(), e))
}

/// Renders boxes and `#N LABEL NN%` captions onto an RGB copy. Without a
/// font the captions use a built-in 5x7 bitmap font.
pub fn annotate(image: &DynamicImage, products: &[FinalProduct], font: Option<&FontVec>) -> RgbImage {
    let mut canvas = image.to_rgb8();
    let (width, height) = canvas.dimensions();

    for product in products {
        let Some(bbox) = product.bounding_box.clip(width, height) else {
            continue;
        };
        let (x, y, w, h) = bbox.pixel_window();
        if w == 0 || h == 0 {
            continue;
        }
        let color = status_color(product.status);
        for offset in 0..STROKE {
            let grow = (offset * 2) as u32;
            let rect = Rect::at(x as i32 - offset, y as i32 - offset).of_size(w + grow, h + grow);
            draw_hollow_rect_mut(&mut canvas, rect, color);
        }

        let text = caption(product);
        match font {
            Some(font) => draw_caption(&mut canvas, font, x as i32, y as i32, &text, color),
            None => draw_bitmap_caption(&mut canvas, x as i32, y as i32, &text, color),
        }
    }
    canvas
}

fn draw_caption(canvas: &mut RgbImage, font: &FontVec, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let (text_w, text_h) = text_size(LABEL_SCALE, font, text);
    let label_y = (y - text_h as i32 - 4).max(0);
    if text_w > 0 && text_h > 0 {
        let background = Rect::at(x, label_y).of_size(text_w + 4, text_h + 4);
        draw_filled_rect_mut(canvas, background, color);
    }
    draw_text_mut(canvas, Rgb([255, 255, 255]), x + 2, label_y + 2, LABEL_SCALE, font, text);
}

/// Rows of a 5x7 glyph, most significant of the low five bits on the left.
/// Lowercase letters use the uppercase glyph; anything unknown is drawn as a box.
fn glyph(c: char) -> [u8; 7] {
    match c.to_ascii_uppercase() {
        '0' => [0x0E, 0x11, 0x13, 0x15, 0x19, 0x11, 0x0E],
        '1' => [0x04, 0x0C, 0x04, 0x04, 0x04, 0x04, 0x0E],
        '2' => [0x0E, 0x11, 0x01, 0x02, 0x04, 0x08, 0x1F],
        '3' => [0x1F, 0x02, 0x04, 0x02, 0x01, 0x11, 0x0E],
        '4' => [0x02, 0x06, 0x0A, 0x12, 0x1F, 0x02, 0x02],
        '5' => [0x1F, 0x10, 0x1E, 0x01, 0x01, 0x11, 0x0E],
        '6' => [0x06, 0x08, 0x10, 0x1E, 0x11, 0x11, 0x0E],
        '7' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x08, 0x08],
        '8' => [0x0E, 0x11, 0x11, 0x0E, 0x11, 0x11, 0x0E],
        '9' => [0x0E, 0x11, 0x11, 0x0F, 0x01, 0x02, 0x0C],
        'A' => [0x0E, 0x11, 0x11, 0x11, 0x1F, 0x11, 0x11],
        'B' => [0x1E, 0x11, 0x11, 0x1E, 0x11, 0x11, 0x1E],
        'C' => [0x0E, 0x11, 0x10, 0x10, 0x10, 0x11, 0x0E],
        'D' => [0x1C, 0x12, 0x11, 0x11, 0x11, 0x12, 0x1C],
        'E' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x1F],
        'F' => [0x1F, 0x10, 0x10, 0x1E, 0x10, 0x10, 0x10],
        'G' => [0x0E, 0x11, 0x10, 0x17, 0x11, 0x11, 0x0F],
        'H' => [0x11, 0x11, 0x11, 0x1F, 0x11, 0x11, 0x11],
        'I' => [0x0E, 0x04, 0x04, 0x04, 0x04, 0x04, 0x0E],
        'J' => [0x07, 0x02, 0x02, 0x02, 0x02, 0x12, 0x0C],
        'K' => [0x11, 0x12, 0x14, 0x18, 0x14, 0x12, 0x11],
        'L' => [0x10, 0x10, 0x10, 0x10, 0x10, 0x10, 0x1F],
        'M' => [0x11, 0x1B, 0x15, 0x15, 0x11, 0x11, 0x11],
        'N' => [0x11, 0x11, 0x19, 0x15, 0x13, 0x11, 0x11],
        'O' => [0x0E, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'P' => [0x1E, 0x11, 0x11, 0x1E, 0x10, 0x10, 0x10],
        'Q' => [0x0E, 0x11, 0x11, 0x11, 0x15, 0x12, 0x0D],
        'R' => [0x1E, 0x11, 0x11, 0x1E, 0x14, 0x12, 0x11],
        'S' => [0x0F, 0x10, 0x10, 0x0E, 0x01, 0x01, 0x1E],
        'T' => [0x1F, 0x04, 0x04, 0x04, 0x04, 0x04, 0x04],
        'U' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x11, 0x0E],
        'V' => [0x11, 0x11, 0x11, 0x11, 0x11, 0x0A, 0x04],
        'W' => [0x11, 0x11, 0x11, 0x15, 0x15, 0x15, 0x0A],
        'X' => [0x11, 0x11, 0x0A, 0x04, 0x0A, 0x11, 0x11],
        'Y' => [0x11, 0x11, 0x11, 0x0A, 0x04, 0x04, 0x04],
        'Z' => [0x1F, 0x01, 0x02, 0x04, 0x08, 0x10, 0x1F],
        '#' => [0x0A, 0x0A, 0x1F, 0x0A, 0x1F, 0x0A, 0x0A],
        '%' => [0x18, 0x19, 0x02, 0x04, 0x08, 0x13, 0x03],
        '-' => [0x00, 0x00, 0x00, 0x1F, 0x00, 0x00, 0x00],
        '_' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x1F],
        '.' => [0x00, 0x00, 0x00, 0x00, 0x00, 0x0C, 0x0C],
        ':' => [0x00, 0x0C, 0x0C, 0x00, 0x0C, 0x0C, 0x00],
        '/' => [0x00, 0x01, 0x02, 0x04, 0x08, 0x10, 0x00],
        ' ' => [0x00; 7],
        _ => [0x1F, 0x11, 0x11, 0x11, 0x11, 0x11, 0x1F],
    }
}

/// Caption in the built-in font, white on the box colour, above the box
/// (or inside it when the box touches the top edge).
fn draw_bitmap_caption(canvas: &mut RgbImage, x: i32, y: i32, text: &str, color: Rgb<u8>) {
    let advance = (GLYPH_WIDTH + 1) * DOT;
    let chars = text.chars().count() as i32;
    if chars == 0 {
        return;
    }
    let text_w = chars * advance - DOT;
    let text_h = GLYPH_HEIGHT * DOT;
    let label_y = (y - text_h - 4).max(0);
    let background = Rect::at(x, label_y).of_size((text_w + 4) as u32, (text_h + 4) as u32);
    draw_filled_rect_mut(canvas, background, color);

    let white = Rgb([255, 255, 255]);
    for (i, c) in text.chars().enumerate() {
        let left = x + 2 + i as i32 * advance;
        for (row, bits) in glyph(c).into_iter().enumerate() {
            for col in 0..GLYPH_WIDTH {
                if (bits >> (GLYPH_WIDTH - 1 - col)) & 1 == 1 {
                    let dot = Rect::at(left + col * DOT, label_y + 2 + row as i32 * DOT).of_size(DOT as u32, DOT as u32);
                    draw_filled_rect_mut(canvas, dot, white);
                }
            }
        }
    }
}

pub fn save_annotated(canvas: &RgbImage, path: &Path) -> Result<()> {
    canvas
        .save(path)
        .with_context(|| format!("Failed to write annotated image {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::BBox;

    fn product(status: LabelStatus) -> FinalProduct {
        FinalProduct {
            index: 1,
            final_label: "HEINEKEN".to_string(),
            detector_label: "heineken".to_string(),
            confidence: 0.874,
            bounding_box: BBox::new(10.0, 10.0, 40.0, 60.0).unwrap(),
            matched_brand: Some("HEINEKEN".to_string()),
            match_confidence: 0.4,
            source_region: "whole".to_string(),
            status,
            volume_ml: None,
            package: None,
        }
    }

    #[test]
    fn test_caption() {
        assert_eq!(caption(&product(LabelStatus::Confirmed)), "#1 HEINEKEN 87%");
    }

    #[test]
    fn test_boxes_are_drawn() {
        let image = DynamicImage::new_rgb8(80, 80);
        let canvas = annotate(&image, &[product(LabelStatus::Confirmed)], None);
        assert_eq!(canvas.dimensions(), (80, 80));
        assert_eq!(*canvas.get_pixel(10, 30), Rgb([0, 200, 0]));
        assert_eq!(*canvas.get_pixel(25, 35), Rgb([0, 0, 0]));
        // caption background above the box, clamped to the top edge
        assert_eq!(*canvas.get_pixel(10, 0), Rgb([0, 200, 0]));
        let white = canvas.pixels().filter(|p| **p == Rgb([255, 255, 255])).count();
        assert!(white > 0);
    }

    #[test]
    fn test_captions_differ_without_font() {
        let image = DynamicImage::new_rgb8(200, 120);
        let heineken = product(LabelStatus::Confirmed);
        let mut corona = product(LabelStatus::Confirmed);
        corona.final_label = "CORONA".to_string();
        corona.confidence = 0.12;
        let mut eleventh = product(LabelStatus::Confirmed);
        eleventh.index = 11;
        let mut twelfth = product(LabelStatus::Confirmed);
        twelfth.index = 12;

        assert_ne!(annotate(&image, &[heineken], None), annotate(&image, &[corona], None));
        assert_ne!(annotate(&image, &[eleventh], None), annotate(&image, &[twelfth], None));
    }

    #[test]
    fn test_glyph_fallback() {
        assert_eq!(glyph('a'), glyph('A'));
        assert_ne!(glyph('#'), glyph('?'));
        assert_eq!(glyph('?'), glyph('~'));
        assert_eq!(glyph(' '), [0; 7]);
    }

    #[test]
    fn test_box_on_the_border_is_clipped() {
        let image = DynamicImage::new_rgb8(30, 30);
        let mut p = product(LabelStatus::Unverified);
        p.bounding_box = BBox::new(20.0, 20.0, 50.0, 50.0).unwrap();
        let canvas = annotate(&image, &[p], None);
        assert_eq!(*canvas.get_pixel(20, 25), Rgb([255, 0, 0]));
    }

    #[test]
    fn test_save_annotated() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("annotated.jpg");
        let canvas = annotate(&DynamicImage::new_rgb8(16, 16), &[], None);
        save_annotated(&canvas, &path).unwrap();
        assert!(path.exists());
    }

    #[test]
    fn test_missing_font_is_an_error() {
        assert!(load_font(Path::new("/nonexistent/font.ttf")).is_err());
    }
}
