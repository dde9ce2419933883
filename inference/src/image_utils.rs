/// Image utilities for drawing detections onto frames
use crate::error::Result;
use crate::types::{DetectedObject, Distance, PixelBoundingBox};
use image::{Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;
use std::path::Path;

/// Border thickness of detection boxes in pixels
const BOX_THICKNESS: i32 = 2;
/// Glyphs are 3x5 cells drawn at this scale
const GLYPH_SCALE: i32 = 2;
const GLYPH_W: i32 = 3;
const GLYPH_H: i32 = 5;
const LABEL_PAD: i32 = 2;
const LABEL_TEXT: Rgb<u8> = Rgb([255, 255, 255]);

/// Generate a deterministic color for a class id.
///
/// Hues are spread by the golden angle so neighbouring ids stay distinguishable.
pub fn generate_class_color(class_id: u32) -> Rgb<u8> {
    let hue = (class_id as f32 * 137.508) % 360.0;
    hsv_to_rgb(hue, 0.85, 0.9)
}

fn hsv_to_rgb(hue: f32, saturation: f32, value: f32) -> Rgb<u8> {
    let c = value * saturation;
    let h = hue / 60.0;
    let x = c * (1.0 - (h % 2.0 - 1.0).abs());
    let (r, g, b) = match h as u32 {
        0 => (c, x, 0.0),
        1 => (x, c, 0.0),
        2 => (0.0, c, x),
        3 => (0.0, x, c),
        4 => (x, 0.0, c),
        _ => (c, 0.0, x),
    };
    let m = value - c;
    let to_u8 = |v: f32| ((v + m) * 255.0).round().clamp(0.0, 255.0) as u8;
    Rgb([to_u8(r), to_u8(g), to_u8(b)])
}

/// Draw a rectangle outline, growing outwards with `thickness`
pub fn draw_rect(img: &mut RgbImage, bbox: &PixelBoundingBox, color: Rgb<u8>, thickness: i32) {
    if bbox.width() == 0 || bbox.height() == 0 {
        log::debug!("Skipping degenerate box {:?}", bbox);
        return;
    }

    for offset in 0..thickness.max(1) {
        let rect = Rect::at(bbox.xmin - offset, bbox.ymin - offset).of_size(
            bbox.width() + (offset * 2) as u32,
            bbox.height() + (offset * 2) as u32,
        );
        draw_hollow_rect_mut(img, rect, color);
    }
}

/// 3x5 bitmap, one row per byte, most significant of the low three bits on the left
fn glyph(ch: char) -> [u8; 5] {
    match ch {
        '0' => [0b111, 0b101, 0b101, 0b101, 0b111],
        '1' => [0b010, 0b110, 0b010, 0b010, 0b111],
        '2' => [0b111, 0b001, 0b111, 0b100, 0b111],
        '3' => [0b111, 0b001, 0b111, 0b001, 0b111],
        '4' => [0b101, 0b101, 0b111, 0b001, 0b001],
        '5' => [0b111, 0b100, 0b111, 0b001, 0b111],
        '6' => [0b111, 0b100, 0b111, 0b101, 0b111],
        '7' => [0b111, 0b001, 0b001, 0b001, 0b001],
        '8' => [0b111, 0b101, 0b111, 0b101, 0b111],
        '9' => [0b111, 0b101, 0b111, 0b001, 0b111],
        '.' => [0b000, 0b000, 0b000, 0b000, 0b010],
        'm' => [0b000, 0b000, 0b111, 0b111, 0b101],
        '-' => [0b000, 0b000, 0b111, 0b000, 0b000],
        '?' => [0b111, 0b001, 0b011, 0b000, 0b010],
        _ => [0; 5],
    }
}

/// Width and height in pixels of `text` drawn with [`draw_label`]
pub fn label_size(text: &str) -> (u32, u32) {
    let chars = text.chars().count() as i32;
    let width = chars * (GLYPH_W + 1) * GLYPH_SCALE - GLYPH_SCALE + LABEL_PAD * 2;
    let height = GLYPH_H * GLYPH_SCALE + LABEL_PAD * 2;
    (width.max(LABEL_PAD * 2) as u32, height as u32)
}

/// Draw `text` in white on a filled tab of `color` with its top-left at (x, y)
pub fn draw_label(img: &mut RgbImage, text: &str, x: i32, y: i32, color: Rgb<u8>) {
    let (w, h) = label_size(text);
    draw_filled_rect_mut(img, Rect::at(x, y).of_size(w, h), color);

    for (i, ch) in text.chars().enumerate() {
        let origin_x = x + LABEL_PAD + i as i32 * (GLYPH_W + 1) * GLYPH_SCALE;
        let origin_y = y + LABEL_PAD;
        for (row, &bits) in glyph(ch).iter().enumerate() {
            for col in 0..GLYPH_W {
                if (bits >> (GLYPH_W - 1 - col)) & 1 == 0 {
                    continue;
                }
                let cell = Rect::at(
                    origin_x + col * GLYPH_SCALE,
                    origin_y + row as i32 * GLYPH_SCALE,
                )
                .of_size(GLYPH_SCALE as u32, GLYPH_SCALE as u32);
                draw_filled_rect_mut(img, cell, LABEL_TEXT);
            }
        }
    }
}

/// Text shown next to a detection: its distance, or `?` when unknown
pub fn distance_label(distance: &Distance) -> String {
    match distance {
        Distance::Meters(d) => format!("{:.1}m", d),
        Distance::Undefined => "?".to_string(),
    }
}

/// Copy of `img` with every object's box and distance tab drawn on it
pub fn annotate(img: &RgbImage, objects: &[DetectedObject]) -> RgbImage {
    let mut canvas = img.clone();

    for object in objects {
        let color = generate_class_color(object.class_id);
        draw_rect(&mut canvas, &object.bbox, color, BOX_THICKNESS);

        let text = distance_label(&object.distance);
        let (_, label_h) = label_size(&text);
        // Above the box when there is room, otherwise just inside it
        let label_y = if object.bbox.ymin - BOX_THICKNESS >= label_h as i32 {
            object.bbox.ymin - BOX_THICKNESS - label_h as i32
        } else {
            object.bbox.ymin
        };
        draw_label(&mut canvas, &text, object.bbox.xmin, label_y, color);
    }

    canvas
}

/// Write an annotated frame as PNG
pub fn save_png<P: AsRef<Path>>(img: &RgbImage, path: P) -> Result<()> {
    img.save_with_format(path.as_ref(), image::ImageFormat::Png)?;
    Ok(())
}
