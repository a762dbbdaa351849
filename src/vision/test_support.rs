//! Synthetic 7-segment display rendering for tests

use image::{GrayImage, Luma, Rgb, RgbImage};

use super::preprocess::FOREGROUND;
use super::seven_segment::{Segment, SegmentPattern};

/// Painted area of each segment as fractions of the glyph box
fn stroke(segment: Segment) -> (f32, f32, f32, f32) {
    match segment {
        Segment::A => (0.15, 0.00, 0.85, 0.12),
        Segment::B => (0.75, 0.10, 0.95, 0.46),
        Segment::C => (0.75, 0.54, 0.95, 0.90),
        Segment::D => (0.15, 0.88, 0.85, 1.00),
        Segment::E => (0.05, 0.54, 0.25, 0.90),
        Segment::F => (0.05, 0.10, 0.25, 0.46),
        Segment::G => (0.15, 0.44, 0.85, 0.56),
    }
}

fn fill(mask: &mut GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) {
    for y in y1..y2.min(mask.height()) {
        for x in x1..x2.min(mask.width()) {
            mask.put_pixel(x, y, Luma([FOREGROUND]));
        }
    }
}

fn scaled(origin: u32, fraction: f32, size: u32) -> u32 {
    origin + (fraction * size as f32).round() as u32
}

/// Paint a glyph into the box starting at column `x0`
pub(crate) fn paint_glyph(mask: &mut GrayImage, x0: u32, width: u32, height: u32, pattern: SegmentPattern) {
    for segment in pattern.segments() {
        let (fx1, fy1, fx2, fy2) = stroke(segment);
        fill(
            mask,
            scaled(x0, fx1, width),
            scaled(0, fy1, height),
            scaled(x0, fx2, width),
            scaled(0, fy2, height),
        );
    }
}

/// Paint a decimal point spanning columns `x1..x2` near the bottom
pub(crate) fn paint_point(mask: &mut GrayImage, x1: u32, x2: u32, height: u32) {
    fill(mask, x1, scaled(0, 0.86, height), x2, scaled(0, 0.96, height));
}

/// Render text into equal slots, one per digit or space.
///
/// A digit followed by `.` is drawn narrower so the point fits in its slot.
pub(crate) fn render_fixed(text: &str, slot_width: u32, height: u32) -> GrayImage {
    let chars: Vec<char> = text.chars().collect();
    let slots = chars.iter().filter(|c| **c != '.').count() as u32;
    let mut mask = GrayImage::new(slot_width * slots, height);

    let mut slot = 0;
    for (i, c) in chars.iter().enumerate() {
        if *c == '.' {
            continue;
        }
        let x0 = slot * slot_width;
        let pointed = chars.get(i + 1) == Some(&'.');
        if let Some(pattern) = SegmentPattern::for_digit(*c) {
            let glyph_width = if pointed {
                (slot_width as f32 * 0.78).round() as u32
            } else {
                slot_width
            };
            paint_glyph(&mut mask, x0, glyph_width, height, pattern);
        }
        if pointed {
            paint_point(
                &mut mask,
                scaled(x0, 0.84, slot_width),
                scaled(x0, 0.96, slot_width),
                height,
            );
        }
        slot += 1;
    }
    mask
}

/// Render text as glyphs separated by gaps; points sit in the gap after their digit
pub(crate) fn render_spaced(text: &str, glyph_width: u32, gap: u32, height: u32) -> GrayImage {
    let digits = text.chars().filter(|c| *c != '.').count() as u32;
    let mut mask = GrayImage::new(digits * (glyph_width + gap), height);

    let mut x = gap / 2;
    for c in text.chars() {
        if c == '.' {
            let gap_start = x - gap;
            paint_point(&mut mask, gap_start + gap / 4, gap_start + gap * 3 / 4, height);
            continue;
        }
        if let Some(pattern) = SegmentPattern::for_digit(c) {
            paint_glyph(&mut mask, x, glyph_width, height, pattern);
        }
        x += glyph_width + gap;
    }
    mask
}

/// Color a binary mask
pub(crate) fn colorize(mask: &GrayImage, on: Rgb<u8>, off: Rgb<u8>) -> RgbImage {
    RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] == FOREGROUND {
            on
        } else {
            off
        }
    })
}

/// Paint a colored region into a frame at `(left, top)`
pub(crate) fn blit(frame: &mut RgbImage, region: &RgbImage, left: u32, top: u32) {
    for (x, y, pixel) in region.enumerate_pixels() {
        if left + x < frame.width() && top + y < frame.height() {
            frame.put_pixel(left + x, top + y, *pixel);
        }
    }
}
