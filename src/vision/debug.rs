//! Debug visualizations for recognizer and detector results
//!
//! Images carry no text: a colored header bar shows the verdict and
//! colored boxes show slots and sampled segments.

use image::imageops::{self, FilterType};
use image::{GrayImage, Rgb, RgbImage};
use imageproc::drawing::{draw_filled_rect_mut, draw_hollow_rect_mut};
use imageproc::rect::Rect;

use super::indicator::IndicatorDetection;
use super::preprocess::FOREGROUND;
use super::seven_segment::{DigitRecognition, Segment, SlotOutcome};

/// Height of the verdict bar above the visualization
pub const HEADER_HEIGHT: u32 = 8;

const ACCEPTED: Rgb<u8> = Rgb([0, 200, 0]);
const REJECTED: Rgb<u8> = Rgb([220, 0, 0]);
const LAMP_OFF: Rgb<u8> = Rgb([90, 90, 90]);
const SEGMENT_ON: Rgb<u8> = Rgb([0, 220, 0]);
const SEGMENT_OFF: Rgb<u8> = Rgb([120, 0, 0]);
const SLOT_DIGIT: Rgb<u8> = Rgb([0, 160, 255]);
const SLOT_POINT: Rgb<u8> = Rgb([255, 220, 0]);
const SLOT_BLANK: Rgb<u8> = Rgb([100, 100, 100]);

/// Smallest side an indicator visualization is scaled up to
const MIN_INDICATOR_SIDE: u32 = 64;
const MAX_INDICATOR_SCALE: u32 = 8;

fn rect(x1: u32, y1: u32, x2: u32, y2: u32) -> Option<Rect> {
    (x2 > x1 && y2 > y1).then(|| Rect::at(x1 as i32, y1 as i32).of_size(x2 - x1, y2 - y1))
}

fn with_header(body: &RgbImage, color: Rgb<u8>) -> RgbImage {
    let mut out = RgbImage::from_pixel(body.width(), body.height() + HEADER_HEIGHT, color);
    imageops::replace(&mut out, body, 0, HEADER_HEIGHT as i64);
    out
}

/// Render the segmentation of a binary display mask
pub fn render_digit_debug(mask: &GrayImage, recognition: &DigitRecognition) -> RgbImage {
    let mut body = RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
        if mask.get_pixel(x, y)[0] == FOREGROUND {
            Rgb([200, 200, 200])
        } else {
            Rgb([25, 25, 25])
        }
    });

    let height = mask.height();
    for result in &recognition.slots {
        let slot = result.slot;
        let color = match result.outcome {
            SlotOutcome::Digit(_) => SLOT_DIGIT,
            SlotOutcome::DecimalPoint => SLOT_POINT,
            SlotOutcome::Blank => SLOT_BLANK,
            SlotOutcome::Unrecognized => REJECTED,
        };
        if let Some(r) = rect(slot.start, 0, slot.end, height) {
            draw_hollow_rect_mut(&mut body, r, color);
        }

        if matches!(result.outcome, SlotOutcome::Digit(_) | SlotOutcome::Unrecognized) {
            for segment in Segment::ALL {
                let (x1, y1, x2, y2) = segment.pixel_box(slot.start, slot.end, height);
                let Some(r) = rect(x1, y1, x2, y2) else { continue };
                if result.pattern.contains(segment) {
                    draw_hollow_rect_mut(&mut body, r, SEGMENT_ON);
                } else {
                    draw_hollow_rect_mut(&mut body, r, SEGMENT_OFF);
                }
            }
        }
    }

    let header = if recognition.is_accepted() { ACCEPTED } else { REJECTED };
    with_header(&body, header)
}

/// Render an indicator region, with the color mask alongside in color mode
pub fn render_indicator_debug(
    region: &RgbImage,
    detection: &IndicatorDetection,
    mask: Option<&GrayImage>,
) -> RgbImage {
    let header = if detection.state { ACCEPTED } else { LAMP_OFF };
    if region.width() == 0 || region.height() == 0 {
        return RgbImage::from_pixel(MIN_INDICATOR_SIDE, HEADER_HEIGHT, header);
    }

    let side = region.width().min(region.height());
    let scale = MIN_INDICATOR_SIDE.div_ceil(side).clamp(1, MAX_INDICATOR_SCALE);
    let (w, h) = (region.width() * scale, region.height() * scale);
    let enlarged = imageops::resize(region, w, h, FilterType::Nearest);

    let mut body = match mask {
        Some(mask) => {
            let mask_rgb = RgbImage::from_fn(mask.width(), mask.height(), |x, y| {
                let v = mask.get_pixel(x, y)[0];
                Rgb([v, v, v])
            });
            let mask_rgb = imageops::resize(&mask_rgb, w, h, FilterType::Nearest);
            let mut pair = RgbImage::new(w * 2, h);
            imageops::replace(&mut pair, &enlarged, 0, 0);
            imageops::replace(&mut pair, &mask_rgb, w as i64, 0);
            pair
        }
        None => enlarged,
    };

    if let Some(border) = rect(0, 0, body.width(), body.height()) {
        draw_hollow_rect_mut(&mut body, border, header);
    }
    if detection.state {
        // Lamp marker in the top-left corner
        if let Some(marker) = rect(2, 2, 2 + scale.max(4), 2 + scale.max(4)) {
            draw_filled_rect_mut(&mut body, marker, ACCEPTED);
        }
    }
    with_header(&body, header)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::seven_segment::{DigitRecognizer, RecognizerSettings};
    use crate::vision::test_support::render_fixed;

    #[test]
    fn test_digit_debug_header_reflects_verdict() {
        let mask = render_fixed("42", 40, 60);
        let recognizer = DigitRecognizer::new(RecognizerSettings {
            expected_digits: 2,
            ..Default::default()
        });
        let result = recognizer.recognize_mask(&mask);
        let visual = render_digit_debug(&mask, &result);
        assert_eq!(visual.dimensions(), (80, 60 + HEADER_HEIGHT));
        assert_eq!(visual.get_pixel(40, 2), &ACCEPTED);

        let dark = GrayImage::new(80, 60);
        let result = recognizer.recognize_mask(&dark);
        let visual = render_digit_debug(&dark, &result);
        assert_eq!(visual.get_pixel(40, 2), &REJECTED);
    }

    #[test]
    fn test_indicator_debug_scales_small_regions() {
        let region = RgbImage::from_pixel(8, 16, Rgb([250, 250, 250]));
        let detection = IndicatorDetection {
            state: true,
            value: 250.0,
            threshold: 128.0,
        };
        let visual = render_indicator_debug(&region, &detection, None);
        assert_eq!(visual.dimensions(), (64, 128 + HEADER_HEIGHT));

        let mask = GrayImage::new(8, 16);
        let visual = render_indicator_debug(&region, &detection, Some(&mask));
        assert_eq!(visual.width(), 128);
    }

    #[test]
    fn test_indicator_debug_empty_region() {
        let detection = IndicatorDetection {
            state: false,
            value: 0.0,
            threshold: 128.0,
        };
        let visual = render_indicator_debug(&RgbImage::new(0, 0), &detection, None);
        assert_eq!(visual.height(), HEADER_HEIGHT);
    }
}
