//! 7-segment digit recognition
//!
//! A display region is reduced to a binary mask, split into digit slots
//! (automatically by column projection, or into a fixed number of equal
//! slots), and each slot is classified by sampling the seven segment areas
//! and matching the on/off pattern against the digit table.
//!
//! Segment naming follows the usual convention:
//!
//! ```text
//!  aaa
//! f   b
//!  ggg
//! e   c
//!  ddd
//! ```

use image::{GrayImage, RgbImage};
use std::fmt;

use super::preprocess::{foreground_mask, foreground_ratio, FOREGROUND};
use super::{debug, ColorChannel, DisplayMode};

/// Fraction of a segment's sample box that must be lit for the segment to count as on
pub const DEFAULT_SEGMENT_SENSITIVITY: f32 = 0.15;

/// Slots with less lit area than this are blank
const BLANK_COVERAGE: f64 = 0.01;

/// Maximum Hamming distance accepted by the fuzzy digit match
const MAX_PATTERN_DISTANCE: u32 = 1;

/// Columns need more lit pixels than this fraction of the height to belong to a glyph
const COLUMN_CONTENT_FRACTION: f64 = 0.03;

/// Minimum width of a column run
const MIN_RUN_WIDTH: u32 = 2;

/// Decimal point: narrower than this fraction of the height
const POINT_MAX_WIDTH: f64 = 0.15;
/// Decimal point: content shorter than this fraction of the height
const POINT_MAX_HEIGHT: f64 = 0.4;
/// Decimal point: content starting below this fraction of the height
const POINT_MIN_TOP: f64 = 0.5;
/// Fixed slots: a trailing point must start in the bottom band of the slot
const FIXED_POINT_MIN_TOP: f64 = 0.75;
/// Fixed slots: a trailing point is at most this many times taller than wide
const FIXED_POINT_MAX_ASPECT: f64 = 1.5;

const MIN_SLOT_HEIGHT: u32 = 5;
const MIN_SLOT_WIDTH: u32 = 2;

/// One of the seven display segments
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Segment {
    A,
    B,
    C,
    D,
    E,
    F,
    G,
}

impl Segment {
    pub const ALL: [Segment; 7] = [
        Segment::A,
        Segment::B,
        Segment::C,
        Segment::D,
        Segment::E,
        Segment::F,
        Segment::G,
    ];

    /// Sample box as fractions of the slot: (x1, y1, x2, y2)
    pub fn sample_box(self) -> (f32, f32, f32, f32) {
        match self {
            Segment::A => (0.20, 0.02, 0.80, 0.12),
            Segment::B => (0.70, 0.15, 0.98, 0.42),
            Segment::C => (0.70, 0.58, 0.98, 0.85),
            Segment::D => (0.20, 0.88, 0.80, 0.98),
            Segment::E => (0.02, 0.58, 0.30, 0.85),
            Segment::F => (0.02, 0.15, 0.30, 0.42),
            Segment::G => (0.20, 0.44, 0.80, 0.56),
        }
    }

    /// Sample box in pixels for a slot spanning columns `x1..x2` of a mask `height` tall
    pub fn pixel_box(self, x1: u32, x2: u32, height: u32) -> (u32, u32, u32, u32) {
        let (fx1, fy1, fx2, fy2) = self.sample_box();
        let width = x2.saturating_sub(x1) as f32;
        let height = height as f32;
        (
            x1 + (width * fx1) as u32,
            (height * fy1) as u32,
            x1 + (width * fx2) as u32,
            (height * fy2) as u32,
        )
    }

    fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Set of lit segments
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
pub struct SegmentPattern(u8);

impl SegmentPattern {
    pub const EMPTY: SegmentPattern = SegmentPattern(0);

    /// Build from a/b/c/d/e/f/g flags
    pub const fn from_flags(flags: [u8; 7]) -> Self {
        let mut bits = 0u8;
        let mut i = 0;
        while i < 7 {
            if flags[i] != 0 {
                bits |= 1 << i;
            }
            i += 1;
        }
        SegmentPattern(bits)
    }

    /// Canonical pattern of a digit character
    pub fn for_digit(digit: char) -> Option<Self> {
        DIGIT_TABLE
            .iter()
            .find(|(c, _)| *c == digit)
            .map(|(_, pattern)| *pattern)
    }

    pub fn contains(self, segment: Segment) -> bool {
        self.0 & segment.bit() != 0
    }

    pub fn with(self, segment: Segment) -> Self {
        SegmentPattern(self.0 | segment.bit())
    }

    pub fn without(self, segment: Segment) -> Self {
        SegmentPattern(self.0 & !segment.bit())
    }

    /// Number of segments that differ
    pub fn distance(self, other: SegmentPattern) -> u32 {
        (self.0 ^ other.0).count_ones()
    }

    /// Lit segments in a..g order
    pub fn segments(self) -> impl Iterator<Item = Segment> {
        Segment::ALL.into_iter().filter(move |s| self.contains(*s))
    }
}

impl fmt::Debug for SegmentPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let flags: String = Segment::ALL
            .iter()
            .map(|s| if self.contains(*s) { '1' } else { '0' })
            .collect();
        write!(f, "SegmentPattern({flags})")
    }
}

/// Digit patterns in table order; ties in fuzzy matching resolve to the earlier entry
const DIGIT_TABLE: [(char, SegmentPattern); 10] = [
    ('0', SegmentPattern::from_flags([1, 1, 1, 1, 1, 1, 0])),
    ('1', SegmentPattern::from_flags([0, 1, 1, 0, 0, 0, 0])),
    ('2', SegmentPattern::from_flags([1, 1, 0, 1, 1, 0, 1])),
    ('3', SegmentPattern::from_flags([1, 1, 1, 1, 0, 0, 1])),
    ('4', SegmentPattern::from_flags([0, 1, 1, 0, 0, 1, 1])),
    ('5', SegmentPattern::from_flags([1, 0, 1, 1, 0, 1, 1])),
    ('6', SegmentPattern::from_flags([1, 0, 1, 1, 1, 1, 1])),
    ('7', SegmentPattern::from_flags([1, 1, 1, 0, 0, 0, 0])),
    ('8', SegmentPattern::from_flags([1, 1, 1, 1, 1, 1, 1])),
    ('9', SegmentPattern::from_flags([1, 1, 1, 1, 0, 1, 1])),
];

/// Match a segment pattern to a digit.
///
/// Exact matches win; otherwise the nearest digit is accepted when it
/// differs by at most one segment. Returns the digit and its distance.
pub fn match_pattern(pattern: SegmentPattern) -> Option<(char, u32)> {
    let mut best: Option<(char, u32)> = None;
    for (digit, candidate) in DIGIT_TABLE {
        let distance = pattern.distance(candidate);
        if best.map_or(true, |(_, d)| distance < d) {
            best = Some((digit, distance));
        }
        if distance == 0 {
            break;
        }
    }
    best.filter(|(_, distance)| *distance <= MAX_PATTERN_DISTANCE)
}

/// What a slot holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotKind {
    Digit,
    DecimalPoint,
}

/// A vertical strip `start..end` of the mask
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub start: u32,
    pub end: u32,
    pub kind: SlotKind,
}

impl Slot {
    pub fn width(&self) -> u32 {
        self.end.saturating_sub(self.start)
    }
}

/// Classification of one slot
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotOutcome {
    Digit(char),
    DecimalPoint,
    /// Too small or nearly empty; contributes nothing to the text
    Blank,
    /// Lit segments match no digit; rendered as `?`
    Unrecognized,
}

/// Per-slot detail kept for diagnostics
#[derive(Debug, Clone, PartialEq)]
pub struct SlotResult {
    /// Columns actually analyzed
    pub slot: Slot,
    pub outcome: SlotOutcome,
    /// Lit segments (empty for blanks and decimal points)
    pub pattern: SegmentPattern,
}

/// Why a recognition was not accepted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Accepted,
    /// No slot was found in the region
    NoDigits,
    /// At least one slot matched no digit
    Unrecognized,
    /// Fixed-slot mode produced a different number of digit slots
    DigitCountMismatch { expected: u32, found: usize },
}

/// Result of recognizing one display region
#[derive(Debug, Clone, PartialEq)]
pub struct DigitRecognition {
    /// Assembled text; `?` marks unrecognized slots
    pub text: String,
    /// Number of non-decimal slots, blanks included
    pub digit_count: usize,
    pub verdict: Verdict,
    pub slots: Vec<SlotResult>,
}

impl DigitRecognition {
    pub fn is_accepted(&self) -> bool {
        self.verdict == Verdict::Accepted
    }

    /// Text when accepted
    pub fn value_text(&self) -> Option<&str> {
        self.is_accepted().then_some(self.text.as_str())
    }

    fn empty() -> Self {
        Self {
            text: String::new(),
            digit_count: 0,
            verdict: Verdict::NoDigits,
            slots: Vec::new(),
        }
    }
}

/// Recognizer parameters; two recognizers with equal settings behave identically
#[derive(Debug, Clone, PartialEq)]
pub struct RecognizerSettings {
    pub display_mode: DisplayMode,
    pub color_channel: ColorChannel,
    /// Binarization threshold; 0 selects Otsu's method
    pub threshold: u8,
    /// Fixed slot count; 0 detects slots automatically
    pub expected_digits: u32,
    pub segment_sensitivity: f32,
}

impl Default for RecognizerSettings {
    fn default() -> Self {
        Self {
            display_mode: DisplayMode::LightOnDark,
            color_channel: ColorChannel::Red,
            threshold: 0,
            expected_digits: 0,
            segment_sensitivity: DEFAULT_SEGMENT_SENSITIVITY,
        }
    }
}

/// 7-segment display recognizer
#[derive(Debug, Clone)]
pub struct DigitRecognizer {
    settings: RecognizerSettings,
}

impl DigitRecognizer {
    pub fn new(settings: RecognizerSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &RecognizerSettings {
        &self.settings
    }

    /// Recognize digits in an extracted display region
    pub fn recognize(&self, region: &RgbImage) -> DigitRecognition {
        let mask = self.mask(region);
        self.recognize_mask(&mask)
    }

    /// Recognize and render a diagnostic image of the segmentation
    pub fn recognize_with_debug(&self, region: &RgbImage) -> (DigitRecognition, RgbImage) {
        let mask = self.mask(region);
        let recognition = self.recognize_mask(&mask);
        let visual = debug::render_digit_debug(&mask, &recognition);
        (recognition, visual)
    }

    /// Binary foreground mask of a region under these settings
    pub fn mask(&self, region: &RgbImage) -> GrayImage {
        foreground_mask(
            region,
            self.settings.color_channel,
            self.settings.display_mode,
            self.settings.threshold,
        )
        .0
    }

    /// Recognize digits in an already binarized mask (segments = 255)
    pub fn recognize_mask(&self, mask: &GrayImage) -> DigitRecognition {
        if mask.width() == 0 || mask.height() == 0 {
            return DigitRecognition::empty();
        }

        let expected = self.settings.expected_digits;
        let mut slots = Vec::new();
        if expected > 0 {
            for slot in fixed_slots(mask.width(), expected) {
                self.classify_fixed_slot(mask, slot, &mut slots);
            }
        } else {
            for slot in column_runs(mask, 0, mask.width()) {
                slots.push(self.classify(mask, slot));
            }
        }

        assemble(slots, expected)
    }

    /// Classify a fixed slot.
    ///
    /// A decimal point is split off only when it trails a glyph inside the
    /// slot and is dot shaped; anything else is read as part of the digit
    /// over the whole slot.
    fn classify_fixed_slot(&self, mask: &GrayImage, slot: Slot, out: &mut Vec<SlotResult>) {
        let runs = column_runs(mask, slot.start, slot.end);
        let point = match runs.as_slice() {
            [.., glyph, last] if glyph.kind == SlotKind::Digit && is_trailing_point(mask, last) => Some(*last),
            _ => None,
        };

        match point {
            Some(point) => {
                let digit = Slot {
                    end: point.start,
                    ..slot
                };
                out.push(self.classify(mask, digit));
                out.push(point_result(point));
            }
            None => out.push(self.classify(mask, slot)),
        }
    }

    fn classify(&self, mask: &GrayImage, slot: Slot) -> SlotResult {
        if slot.kind == SlotKind::DecimalPoint {
            return point_result(slot);
        }

        let height = mask.height();
        if height < MIN_SLOT_HEIGHT || slot.width() < MIN_SLOT_WIDTH {
            return blank_result(slot);
        }
        if foreground_ratio(mask, slot.start, 0, slot.end, height) < BLANK_COVERAGE {
            return blank_result(slot);
        }

        let pattern = self.read_segments(mask, slot);
        let outcome = match match_pattern(pattern) {
            Some((digit, _)) => SlotOutcome::Digit(digit),
            None => SlotOutcome::Unrecognized,
        };
        SlotResult {
            slot,
            outcome,
            pattern,
        }
    }

    /// Sample each segment area of a digit slot
    pub fn read_segments(&self, mask: &GrayImage, slot: Slot) -> SegmentPattern {
        let sensitivity = self.settings.segment_sensitivity as f64;
        Segment::ALL
            .into_iter()
            .fold(SegmentPattern::EMPTY, |pattern, segment| {
                let (x1, y1, x2, y2) = segment.pixel_box(slot.start, slot.end, mask.height());
                if foreground_ratio(mask, x1, y1, x2, y2) > sensitivity {
                    pattern.with(segment)
                } else {
                    pattern
                }
            })
    }
}

impl Default for DigitRecognizer {
    fn default() -> Self {
        Self::new(RecognizerSettings::default())
    }
}

fn point_result(slot: Slot) -> SlotResult {
    SlotResult {
        slot,
        outcome: SlotOutcome::DecimalPoint,
        pattern: SegmentPattern::EMPTY,
    }
}

fn blank_result(slot: Slot) -> SlotResult {
    SlotResult {
        slot,
        outcome: SlotOutcome::Blank,
        pattern: SegmentPattern::EMPTY,
    }
}

fn assemble(slots: Vec<SlotResult>, expected: u32) -> DigitRecognition {
    if slots.is_empty() {
        return DigitRecognition::empty();
    }

    let mut text = String::new();
    let mut digit_count = 0;
    let mut unrecognized = false;
    for result in &slots {
        match result.outcome {
            SlotOutcome::Digit(c) => {
                text.push(c);
                digit_count += 1;
            }
            SlotOutcome::Unrecognized => {
                text.push('?');
                digit_count += 1;
                unrecognized = true;
            }
            SlotOutcome::Blank => digit_count += 1,
            SlotOutcome::DecimalPoint => text.push('.'),
        }
    }

    let verdict = if unrecognized {
        Verdict::Unrecognized
    } else if expected > 0 && digit_count != expected as usize {
        Verdict::DigitCountMismatch {
            expected,
            found: digit_count,
        }
    } else {
        Verdict::Accepted
    };

    DigitRecognition {
        text,
        digit_count,
        verdict,
        slots,
    }
}

/// Split `width` columns into `count` equal digit slots.
///
/// Slot `i` spans `i*width/count .. (i+1)*width/count`; empty slots are dropped.
pub fn fixed_slots(width: u32, count: u32) -> Vec<Slot> {
    if count == 0 {
        return Vec::new();
    }
    let (width, count) = (width as u64, count as u64);
    (0..count)
        .filter_map(|i| {
            let start = (i * width / count) as u32;
            let end = ((i + 1) * width / count) as u32;
            (end > start).then_some(Slot {
                start,
                end,
                kind: SlotKind::Digit,
            })
        })
        .collect()
}

/// Find runs of lit columns within `start..end` and classify each as digit or decimal point
pub fn column_runs(mask: &GrayImage, start: u32, end: u32) -> Vec<Slot> {
    let height = mask.height();
    let end = end.min(mask.width());
    let min_lit = height as f64 * COLUMN_CONTENT_FRACTION;

    let lit_column = |x: u32| {
        let count = (0..height)
            .filter(|&y| mask.get_pixel(x, y)[0] == FOREGROUND)
            .count();
        count as f64 > min_lit
    };

    let mut runs = Vec::new();
    let mut run_start: Option<u32> = None;
    for x in start..end {
        match (lit_column(x), run_start) {
            (true, None) => run_start = Some(x),
            (false, Some(s)) => {
                runs.push((s, x));
                run_start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = run_start {
        runs.push((s, end));
    }

    runs.into_iter()
        .filter(|(s, e)| e - s >= MIN_RUN_WIDTH)
        .filter_map(|(s, e)| {
            let (top, bottom) = content_rows(mask, s, e)?;
            let h = height as f64;
            let content_height = (bottom - top + 1) as f64;
            let is_point = ((e - s) as f64) < h * POINT_MAX_WIDTH
                && content_height < h * POINT_MAX_HEIGHT
                && top as f64 > h * POINT_MIN_TOP;
            Some(Slot {
                start: s,
                end: e,
                kind: if is_point {
                    SlotKind::DecimalPoint
                } else {
                    SlotKind::Digit
                },
            })
        })
        .collect()
}

/// Dot-shaped run confined to the bottom band of the mask
fn is_trailing_point(mask: &GrayImage, run: &Slot) -> bool {
    if run.kind != SlotKind::DecimalPoint {
        return false;
    }
    let Some((top, bottom)) = content_rows(mask, run.start, run.end) else {
        return false;
    };
    let content_height = (bottom - top + 1) as f64;
    top as f64 > mask.height() as f64 * FIXED_POINT_MIN_TOP
        && content_height <= run.width() as f64 * FIXED_POINT_MAX_ASPECT
}

/// First and last rows with any lit pixel in columns `start..end`
fn content_rows(mask: &GrayImage, start: u32, end: u32) -> Option<(u32, u32)> {
    let row_lit = |y: u32| (start..end).any(|x| mask.get_pixel(x, y)[0] == FOREGROUND);
    let top = (0..mask.height()).find(|&y| row_lit(y))?;
    let bottom = (0..mask.height()).rev().find(|&y| row_lit(y))?;
    Some((top, bottom))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::test_support::{colorize, paint_glyph, paint_point, render_fixed, render_spaced};
    use image::Rgb;

    fn fixed(expected_digits: u32) -> DigitRecognizer {
        DigitRecognizer::new(RecognizerSettings {
            expected_digits,
            ..Default::default()
        })
    }

    #[test]
    fn test_exact_patterns_match_their_digit() {
        for digit in "0123456789".chars() {
            let pattern = SegmentPattern::for_digit(digit).unwrap();
            assert_eq!(match_pattern(pattern), Some((digit, 0)));
        }
    }

    #[test]
    fn test_single_segment_errors_stay_within_distance_one() {
        for digit in "0123456789".chars() {
            let canonical = SegmentPattern::for_digit(digit).unwrap();
            for segment in Segment::ALL {
                let damaged = if canonical.contains(segment) {
                    canonical.without(segment)
                } else {
                    canonical.with(segment)
                };
                let (matched, distance) = match_pattern(damaged).unwrap();
                assert!(distance <= 1);
                let expected = SegmentPattern::for_digit(matched).unwrap();
                assert!(damaged.distance(expected) <= 1);
            }
        }
    }

    #[test]
    fn test_missing_segment_resolves_to_nearest_digit() {
        let two = SegmentPattern::for_digit('2').unwrap();
        assert_eq!(match_pattern(two.without(Segment::D)), Some(('2', 1)));

        // 6 with a stuck-on b is 8, an exact match
        let six = SegmentPattern::for_digit('6').unwrap();
        assert_eq!(match_pattern(six.with(Segment::B)), Some(('8', 0)));
    }

    #[test]
    fn test_two_segment_error_is_rejected() {
        let two = SegmentPattern::for_digit('2').unwrap();
        let damaged = two.without(Segment::A).without(Segment::D);
        assert_eq!(match_pattern(damaged), None);
        assert_eq!(match_pattern(SegmentPattern::EMPTY), None);
    }

    #[test]
    fn test_ties_resolve_in_table_order() {
        // a, b, c, g is one segment away from both 3 and 7
        let pattern = SegmentPattern::from_flags([1, 1, 1, 0, 0, 0, 1]);
        assert_eq!(match_pattern(pattern), Some(('3', 1)));
    }

    #[test]
    fn test_fixed_slots_boundaries() {
        for (width, count) in [(100u32, 3u32), (240, 3), (7, 7), (1000, 6), (31, 4)] {
            let slots = fixed_slots(width, count);
            assert_eq!(slots.len(), count as usize);
            for (i, slot) in slots.iter().enumerate() {
                let i = i as u32;
                assert_eq!(slot.start, i * width / count);
                assert_eq!(slot.end, (i + 1) * width / count);
                assert_eq!(slot.kind, SlotKind::Digit);
            }
        }
        assert!(fixed_slots(100, 0).is_empty());
    }

    #[test]
    fn test_fixed_mode_reads_every_digit() {
        let mask = render_fixed("4096", 40, 60);
        let result = fixed(4).recognize_mask(&mask);
        assert_eq!(result.text, "4096");
        assert_eq!(result.digit_count, 4);
        assert!(result.is_accepted());
    }

    #[test]
    fn test_fixed_mode_reads_narrow_one() {
        let mask = render_fixed("171", 40, 60);
        let result = fixed(3).recognize_mask(&mask);
        assert_eq!(result.text, "171");
        assert!(result.is_accepted());
    }

    #[test]
    fn test_fixed_mode_splits_decimal_point() {
        let mask = render_fixed("12.5", 80, 120);
        let result = fixed(3).recognize_mask(&mask);
        assert_eq!(result.text, "12.5");
        assert_eq!(result.digit_count, 3);
        assert_eq!(result.value_text(), Some("12.5"));
    }

    #[test]
    fn test_fixed_mode_ignores_neighbour_overhanging_slot_start() {
        // The 5 sits 4px right of its slot; its c segment crosses into the next slot
        let mut mask = GrayImage::new(80, 60);
        paint_glyph(&mut mask, 4, 40, 60, SegmentPattern::for_digit('5').unwrap());
        paint_glyph(&mut mask, 40, 40, 60, SegmentPattern::for_digit('1').unwrap());

        let result = fixed(2).recognize_mask(&mask);
        assert_eq!(result.value_text(), Some("51"));
        assert!(result
            .slots
            .iter()
            .all(|s| s.outcome != SlotOutcome::DecimalPoint));
        assert_eq!((result.slots[1].slot.start, result.slots[1].slot.end), (40, 80));
    }

    #[test]
    fn test_fixed_mode_ignores_neighbour_overhanging_slot_end() {
        // The 2 sits 4px left of its slot; its e segment forms a separate run at the tail of the first slot
        let mut mask = GrayImage::new(80, 60);
        paint_glyph(&mut mask, 0, 36, 60, SegmentPattern::for_digit('7').unwrap());
        paint_glyph(&mut mask, 36, 40, 60, SegmentPattern::for_digit('2').unwrap());

        let result = fixed(2).recognize_mask(&mask);
        assert_eq!(result.value_text(), Some("72"));
        assert_eq!((result.slots[0].slot.start, result.slots[0].slot.end), (0, 40));
    }

    #[test]
    fn test_fixed_mode_drops_point_between_full_width_glyphs() {
        // Full-width glyphs leave the point straddling the slot boundary.
        // It merges with the glyph columns on either side and is not reported;
        // the meter's decimal_places puts it back.
        let mut mask = GrayImage::new(120, 60);
        for (i, digit) in "125".chars().enumerate() {
            let pattern = SegmentPattern::for_digit(digit).unwrap();
            paint_glyph(&mut mask, i as u32 * 40, 40, 60, pattern);
        }
        paint_point(&mut mask, 37, 43, 60);

        let result = fixed(3).recognize_mask(&mask);
        assert_eq!(result.value_text(), Some("125"));
        assert_eq!(result.digit_count, 3);
        let bounds: Vec<_> = result.slots.iter().map(|s| (s.slot.start, s.slot.end)).collect();
        assert_eq!(bounds, vec![(0, 40), (40, 80), (80, 120)]);
    }

    #[test]
    fn test_fixed_mode_blank_slot() {
        let mask = render_fixed(" 25", 40, 60);
        let result = fixed(3).recognize_mask(&mask);
        assert_eq!(result.text, "25");
        assert_eq!(result.digit_count, 3);
        assert!(result.is_accepted());
        assert_eq!(result.slots[0].outcome, SlotOutcome::Blank);
    }

    #[test]
    fn test_fixed_mode_count_mismatch() {
        // Too narrow for five slots
        let mask = GrayImage::from_pixel(3, 20, image::Luma([FOREGROUND]));
        let result = fixed(5).recognize_mask(&mask);
        assert!(matches!(
            result.verdict,
            Verdict::DigitCountMismatch { expected: 5, .. }
        ));
        assert_eq!(result.value_text(), None);
    }

    #[test]
    fn test_auto_mode_detects_decimal_point() {
        let mask = render_spaced("25.8", 60, 20, 120);
        let result = DigitRecognizer::default().recognize_mask(&mask);
        assert_eq!(result.text, "25.8");
        assert_eq!(result.digit_count, 3);
        assert!(result.is_accepted());
        assert!(result
            .slots
            .iter()
            .any(|s| s.outcome == SlotOutcome::DecimalPoint));
    }

    #[test]
    fn test_unrecognized_slot_marks_text() {
        let mut mask = GrayImage::new(80, 60);
        paint_glyph(&mut mask, 0, 40, 60, SegmentPattern::for_digit('3').unwrap());
        let broken = SegmentPattern::for_digit('2')
            .unwrap()
            .without(Segment::A)
            .without(Segment::D);
        paint_glyph(&mut mask, 40, 40, 60, broken);

        let result = fixed(2).recognize_mask(&mask);
        assert_eq!(result.text, "3?");
        assert_eq!(result.verdict, Verdict::Unrecognized);
        assert_eq!(result.value_text(), None);
    }

    #[test]
    fn test_glyph_missing_one_segment_is_read() {
        let mut mask = GrayImage::new(40, 60);
        let damaged = SegmentPattern::for_digit('2').unwrap().without(Segment::D);
        paint_glyph(&mut mask, 0, 40, 60, damaged);
        let result = fixed(1).recognize_mask(&mask);
        assert_eq!(result.text, "2");
    }

    #[test]
    fn test_empty_region_has_no_digits() {
        let recognizer = DigitRecognizer::default();
        assert_eq!(recognizer.recognize_mask(&GrayImage::new(0, 0)).verdict, Verdict::NoDigits);
        let dark = recognizer.recognize_mask(&GrayImage::new(50, 30));
        assert_eq!(dark.verdict, Verdict::NoDigits);
        assert_eq!(dark.text, "");
    }

    #[test]
    fn test_tiny_slot_is_blank() {
        let mask = GrayImage::from_pixel(8, 4, image::Luma([FOREGROUND]));
        let result = fixed(2).recognize_mask(&mask);
        assert!(result.slots.iter().all(|s| s.outcome == SlotOutcome::Blank));
        assert_eq!(result.text, "");
    }

    #[test]
    fn test_recognize_color_region_with_polarity() {
        let mask = render_fixed("38", 40, 60);
        let led = colorize(&mask, Rgb([255, 40, 20]), Rgb([20, 5, 5]));
        let result = fixed(2).recognize(&led);
        assert_eq!(result.text, "38");

        let lcd = colorize(&mask, Rgb([30, 30, 30]), Rgb([190, 200, 180]));
        let recognizer = DigitRecognizer::new(RecognizerSettings {
            display_mode: DisplayMode::DarkOnLight,
            color_channel: ColorChannel::Gray,
            expected_digits: 2,
            ..Default::default()
        });
        assert_eq!(recognizer.recognize(&lcd).text, "38");
    }

    #[test]
    fn test_recognize_with_debug_returns_visual() {
        let mask = render_fixed("7", 40, 60);
        let region = colorize(&mask, Rgb([255, 0, 0]), Rgb([0, 0, 0]));
        let (result, visual) = fixed(1).recognize_with_debug(&region);
        assert_eq!(result.text, "7");
        assert_eq!(visual.width(), region.width());
        assert!(visual.height() > region.height());
    }
}
