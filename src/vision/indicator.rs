//! Indicator light ON/OFF detection
//!
//! Brightness mode compares mean luminance with a threshold (Otsu when the
//! threshold is 0). Color mode counts pixels whose hue, saturation and
//! value fall in the configured lamp color's range.

use image::{GrayImage, Luma, RgbImage};

use super::preprocess::{luminance, mean_intensity, otsu_threshold, rgb_to_hsv, FOREGROUND};
use super::{debug, DetectionMode, IndicatorColor};

/// Color mode percentage threshold used when the configured threshold is 0
const DEFAULT_COLOR_PERCENT: f64 = 10.0;

/// Inclusive HSV bounds (hue 0-180, saturation and value 0-255)
type HsvRange = ([u8; 3], [u8; 3]);

/// HSV ranges a lamp color may fall in; red wraps around the hue circle
fn color_ranges(color: IndicatorColor) -> &'static [HsvRange] {
    match color {
        IndicatorColor::Red => &[([0, 100, 100], [10, 255, 255]), ([160, 100, 100], [180, 255, 255])],
        IndicatorColor::Green => &[([35, 100, 100], [85, 255, 255])],
        IndicatorColor::Blue => &[([100, 100, 100], [130, 255, 255])],
        IndicatorColor::Yellow => &[([20, 100, 100], [35, 255, 255])],
        IndicatorColor::Orange => &[([10, 100, 100], [20, 255, 255])],
    }
}

fn in_range(hsv: [u8; 3], (low, high): &HsvRange) -> bool {
    (0..3).all(|i| hsv[i] >= low[i] && hsv[i] <= high[i])
}

/// Detector parameters
#[derive(Debug, Clone, PartialEq)]
pub struct IndicatorSettings {
    pub mode: DetectionMode,
    /// Brightness: luminance threshold (0 = Otsu). Color: percentage scaled to 0-255 (0 = 10%).
    pub threshold: u8,
    pub on_color: IndicatorColor,
}

impl Default for IndicatorSettings {
    fn default() -> Self {
        Self {
            mode: DetectionMode::Brightness,
            threshold: 128,
            on_color: IndicatorColor::Red,
        }
    }
}

/// Result of one detection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorDetection {
    pub state: bool,
    /// Mean luminance (brightness mode) or matching pixel percentage (color mode)
    pub value: f64,
    /// Threshold the value was compared against, in the same unit
    pub threshold: f64,
}

/// Indicator light detector
#[derive(Debug, Clone, Default)]
pub struct IndicatorDetector {
    settings: IndicatorSettings,
}

impl IndicatorDetector {
    pub fn new(settings: IndicatorSettings) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &IndicatorSettings {
        &self.settings
    }

    /// Judge whether the lamp in `region` is lit
    pub fn detect(&self, region: &RgbImage) -> IndicatorDetection {
        match self.settings.mode {
            DetectionMode::Brightness => self.detect_brightness(region),
            DetectionMode::Color => self.detect_color(region).0,
        }
    }

    /// Detect and render a diagnostic image
    pub fn detect_with_debug(&self, region: &RgbImage) -> (IndicatorDetection, RgbImage) {
        match self.settings.mode {
            DetectionMode::Brightness => {
                let detection = self.detect_brightness(region);
                (detection, debug::render_indicator_debug(region, &detection, None))
            }
            DetectionMode::Color => {
                let (detection, mask) = self.detect_color(region);
                (detection, debug::render_indicator_debug(region, &detection, Some(&mask)))
            }
        }
    }

    fn detect_brightness(&self, region: &RgbImage) -> IndicatorDetection {
        if region.width() == 0 || region.height() == 0 {
            return IndicatorDetection {
                state: false,
                value: 0.0,
                threshold: self.settings.threshold as f64,
            };
        }

        let gray = luminance(region);
        let mean = mean_intensity(&gray);
        let threshold = if self.settings.threshold == 0 {
            otsu_threshold(&gray) as f64
        } else {
            self.settings.threshold as f64
        };

        IndicatorDetection {
            state: mean > threshold,
            value: mean,
            threshold,
        }
    }

    fn detect_color(&self, region: &RgbImage) -> (IndicatorDetection, GrayImage) {
        let threshold = if self.settings.threshold == 0 {
            DEFAULT_COLOR_PERCENT
        } else {
            self.settings.threshold as f64 / 255.0 * 100.0
        };

        let ranges = color_ranges(self.settings.on_color);
        let mask = GrayImage::from_fn(region.width(), region.height(), |x, y| {
            let hsv = rgb_to_hsv(region.get_pixel(x, y));
            if ranges.iter().any(|range| in_range(hsv, range)) {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });

        let total = mask.width() as u64 * mask.height() as u64;
        let percent = if total == 0 {
            0.0
        } else {
            let lit = mask.pixels().filter(|p| p[0] == FOREGROUND).count() as u64;
            lit as f64 / total as f64 * 100.0
        };

        let detection = IndicatorDetection {
            state: percent > threshold,
            value: percent,
            threshold,
        };
        (detection, mask)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn color_detector(on_color: IndicatorColor, threshold: u8) -> IndicatorDetector {
        IndicatorDetector::new(IndicatorSettings {
            mode: DetectionMode::Color,
            threshold,
            on_color,
        })
    }

    /// `lit` percent of pixels in `color`, the rest dark gray
    fn patch(color: Rgb<u8>, lit: u32) -> RgbImage {
        RgbImage::from_fn(10, 10, |x, y| {
            if y * 10 + x < lit { color } else { Rgb([30, 30, 30]) }
        })
    }

    #[test]
    fn test_brightness_threshold() {
        let detector = IndicatorDetector::default();
        let bright = RgbImage::from_pixel(10, 10, Rgb([200, 200, 200]));
        let dim = RgbImage::from_pixel(10, 10, Rgb([60, 60, 60]));

        let on = detector.detect(&bright);
        assert!(on.state);
        assert!((on.value - 200.0).abs() < 0.5);
        assert_eq!(on.threshold, 128.0);
        assert!(!detector.detect(&dim).state);
    }

    #[test]
    fn test_brightness_is_strictly_greater() {
        let detector = IndicatorDetector::default();
        let edge = RgbImage::from_pixel(4, 4, Rgb([128, 128, 128]));
        assert!(!detector.detect(&edge).state);
    }

    #[test]
    fn test_brightness_otsu_threshold() {
        let detector = IndicatorDetector::new(IndicatorSettings {
            threshold: 0,
            ..Default::default()
        });
        // Mostly bright with a few dark pixels: mean sits above the split
        let region = RgbImage::from_fn(10, 10, |x, _| {
            if x < 2 { Rgb([10, 10, 10]) } else { Rgb([240, 240, 240]) }
        });
        let result = detector.detect(&region);
        assert!(result.state);
        assert!(result.threshold < 240.0);
    }

    #[test]
    fn test_color_mode_percentages() {
        let detector = color_detector(IndicatorColor::Green, 0);
        let result = detector.detect(&patch(Rgb([20, 230, 40]), 25));
        assert!(result.state);
        assert!((result.value - 25.0).abs() < 1e-9);
        assert_eq!(result.threshold, 10.0);

        assert!(!detector.detect(&patch(Rgb([20, 230, 40]), 5)).state);
    }

    #[test]
    fn test_color_mode_scaled_threshold() {
        // 51/255 is 20%
        let detector = color_detector(IndicatorColor::Blue, 51);
        let blue = Rgb([20, 40, 230]);
        assert!(!detector.detect(&patch(blue, 15)).state);
        assert!(detector.detect(&patch(blue, 30)).state);
    }

    #[test]
    fn test_red_wraps_hue_circle() {
        let detector = color_detector(IndicatorColor::Red, 0);
        // Hue near 0 and near 180 both count
        assert!(detector.detect(&patch(Rgb([230, 20, 20]), 50)).state);
        assert!(detector.detect(&patch(Rgb([230, 20, 80]), 50)).state);
        assert!(!detector.detect(&patch(Rgb([20, 230, 20]), 50)).state);
    }

    #[test]
    fn test_color_mode_ignores_desaturated_pixels() {
        let detector = color_detector(IndicatorColor::Yellow, 0);
        let washed_out = patch(Rgb([250, 250, 220]), 100);
        assert!(!detector.detect(&washed_out).state);
        assert!(detector.detect(&patch(Rgb([240, 200, 20]), 100)).state);
    }

    #[test]
    fn test_empty_region_is_off() {
        let region = RgbImage::new(0, 0);
        assert!(!IndicatorDetector::default().detect(&region).state);
        assert!(!color_detector(IndicatorColor::Red, 0).detect(&region).state);
    }

    #[test]
    fn test_detect_with_debug_matches_detect() {
        let detector = color_detector(IndicatorColor::Green, 0);
        let region = patch(Rgb([20, 230, 40]), 60);
        let (detection, visual) = detector.detect_with_debug(&region);
        assert_eq!(detection, detector.detect(&region));
        assert!(visual.width() > region.width());
    }
}
