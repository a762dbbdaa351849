//! Image preprocessing for segment and indicator analysis
//!
//! Channel selection, smoothing, thresholding and color space helpers
//! shared by the digit recognizer and the indicator detector.

use image::{GrayImage, Luma, Rgb, RgbImage};
use imageproc::contrast::otsu_level;
use imageproc::filter::gaussian_blur_f32;

use super::{ColorChannel, DisplayMode};

/// Sigma matching a 3x3 Gaussian kernel
const SMOOTHING_SIGMA: f32 = 0.8;

/// Foreground value in binary images
pub const FOREGROUND: u8 = 255;

/// Luminance of an RGB pixel (0.299 R + 0.587 G + 0.114 B)
pub fn luma(pixel: &Rgb<u8>) -> u8 {
    let [r, g, b] = pixel.0;
    let value = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
    value.round().clamp(0.0, 255.0) as u8
}

/// Reduce an RGB region to a single channel
pub fn select_channel(region: &RgbImage, channel: ColorChannel) -> GrayImage {
    GrayImage::from_fn(region.width(), region.height(), |x, y| {
        let pixel = region.get_pixel(x, y);
        let value = match channel {
            ColorChannel::Red => pixel[0],
            ColorChannel::Green => pixel[1],
            ColorChannel::Blue => pixel[2],
            ColorChannel::Gray => luma(pixel),
        };
        Luma([value])
    })
}

/// Luminance image of an RGB region
pub fn luminance(region: &RgbImage) -> GrayImage {
    select_channel(region, ColorChannel::Gray)
}

/// Light Gaussian smoothing to suppress sensor noise
pub fn smooth(gray: &GrayImage) -> GrayImage {
    if gray.width() == 0 || gray.height() == 0 {
        return gray.clone();
    }
    gaussian_blur_f32(gray, SMOOTHING_SIGMA)
}

/// Automatic threshold by Otsu's method
pub fn otsu_threshold(gray: &GrayImage) -> u8 {
    otsu_level(gray)
}

/// Pixels strictly above `threshold` become foreground
pub fn binarize(gray: &GrayImage, threshold: u8) -> GrayImage {
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        if gray.get_pixel(x, y)[0] > threshold {
            Luma([FOREGROUND])
        } else {
            Luma([0])
        }
    })
}

/// Invert a binary or grayscale image in place
pub fn invert(gray: &mut GrayImage) {
    image::imageops::invert(gray);
}

/// Binary foreground mask of a display region.
///
/// Segments end up as foreground regardless of display polarity.
/// A threshold of 0 selects Otsu's method. Returns the mask and the
/// threshold actually applied.
pub fn foreground_mask(
    region: &RgbImage,
    channel: ColorChannel,
    mode: DisplayMode,
    threshold: u8,
) -> (GrayImage, u8) {
    let gray = smooth(&select_channel(region, channel));
    let level = if threshold == 0 {
        otsu_threshold(&gray)
    } else {
        threshold
    };

    let mut mask = binarize(&gray, level);
    if mode == DisplayMode::DarkOnLight {
        invert(&mut mask);
    }
    (mask, level)
}

/// Mean pixel value of a grayscale image
pub fn mean_intensity(gray: &GrayImage) -> f64 {
    let total = gray.width() as u64 * gray.height() as u64;
    if total == 0 {
        return 0.0;
    }
    let sum: u64 = gray.pixels().map(|p| p[0] as u64).sum();
    sum as f64 / total as f64
}

/// Fraction of foreground pixels within `[x1, x2) x [y1, y2)`, clamped to the image
pub fn foreground_ratio(mask: &GrayImage, x1: u32, y1: u32, x2: u32, y2: u32) -> f64 {
    let x2 = x2.min(mask.width());
    let y2 = y2.min(mask.height());
    if x1 >= x2 || y1 >= y2 {
        return 0.0;
    }

    let mut lit = 0u64;
    for y in y1..y2 {
        for x in x1..x2 {
            if mask.get_pixel(x, y)[0] == FOREGROUND {
                lit += 1;
            }
        }
    }
    lit as f64 / ((x2 - x1) as u64 * (y2 - y1) as u64) as f64
}

/// HSV in the 8-bit convention: hue 0-180, saturation and value 0-255
pub fn rgb_to_hsv(pixel: &Rgb<u8>) -> [u8; 3] {
    let [r, g, b] = pixel.0.map(|c| c as f32);
    let max = r.max(g).max(b);
    let min = r.min(g).min(b);
    let delta = max - min;

    let saturation = if max > 0.0 { delta / max * 255.0 } else { 0.0 };
    let mut hue = if delta == 0.0 {
        0.0
    } else if max == r {
        60.0 * (g - b) / delta
    } else if max == g {
        120.0 + 60.0 * (b - r) / delta
    } else {
        240.0 + 60.0 * (r - g) / delta
    };
    if hue < 0.0 {
        hue += 360.0;
    }

    [
        (hue / 2.0).round().clamp(0.0, 180.0) as u8,
        saturation.round().clamp(0.0, 255.0) as u8,
        max as u8,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_luma_weights() {
        assert_eq!(luma(&Rgb([255, 255, 255])), 255);
        assert_eq!(luma(&Rgb([0, 0, 0])), 0);
        assert_eq!(luma(&Rgb([100, 0, 0])), 30);
        assert_eq!(luma(&Rgb([0, 100, 0])), 59);
    }

    #[test]
    fn test_select_channel() {
        let region = RgbImage::from_pixel(2, 2, Rgb([10, 20, 30]));
        assert_eq!(select_channel(&region, ColorChannel::Red).get_pixel(0, 0)[0], 10);
        assert_eq!(select_channel(&region, ColorChannel::Green).get_pixel(1, 1)[0], 20);
        assert_eq!(select_channel(&region, ColorChannel::Blue).get_pixel(1, 0)[0], 30);
    }

    #[test]
    fn test_binarize_is_strict() {
        let gray = GrayImage::from_fn(3, 1, |x, _| Luma([[99u8, 100, 101][x as usize]]));
        let bin = binarize(&gray, 100);
        assert_eq!(bin.get_pixel(0, 0)[0], 0);
        assert_eq!(bin.get_pixel(1, 0)[0], 0);
        assert_eq!(bin.get_pixel(2, 0)[0], FOREGROUND);
    }

    #[test]
    fn test_foreground_mask_polarity() {
        // Left half bright, right half dark
        let region = RgbImage::from_fn(20, 10, |x, _| {
            if x < 10 { Rgb([240, 240, 240]) } else { Rgb([15, 15, 15]) }
        });

        let (light, level) = foreground_mask(&region, ColorChannel::Gray, DisplayMode::LightOnDark, 0);
        assert!(level >= 15 && level < 240);
        assert_eq!(light.get_pixel(2, 5)[0], FOREGROUND);
        assert_eq!(light.get_pixel(17, 5)[0], 0);

        let (dark, _) = foreground_mask(&region, ColorChannel::Gray, DisplayMode::DarkOnLight, 0);
        assert_eq!(dark.get_pixel(2, 5)[0], 0);
        assert_eq!(dark.get_pixel(17, 5)[0], FOREGROUND);
    }

    #[test]
    fn test_foreground_ratio() {
        let mask = GrayImage::from_fn(10, 10, |x, _| Luma([if x < 5 { FOREGROUND } else { 0 }]));
        assert!((foreground_ratio(&mask, 0, 0, 10, 10) - 0.5).abs() < 1e-9);
        assert!((foreground_ratio(&mask, 0, 0, 5, 10) - 1.0).abs() < 1e-9);
        assert_eq!(foreground_ratio(&mask, 5, 5, 5, 9), 0.0);
        // Out-of-range boxes are clamped
        assert!((foreground_ratio(&mask, 5, 0, 50, 50) - 0.0).abs() < 1e-9);
    }

    #[test]
    fn test_mean_intensity() {
        let gray = GrayImage::from_pixel(4, 4, Luma([200]));
        assert!((mean_intensity(&gray) - 200.0).abs() < 1e-9);
        assert_eq!(mean_intensity(&GrayImage::new(0, 0)), 0.0);
    }

    #[test]
    fn test_rgb_to_hsv() {
        assert_eq!(rgb_to_hsv(&Rgb([255, 0, 0])), [0, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 255, 0])), [60, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 255])), [120, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([255, 255, 0])), [30, 255, 255]);
        assert_eq!(rgb_to_hsv(&Rgb([128, 128, 128])), [0, 0, 128]);
        assert_eq!(rgb_to_hsv(&Rgb([0, 0, 0])), [0, 0, 0]);
    }
}
