//! Perspective extraction of a quadrilateral region into an upright rectangle

use image::{Rgb, RgbImage};
use imageproc::geometric_transformations::{warp_into, Interpolation, Projection};
use tracing::debug;

use crate::config::PerspectiveConfig;

/// Warp the configured quadrilateral of `frame` into an upright rectangle.
///
/// Corners are taken in order top-left, top-right, bottom-right, bottom-left
/// and map onto the output corners. Returns `None` unless exactly four
/// points and a non-zero output size are configured. Degenerate corner
/// geometry still yields an image of the configured size (black where
/// nothing maps).
pub fn extract_region(frame: &RgbImage, perspective: &PerspectiveConfig) -> Option<RgbImage> {
    let [width, height] = perspective.output_size;
    if perspective.points.len() != 4 || width == 0 || height == 0 {
        return None;
    }

    let mut source = [(0.0f32, 0.0f32); 4];
    for (slot, point) in source.iter_mut().zip(&perspective.points) {
        *slot = (point[0] as f32, point[1] as f32);
    }

    Some(warp_quad(frame, source, width, height))
}

/// Warp four source corners onto a `width` x `height` rectangle
pub fn warp_quad(frame: &RgbImage, corners: [(f32, f32); 4], width: u32, height: u32) -> RgbImage {
    let right = width.saturating_sub(1) as f32;
    let bottom = height.saturating_sub(1) as f32;
    let target = [(0.0, 0.0), (right, 0.0), (right, bottom), (0.0, bottom)];

    let mut out = RgbImage::new(width, height);
    match Projection::from_control_points(corners, target) {
        Some(projection) => {
            warp_into(frame, &projection, Interpolation::Bilinear, Rgb([0, 0, 0]), &mut out);
        }
        None => {
            debug!(?corners, "Degenerate perspective corners, emitting blank region");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quad(points: [[i32; 2]; 4], size: [u32; 2]) -> PerspectiveConfig {
        PerspectiveConfig {
            points: points.to_vec(),
            output_size: size,
        }
    }

    #[test]
    fn test_output_has_configured_size() {
        let frame = RgbImage::from_pixel(100, 80, Rgb([50, 60, 70]));
        let config = quad([[10, 10], [60, 12], [58, 40], [12, 38]], [123, 45]);
        let region = extract_region(&frame, &config).unwrap();
        assert_eq!(region.dimensions(), (123, 45));
    }

    #[test]
    fn test_requires_four_points() {
        let frame = RgbImage::new(50, 50);
        let config = PerspectiveConfig {
            points: vec![[0, 0], [10, 0], [10, 10]],
            output_size: [20, 20],
        };
        assert!(extract_region(&frame, &config).is_none());

        let zero = quad([[0, 0], [10, 0], [10, 10], [0, 10]], [0, 20]);
        assert!(extract_region(&frame, &zero).is_none());
    }

    #[test]
    fn test_axis_aligned_quad_is_a_crop() {
        let frame = RgbImage::from_fn(60, 40, |x, y| {
            if (20..40).contains(&x) && (10..30).contains(&y) {
                Rgb([200, 10, 10])
            } else {
                Rgb([0, 0, 0])
            }
        });
        let config = quad([[20, 10], [39, 10], [39, 29], [20, 29]], [20, 20]);
        let region = extract_region(&frame, &config).unwrap();

        for (x, y) in [(0, 0), (19, 19), (10, 10), (19, 0)] {
            let pixel = region.get_pixel(x, y);
            assert!(pixel[0] >= 195, "pixel ({x}, {y}) = {pixel:?}");
            assert!(pixel[1] <= 12);
        }
    }

    #[test]
    fn test_degenerate_corners_yield_sized_output() {
        let frame = RgbImage::from_pixel(30, 30, Rgb([255, 255, 255]));
        let config = quad([[5, 5], [5, 5], [5, 5], [5, 5]], [16, 8]);
        let region = extract_region(&frame, &config).unwrap();
        assert_eq!(region.dimensions(), (16, 8));
    }
}
