//! Road mask thresholding and overlay blending on RGB images.

use image::{Rgb, RgbImage, Rgba};

/// Green at roughly half opacity.
pub const ROAD_OVERLAY: Rgba<u8> = Rgba([0, 255, 0, 127]);

/// Marks pixels whose road probability is strictly above `threshold`.
pub fn road_mask(probs: &[f32], threshold: f32) -> Vec<bool> {
    probs.iter().map(|&p| p > threshold).collect()
}

/// Alpha-composites `color` over an opaque pixel.
pub fn blend_pixel(base: Rgb<u8>, color: Rgba<u8>) -> Rgb<u8> {
    let a = color[3] as u32;
    let mix = |b: u8, c: u8| ((c as u32 * a + b as u32 * (255 - a) + 127) / 255) as u8;
    Rgb([
        mix(base[0], color[0]),
        mix(base[1], color[1]),
        mix(base[2], color[2]),
    ])
}

/// Returns a copy of `base` with every masked pixel blended with `color`.
/// `mask` is row-major and must cover the image.
pub fn overlay_mask(base: &RgbImage, mask: &[bool], color: Rgba<u8>) -> RgbImage {
    let mut out = base.clone();
    for (pixel, &hit) in out.pixels_mut().zip(mask) {
        if hit {
            *pixel = blend_pixel(*pixel, color);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blend_is_weighted_by_alpha() {
        assert_eq!(blend_pixel(Rgb([0, 0, 0]), ROAD_OVERLAY), Rgb([0, 127, 0]));
        assert_eq!(
            blend_pixel(Rgb([200, 200, 200]), Rgba([0, 255, 0, 255])),
            Rgb([0, 255, 0])
        );
        assert_eq!(
            blend_pixel(Rgb([10, 20, 30]), Rgba([0, 255, 0, 0])),
            Rgb([10, 20, 30])
        );
    }

    #[test]
    fn threshold_is_strict() {
        assert_eq!(road_mask(&[0.2, 0.5, 0.51], 0.5), vec![false, false, true]);
    }

    #[test]
    fn overlay_only_touches_masked_pixels() {
        let base = RgbImage::from_pixel(2, 1, Rgb([100, 100, 100]));
        let out = overlay_mask(&base, &[false, true], ROAD_OVERLAY);
        assert_eq!(*out.get_pixel(0, 0), Rgb([100, 100, 100]));
        assert_ne!(*out.get_pixel(1, 0), Rgb([100, 100, 100]));
    }
}
