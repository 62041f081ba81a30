//! Unsharp masking.

use image::RgbImage;
use imageproc::filter::gaussian_blur_f32;

/// `(1 + k) * original - k * blur(original)`, clamped to 0..=255.
///
/// A non-positive `strength` or `sigma` returns an unchanged copy.
pub fn unsharp_mask(image: &RgbImage, sigma: f32, strength: f32) -> RgbImage {
    if strength <= 0.0 || sigma <= 0.0 || image.width() == 0 || image.height() == 0 {
        return image.clone();
    }

    let blurred = gaussian_blur_f32(image, sigma);
    let mut out = image.clone();
    for (dst, &soft) in out.iter_mut().zip(blurred.iter()) {
        let value = (1.0 + strength) * *dst as f32 - strength * soft as f32;
        *dst = value.round().clamp(0.0, 255.0) as u8;
    }
    out
}
