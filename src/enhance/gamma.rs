//! Power-law intensity remapping through a 256-entry LUT.

use image::RgbImage;

/// `out = 255 * (in / 255) ^ (1 / gamma)`, truncated to 8 bits.
///
/// Gamma above 1 lifts shadows and midtones; endpoints 0 and 255 are fixed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct GammaLut {
    table: [u8; 256],
}

impl GammaLut {
    pub fn new(gamma: f32) -> Self {
        let mut table = [0u8; 256];
        if !(gamma.is_finite() && gamma > 0.0) {
            for (i, entry) in table.iter_mut().enumerate() {
                *entry = i as u8;
            }
            return Self { table };
        }
        let inv_gamma = 1.0 / gamma as f64;
        for (i, entry) in table.iter_mut().enumerate() {
            let value = (i as f64 / 255.0).powf(inv_gamma) * 255.0;
            *entry = value.clamp(0.0, 255.0) as u8;
        }
        Self { table }
    }

    pub fn map(&self, value: u8) -> u8 {
        self.table[value as usize]
    }

    /// Remap every channel of every pixel in place.
    pub fn apply(&self, image: &mut RgbImage) {
        for sample in image.iter_mut() {
            *sample = self.table[*sample as usize];
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shadow_lift_never_darkens() {
        for gamma in [1.05f32, 1.2, 2.0, 3.5] {
            let lut = GammaLut::new(gamma);
            for v in 0..=255u8 {
                assert!(lut.map(v) >= v, "gamma {} darkened {}", gamma, v);
            }
        }
    }

    #[test]
    fn endpoints_are_fixed() {
        let lut = GammaLut::new(1.2);
        assert_eq!(lut.map(0), 0);
        assert_eq!(lut.map(255), 255);
    }

    #[test]
    fn lut_is_monotonic() {
        let lut = GammaLut::new(0.7);
        for v in 1..=255u8 {
            assert!(lut.map(v) >= lut.map(v - 1));
        }
    }

    #[test]
    fn matches_power_law() {
        let lut = GammaLut::new(1.2);
        // 255 * (64/255)^(1/1.2) = 80.58
        assert_eq!(lut.map(64), 80);
    }

    #[test]
    fn invalid_gamma_is_identity() {
        let lut = GammaLut::new(0.0);
        assert_eq!(lut.map(77), 77);
    }

    #[test]
    fn apply_touches_every_channel() {
        let mut img = RgbImage::from_pixel(2, 2, image::Rgb([64, 128, 0]));
        let lut = GammaLut::new(1.2);
        lut.apply(&mut img);
        assert_eq!(img.get_pixel(1, 1).0, [lut.map(64), lut.map(128), 0]);
    }
}
