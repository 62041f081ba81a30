//! Frame enhancement applied before inference.
//!
//! Three stages, always in this order:
//! 1. CLAHE on the L* channel (local contrast)
//! 2. Gamma LUT (shadow lift)
//! 3. Unsharp mask (edge sharpening)
//!
//! Each stage is a pure function of its input. Dimensions never change.
//! CLAHE runs through OpenCV (`enhance-opencv` feature); builds without it
//! skip that stage, and a failing CLAHE call passes the frame on unchanged.
//! With the master switch off, [`Enhancer::enhance`] hands back the input
//! itself (`Cow::Borrowed`), so callers that need an owned copy must make one.

pub mod clahe;
pub mod gamma;
pub mod sharpen;

use std::borrow::Cow;

use image::RgbImage;
use log::warn;

pub use gamma::GammaLut;

#[derive(Clone, Debug, PartialEq)]
pub struct ClaheConfig {
    pub enabled: bool,
    /// Histogram clip limit, as a multiple of the mean bin height.
    pub clip_limit: f32,
    /// Tile grid as (columns, rows).
    pub grid: (u32, u32),
}

impl Default for ClaheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clip_limit: 2.0,
            grid: (8, 8),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct GammaConfig {
    pub enabled: bool,
    pub value: f32,
}

impl Default for GammaConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            value: 1.2,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SharpenConfig {
    pub enabled: bool,
    /// Weight `k` of the unsharp mask.
    pub strength: f32,
    /// Gaussian sigma of the blurred copy.
    pub sigma: f32,
}

impl Default for SharpenConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strength: 1.0,
            sigma: 3.0,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct EnhanceConfig {
    /// Master switch. Off means frames pass through untouched.
    pub enabled: bool,
    pub clahe: ClaheConfig,
    pub gamma: GammaConfig,
    pub sharpen: SharpenConfig,
}

impl Default for EnhanceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            clahe: ClaheConfig::default(),
            gamma: GammaConfig::default(),
            sharpen: SharpenConfig::default(),
        }
    }
}

impl EnhanceConfig {
    /// Master switch on, every stage off.
    pub fn passthrough() -> Self {
        let mut config = Self::default();
        config.clahe.enabled = false;
        config.gamma.enabled = false;
        config.sharpen.enabled = false;
        config
    }
}

/// Stateless enhancement pipeline. The gamma LUT is built once.
#[derive(Clone, Debug)]
pub struct Enhancer {
    config: EnhanceConfig,
    gamma_lut: GammaLut,
}

impl Enhancer {
    pub fn new(config: EnhanceConfig) -> Self {
        if config.enabled && config.clahe.enabled && !clahe::available() {
            warn!("CLAHE skipped: built without the `enhance-opencv` feature");
        }
        let gamma_lut = GammaLut::new(config.gamma.value);
        Self { config, gamma_lut }
    }

    pub fn config(&self) -> &EnhanceConfig {
        &self.config
    }

    pub fn enhance<'a>(&self, frame: &'a RgbImage) -> Cow<'a, RgbImage> {
        if !self.config.enabled {
            return Cow::Borrowed(frame);
        }

        let mut out = if self.config.clahe.enabled && clahe::available() {
            let ClaheConfig { clip_limit, grid, .. } = self.config.clahe;
            clahe::equalize_luminance(frame, clip_limit, grid).unwrap_or_else(|e| {
                warn!("CLAHE failed, frame passed on unequalized: {e:#}");
                frame.clone()
            })
        } else {
            frame.clone()
        };

        if self.config.gamma.enabled {
            self.gamma_lut.apply(&mut out);
        }

        if self.config.sharpen.enabled {
            out = sharpen::unsharp_mask(
                &out,
                self.config.sharpen.sigma,
                self.config.sharpen.strength,
            );
        }

        Cow::Owned(out)
    }
}

impl Default for Enhancer {
    fn default() -> Self {
        Self::new(EnhanceConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn scene() -> RgbImage {
        RgbImage::from_fn(96, 64, |x, y| {
            let base = if (x / 16 + y / 16) % 2 == 0 { 40 } else { 90 };
            Rgb([base + (x % 7) as u8, base + (y % 5) as u8, base])
        })
    }

    #[test]
    fn enhancement_is_deterministic() {
        let enhancer = Enhancer::default();
        let frame = scene();
        let a = enhancer.enhance(&frame).into_owned();
        let b = enhancer.enhance(&frame).into_owned();
        assert_eq!(a, b);
    }

    #[test]
    fn enhancement_preserves_dimensions() {
        let enhancer = Enhancer::default();
        for (w, h) in [(96, 64), (1, 1), (13, 7), (640, 3)] {
            let frame = RgbImage::from_pixel(w, h, Rgb([10, 20, 30]));
            assert_eq!(enhancer.enhance(&frame).dimensions(), (w, h));
        }
    }

    #[test]
    fn master_switch_off_borrows_input() {
        let config = EnhanceConfig {
            enabled: false,
            ..EnhanceConfig::default()
        };
        let enhancer = Enhancer::new(config);
        let frame = scene();
        let out = enhancer.enhance(&frame);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert!(std::ptr::eq(&*out, &frame));
    }

    #[test]
    fn all_stages_off_is_pixel_identical() {
        let enhancer = Enhancer::new(EnhanceConfig::passthrough());
        let frame = scene();
        assert_eq!(*enhancer.enhance(&frame), frame);
    }

    #[test]
    fn enhancement_does_not_touch_the_raw_frame() {
        let enhancer = Enhancer::default();
        let frame = scene();
        let before = frame.clone();
        let out = enhancer.enhance(&frame);
        assert_ne!(*out, frame);
        assert_eq!(frame, before);
    }

    #[cfg(not(feature = "enhance-opencv"))]
    #[test]
    fn clahe_is_skipped_without_opencv() {
        let mut config = EnhanceConfig::passthrough();
        config.clahe.enabled = true;
        let enhancer = Enhancer::new(config);
        let frame = scene();
        assert_eq!(*enhancer.enhance(&frame), frame);
    }

    #[cfg(feature = "enhance-opencv")]
    #[test]
    fn clahe_only_pipeline_changes_a_flat_scene() {
        let mut config = EnhanceConfig::passthrough();
        config.clahe.enabled = true;
        let enhancer = Enhancer::new(config);
        let frame = scene();
        let out = enhancer.enhance(&frame);
        assert_eq!(out.dimensions(), frame.dimensions());
        assert_ne!(*out, frame);
    }

    #[test]
    fn gamma_only_pipeline_never_darkens() {
        let mut config = EnhanceConfig::passthrough();
        config.gamma.enabled = true;
        config.gamma.value = 1.8;
        let enhancer = Enhancer::new(config);
        let frame = scene();
        let out = enhancer.enhance(&frame);
        for (after, before) in out.iter().zip(frame.iter()) {
            assert!(after >= before);
        }
    }
}
