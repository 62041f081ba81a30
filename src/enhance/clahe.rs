//! CLAHE on the L* channel, done by OpenCV.
//!
//! The frame goes RGB -> Lab, the L plane is equalized by OpenCV's tiled
//! contrast-limited equalizer, and the planes are merged and converted back.
//! Chroma planes are never touched.
//!
//! Needs the `enhance-opencv` feature. Without it [`available`] is false and
//! [`equalize_luminance`] returns an error telling how to rebuild.

use anyhow::Result;
use image::RgbImage;

/// Whether this build can run CLAHE.
pub fn available() -> bool {
    cfg!(feature = "enhance-opencv")
}

#[cfg(feature = "enhance-opencv")]
pub fn equalize_luminance(image: &RgbImage, clip_limit: f32, grid: (u32, u32)) -> Result<RgbImage> {
    use anyhow::{anyhow, Context};
    use opencv::core::{Mat, Scalar, Size, Vector, CV_8UC3};
    use opencv::imgproc;
    use opencv::prelude::*;

    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Ok(image.clone());
    }

    let mut rgb = Mat::new_rows_cols_with_default(
        height as i32,
        width as i32,
        CV_8UC3,
        Scalar::all(0.0),
    )?;
    rgb.data_bytes_mut()?.copy_from_slice(image.as_raw());

    let mut lab = Mat::default();
    convert(&rgb, &mut lab, imgproc::COLOR_RGB2Lab)?;

    let mut planes = Vector::<Mat>::new();
    opencv::core::split(&lab, &mut planes)?;

    let tiles = Size::new(grid.0.max(1) as i32, grid.1.max(1) as i32);
    let mut clahe = imgproc::create_clahe(clip_limit as f64, tiles)?;
    let mut lightness = Mat::default();
    clahe.apply(&planes.get(0)?, &mut lightness)?;
    planes.set(0, lightness)?;

    let mut merged = Mat::default();
    opencv::core::merge(&planes, &mut merged)?;

    let mut out = Mat::default();
    convert(&merged, &mut out, imgproc::COLOR_Lab2RGB)?;

    let bytes = out.data_bytes().context("reading equalized frame")?.to_vec();
    RgbImage::from_raw(width, height, bytes)
        .ok_or_else(|| anyhow!("equalized frame has the wrong size"))
}

#[cfg(feature = "enhance-opencv")]
fn convert(src: &opencv::core::Mat, dst: &mut opencv::core::Mat, code: i32) -> Result<()> {
    // macOS builds of OpenCV take an extra AlgorithmHint.
    #[cfg(target_os = "macos")]
    opencv::imgproc::cvt_color(src, dst, code, 0, opencv::core::AlgorithmHint::ALGO_HINT_DEFAULT)?;
    #[cfg(not(target_os = "macos"))]
    opencv::imgproc::cvt_color(src, dst, code, 0)?;
    Ok(())
}

#[cfg(not(feature = "enhance-opencv"))]
pub fn equalize_luminance(
    _image: &RgbImage,
    _clip_limit: f32,
    _grid: (u32, u32),
) -> Result<RgbImage> {
    anyhow::bail!("CLAHE needs OpenCV; rebuild with `--features enhance-opencv`")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgb;

    fn low_contrast() -> RgbImage {
        RgbImage::from_fn(64, 64, |x, y| {
            let v = 100 + ((x + y) % 16) as u8;
            Rgb([v, v, v])
        })
    }

    #[cfg(not(feature = "enhance-opencv"))]
    #[test]
    fn without_opencv_the_error_names_the_feature() {
        assert!(!available());
        let err = equalize_luminance(&low_contrast(), 2.0, (8, 8)).unwrap_err();
        assert!(err.to_string().contains("enhance-opencv"));
    }

    #[cfg(feature = "enhance-opencv")]
    #[test]
    fn equalization_stretches_a_flat_histogram() -> Result<()> {
        let frame = low_contrast();
        let out = equalize_luminance(&frame, 2.0, (8, 8))?;
        assert_eq!(out.dimensions(), frame.dimensions());

        let spread = |img: &RgbImage| {
            let lum = img.pixels().map(|p| p.0[1]);
            lum.clone().max().unwrap_or(0) - lum.min().unwrap_or(0)
        };
        assert!(spread(&out) > spread(&frame));
        Ok(())
    }

    #[cfg(feature = "enhance-opencv")]
    #[test]
    fn grey_stays_grey() -> Result<()> {
        let out = equalize_luminance(&low_contrast(), 2.0, (4, 4))?;
        for p in out.pixels() {
            let [r, g, b] = p.0;
            assert!(r.abs_diff(g) <= 2 && g.abs_diff(b) <= 2, "{:?}", p);
        }
        Ok(())
    }

    #[cfg(feature = "enhance-opencv")]
    #[test]
    fn empty_frame_is_returned_as_is() -> Result<()> {
        let out = equalize_luminance(&RgbImage::new(0, 0), 2.0, (8, 8))?;
        assert_eq!(out.dimensions(), (0, 0));
        Ok(())
    }
}
