//! Offline batch enhancement of a captured dataset.
//!
//! Every image under the input root is run through the [`Enhancer`] and
//! written to the same relative path under the output root. A file that fails
//! to decode or write is recorded and skipped; the batch always runs to the end.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use image::imageops::{self, FilterType};
use image::{Rgb, RgbImage};
use thiserror::Error;

use crate::enhance::Enhancer;
use crate::present::bitmap_font;

/// Raster extensions picked up by [`collect_images`], matched case-insensitively.
pub const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "bmp"];

/// Width limit for the before/after comparison image.
pub const COMPARISON_MAX_WIDTH: u32 = 800;

const ORIGINAL_LABEL: Rgb<u8> = Rgb([255, 0, 0]);
const PROCESSED_LABEL: Rgb<u8> = Rgb([0, 255, 0]);

/// One file the batch could not process.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{}: {reason}", path.display())]
pub struct ImageFailure {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    pub found: usize,
    pub written: Vec<PathBuf>,
    pub failures: Vec<ImageFailure>,
}

impl BatchReport {
    pub fn processed(&self) -> usize {
        self.written.len()
    }
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| {
            IMAGE_EXTENSIONS
                .iter()
                .any(|known| ext.eq_ignore_ascii_case(known))
        })
}

/// All image files under `root`, recursively, in sorted order.
pub fn collect_images(root: &Path) -> Result<Vec<PathBuf>> {
    let mut found = Vec::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let entries =
            fs::read_dir(&dir).with_context(|| format!("failed to list {}", dir.display()))?;
        for entry in entries {
            let entry = entry.with_context(|| format!("failed to list {}", dir.display()))?;
            let path = entry.path();
            let file_type = entry
                .file_type()
                .with_context(|| format!("failed to stat {}", path.display()))?;
            if file_type.is_dir() {
                pending.push(path);
            } else if file_type.is_file() && has_image_extension(&path) {
                found.push(path);
            }
        }
    }
    found.sort();
    Ok(found)
}

pub struct BatchPreprocessor {
    enhancer: Enhancer,
    resize: Option<(u32, u32)>,
}

impl BatchPreprocessor {
    pub fn new(enhancer: Enhancer) -> Self {
        Self {
            enhancer,
            resize: None,
        }
    }

    /// Resize every output to `width` x `height` after enhancement.
    pub fn with_resize(mut self, resize: Option<(u32, u32)>) -> Self {
        self.resize = resize;
        self
    }

    pub fn run(&self, input: &Path, output: &Path) -> Result<BatchReport> {
        self.run_with_progress(input, output, |_, _| {})
    }

    /// Like [`run`](Self::run), calling `progress(done, total)` after each file.
    pub fn run_with_progress(
        &self,
        input: &Path,
        output: &Path,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<BatchReport> {
        let files = collect_images(input)?;
        let mut report = BatchReport {
            found: files.len(),
            ..BatchReport::default()
        };
        log::info!("found {} images under {}", files.len(), input.display());

        for (idx, path) in files.iter().enumerate() {
            match self.process_file(input, output, path) {
                Ok(written) => report.written.push(written),
                Err(err) => {
                    let failure = ImageFailure {
                        path: path.clone(),
                        reason: format!("{:#}", err),
                    };
                    log::warn!("skipping {}", failure);
                    report.failures.push(failure);
                }
            }
            progress(idx + 1, files.len());
        }

        log::info!(
            "processed {} of {} images into {} ({} failed)",
            report.processed(),
            report.found,
            output.display(),
            report.failures.len()
        );
        Ok(report)
    }

    /// Enhance (and optionally resize) one decoded image.
    pub fn process_image(&self, image: &RgbImage) -> RgbImage {
        let enhanced = self.enhancer.enhance(image).into_owned();
        match self.resize {
            Some((w, h)) if enhanced.dimensions() != (w, h) => {
                imageops::resize(&enhanced, w, h, FilterType::Triangle)
            }
            _ => enhanced,
        }
    }

    fn process_file(&self, input: &Path, output: &Path, path: &Path) -> Result<PathBuf> {
        let relative = path
            .strip_prefix(input)
            .with_context(|| format!("{} is outside {}", path.display(), input.display()))?;
        let target = output.join(relative);

        let image = image::open(path)
            .with_context(|| format!("failed to decode {}", path.display()))?
            .to_rgb8();
        let processed = self.process_image(&image);

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        processed
            .save(&target)
            .with_context(|| format!("failed to write {}", target.display()))?;
        Ok(target)
    }
}

/// Side-by-side before/after view, labelled "Original" and "Processed".
/// Both halves are scaled down to at most `max_width` pixels wide.
pub fn comparison(original: &RgbImage, processed: &RgbImage, max_width: u32) -> RgbImage {
    let (w, h) = original.dimensions();
    let (tw, th) = if w > max_width && w > 0 {
        let scale = max_width as f32 / w as f32;
        (max_width, ((h as f32 * scale) as u32).max(1))
    } else {
        (w, h)
    };

    let resize = |img: &RgbImage| {
        if img.dimensions() == (tw, th) {
            img.clone()
        } else {
            imageops::resize(img, tw, th, FilterType::Triangle)
        }
    };
    let left = resize(original);
    let right = resize(processed);

    let mut out = RgbImage::new(tw * 2, th);
    imageops::replace(&mut out, &left, 0, 0);
    imageops::replace(&mut out, &right, tw as i64, 0);

    let cell = bitmap_font::cell_for_scale(0.8);
    bitmap_font::draw_text(&mut out, "Original", 10, 10, cell, ORIGINAL_LABEL);
    bitmap_font::draw_text(&mut out, "Processed", tw as i32 + 10, 10, cell, PROCESSED_LABEL);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::enhance::EnhanceConfig;

    #[test]
    fn extension_match_ignores_case() {
        assert!(has_image_extension(Path::new("a/b.JPG")));
        assert!(has_image_extension(Path::new("b.Jpeg")));
        assert!(has_image_extension(Path::new("c.bmp")));
        assert!(!has_image_extension(Path::new("d.gif")));
        assert!(!has_image_extension(Path::new("noext")));
    }

    #[test]
    fn collect_is_recursive_and_sorted() -> Result<()> {
        let dir = tempfile::tempdir()?;
        fs::create_dir_all(dir.path().join("b/c"))?;
        for name in ["z.png", "b/c/a.JPG", "b/x.bmp", "notes.txt"] {
            fs::write(dir.path().join(name), b"")?;
        }
        let found = collect_images(dir.path())?;
        let rel: Vec<_> = found
            .iter()
            .map(|p| p.strip_prefix(dir.path()).map(Path::to_path_buf))
            .collect::<std::result::Result<_, _>>()?;
        assert_eq!(
            rel,
            vec![
                PathBuf::from("b/c/a.JPG"),
                PathBuf::from("b/x.bmp"),
                PathBuf::from("z.png")
            ]
        );
        Ok(())
    }

    #[test]
    fn resize_applies_after_enhancement() {
        let pre = BatchPreprocessor::new(Enhancer::new(EnhanceConfig::passthrough()))
            .with_resize(Some((16, 8)));
        let out = pre.process_image(&RgbImage::new(40, 30));
        assert_eq!(out.dimensions(), (16, 8));
    }

    #[test]
    fn comparison_limits_width() {
        let original = RgbImage::new(1600, 900);
        let processed = RgbImage::new(1600, 900);
        assert_eq!(comparison(&original, &processed, 800).dimensions(), (1600, 450));
        let small = RgbImage::new(320, 240);
        assert_eq!(comparison(&small, &small, 800).dimensions(), (640, 240));
    }

    #[test]
    fn comparison_halves_are_labelled() {
        let image = RgbImage::new(320, 240);
        let out = comparison(&image, &image, 800);
        let has = |color: Rgb<u8>, xs: std::ops::Range<u32>| {
            (0..40).any(|y| xs.clone().any(|x| *out.get_pixel(x, y) == color))
        };
        assert!(has(ORIGINAL_LABEL, 0..320));
        assert!(!has(ORIGINAL_LABEL, 320..640));
        assert!(has(PROCESSED_LABEL, 320..640));
    }
}
