use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::Local;
use image::{ImageFormat, RgbImage};

/// Saves raw frames as `<prefix>_<YYYYmmdd_HHMMSS>.jpg`.
///
/// Timestamps have second resolution; a second capture within the same second
/// gets a `_1`, `_2`, ... suffix instead of overwriting the first.
#[derive(Clone, Debug)]
pub struct CaptureWriter {
    output_dir: PathBuf,
    prefix: String,
}

impl CaptureWriter {
    pub fn new(output_dir: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            prefix: prefix.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Write `frame` and return the path it landed at. The directory is
    /// created on demand.
    pub fn save(&self, frame: &RgbImage) -> Result<PathBuf> {
        fs::create_dir_all(&self.output_dir)
            .with_context(|| format!("failed to create {}", self.output_dir.display()))?;

        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();
        let mut path = self
            .output_dir
            .join(format!("{}_{}.jpg", self.prefix, stamp));
        let mut n = 1;
        while path.exists() {
            path = self
                .output_dir
                .join(format!("{}_{}_{}.jpg", self.prefix, stamp, n));
            n += 1;
        }

        frame
            .save_with_format(&path, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write capture {}", path.display()))?;
        log::info!("saved capture {}", path.display());
        Ok(path)
    }

    /// Number of captures with this prefix already in the output directory.
    pub fn existing_count(&self) -> usize {
        let Ok(entries) = fs::read_dir(&self.output_dir) else {
            return 0;
        };
        let lead = format!("{}_", self.prefix);
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| {
                let name = entry.file_name();
                let name = name.to_string_lossy();
                name.starts_with(&lead) && name.to_ascii_lowercase().ends_with(".jpg")
            })
            .count()
    }
}
