//! Synthetic source for `stub://` URLs.
//!
//! Produces frames at the requested resolution with a slowly drifting pattern,
//! so the whole pipeline can run without a camera.

use image::{Rgb, RgbImage};

use super::{FrameSource, SourceError, StreamConfig};

pub struct SyntheticSource {
    config: StreamConfig,
    frame_count: u64,
    connected: bool,
}

impl SyntheticSource {
    pub fn new(config: StreamConfig) -> Self {
        Self {
            config,
            frame_count: 0,
            connected: false,
        }
    }

    fn generate(&self) -> RgbImage {
        let shift = self.frame_count as u32;
        RgbImage::from_fn(self.config.width, self.config.height, |x, y| {
            let r = ((x + shift) % 256) as u8;
            let g = ((y + shift / 2) % 256) as u8;
            let b = ((x ^ y) % 256) as u8;
            Rgb([r, g, b])
        })
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!("{} (synthetic)", self.config.url)
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        if self.config.width == 0 || self.config.height == 0 {
            return Err(SourceError::unavailable(
                &self.config.url,
                "synthetic source needs non-zero dimensions",
            ));
        }
        self.connected = true;
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        if !self.connected {
            return Err(SourceError::interrupted(&self.config.url, "not connected"));
        }
        self.frame_count += 1;
        Ok(self.generate())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config() -> StreamConfig {
        StreamConfig {
            url: "stub://bench".to_string(),
            width: 64,
            height: 48,
            ..StreamConfig::default()
        }
    }

    #[test]
    fn synthetic_source_produces_requested_size() -> anyhow::Result<()> {
        let mut source = SyntheticSource::new(stub_config());
        source.connect()?;
        let frame = source.read_frame()?;
        assert_eq!(frame.dimensions(), (64, 48));
        Ok(())
    }

    #[test]
    fn synthetic_frames_drift() -> anyhow::Result<()> {
        let mut source = SyntheticSource::new(stub_config());
        source.connect()?;
        let a = source.read_frame()?;
        let b = source.read_frame()?;
        assert_ne!(a, b);
        Ok(())
    }

    #[test]
    fn synthetic_source_requires_connect() {
        let mut source = SyntheticSource::new(stub_config());
        assert!(source.read_frame().is_err());
    }
}
