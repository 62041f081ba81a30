//! Frames flowing through one pipeline cycle.
//!
//! A `Frame` is produced by the ingestion layer and owned by the cycle that
//! acquired it. Enhancement never writes into `Frame::image`; the raw pixels stay
//! available for capture and for the overlay.

use image::RgbImage;
use std::time::Instant;

/// One decoded RGB frame from a stream.
pub struct Frame {
    /// Raw pixels as delivered by the source. Not modified by any stage.
    pub image: RgbImage,

    /// Monotonic sequence number assigned by the reconnecting source.
    pub sequence: u64,

    /// Monotonic instant at which the read completed.
    pub captured_at: Instant,

    /// True for the first frame delivered after a reconnection.
    pub resumed: bool,
}

impl Frame {
    pub fn new(image: RgbImage, sequence: u64) -> Self {
        Self {
            image,
            sequence,
            captured_at: Instant::now(),
            resumed: false,
        }
    }

    pub(crate) fn resumed(mut self) -> Self {
        self.resumed = true;
        self
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_reports_delivered_dimensions() {
        let frame = Frame::new(RgbImage::new(320, 240), 7);
        assert_eq!(frame.width(), 320);
        assert_eq!(frame.height(), 240);
        assert_eq!(frame.sequence, 7);
        assert!(!frame.resumed);
        assert!(frame.resumed().resumed);
    }
}
