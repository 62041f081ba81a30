//! Frame ingestion sources.
//!
//! This module provides the sources a live loop can read from:
//! - HTTP MJPEG / JPEG snapshot endpoints (phone cameras, IP cameras)
//! - Synthetic source for `stub://` URLs (testing, demos)
//!
//! Every source implements [`FrameSource`]. The live loop never talks to a
//! source directly; it goes through [`ReconnectingSource`], which owns the
//! interruption policy:
//! - A failed initial connect is [`SourceError::Unavailable`] and is fatal.
//! - A failed read after that is an interruption: pause for the backoff,
//!   reconnect, resume. There is no retry cap; only the shutdown flag stops it.
//!
//! Nothing is buffered ahead. At most one frame is in flight.

pub mod mjpeg;
pub mod synthetic;

use std::time::Duration;

use image::RgbImage;
use thiserror::Error;

use crate::control::ShutdownFlag;
use crate::frame::Frame;

pub use mjpeg::MjpegSource;
pub use synthetic::SyntheticSource;

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4747;
const DEFAULT_PATH: &str = "/video";

/// Failure kinds reported by a frame source.
#[derive(Debug, Error)]
pub enum SourceError {
    /// The source could not be opened at all.
    #[error("frame source {endpoint} unavailable: {reason}")]
    Unavailable { endpoint: String, reason: String },

    /// A read failed after the source was connected.
    #[error("stream {endpoint} interrupted: {reason}")]
    Interrupted { endpoint: String, reason: String },
}

impl SourceError {
    pub fn unavailable(endpoint: &str, reason: impl ToString) -> Self {
        Self::Unavailable {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }

    pub fn interrupted(endpoint: &str, reason: impl ToString) -> Self {
        Self::Interrupted {
            endpoint: endpoint.to_string(),
            reason: reason.to_string(),
        }
    }
}

/// A sequential reader of raw frames.
pub trait FrameSource {
    /// Human readable endpoint, used in logs.
    fn describe(&self) -> String;

    /// Open (or re-open) the stream.
    fn connect(&mut self) -> Result<(), SourceError>;

    /// Block until the next frame is decoded.
    fn read_frame(&mut self) -> Result<RgbImage, SourceError>;
}

/// Configuration for a network stream.
#[derive(Clone, Debug, PartialEq)]
pub struct StreamConfig {
    /// Full stream URL, e.g. `http://192.168.3.19:4747/video` or `stub://bench`.
    pub url: String,
    /// Requested frame width. The delivered width may differ.
    pub width: u32,
    /// Requested frame height. The delivered height may differ.
    pub height: u32,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl StreamConfig {
    /// Build the stream URL from its network address parts.
    pub fn endpoint_url(host: &str, port: u16, path: &str) -> String {
        let path = path.trim_start_matches('/');
        format!("http://{}:{}/{}", host, port, path)
    }
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            url: Self::endpoint_url(DEFAULT_HOST, DEFAULT_PORT, DEFAULT_PATH),
            width: 1280,
            height: 720,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(5),
        }
    }
}

/// Select a source implementation from the URL scheme.
pub fn source_for_url(config: &StreamConfig) -> Result<Box<dyn FrameSource>, SourceError> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(config.clone())));
    }
    Ok(Box::new(MjpegSource::new(config.clone())?))
}

/// Statistics for a reconnecting source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_delivered: u64,
    pub interruptions: u64,
    pub reconnects: u64,
}

/// Wraps a [`FrameSource`] with the backoff-and-reconnect policy.
pub struct ReconnectingSource<S: FrameSource + ?Sized> {
    source: Box<S>,
    backoff: Duration,
    shutdown: ShutdownFlag,
    requested: (u32, u32),
    resolution_checked: bool,
    stats: SourceStats,
}

impl<S: FrameSource + ?Sized> ReconnectingSource<S> {
    /// Connect once. Failure here is reported to the caller and not retried.
    pub fn open(
        mut source: Box<S>,
        requested: (u32, u32),
        backoff: Duration,
        shutdown: ShutdownFlag,
    ) -> Result<Self, SourceError> {
        log::info!("connecting to {}", source.describe());
        source.connect()?;
        log::info!("connected to {}", source.describe());
        Ok(Self {
            source,
            backoff,
            shutdown,
            requested,
            resolution_checked: false,
            stats: SourceStats::default(),
        })
    }

    /// Next frame, or `None` once shutdown has been raised.
    ///
    /// Interruptions are absorbed: the call blocks through backoff and
    /// reconnection until a frame arrives or shutdown is requested.
    pub fn next_frame(&mut self) -> Option<Frame> {
        let mut resumed = false;
        loop {
            if self.shutdown.is_raised() {
                return None;
            }
            match self.source.read_frame() {
                Ok(image) => {
                    self.check_resolution(&image);
                    self.stats.frames_delivered += 1;
                    let frame = Frame::new(image, self.stats.frames_delivered);
                    return Some(if resumed { frame.resumed() } else { frame });
                }
                Err(err) => {
                    self.stats.interruptions += 1;
                    log::warn!("{}; reconnecting", err);
                    if !self.reconnect() {
                        return None;
                    }
                    resumed = true;
                }
            }
        }
    }

    pub fn stats(&self) -> SourceStats {
        self.stats.clone()
    }

    pub fn describe(&self) -> String {
        self.source.describe()
    }

    /// Retry until connected. Returns false if shutdown interrupted the wait.
    fn reconnect(&mut self) -> bool {
        let mut attempt: u64 = 0;
        loop {
            if !self.shutdown.sleep(self.backoff) {
                return false;
            }
            attempt += 1;
            match self.source.connect() {
                Ok(()) => {
                    self.stats.reconnects += 1;
                    self.resolution_checked = false;
                    log::info!(
                        "reconnected to {} after {} attempt(s)",
                        self.source.describe(),
                        attempt
                    );
                    return true;
                }
                Err(err) => {
                    log::warn!("reconnect attempt {} failed: {}", attempt, err);
                }
            }
        }
    }

    fn check_resolution(&mut self, image: &RgbImage) {
        if self.resolution_checked {
            return;
        }
        self.resolution_checked = true;
        let delivered = image.dimensions();
        if delivered != self.requested {
            log::info!(
                "{} delivers {}x{} (requested {}x{})",
                self.source.describe(),
                delivered.0,
                delivered.1,
                self.requested.0,
                self.requested.1
            );
        }
    }
}
