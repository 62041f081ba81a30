//! HTTP MJPEG frame source.
//!
//! Phone camera apps and most cheap IP cameras serve either a
//! `multipart/x-mixed-replace` MJPEG stream or a single JPEG per request.
//! `MjpegSource` handles both:
//! - multipart responses are kept open and split on JPEG SOI/EOI markers
//! - anything else is treated as a snapshot endpoint and re-fetched per frame
//!
//! Requested dimensions are advisory. Frames are returned at whatever size the
//! camera delivers.

use std::io::Read;

use image::RgbImage;
use url::Url;

use super::{FrameSource, SourceError, StreamConfig};

const MAX_JPEG_BYTES: usize = 5 * 1024 * 1024;
const READ_CHUNK: usize = 8192;

/// HTTP MJPEG / JPEG snapshot source.
pub struct MjpegSource {
    config: StreamConfig,
    agent: ureq::Agent,
    stream: Option<HttpStream>,
    frame_count: u64,
}

enum HttpStream {
    Multipart {
        body: Box<dyn Read + Send + Sync>,
        splitter: JpegSplitter,
    },
    SingleJpeg,
}

impl MjpegSource {
    pub fn new(config: StreamConfig) -> Result<Self, SourceError> {
        let url = Url::parse(&config.url)
            .map_err(|e| SourceError::unavailable(&config.url, format!("invalid url: {}", e)))?;
        match url.scheme() {
            "http" | "https" => {}
            other => {
                return Err(SourceError::unavailable(
                    &config.url,
                    format!("unsupported scheme '{}'; expected http(s) or stub", other),
                ))
            }
        }
        let agent = ureq::AgentBuilder::new()
            .timeout_connect(config.connect_timeout)
            .timeout_read(config.read_timeout)
            .build();
        Ok(Self {
            config,
            agent,
            stream: None,
            frame_count: 0,
        })
    }

    /// Frames decoded since construction, across reconnects.
    pub fn frames_decoded(&self) -> u64 {
        self.frame_count
    }

    fn fetch_single_jpeg(&self) -> Result<Vec<u8>, SourceError> {
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .map_err(|e| SourceError::interrupted(&self.config.url, e))?;
        let mut bytes = Vec::new();
        response
            .into_reader()
            .take(MAX_JPEG_BYTES as u64)
            .read_to_end(&mut bytes)
            .map_err(|e| SourceError::interrupted(&self.config.url, e))?;
        if bytes.is_empty() {
            return Err(SourceError::interrupted(&self.config.url, "empty jpeg snapshot"));
        }
        Ok(bytes)
    }
}

impl FrameSource for MjpegSource {
    fn describe(&self) -> String {
        self.config.url.clone()
    }

    fn connect(&mut self) -> Result<(), SourceError> {
        self.stream = None;
        let response = self
            .agent
            .get(&self.config.url)
            .call()
            .map_err(|e| SourceError::unavailable(&self.config.url, e))?;
        let content_type = response.header("Content-Type").unwrap_or("");
        if content_type.to_lowercase().contains("multipart") {
            log::debug!("{} serves multipart mjpeg", self.config.url);
            self.stream = Some(HttpStream::Multipart {
                body: response.into_reader(),
                splitter: JpegSplitter::default(),
            });
        } else {
            log::debug!(
                "{} serves '{}', polling as snapshots",
                self.config.url,
                content_type
            );
            self.stream = Some(HttpStream::SingleJpeg);
        }
        Ok(())
    }

    fn read_frame(&mut self) -> Result<RgbImage, SourceError> {
        let jpeg = match self.stream.as_mut() {
            Some(HttpStream::Multipart { body, splitter }) => {
                next_multipart_jpeg(&self.config.url, body.as_mut(), splitter)?
            }
            Some(HttpStream::SingleJpeg) => self.fetch_single_jpeg()?,
            None => {
                return Err(SourceError::interrupted(
                    &self.config.url,
                    "not connected",
                ))
            }
        };
        let image = decode_jpeg(&jpeg)
            .map_err(|e| SourceError::interrupted(&self.config.url, e))?;
        self.frame_count += 1;
        Ok(image)
    }
}

/// Accumulates multipart body bytes and cuts complete JPEGs out of them.
#[derive(Debug, Default)]
struct JpegSplitter {
    pending: Vec<u8>,
}

impl JpegSplitter {
    fn push(&mut self, bytes: &[u8]) {
        self.pending.extend_from_slice(bytes);
        // Over the cap without an EOI: drop all but the last byte, which may
        // be the first half of a marker.
        if self.pending.len() > MAX_JPEG_BYTES * 2 {
            let stale = self.pending.len() - 1;
            self.pending.drain(..stale);
        }
    }

    fn next_jpeg(&mut self) -> Option<Vec<u8>> {
        let (start, end) = find_jpeg_bounds(&self.pending)?;
        let jpeg = self.pending[start..end].to_vec();
        self.pending.drain(..end);
        Some(jpeg)
    }
}

/// Read from `body` until `splitter` yields a JPEG. A read error or end of
/// body is an interruption of `endpoint`.
fn next_multipart_jpeg(
    endpoint: &str,
    body: &mut (dyn Read + Send + Sync),
    splitter: &mut JpegSplitter,
) -> Result<Vec<u8>, SourceError> {
    let mut chunk = [0u8; READ_CHUNK];
    loop {
        if let Some(jpeg) = splitter.next_jpeg() {
            return Ok(jpeg);
        }
        match body.read(&mut chunk) {
            Ok(0) => return Err(SourceError::interrupted(endpoint, "mjpeg body ended")),
            Ok(n) => splitter.push(&chunk[..n]),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => {}
            Err(e) => return Err(SourceError::interrupted(endpoint, e)),
        }
    }
}

fn decode_jpeg(bytes: &[u8]) -> Result<RgbImage, image::ImageError> {
    let image = image::load_from_memory_with_format(bytes, image::ImageFormat::Jpeg)?;
    Ok(image.into_rgb8())
}

/// Locate the first complete JPEG (SOI `FFD8` .. EOI `FFD9`) in `buffer`.
fn find_jpeg_bounds(buffer: &[u8]) -> Option<(usize, usize)> {
    let start = buffer.windows(2).position(|w| w == [0xFF, 0xD8])?;
    let end = buffer[start + 2..]
        .windows(2)
        .position(|w| w == [0xFF, 0xD9])?;
    Some((start, start + 2 + end + 2))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn tiny_jpeg(value: u8) -> Vec<u8> {
        let img = RgbImage::from_pixel(8, 8, image::Rgb([value, value, value]));
        let mut bytes = Vec::new();
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut Cursor::new(&mut bytes), image::ImageFormat::Jpeg)
            .unwrap();
        bytes
    }

    #[test]
    fn jpeg_bounds_skip_multipart_headers() {
        let mut buffer = b"--frame\r\nContent-Type: image/jpeg\r\n\r\n".to_vec();
        let jpeg = [0xFF, 0xD8, 1, 2, 3, 0xFF, 0xD9];
        buffer.extend_from_slice(&jpeg);
        buffer.extend_from_slice(b"\r\n--frame");

        let (start, end) = find_jpeg_bounds(&buffer).unwrap();
        assert_eq!(&buffer[start..end], &jpeg);
    }

    #[test]
    fn jpeg_bounds_wait_for_end_marker() {
        assert!(find_jpeg_bounds(&[0xFF, 0xD8, 0x00, 0x01]).is_none());
        assert!(find_jpeg_bounds(&[0x00, 0x01]).is_none());
    }

    #[test]
    fn mjpeg_stream_yields_consecutive_frames() {
        let mut body = Vec::new();
        for value in [10u8, 200u8] {
            body.extend_from_slice(b"--frame\r\nContent-Type: image/jpeg\r\n\r\n");
            body.extend_from_slice(&tiny_jpeg(value));
            body.extend_from_slice(b"\r\n");
        }
        let mut body = Cursor::new(body);
        let mut splitter = JpegSplitter::default();
        let mut next = || next_multipart_jpeg("cam", &mut body, &mut splitter);

        let first = decode_jpeg(&next().unwrap()).unwrap();
        let second = decode_jpeg(&next().unwrap()).unwrap();
        assert_eq!(first.dimensions(), (8, 8));
        assert!(first.get_pixel(4, 4).0[0] < 50);
        assert!(second.get_pixel(4, 4).0[0] > 150);

        match next() {
            Err(SourceError::Interrupted { endpoint, reason }) => {
                assert_eq!(endpoint, "cam");
                assert_eq!(reason, "mjpeg body ended");
            }
            other => panic!("unexpected: {:?}", other.map(|b| b.len())),
        }
    }

    #[test]
    fn splitter_joins_markers_split_across_pushes() {
        let mut splitter = JpegSplitter::default();
        splitter.push(&[0x00, 0xFF]);
        assert!(splitter.next_jpeg().is_none());
        splitter.push(&[0xD8, 7, 0xFF]);
        assert!(splitter.next_jpeg().is_none());
        splitter.push(&[0xD9, 0x00]);
        assert_eq!(splitter.next_jpeg(), Some(vec![0xFF, 0xD8, 7, 0xFF, 0xD9]));
        assert!(splitter.next_jpeg().is_none());
    }

    #[test]
    fn rejects_unknown_scheme() {
        let config = StreamConfig {
            url: "rtsp://camera/stream".to_string(),
            ..StreamConfig::default()
        };
        assert!(matches!(
            MjpegSource::new(config),
            Err(SourceError::Unavailable { .. })
        ));
    }

    #[test]
    fn read_before_connect_is_interruption() {
        let mut source = MjpegSource::new(StreamConfig::default()).unwrap();
        assert!(matches!(
            source.read_frame(),
            Err(SourceError::Interrupted { .. })
        ));
    }
}
