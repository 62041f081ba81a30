//! The live loop.
//!
//! One cycle: acquire → enhance → detect → tally → render → show → poll
//! control. Everything runs on the caller's thread with one frame in flight.
//! Quit is observed at the top of a cycle, so a cycle that has started always
//! finishes.

use anyhow::Result;
use image::RgbImage;

use crate::capture::CaptureWriter;
use crate::control::{ControlInput, ControlSignal, NoControl, ShutdownFlag};
use crate::count::{ClassCount, CountAggregator, SessionState};
use crate::detect::{Detection, DetectionAdapter};
use crate::enhance::Enhancer;
use crate::frame::Frame;
use crate::ingest::{FrameSource, ReconnectingSource};
use crate::present::{FrameSink, NullSink, OverlayRenderer};

/// Output of one successful cycle.
#[derive(Clone, Debug)]
pub struct CycleReport {
    pub sequence: u64,
    pub detections: Vec<Detection>,
    pub counts: ClassCount,
    pub fps: f64,
    /// Annotated copy of the raw frame.
    pub overlay: RgbImage,
}

/// Per-session processing context.
pub struct Session {
    enhancer: Enhancer,
    adapter: DetectionAdapter,
    aggregator: CountAggregator,
    renderer: OverlayRenderer,
    state: SessionState,
}

impl Session {
    pub fn new(enhancer: Enhancer, adapter: DetectionAdapter, renderer: OverlayRenderer) -> Self {
        Self {
            enhancer,
            adapter,
            aggregator: CountAggregator::new(),
            renderer,
            state: SessionState::default(),
        }
    }

    pub fn with_state(mut self, state: SessionState) -> Self {
        self.state = state;
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn adapter(&self) -> &DetectionAdapter {
        &self.adapter
    }

    /// Process one frame.
    ///
    /// A resumed frame resets the fps reference before anything can fail, so
    /// an inference error right after a reconnect cannot stretch the next
    /// interval over the outage. Otherwise, on error, state is left as it was.
    pub fn run_cycle(&mut self, frame: &Frame) -> Result<CycleReport> {
        if frame.resumed {
            self.state.fps.resume(frame.captured_at);
        }

        let enhanced = self.enhancer.enhance(&frame.image);
        let detections = self.adapter.detect(&enhanced)?;
        let counts = self.aggregator.tally(&detections);

        if !frame.resumed {
            self.state.fps.tick(frame.captured_at);
        }
        let fps = self.state.fps.fps();

        let overlay =
            self.renderer
                .render(&frame.image, &detections, &counts, fps, &self.state.palette);

        self.state.frames_processed += 1;
        self.state.last_counts = counts.clone();

        Ok(CycleReport {
            sequence: frame.sequence,
            detections,
            counts,
            fps,
            overlay,
        })
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    /// Frames that completed a cycle.
    pub frames: u64,
    pub detections: u64,
    pub reconnects: u64,
    /// Frames dropped because inference failed.
    pub failed_cycles: u64,
    pub captures: u64,
}

pub struct LiveLoop {
    source: ReconnectingSource<dyn FrameSource>,
    session: Session,
    sink: Box<dyn FrameSink>,
    control: Box<dyn ControlInput>,
    capture: Option<CaptureWriter>,
    shutdown: ShutdownFlag,
    log_every: u64,
    max_frames: Option<u64>,
}

impl LiveLoop {
    pub fn new(
        source: ReconnectingSource<dyn FrameSource>,
        session: Session,
        shutdown: ShutdownFlag,
    ) -> Self {
        Self {
            source,
            session,
            sink: Box::new(NullSink),
            control: Box::new(NoControl),
            capture: None,
            shutdown,
            log_every: 30,
            max_frames: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn FrameSink>) -> Self {
        self.sink = sink;
        self
    }

    pub fn with_control(mut self, control: Box<dyn ControlInput>) -> Self {
        self.control = control;
        self
    }

    pub fn with_capture(mut self, capture: CaptureWriter) -> Self {
        self.capture = Some(capture);
        self
    }

    /// Log a count summary every `n` processed frames. 0 disables it.
    pub fn with_log_every(mut self, n: u64) -> Self {
        self.log_every = n;
        self
    }

    /// Stop after `n` processed frames.
    pub fn with_max_frames(mut self, n: u64) -> Self {
        self.max_frames = Some(n);
        self
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn run(&mut self) -> Result<LoopSummary> {
        let mut summary = LoopSummary::default();

        loop {
            if self.shutdown.is_raised() {
                log::info!("shutdown requested");
                break;
            }
            if self.max_frames.is_some_and(|max| summary.frames >= max) {
                break;
            }

            let Some(frame) = self.source.next_frame() else {
                break;
            };

            match self.session.run_cycle(&frame) {
                Ok(report) => {
                    summary.frames += 1;
                    summary.detections += report.detections.len() as u64;
                    if let Err(err) = self.sink.show(&report.overlay, report.sequence) {
                        log::warn!("display failed for frame {}: {:#}", report.sequence, err);
                    }
                    if self.log_every > 0 && summary.frames % self.log_every == 0 {
                        log::info!(
                            "frame {}: total {} [{}] at {:.1} fps",
                            report.sequence,
                            report.counts.total(),
                            report.counts.summary(),
                            report.fps
                        );
                    }
                }
                Err(err) => {
                    summary.failed_cycles += 1;
                    log::warn!("skipping frame {}: {:#}", frame.sequence, err);
                }
            }

            match self.control.poll() {
                Some(ControlSignal::Quit) => self.shutdown.raise(),
                Some(ControlSignal::Capture) => {
                    if self.save_capture(&frame) {
                        summary.captures += 1;
                    }
                }
                None => {}
            }
        }

        summary.reconnects = self.source.stats().reconnects;
        log::info!(
            "live loop finished: {} frames, {} detections, {} reconnects, {} failed cycles",
            summary.frames,
            summary.detections,
            summary.reconnects,
            summary.failed_cycles
        );
        Ok(summary)
    }

    fn save_capture(&self, frame: &Frame) -> bool {
        let Some(writer) = &self.capture else {
            log::warn!("capture requested but no capture directory is configured");
            return false;
        };
        match writer.save(&frame.image) {
            Ok(_) => true,
            Err(err) => {
                log::warn!("capture failed: {:#}", err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::{Duration, Instant};

    use crate::detect::{
        DetectorBackend, InferenceConfig, LabelVocabulary, RawDetection, StubBackend,
    };
    use crate::enhance::EnhanceConfig;
    use crate::ingest::{source_for_url, StreamConfig};

    fn session(backend: StubBackend) -> Session {
        let vocabulary = backend.vocabulary().clone();
        Session::new(
            Enhancer::new(EnhanceConfig::passthrough()),
            DetectionAdapter::new(Box::new(backend), InferenceConfig::default()),
            OverlayRenderer::new(vocabulary),
        )
    }

    fn synthetic(shutdown: &ShutdownFlag) -> ReconnectingSource<dyn FrameSource> {
        let config = StreamConfig {
            url: "stub://test".to_string(),
            width: 64,
            height: 48,
            ..StreamConfig::default()
        };
        let source = source_for_url(&config).expect("synthetic source");
        ReconnectingSource::open(source, (64, 48), Duration::from_millis(1), shutdown.clone())
            .expect("synthetic source connects")
    }

    struct Keys(VecDeque<Option<ControlSignal>>);

    impl ControlInput for Keys {
        fn poll(&mut self) -> Option<ControlSignal> {
            self.0.pop_front().flatten()
        }
    }

    #[test]
    fn cycle_counts_detections() -> Result<()> {
        let backend = StubBackend::new(LabelVocabulary::new(["AA", "AAA"])).with_script(vec![vec![
            RawDetection::new([1.0, 1.0, 20.0, 20.0], 0, 0.9).with_track(1),
            RawDetection::new([30.0, 1.0, 50.0, 20.0], 1, 0.8),
        ]]);
        let mut session = session(backend);
        let frame = Frame::new(RgbImage::new(64, 48), 1);
        let report = session.run_cycle(&frame)?;
        assert_eq!(report.counts.total(), 2);
        assert_eq!(report.counts.get("AAA"), 1);
        assert_eq!(report.overlay.dimensions(), (64, 48));
        assert_eq!(session.state().frames_processed, 1);
        Ok(())
    }

    /// Fails on the listed call numbers (1-based), otherwise sees nothing.
    struct FailingOn {
        vocabulary: LabelVocabulary,
        calls: usize,
        fail: Vec<usize>,
    }

    impl DetectorBackend for FailingOn {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn vocabulary(&self) -> &LabelVocabulary {
            &self.vocabulary
        }

        fn infer_and_track(
            &mut self,
            _frame: &RgbImage,
            _config: &InferenceConfig,
        ) -> Result<Vec<RawDetection>> {
            self.calls += 1;
            if self.fail.contains(&self.calls) {
                anyhow::bail!("device lost");
            }
            Ok(Vec::new())
        }
    }

    #[test]
    fn failed_resumed_cycle_still_resets_fps_timing() {
        let vocabulary = LabelVocabulary::new(["AA"]);
        let backend = FailingOn {
            vocabulary: vocabulary.clone(),
            calls: 0,
            fail: vec![3],
        };
        let mut session = Session::new(
            Enhancer::new(EnhanceConfig::passthrough()),
            DetectionAdapter::new(Box::new(backend), InferenceConfig::default()),
            OverlayRenderer::new(vocabulary),
        );

        let start = Instant::now();
        let frame_at = |seq: u64, offset: Duration| {
            let mut frame = Frame::new(RgbImage::new(16, 16), seq);
            frame.captured_at = start + offset;
            frame
        };

        assert!(session.run_cycle(&frame_at(1, Duration::ZERO)).is_ok());
        assert!(session
            .run_cycle(&frame_at(2, Duration::from_millis(50)))
            .is_ok());
        let resumed = frame_at(3, Duration::from_secs(30)).resumed();
        assert!(session.run_cycle(&resumed).is_err());
        let report = session
            .run_cycle(&frame_at(4, Duration::from_millis(30_050)))
            .expect("cycle after recovery");

        assert!((report.fps - 20.0).abs() < 1e-6, "fps {}", report.fps);
    }

    #[test]
    fn empty_cycle_reports_zero() -> Result<()> {
        let mut session = session(StubBackend::new(LabelVocabulary::new(["AA"])));
        let report = session.run_cycle(&Frame::new(RgbImage::new(32, 32), 1))?;
        assert!(report.counts.is_empty());
        assert_eq!(report.counts.total(), 0);
        Ok(())
    }

    #[test]
    fn loop_stops_at_frame_limit() -> Result<()> {
        let shutdown = ShutdownFlag::new();
        let mut live = LiveLoop::new(
            synthetic(&shutdown),
            session(StubBackend::new(LabelVocabulary::new(["AA"]))),
            shutdown,
        )
        .with_max_frames(5);
        let summary = live.run()?;
        assert_eq!(summary.frames, 5);
        assert_eq!(summary.failed_cycles, 0);
        Ok(())
    }

    #[test]
    fn quit_finishes_the_current_cycle() -> Result<()> {
        let shutdown = ShutdownFlag::new();
        let keys = Keys(VecDeque::from(vec![None, None, Some(ControlSignal::Quit)]));
        let mut live = LiveLoop::new(
            synthetic(&shutdown),
            session(StubBackend::new(LabelVocabulary::new(["AA"]))),
            shutdown.clone(),
        )
        .with_control(Box::new(keys))
        .with_max_frames(100);
        let summary = live.run()?;
        assert_eq!(summary.frames, 3);
        assert!(shutdown.is_raised());
        Ok(())
    }

    #[test]
    fn capture_saves_the_raw_frame() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let shutdown = ShutdownFlag::new();
        let keys = Keys(VecDeque::from(vec![Some(ControlSignal::Capture)]));
        let mut live = LiveLoop::new(
            synthetic(&shutdown),
            session(StubBackend::new(LabelVocabulary::new(["AA"]))),
            shutdown,
        )
        .with_control(Box::new(keys))
        .with_capture(CaptureWriter::new(dir.path(), "battery"))
        .with_max_frames(2);
        let summary = live.run()?;
        assert_eq!(summary.captures, 1);
        assert_eq!(CaptureWriter::new(dir.path(), "battery").existing_count(), 1);
        Ok(())
    }
}
