//! Battery Counter
//!
//! Live per-class counting of loose batteries from a network camera stream.
//!
//! # Architecture
//!
//! Each cycle runs a fixed sequence on a single thread:
//!
//! 1. **Ingest**: read one frame; interruptions are absorbed by backoff and
//!    reconnect, with no retry cap.
//! 2. **Enhance**: CLAHE on luminance, gamma lift, unsharp mask. Pure and
//!    dimension-preserving; the raw frame is never modified.
//! 3. **Detect**: an opaque tracked detector, normalized into [`Detection`]s with
//!    class-agnostic suppression.
//! 4. **Count**: one unit per detection per label, recomputed every cycle.
//! 5. **Present**: boxes, count panel and fps drawn on a copy.
//!
//! # Module Structure
//!
//! - `frame`: the per-cycle frame record
//! - `ingest`: frame sources and the reconnect policy
//! - `enhance`: the enhancement stages
//! - `detect`: detector seam, backends, normalization
//! - `count`: tallies, fps, session state
//! - `present`: overlay rendering and display sinks
//! - `control`: keyboard and Ctrl-C signals, shutdown flag
//! - `capture`: raw frame capture to disk
//! - `pipeline`: the live loop
//! - `preprocess`: offline batch enhancement
//! - `config`, `ui`: settings and terminal feedback for the binaries

pub mod capture;
pub mod config;
pub mod control;
pub mod count;
pub mod detect;
pub mod enhance;
pub mod frame;
pub mod ingest;
pub mod pipeline;
pub mod preprocess;
pub mod present;
pub mod ui;

pub use capture::CaptureWriter;
pub use config::CounterConfig;
pub use control::{ControlInput, ControlSignal, ShutdownFlag, TerminalControl};
pub use count::{ClassCount, CountAggregator, FpsEstimator, SessionState};
pub use detect::{
    BoundingBox, DetectError, Detection, DetectionAdapter, DetectorBackend, InferenceConfig,
    IouTracker, LabelVocabulary, RawDetection, TrackerConfig, TrackingBackend,
};
pub use enhance::{EnhanceConfig, Enhancer};
pub use frame::Frame;
pub use ingest::{FrameSource, ReconnectingSource, SourceError, StreamConfig};
pub use pipeline::{CycleReport, LiveLoop, LoopSummary, Session};
pub use preprocess::{BatchPreprocessor, BatchReport, ImageFailure};
pub use present::{FrameSink, NullSink, OverlayRenderer, Palette, SnapshotSink};
