//! battery_counter - live per-class battery counter.
//!
//! Reads an MJPEG stream, enhances each frame, runs the tracked detector and
//! reports per-class counts. The annotated view goes to a snapshot file when
//! one is configured. Type `c` + Enter to save the raw frame, `q` + Enter or
//! Ctrl-C to quit.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;

use battery_counter::detect;
use battery_counter::ingest::source_for_url;
use battery_counter::{
    CaptureWriter, CounterConfig, DetectionAdapter, Enhancer, FrameSink, LiveLoop, NullSink,
    OverlayRenderer, ReconnectingSource, Session, ShutdownFlag, SnapshotSink, TerminalControl,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Live battery counter for an MJPEG camera stream")]
struct Args {
    /// Stream URL (`http://host:port/path`, or `stub://name` for a synthetic feed).
    #[arg(long, env = "BATTERY_SOURCE_URL")]
    url: Option<String>,

    /// Detector weights (`stub://` selects a detector that sees nothing).
    #[arg(long, env = "BATTERY_MODEL_PATH")]
    model: Option<PathBuf>,

    /// Write the annotated view to this JPEG path.
    #[arg(long, env = "BATTERY_SNAPSHOT_PATH")]
    snapshot: Option<PathBuf>,

    /// TTF/OTF font used for captions and the count panel.
    #[arg(long)]
    font: Option<PathBuf>,

    /// Skip frame enhancement.
    #[arg(long)]
    no_enhance: bool,

    /// Stop after this many processed frames.
    #[arg(long)]
    max_frames: Option<u64>,
}

impl Args {
    fn apply(&self, cfg: &mut CounterConfig) {
        if let Some(url) = &self.url {
            cfg.source.url = url.clone();
        }
        if let Some(model) = &self.model {
            cfg.detector.model_path = model.clone();
        }
        if let Some(snapshot) = &self.snapshot {
            cfg.display.snapshot_path = Some(snapshot.clone());
        }
        if let Some(font) = &self.font {
            cfg.display.font_path = Some(font.clone());
        }
        if self.no_enhance {
            cfg.enhance.enabled = false;
        }
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CounterConfig::load()?;
    args.apply(&mut cfg);
    cfg.validate()?;

    let backend = detect::load(&cfg.model_spec())?;
    log::info!(
        "detector {} ready, classes: {}",
        backend.name(),
        backend.vocabulary().iter().collect::<Vec<_>>().join(", ")
    );
    let vocabulary = backend.vocabulary().clone();
    let mut adapter = DetectionAdapter::new(backend, cfg.inference_config());
    adapter.warm_up().context("detector warm-up failed")?;

    let mut renderer = OverlayRenderer::new(vocabulary);
    if let Some(font) = &cfg.display.font_path {
        renderer = renderer.with_font_file(font)?;
    }

    let shutdown = ShutdownFlag::new();
    let control = TerminalControl::install(shutdown.clone())?;

    let source = source_for_url(&cfg.stream_config())?;
    let source = ReconnectingSource::open(
        source,
        (cfg.source.width, cfg.source.height),
        cfg.source.reconnect_backoff,
        shutdown.clone(),
    )?;

    let sink: Box<dyn FrameSink> = match &cfg.display.snapshot_path {
        Some(path) => {
            log::info!("writing annotated view to {}", path.display());
            Box::new(SnapshotSink::new(path, cfg.display.snapshot_every))
        }
        None => {
            log::info!("no snapshot path configured; counts are logged only");
            Box::new(NullSink)
        }
    };

    let session = Session::new(Enhancer::new(cfg.enhance.clone()), adapter, renderer);
    let mut live = LiveLoop::new(source, session, shutdown)
        .with_sink(sink)
        .with_control(Box::new(control))
        .with_capture(CaptureWriter::new(
            &cfg.capture.output_dir,
            cfg.capture.prefix.clone(),
        ))
        .with_log_every(cfg.display.log_every);
    if let Some(max) = args.max_frames {
        live = live.with_max_frames(max);
    }

    log::info!("battery counter running; c + Enter captures, q + Enter or Ctrl-C quits");
    let summary = live.run()?;
    log::info!(
        "done: {} frames, {} detections, {} captures",
        summary.frames,
        summary.detections,
        summary.captures
    );
    Ok(())
}
