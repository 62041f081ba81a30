//! collect_frames - capture raw training images from the camera stream.
//!
//! Each `c` + Enter saves the current raw frame as
//! `<prefix>_<YYYYmmdd_HHMMSS>.jpg` in the capture directory. The preview
//! (crosshair and running count) goes to a snapshot file when one is set.

use anyhow::Result;
use clap::Parser;
use std::path::PathBuf;

use battery_counter::ingest::source_for_url;
use battery_counter::{
    CaptureWriter, ControlInput, ControlSignal, CounterConfig, FrameSink, LabelVocabulary,
    NullSink, OverlayRenderer, ReconnectingSource, ShutdownFlag, SnapshotSink, TerminalControl,
};

#[derive(Parser, Debug)]
#[command(author, version, about = "Capture raw battery images from the camera stream")]
struct Args {
    /// Stream URL (`http://host:port/path`, or `stub://name` for a synthetic feed).
    #[arg(long, env = "BATTERY_SOURCE_URL")]
    url: Option<String>,

    /// Directory captures are written to.
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Write the preview to this JPEG path.
    #[arg(long, env = "BATTERY_SNAPSHOT_PATH")]
    snapshot: Option<PathBuf>,

    /// TTF/OTF font for the preview text.
    #[arg(long)]
    font: Option<PathBuf>,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut cfg = CounterConfig::load()?;
    if let Some(url) = args.url {
        cfg.source.url = url;
    }
    if let Some(dir) = args.output_dir {
        cfg.capture.output_dir = dir;
    }
    if let Some(path) = args.snapshot {
        cfg.display.snapshot_path = Some(path);
    }
    if let Some(font) = args.font {
        cfg.display.font_path = Some(font);
    }
    cfg.validate()?;

    let writer = CaptureWriter::new(&cfg.capture.output_dir, cfg.capture.prefix.clone());
    let mut captured = writer.existing_count();
    log::info!(
        "saving captures to {} ({} already present)",
        writer.output_dir().display(),
        captured
    );

    let mut renderer = OverlayRenderer::new(LabelVocabulary::default());
    if let Some(font) = &cfg.display.font_path {
        renderer = renderer.with_font_file(font)?;
    }
    let mut sink: Box<dyn FrameSink> = match &cfg.display.snapshot_path {
        Some(path) => Box::new(SnapshotSink::new(path, cfg.display.snapshot_every)),
        None => Box::new(NullSink),
    };

    let shutdown = ShutdownFlag::new();
    let mut control = TerminalControl::install(shutdown.clone())?;
    let source = source_for_url(&cfg.stream_config())?;
    let mut source = ReconnectingSource::open(
        source,
        (cfg.source.width, cfg.source.height),
        cfg.source.reconnect_backoff,
        shutdown.clone(),
    )?;

    log::info!("c + Enter captures, q + Enter or Ctrl-C quits");
    let mut session_captures = 0u64;
    while !shutdown.is_raised() {
        let Some(frame) = source.next_frame() else {
            break;
        };

        let preview = renderer.render_capture(&frame.image, captured);
        if let Err(err) = sink.show(&preview, frame.sequence) {
            log::warn!("preview failed: {:#}", err);
        }

        match control.poll() {
            Some(ControlSignal::Capture) => match writer.save(&frame.image) {
                Ok(_) => {
                    captured += 1;
                    session_captures += 1;
                }
                Err(err) => log::warn!("capture failed: {:#}", err),
            },
            Some(ControlSignal::Quit) => shutdown.raise(),
            None => {}
        }
    }

    log::info!(
        "captured {} images this session ({} total in {})",
        session_captures,
        captured,
        writer.output_dir().display()
    );
    Ok(())
}
