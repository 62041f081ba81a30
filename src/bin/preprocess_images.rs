//! preprocess_images - enhance a captured dataset in bulk.
//!
//! Mirrors the input tree into the output directory, running every image
//! through the same enhancement stages as the live counter. Files that fail
//! are logged and skipped.

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use std::path::PathBuf;

use battery_counter::preprocess::{comparison, COMPARISON_MAX_WIDTH};
use battery_counter::ui::Ui;
use battery_counter::{BatchPreprocessor, CounterConfig, Enhancer};

#[derive(Parser, Debug)]
#[command(author, version, about = "Enhance a directory of battery images")]
struct Args {
    /// Input directory (searched recursively).
    #[arg(long)]
    input: Option<PathBuf>,

    /// Output directory; relative paths are preserved.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Resize outputs to WIDTHxHEIGHT after enhancement.
    #[arg(long, value_parser = parse_size)]
    resize: Option<(u32, u32)>,

    /// Write a before/after image of the first input to this path.
    #[arg(long)]
    compare: Option<PathBuf>,

    /// Progress output: auto, plain or pretty.
    #[arg(long, env = "BATTERY_UI")]
    ui: Option<String>,
}

fn parse_size(value: &str) -> Result<(u32, u32)> {
    let (w, h) = value
        .split_once(['x', 'X'])
        .ok_or_else(|| anyhow!("expected WIDTHxHEIGHT, got {value}"))?;
    let w: u32 = w.trim().parse().context("invalid width")?;
    let h: u32 = h.trim().parse().context("invalid height")?;
    if w == 0 || h == 0 {
        return Err(anyhow!("resize dimensions must be greater than zero"));
    }
    Ok((w, h))
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();
    let ui = Ui::from_args(args.ui.as_deref());

    let mut cfg = CounterConfig::load()?;
    if let Some(input) = args.input {
        cfg.preprocess.input_dir = input;
    }
    if let Some(output) = args.output {
        cfg.preprocess.output_dir = output;
    }
    if args.resize.is_some() {
        cfg.preprocess.resize = args.resize;
    }
    cfg.validate()?;

    let input = cfg.preprocess.input_dir.clone();
    let output = cfg.preprocess.output_dir.clone();
    if !input.is_dir() {
        return Err(anyhow!("input directory {} does not exist", input.display()));
    }

    // The batch always runs every stage, whatever the live master switch says.
    let mut enhance = cfg.enhance.clone();
    enhance.enabled = true;
    let preprocessor =
        BatchPreprocessor::new(Enhancer::new(enhance)).with_resize(cfg.preprocess.resize);

    let total = battery_counter::preprocess::collect_images(&input)?.len();
    let report = {
        let _stage = ui.stage("Enhancing images");
        let progress = ui.progress("images", total);
        preprocessor.run_with_progress(&input, &output, |done, _| progress.set(done))?
    };

    for failure in &report.failures {
        eprintln!("failed: {}", failure);
    }
    eprintln!(
        "{} of {} images written to {}",
        report.processed(),
        report.found,
        output.display()
    );

    if let Some(compare_path) = args.compare {
        let first = battery_counter::preprocess::collect_images(&input)?
            .into_iter()
            .next();
        match first {
            Some(path) => {
                let original = image::open(&path)
                    .with_context(|| format!("failed to decode {}", path.display()))?
                    .to_rgb8();
                let processed = preprocessor.process_image(&original);
                comparison(&original, &processed, COMPARISON_MAX_WIDTH)
                    .save(&compare_path)
                    .with_context(|| format!("failed to write {}", compare_path.display()))?;
                eprintln!("comparison written to {}", compare_path.display());
            }
            None => log::warn!("no images found; skipping comparison"),
        }
    }

    Ok(())
}
