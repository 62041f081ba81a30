//! Overlay rendering and display sinks.
//!
//! Rendering always works on a copy. The frame handed in for inference or
//! capture is never touched.

use std::fs;
use std::path::{Path, PathBuf};

use ab_glyph::{FontVec, PxScale};
use anyhow::{Context, Result};
use image::{ImageFormat, Rgb, RgbImage};
use imageproc::drawing::{
    draw_filled_rect_mut, draw_hollow_rect_mut, draw_line_segment_mut, draw_text_mut, text_size,
};
use imageproc::rect::Rect;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::count::ClassCount;
use crate::detect::{Detection, LabelVocabulary};

pub mod bitmap_font;

pub const PALETTE_SEED: u64 = 42;
pub const PALETTE_SIZE: usize = 100;
pub const PANEL_WIDTH: u32 = 320;

const PANEL_BG: Rgb<u8> = Rgb([30, 30, 30]);
const WHITE: Rgb<u8> = Rgb([255, 255, 255]);
const YELLOW: Rgb<u8> = Rgb([255, 255, 0]);
const GREY: Rgb<u8> = Rgb([150, 150, 150]);
const LIGHT_GREY: Rgb<u8> = Rgb([200, 200, 200]);
const GREEN: Rgb<u8> = Rgb([0, 255, 0]);

/// Pixel height of text at a given weight, scaled like the legacy Hershey sizes.
fn px(scale: f32) -> PxScale {
    PxScale::from(30.0 * scale)
}

/// Class colours, indexed by class id modulo the palette size.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Palette {
    colors: Vec<Rgb<u8>>,
}

impl Palette {
    pub fn seeded(seed: u64, size: usize) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let colors = (0..size.max(1))
            .map(|_| Rgb([rng.gen(), rng.gen(), rng.gen()]))
            .collect();
        Self { colors }
    }

    pub fn color(&self, class_index: usize) -> Rgb<u8> {
        self.colors[class_index % self.colors.len()]
    }

    pub fn len(&self) -> usize {
        self.colors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.colors.is_empty()
    }
}

impl Default for Palette {
    fn default() -> Self {
        Self::seeded(PALETTE_SEED, PALETTE_SIZE)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum PanelLine {
    Title(String),
    Total(String),
    /// Shown instead of class lines when nothing was detected.
    Idle(String),
    Class { label: String, text: String },
    Fps(String),
}

impl PanelLine {
    pub fn text(&self) -> &str {
        match self {
            PanelLine::Title(t) | PanelLine::Total(t) | PanelLine::Idle(t) | PanelLine::Fps(t) => {
                t.as_str()
            }
            PanelLine::Class { text, .. } => text.as_str(),
        }
    }
}

/// Side panel content, top to bottom.
pub fn panel_lines(counts: &ClassCount, fps: f64) -> Vec<PanelLine> {
    let mut lines = vec![
        PanelLine::Title("BATTERY COUNTER".to_string()),
        PanelLine::Total(format!("TOTAL: {}", counts.total())),
    ];
    if counts.is_empty() {
        lines.push(PanelLine::Idle("Scanning...".to_string()));
    } else {
        lines.extend(counts.iter().map(|(label, n)| PanelLine::Class {
            label: label.to_string(),
            text: format!("{}: {}", label, n),
        }));
    }
    lines.push(PanelLine::Fps(format!("FPS: {:.1}", fps)));
    lines
}

/// Draws detections and the count panel.
///
/// Text uses the configured TTF/OTF font, or the built-in bitmap font when
/// none is set.
pub struct OverlayRenderer {
    vocabulary: LabelVocabulary,
    font: Option<FontVec>,
}

impl OverlayRenderer {
    pub fn new(vocabulary: LabelVocabulary) -> Self {
        Self {
            vocabulary,
            font: None,
        }
    }

    pub fn with_font(mut self, font: FontVec) -> Self {
        self.font = Some(font);
        self
    }

    /// Load a font file for captions.
    pub fn with_font_file(self, path: &Path) -> Result<Self> {
        let bytes = fs::read(path)
            .with_context(|| format!("failed to read font {}", path.display()))?;
        let font = FontVec::try_from_vec(bytes)
            .with_context(|| format!("invalid font file {}", path.display()))?;
        Ok(self.with_font(font))
    }

    pub fn has_font(&self) -> bool {
        self.font.is_some()
    }

    fn class_color(&self, label: &str, palette: &Palette) -> Rgb<u8> {
        self.vocabulary
            .index_of(label)
            .map(|idx| palette.color(idx))
            .unwrap_or(WHITE)
    }

    fn text(&self, canvas: &mut RgbImage, color: Rgb<u8>, x: i32, y: i32, scale: f32, text: &str) {
        match &self.font {
            Some(font) => draw_text_mut(canvas, color, x, y, px(scale), font, text),
            None => {
                let cell = bitmap_font::cell_for_scale(scale);
                bitmap_font::draw_text(canvas, text, x, y, cell, color)
            }
        }
    }

    fn text_width(&self, scale: f32, text: &str) -> u32 {
        match &self.font {
            Some(font) => text_size(px(scale), font, text).0,
            None => bitmap_font::text_size(text, bitmap_font::cell_for_scale(scale)).0,
        }
    }

    pub fn render(
        &self,
        frame: &RgbImage,
        detections: &[Detection],
        counts: &ClassCount,
        fps: f64,
        palette: &Palette,
    ) -> RgbImage {
        let mut canvas = frame.clone();
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return canvas;
        }

        for det in detections {
            let color = self.class_color(&det.class_label, palette);
            let x1 = det.bbox.x1 as i32;
            let y1 = det.bbox.y1 as i32;
            let bw = (det.bbox.width() as u32).max(1);
            let bh = (det.bbox.height() as u32).max(1);
            for inset in 0..2u32 {
                let rect = Rect::at(x1 + inset as i32, y1 + inset as i32).of_size(
                    bw.saturating_sub(2 * inset).max(1),
                    bh.saturating_sub(2 * inset).max(1),
                );
                draw_hollow_rect_mut(&mut canvas, rect, color);
            }

            let caption = det.caption();
            let tw = self.text_width(0.5, &caption);
            let top = (y1 - 20).max(0);
            draw_filled_rect_mut(&mut canvas, Rect::at(x1, top).of_size(tw.max(1) + 4, 20), color);
            self.text(&mut canvas, WHITE, x1 + 2, top + 3, 0.5, &caption);
        }

        let panel_w = PANEL_WIDTH.min(w);
        let panel_x = (w - panel_w) as i32;
        draw_filled_rect_mut(&mut canvas, Rect::at(panel_x, 0).of_size(panel_w, h), PANEL_BG);

        let mut y = 130 - 20;
        for line in panel_lines(counts, fps) {
            match &line {
                PanelLine::Title(t) => self.text(&mut canvas, WHITE, panel_x + 10, 20, 0.7, t),
                PanelLine::Total(t) => self.text(&mut canvas, YELLOW, panel_x + 10, 58, 0.8, t),
                PanelLine::Idle(t) => self.text(&mut canvas, GREY, panel_x + 10, y, 0.6, t),
                PanelLine::Class { label, text } => {
                    let color = self.class_color(label, palette);
                    self.text(&mut canvas, color, panel_x + 20, y, 0.65, text);
                    y += 35;
                }
                PanelLine::Fps(t) => {
                    self.text(&mut canvas, LIGHT_GREY, panel_x + 10, h as i32 - 35, 0.5, t)
                }
            }
        }

        canvas
    }

    /// Collector view: centre crosshair, capture count and key help.
    pub fn render_capture(&self, frame: &RgbImage, captured: usize) -> RgbImage {
        let mut canvas = frame.clone();
        let (w, h) = canvas.dimensions();
        if w == 0 || h == 0 {
            return canvas;
        }

        let cx = (w / 2) as f32;
        let cy = (h / 2) as f32;
        draw_line_segment_mut(&mut canvas, (cx - 20.0, cy), (cx + 20.0, cy), GREEN);
        draw_line_segment_mut(&mut canvas, (cx, cy - 20.0), (cx, cy + 20.0), GREEN);

        self.text(&mut canvas, GREEN, 10, 20, 0.7, &format!("Captured: {}", captured));
        self.text(&mut canvas, LIGHT_GREY, 10, h as i32 - 38, 0.6, "[C] Capture  [Q] Quit");
        canvas
    }
}

/// Where rendered frames go.
pub trait FrameSink {
    fn show(&mut self, frame: &RgbImage, sequence: u64) -> Result<()>;
}

/// Discards everything.
#[derive(Debug, Default)]
pub struct NullSink;

impl FrameSink for NullSink {
    fn show(&mut self, _frame: &RgbImage, _sequence: u64) -> Result<()> {
        Ok(())
    }
}

/// Writes every `every`-th frame to a single JPEG path.
///
/// The file is written beside the target and renamed into place so readers
/// never see a partial image.
#[derive(Debug)]
pub struct SnapshotSink {
    path: PathBuf,
    every: u64,
    written: u64,
}

impl SnapshotSink {
    pub fn new(path: impl Into<PathBuf>, every: u64) -> Self {
        Self {
            path: path.into(),
            every: every.max(1),
            written: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn written(&self) -> u64 {
        self.written
    }
}

impl FrameSink for SnapshotSink {
    fn show(&mut self, frame: &RgbImage, sequence: u64) -> Result<()> {
        if sequence % self.every != 0 {
            return Ok(());
        }
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {}", parent.display()))?;
        }
        let tmp = self.path.with_extension("tmp");
        frame
            .save_with_format(&tmp, ImageFormat::Jpeg)
            .with_context(|| format!("failed to write snapshot {}", tmp.display()))?;
        fs::rename(&tmp, &self.path)
            .with_context(|| format!("failed to move snapshot to {}", self.path.display()))?;
        self.written += 1;
        Ok(())
    }
}
