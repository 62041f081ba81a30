use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::detect::{InferenceConfig, LabelVocabulary, ModelSpec, TrackerConfig};
use crate::enhance::{ClaheConfig, EnhanceConfig, GammaConfig, SharpenConfig};
use crate::ingest::StreamConfig;

pub const CONFIG_ENV: &str = "BATTERY_COUNTER_CONFIG";

const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 4747;
const DEFAULT_PATH: &str = "/video";
const DEFAULT_WIDTH: u32 = 1280;
const DEFAULT_HEIGHT: u32 = 720;
const DEFAULT_BACKOFF_MS: u64 = 1000;
const DEFAULT_TIMEOUT_MS: u64 = 5000;
const DEFAULT_MODEL_PATH: &str = "models/battery_detector/weights/best.onnx";
const DEFAULT_LABEL: &str = "battery";
const DEFAULT_INPUT_SIZE: u32 = 640;
const DEFAULT_LOG_EVERY: u64 = 30;
const DEFAULT_CAPTURE_DIR: &str = "data/raw";
const DEFAULT_CAPTURE_PREFIX: &str = "battery";
const DEFAULT_PROCESSED_DIR: &str = "data/processed";

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CounterConfigFile {
    source: Option<SourceConfigFile>,
    enhance: Option<EnhanceConfigFile>,
    detector: Option<DetectorConfigFile>,
    display: Option<DisplayConfigFile>,
    capture: Option<CaptureConfigFile>,
    preprocess: Option<PreprocessConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    path: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    reconnect_backoff_ms: Option<u64>,
    connect_timeout_ms: Option<u64>,
    read_timeout_ms: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct EnhanceConfigFile {
    enabled: Option<bool>,
    clahe: Option<ClaheConfigFile>,
    gamma: Option<GammaConfigFile>,
    sharpen: Option<SharpenConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct ClaheConfigFile {
    enabled: Option<bool>,
    clip_limit: Option<f32>,
    grid: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct GammaConfigFile {
    enabled: Option<bool>,
    value: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SharpenConfigFile {
    enabled: Option<bool>,
    strength: Option<f32>,
    sigma: Option<f32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DetectorConfigFile {
    model_path: Option<PathBuf>,
    labels: Option<Vec<String>>,
    labels_path: Option<PathBuf>,
    confidence_threshold: Option<f32>,
    iou_threshold: Option<f32>,
    class_agnostic: Option<bool>,
    persist_tracks: Option<bool>,
    input_width: Option<u32>,
    input_height: Option<u32>,
    track_iou_threshold: Option<f32>,
    track_max_age: Option<u32>,
    track_min_hits: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct DisplayConfigFile {
    snapshot_path: Option<PathBuf>,
    snapshot_every: Option<u64>,
    font_path: Option<PathBuf>,
    log_every: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct CaptureConfigFile {
    output_dir: Option<PathBuf>,
    prefix: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct PreprocessConfigFile {
    input_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    resize: Option<[u32; 2]>,
}

/// Fully resolved settings for all three binaries.
#[derive(Debug, Clone)]
pub struct CounterConfig {
    pub source: SourceSettings,
    pub enhance: EnhanceConfig,
    pub detector: DetectorSettings,
    pub display: DisplaySettings,
    pub capture: CaptureSettings,
    pub preprocess: PreprocessSettings,
}

#[derive(Debug, Clone)]
pub struct SourceSettings {
    pub url: String,
    pub width: u32,
    pub height: u32,
    pub reconnect_backoff: Duration,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct DetectorSettings {
    pub model_path: PathBuf,
    pub labels: LabelVocabulary,
    pub confidence_threshold: f32,
    pub iou_threshold: f32,
    pub class_agnostic: bool,
    pub persist_tracks: bool,
    pub input_width: u32,
    pub input_height: u32,
    pub tracker: TrackerConfig,
}

#[derive(Debug, Clone)]
pub struct DisplaySettings {
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
    pub font_path: Option<PathBuf>,
    pub log_every: u64,
}

#[derive(Debug, Clone)]
pub struct CaptureSettings {
    pub output_dir: PathBuf,
    pub prefix: String,
}

#[derive(Debug, Clone)]
pub struct PreprocessSettings {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    pub resize: Option<(u32, u32)>,
}

impl CounterConfig {
    /// Defaults, then the file named by `BATTERY_COUNTER_CONFIG` (if set),
    /// then `BATTERY_*` environment overrides, then validation.
    pub fn load() -> Result<Self> {
        let config_path = std::env::var(CONFIG_ENV).ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Built-in defaults with no file or environment applied.
    pub fn defaults() -> Self {
        Self::resolve(
            CounterConfigFile::default(),
            LabelVocabulary::new([DEFAULT_LABEL]),
        )
    }

    fn from_file(mut file: CounterConfigFile) -> Result<Self> {
        let (labels, labels_path) = match file.detector.as_mut() {
            Some(detector) => (detector.labels.take(), detector.labels_path.take()),
            None => (None, None),
        };
        let labels = match (labels, labels_path) {
            (Some(labels), _) => LabelVocabulary::new(labels),
            (None, Some(path)) => read_labels(&path)?,
            (None, None) => LabelVocabulary::new([DEFAULT_LABEL]),
        };
        Ok(Self::resolve(file, labels))
    }

    fn resolve(file: CounterConfigFile, labels: LabelVocabulary) -> Self {
        let source = file.source.unwrap_or_default();
        let url = match source.url {
            Some(url) => url,
            None => StreamConfig::endpoint_url(
                source.host.as_deref().unwrap_or(DEFAULT_HOST),
                source.port.unwrap_or(DEFAULT_PORT),
                source.path.as_deref().unwrap_or(DEFAULT_PATH),
            ),
        };
        let source = SourceSettings {
            url,
            width: source.width.unwrap_or(DEFAULT_WIDTH),
            height: source.height.unwrap_or(DEFAULT_HEIGHT),
            reconnect_backoff: Duration::from_millis(
                source.reconnect_backoff_ms.unwrap_or(DEFAULT_BACKOFF_MS),
            ),
            connect_timeout: Duration::from_millis(
                source.connect_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
            read_timeout: Duration::from_millis(
                source.read_timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS),
            ),
        };

        let enhance = resolve_enhance(file.enhance.unwrap_or_default());

        let detector = file.detector.unwrap_or_default();
        let inference = InferenceConfig::default();
        let tracking = TrackerConfig::default();
        let detector = DetectorSettings {
            model_path: detector
                .model_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MODEL_PATH)),
            labels,
            confidence_threshold: detector
                .confidence_threshold
                .unwrap_or(inference.confidence_threshold),
            iou_threshold: detector.iou_threshold.unwrap_or(inference.iou_threshold),
            class_agnostic: detector.class_agnostic.unwrap_or(inference.class_agnostic),
            persist_tracks: detector.persist_tracks.unwrap_or(inference.persist_tracks),
            input_width: detector.input_width.unwrap_or(DEFAULT_INPUT_SIZE),
            input_height: detector.input_height.unwrap_or(DEFAULT_INPUT_SIZE),
            tracker: TrackerConfig {
                iou_threshold: detector
                    .track_iou_threshold
                    .unwrap_or(tracking.iou_threshold),
                max_age: detector.track_max_age.unwrap_or(tracking.max_age),
                min_hits: detector.track_min_hits.unwrap_or(tracking.min_hits),
                high_score: tracking.high_score,
            },
        };

        let display = file.display.unwrap_or_default();
        let display = DisplaySettings {
            snapshot_path: display.snapshot_path,
            snapshot_every: display.snapshot_every.unwrap_or(1),
            font_path: display.font_path,
            log_every: display.log_every.unwrap_or(DEFAULT_LOG_EVERY),
        };

        let capture = file.capture.unwrap_or_default();
        let capture = CaptureSettings {
            output_dir: capture
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
            prefix: capture
                .prefix
                .unwrap_or_else(|| DEFAULT_CAPTURE_PREFIX.to_string()),
        };

        let preprocess = file.preprocess.unwrap_or_default();
        let preprocess = PreprocessSettings {
            input_dir: preprocess
                .input_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CAPTURE_DIR)),
            output_dir: preprocess
                .output_dir
                .unwrap_or_else(|| PathBuf::from(DEFAULT_PROCESSED_DIR)),
            resize: preprocess.resize.map(|[w, h]| (w, h)),
        };

        Self {
            source,
            enhance,
            detector,
            display,
            capture,
            preprocess,
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(url) = std::env::var("BATTERY_SOURCE_URL") {
            if !url.trim().is_empty() {
                self.source.url = url;
            }
        }
        if let Ok(path) = std::env::var("BATTERY_MODEL_PATH") {
            if !path.trim().is_empty() {
                self.detector.model_path = PathBuf::from(path);
            }
        }
        if let Ok(value) = std::env::var("BATTERY_CONFIDENCE") {
            self.detector.confidence_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("BATTERY_CONFIDENCE must be a number in [0, 1]"))?;
        }
        if let Ok(value) = std::env::var("BATTERY_IOU") {
            self.detector.iou_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("BATTERY_IOU must be a number in [0, 1]"))?;
        }
        if let Ok(value) = std::env::var("BATTERY_ENHANCE") {
            self.enhance.enabled = parse_flag(&value)
                .ok_or_else(|| anyhow!("BATTERY_ENHANCE must be 0 or 1"))?;
        }
        if let Ok(path) = std::env::var("BATTERY_SNAPSHOT_PATH") {
            if !path.trim().is_empty() {
                self.display.snapshot_path = Some(PathBuf::from(path));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let unit = |name: &str, v: f32| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(anyhow!("{} must be within [0, 1], got {}", name, v))
            }
        };
        unit("confidence_threshold", self.detector.confidence_threshold)?;
        unit("iou_threshold", self.detector.iou_threshold)?;
        unit("track_iou_threshold", self.detector.tracker.iou_threshold)?;
        if self.detector.tracker.min_hits == 0 {
            return Err(anyhow!("track_min_hits must be at least 1"));
        }

        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source url must not be empty"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source width and height must be greater than zero"));
        }
        if self.detector.input_width == 0 || self.detector.input_height == 0 {
            return Err(anyhow!("detector input size must be greater than zero"));
        }
        if self.detector.labels.is_empty() {
            return Err(anyhow!("detector label vocabulary must not be empty"));
        }

        let enhance = &self.enhance;
        if !(enhance.gamma.value > 0.0 && enhance.gamma.value.is_finite()) {
            return Err(anyhow!("gamma must be greater than zero"));
        }
        if !(enhance.clahe.clip_limit > 0.0 && enhance.clahe.clip_limit.is_finite()) {
            return Err(anyhow!("clahe clip_limit must be greater than zero"));
        }
        if enhance.clahe.grid.0 == 0 || enhance.clahe.grid.1 == 0 {
            return Err(anyhow!("clahe grid must be at least 1"));
        }
        if !(enhance.sharpen.strength >= 0.0) {
            return Err(anyhow!("sharpen strength must not be negative"));
        }
        if !(enhance.sharpen.sigma > 0.0) {
            return Err(anyhow!("sharpen sigma must be greater than zero"));
        }

        if self.display.snapshot_every == 0 {
            return Err(anyhow!("snapshot_every must be at least 1"));
        }
        if let Some((w, h)) = self.preprocess.resize {
            if w == 0 || h == 0 {
                return Err(anyhow!("preprocess resize must be greater than zero"));
            }
        }
        Ok(())
    }

    pub fn stream_config(&self) -> StreamConfig {
        StreamConfig {
            url: self.source.url.clone(),
            width: self.source.width,
            height: self.source.height,
            connect_timeout: self.source.connect_timeout,
            read_timeout: self.source.read_timeout,
        }
    }

    pub fn inference_config(&self) -> InferenceConfig {
        InferenceConfig {
            confidence_threshold: self.detector.confidence_threshold,
            iou_threshold: self.detector.iou_threshold,
            class_agnostic: self.detector.class_agnostic,
            persist_tracks: self.detector.persist_tracks,
        }
    }

    pub fn model_spec(&self) -> ModelSpec {
        ModelSpec {
            model_path: self.detector.model_path.clone(),
            labels: self.detector.labels.clone(),
            input_size: (self.detector.input_width, self.detector.input_height),
            tracker: self.detector.tracker.clone(),
        }
    }
}

fn resolve_enhance(file: EnhanceConfigFile) -> EnhanceConfig {
    let defaults = EnhanceConfig::default();
    let clahe = file.clahe.unwrap_or_default();
    let gamma = file.gamma.unwrap_or_default();
    let sharpen = file.sharpen.unwrap_or_default();
    EnhanceConfig {
        enabled: file.enabled.unwrap_or(defaults.enabled),
        clahe: ClaheConfig {
            enabled: clahe.enabled.unwrap_or(defaults.clahe.enabled),
            clip_limit: clahe.clip_limit.unwrap_or(defaults.clahe.clip_limit),
            grid: clahe.grid.map(|g| (g, g)).unwrap_or(defaults.clahe.grid),
        },
        gamma: GammaConfig {
            enabled: gamma.enabled.unwrap_or(defaults.gamma.enabled),
            value: gamma.value.unwrap_or(defaults.gamma.value),
        },
        sharpen: SharpenConfig {
            enabled: sharpen.enabled.unwrap_or(defaults.sharpen.enabled),
            strength: sharpen.strength.unwrap_or(defaults.sharpen.strength),
            sigma: sharpen.sigma.unwrap_or(defaults.sharpen.sigma),
        },
    }
}

fn read_config_file(path: &Path) -> Result<CounterConfigFile> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let is_json = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));
    let cfg = if is_json {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

/// One label per line. Blank lines and `#` comments are skipped.
fn read_labels(path: &Path) -> Result<LabelVocabulary> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read labels file {}", path.display()))?;
    Ok(LabelVocabulary::new(
        raw.lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#')),
    ))
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "on" | "yes" => Some(true),
        "0" | "false" | "off" | "no" => Some(false),
        _ => None,
    }
}
