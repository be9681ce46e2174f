use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::envelope::ResultKind;
use crate::frame::VideoFormat;
use crate::infer::{InferSettings, OutputMode};
use crate::overlay::OverlaySettings;
use crate::source::{SourceConfig, DEFAULT_SOURCE_URI};

const DEFAULT_MODEL_WIDTH: u32 = 224;
const DEFAULT_MODEL_HEIGHT: u32 = 224;
const DEFAULT_SOURCE_FPS: u32 = 30;
const DEFAULT_SOURCE_WIDTH: u32 = 640;
const DEFAULT_SOURCE_HEIGHT: u32 = 480;
const DEFAULT_SOURCE_FORMAT: VideoFormat = VideoFormat::Bgrx;

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct AnnotatorConfigFile {
    inference: Option<InferenceConfigFile>,
    overlay: Option<OverlayConfigFile>,
    source: Option<SourceConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct InferenceConfigFile {
    model: Option<PathBuf>,
    mode: Option<String>,
    output: Option<String>,
    confidence_threshold: Option<f32>,
    num_inference: Option<usize>,
    frame_interval: Option<u32>,
    model_width: Option<u32>,
    model_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct OverlayConfigFile {
    labels: Option<PathBuf>,
}

#[derive(Debug, Deserialize, Default)]
#[serde(deny_unknown_fields)]
struct SourceConfigFile {
    uri: Option<String>,
    format: Option<String>,
    width: Option<u32>,
    height: Option<u32>,
    target_fps: Option<u32>,
    max_frames: Option<u64>,
}

/// Resolved settings for both stages and the frame source.
#[derive(Debug, Clone)]
pub struct AnnotatorConfig {
    pub inference: InferSettings,
    /// Size of the inference flow, i.e. the model input.
    pub model_width: u32,
    pub model_height: u32,
    pub overlay: OverlaySettings,
    pub source: SourceConfig,
}

impl Default for AnnotatorConfig {
    fn default() -> Self {
        Self {
            inference: InferSettings::default(),
            model_width: DEFAULT_MODEL_WIDTH,
            model_height: DEFAULT_MODEL_HEIGHT,
            overlay: OverlaySettings::default(),
            source: SourceConfig {
                uri: DEFAULT_SOURCE_URI.to_string(),
                format: DEFAULT_SOURCE_FORMAT,
                width: DEFAULT_SOURCE_WIDTH,
                height: DEFAULT_SOURCE_HEIGHT,
                target_fps: DEFAULT_SOURCE_FPS,
                max_frames: None,
            },
        }
    }
}

impl AnnotatorConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("ANNOTATE_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) if !path.trim().is_empty() => Some(read_config_file(Path::new(path))?),
            _ => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: AnnotatorConfigFile) -> Result<Self> {
        let mut cfg = Self::default();

        if let Some(inference) = file.inference {
            if let Some(mode) = inference.mode {
                cfg.inference.mode = mode.parse().context("inference.mode")?;
            }
            if let Some(output) = inference.output {
                cfg.inference.output = output.parse().context("inference.output")?;
            }
            cfg.inference.model = inference.model;
            cfg.inference.confidence_threshold = inference.confidence_threshold;
            cfg.inference.num_inference = inference.num_inference;
            cfg.inference.frame_interval = inference.frame_interval.unwrap_or(0);
            cfg.model_width = inference.model_width.unwrap_or(DEFAULT_MODEL_WIDTH);
            cfg.model_height = inference.model_height.unwrap_or(DEFAULT_MODEL_HEIGHT);
        }

        if let Some(overlay) = file.overlay {
            cfg.overlay.labels = overlay.labels;
        }

        if let Some(source) = file.source {
            if let Some(uri) = source.uri {
                cfg.source.uri = uri;
            }
            if let Some(format) = source.format {
                cfg.source.format = VideoFormat::from_name(&format).context("source.format")?;
            }
            cfg.source.width = source.width.unwrap_or(DEFAULT_SOURCE_WIDTH);
            cfg.source.height = source.height.unwrap_or(DEFAULT_SOURCE_HEIGHT);
            cfg.source.target_fps = source.target_fps.unwrap_or(DEFAULT_SOURCE_FPS);
            cfg.source.max_frames = source.max_frames;
        }
        Ok(cfg)
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(model) = env_value("ANNOTATE_MODEL") {
            self.inference.model = Some(PathBuf::from(model));
        }
        if let Some(mode) = env_value("ANNOTATE_MODE") {
            self.inference.mode = mode.parse::<ResultKind>().context("ANNOTATE_MODE")?;
        }
        if let Some(output) = env_value("ANNOTATE_OUTPUT") {
            self.inference.output = output.parse::<OutputMode>().context("ANNOTATE_OUTPUT")?;
        }
        if let Some(threshold) = env_value("ANNOTATE_THRESHOLD") {
            let threshold: f32 = threshold
                .parse()
                .map_err(|_| anyhow!("ANNOTATE_THRESHOLD must be a number"))?;
            self.inference.confidence_threshold = Some(threshold);
        }
        if let Some(count) = env_value("ANNOTATE_NUM_INFERENCE") {
            let count: usize = count
                .parse()
                .map_err(|_| anyhow!("ANNOTATE_NUM_INFERENCE must be a non-negative integer"))?;
            self.inference.num_inference = Some(count);
        }
        if let Some(interval) = env_value("ANNOTATE_FRAME_INTERVAL") {
            self.inference.frame_interval = interval
                .parse()
                .map_err(|_| anyhow!("ANNOTATE_FRAME_INTERVAL must be a non-negative integer"))?;
        }
        if let Some(labels) = env_value("ANNOTATE_LABELS") {
            self.overlay.labels = Some(PathBuf::from(labels));
        }
        if let Some(width) = env_value("ANNOTATE_MODEL_WIDTH") {
            self.model_width = width
                .parse()
                .map_err(|_| anyhow!("ANNOTATE_MODEL_WIDTH must be a positive integer"))?;
        }
        if let Some(height) = env_value("ANNOTATE_MODEL_HEIGHT") {
            self.model_height = height
                .parse()
                .map_err(|_| anyhow!("ANNOTATE_MODEL_HEIGHT must be a positive integer"))?;
        }
        if let Some(uri) = env_value("ANNOTATE_SOURCE") {
            self.source.uri = uri;
        }
        Ok(())
    }

    /// Also called by the binary after command-line overrides.
    pub fn validate(&self) -> Result<()> {
        if self.model_width == 0 || self.model_height == 0 {
            return Err(anyhow!(
                "model size must be non-zero, got {}x{}",
                self.model_width,
                self.model_height
            ));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!(
                "source size must be non-zero, got {}x{}",
                self.source.width,
                self.source.height
            ));
        }
        if let Some(threshold) = self.inference.confidence_threshold {
            if !threshold.is_finite() {
                return Err(anyhow!("confidence threshold must be finite"));
            }
        }
        if self.inference.num_inference == Some(0) {
            return Err(anyhow!("num_inference must be at least 1"));
        }
        Ok(())
    }
}

fn env_value(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn read_config_file(path: &Path) -> Result<AnnotatorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let is_toml = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));
    let cfg = if is_toml {
        toml::from_str(&raw).map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    } else {
        serde_json::from_str(&raw)
            .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?
    };
    Ok(cfg)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse_json(raw: &str) -> Result<AnnotatorConfig> {
        let file: AnnotatorConfigFile = serde_json::from_str(raw)?;
        AnnotatorConfig::from_file(file)
    }

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = parse_json("{}").unwrap();
        assert_eq!(cfg.inference.mode, ResultKind::None);
        assert_eq!(cfg.inference.output, OutputMode::Overlay);
        assert_eq!((cfg.model_width, cfg.model_height), (224, 224));
        assert_eq!(cfg.source.uri, DEFAULT_SOURCE_URI);
        assert_eq!(cfg.source.format, VideoFormat::Bgrx);
        assert!(cfg.overlay.labels.is_none());
        cfg.validate().unwrap();
    }

    #[test]
    fn unknown_mode_is_rejected() {
        let err = parse_json(r#"{"inference": {"mode": "segmenter"}}"#).unwrap_err();
        assert!(format!("{err:#}").contains("inference.mode"));
        assert!(parse_json(r#"{"inference": {"output": "both"}}"#).is_err());
        assert!(parse_json(r#"{"source": {"format": "NV12"}}"#).is_err());
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(parse_json(r#"{"inference": {"treshold": 0.5}}"#).is_err());
    }

    #[test]
    fn validate_rejects_degenerate_values() {
        let mut cfg = AnnotatorConfig::default();
        cfg.model_width = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = AnnotatorConfig::default();
        cfg.inference.num_inference = Some(0);
        assert!(cfg.validate().is_err());

        let mut cfg = AnnotatorConfig::default();
        cfg.inference.confidence_threshold = Some(f32::NAN);
        assert!(cfg.validate().is_err());
    }
}
