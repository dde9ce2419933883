//! Pipeline configuration, read once at startup

use crate::error::{DetectionError, Result};
use crate::types::ClassLabels;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Locations of the detector's weight and network description files
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub weights_path: Option<PathBuf>,
    pub config_path: Option<PathBuf>,
}

impl ModelConfig {
    /// Check that every configured model file can be opened
    pub fn verify(&self) -> Result<()> {
        for path in [&self.weights_path, &self.config_path].into_iter().flatten() {
            std::fs::File::open(path).map_err(|e| {
                DetectionError::model_load(format!("cannot read {}: {}", path.display(), e))
            })?;
        }
        Ok(())
    }
}

/// Configuration for the detection pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Class probability threshold (0-1)
    pub confidence_threshold: f32,

    /// Number of raw outputs averaged together (1 disables smoothing)
    pub averaging_window: usize,

    /// Minimum box width and height relative to the frame
    pub min_box_size: f32,

    /// Non-maximum suppression overlap threshold (0-1)
    pub nms_threshold: f32,

    pub class_labels: ClassLabels,

    pub model: ModelConfig,

    /// Show annotated frames in a live view window
    pub live_view: bool,

    /// When set, annotated frames are written to `{prefix}_{count:08}.png`
    /// instead of being presented and published
    pub output_prefix: Option<String>,

    /// Log FPS and detected objects every cycle
    pub console_output: bool,

    /// How often waiting loops re-check the running flag
    pub poll_interval_ms: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            confidence_threshold: 0.3,
            averaging_window: 1,
            min_box_size: 0.01,
            nms_threshold: 0.4,
            class_labels: ClassLabels::default(),
            model: ModelConfig::default(),
            live_view: true,
            output_prefix: None,
            console_output: false,
            poll_interval_ms: 100,
        }
    }
}

impl PipelineConfig {
    /// Load configuration from a JSON file and validate it
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|e| {
            DetectionError::config(format!("cannot read {}: {}", path.display(), e))
        })?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        log::info!(
            "Loaded pipeline configuration from {} ({} classes)",
            path.display(),
            config.class_labels.len()
        );
        Ok(config)
    }

    /// Set class labels
    pub fn with_class_labels<S: Into<String>>(mut self, labels: impl IntoIterator<Item = S>) -> Self {
        self.class_labels = ClassLabels::new(labels);
        self
    }

    pub fn with_averaging_window(mut self, window: usize) -> Self {
        self.averaging_window = window;
        self
    }

    pub fn with_output_prefix<S: Into<String>>(mut self, prefix: S) -> Self {
        self.output_prefix = Some(prefix.into());
        self
    }

    pub fn without_live_view(mut self) -> Self {
        self.live_view = false;
        self
    }

    /// Batch mode persists annotated frames instead of publishing
    pub fn is_batch_mode(&self) -> bool {
        self.output_prefix.is_some()
    }

    pub fn class_count(&self) -> usize {
        self.class_labels.len()
    }

    /// Validate ranges and required fields, and make sure model files are readable
    pub fn validate(&self) -> Result<()> {
        if self.class_labels.is_empty() {
            return Err(DetectionError::config("class_labels must not be empty"));
        }
        if !(self.confidence_threshold > 0.0 && self.confidence_threshold <= 1.0) {
            return Err(DetectionError::config(format!(
                "confidence_threshold must be in (0, 1], got {}",
                self.confidence_threshold
            )));
        }
        if !(0.0..=1.0).contains(&self.nms_threshold) {
            return Err(DetectionError::config(format!(
                "nms_threshold must be in [0, 1], got {}",
                self.nms_threshold
            )));
        }
        if !(0.0..1.0).contains(&self.min_box_size) {
            return Err(DetectionError::config(format!(
                "min_box_size must be in [0, 1), got {}",
                self.min_box_size
            )));
        }
        if self.averaging_window == 0 {
            return Err(DetectionError::config("averaging_window must be at least 1"));
        }
        if self.poll_interval_ms == 0 {
            return Err(DetectionError::config("poll_interval_ms must be at least 1"));
        }
        if let Some(prefix) = &self.output_prefix {
            if prefix.is_empty() {
                return Err(DetectionError::config("output_prefix must not be empty"));
            }
        }
        self.model.verify()
    }
}
