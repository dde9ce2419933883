//! Error types for the depth-aware detection pipeline

use thiserror::Error;

/// Result type alias for the detection library
pub type Result<T> = std::result::Result<T, DetectionError>;

/// Errors that can occur while configuring or running the pipeline
#[derive(Error, Debug)]
pub enum DetectionError {
    #[error("Model loading failed: {0}")]
    ModelLoadError(String),

    #[error("Inference failed: {0}")]
    InferenceError(String),

    #[error("Frame preprocessing failed: {0}")]
    PreprocessingError(String),

    #[error("Invalid input dimensions: expected {expected:?}, got {actual:?}")]
    InvalidDimensions {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    #[error("Malformed depth plane: {0}")]
    DepthPlaneError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Pipeline stopped before a frame arrived")]
    Stopped,

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Image processing error: {0}")]
    ImageError(#[from] image::ImageError),

    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(String),
}

impl DetectionError {
    pub fn model_load<S: Into<String>>(msg: S) -> Self {
        Self::ModelLoadError(msg.into())
    }

    pub fn preprocessing<S: Into<String>>(msg: S) -> Self {
        Self::PreprocessingError(msg.into())
    }

    pub fn depth_plane<S: Into<String>>(msg: S) -> Self {
        Self::DepthPlaneError(msg.into())
    }

    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::ConfigError(msg.into())
    }

    pub fn other<S: Into<String>>(msg: S) -> Self {
        Self::Other(msg.into())
    }

    /// Whether the error only affects the frame it was raised for.
    ///
    /// The pipeline drops the frame either way; anything else points at a
    /// setup problem and is logged as an error.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::InferenceError(_)
                | Self::PreprocessingError(_)
                | Self::InvalidDimensions { .. }
                | Self::DepthPlaneError(_)
                | Self::ImageError(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(DetectionError::preprocessing("bad frame").is_transient());
        assert!(DetectionError::depth_plane("size mismatch").is_transient());
        assert!(DetectionError::InvalidDimensions {
            expected: vec![10],
            actual: vec![9],
        }
        .is_transient());

        assert!(!DetectionError::config("no class labels").is_transient());
        assert!(!DetectionError::model_load("missing weights").is_transient());
        assert!(!DetectionError::Stopped.is_transient());
    }

    #[test]
    fn test_error_messages() {
        let err = DetectionError::InvalidDimensions {
            expected: vec![1, 3, 416, 416],
            actual: vec![1, 3, 320, 320],
        };
        assert_eq!(
            err.to_string(),
            "Invalid input dimensions: expected [1, 3, 416, 416], got [1, 3, 320, 320]"
        );
        assert_eq!(
            DetectionError::config("threshold out of range").to_string(),
            "Configuration error: threshold out of range"
        );
    }
}
