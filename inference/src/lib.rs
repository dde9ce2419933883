//! Depth-Aware Detection Library
//!
//! Real-time object detection for camera streams with temporal smoothing of
//! the network output and per-object distance estimates from a co-registered
//! depth plane. Frames flow through a three-slot ring so that capture,
//! inference and publishing of consecutive frames overlap.

pub mod averager;
pub mod config;
pub mod depth;
pub mod detector_stub;
pub mod detector_trait;
pub mod error;
pub mod image_utils;
pub mod pipeline;
pub mod postprocessing;
pub mod preprocessing;
pub mod ring;
pub mod sink;
pub mod source;
pub mod state;
pub mod types;

pub use averager::TemporalAverager;
pub use config::{ModelConfig, PipelineConfig};
pub use depth::DepthSampler;
pub use detector_stub::{StubBox, StubDetector};
pub use detector_trait::{CandidateBox, Detector};
pub use error::{DetectionError, Result};
pub use pipeline::{Pipeline, PipelineStats};
pub use postprocessing::DetectionExtractor;
pub use sink::{ChannelPresenter, ChannelSink, NullSink, Presenter, ResultSink, SinkReceivers};
pub use source::{FrameSource, RequestTicket};
pub use state::{PipelineState, PipelineStatus};
pub use types::{
    CameraFrame, ClassLabels, DepthPlane, DetectedObject, Detection, DetectionBatch, Distance,
    FrameHeader, ImageData, ImageFormat, NormalizedBox, PixelBoundingBox, RequestId,
};

/// Initialize the detection library
/// This function should be called once before using the pipeline
pub fn init() -> Result<()> {
    log::info!("Depth-aware detection library {} initialized", version());
    Ok(())
}

/// Get library version information
pub fn version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
