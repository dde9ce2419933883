/// Detector interface used by the pipeline
///
/// The network is a black box: it turns a letterboxed tensor into a flat raw
/// output vector, and knows how to decode a raw (or averaged) output vector
/// into scored candidate regions. Everything else happens in the pipeline.
use crate::error::Result;
use crate::types::NormalizedBox;
use ndarray::Array4;

/// Candidate region decoded from network output, before suppression and filtering
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateBox {
    /// Box in frame-relative coordinates (may extend past the frame)
    pub bbox: NormalizedBox,
    pub objectness: f32,
    /// Per-class probability; zero where below the confidence threshold
    pub probs: Vec<f32>,
}

impl CandidateBox {
    pub fn new(bbox: NormalizedBox, objectness: f32, probs: Vec<f32>) -> Self {
        Self {
            bbox,
            objectness,
            probs,
        }
    }

    pub fn prob(&self, class_id: usize) -> f32 {
        self.probs.get(class_id).copied().unwrap_or(0.0)
    }
}

/// Common interface for object detectors
pub trait Detector: Send {
    /// Get the detector name (for logging/debugging)
    fn name(&self) -> &str;

    /// Get the input size expected by the detector (width, height)
    fn input_size(&self) -> (u32, u32);

    /// Total length of the raw output over all detection-producing layers
    fn output_len(&self) -> usize;

    /// Number of classes the network scores
    fn class_count(&self) -> usize;

    /// Run the network on a `[1, 3, height, width]` tensor and return its raw output
    fn predict(&mut self, input: &Array4<f32>) -> Result<Vec<f32>>;

    /// Decode a raw output vector into candidate boxes.
    ///
    /// `frame_size` is the native size of the frame the tensor was letterboxed
    /// from, so implementations can map boxes back out of the padding.
    /// Class probabilities below `threshold` must be reported as zero.
    fn decode(
        &self,
        output: &[f32],
        frame_size: (u32, u32),
        threshold: f32,
    ) -> Result<Vec<CandidateBox>>;
}
