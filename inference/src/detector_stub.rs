// Scripted detector used for demos, benchmarks and tests.
// It does not run a network: every call to `predict` replays the next frame of
// a script, encoded in the same flat layout a region layer produces.

use crate::detector_trait::{CandidateBox, Detector};
use crate::error::{DetectionError, Result};
use crate::types::NormalizedBox;
use ndarray::Array4;
use std::time::Duration;

/// Number of values stored per anchor before the class probabilities
const BOX_FIELDS: usize = 5;

/// One box in a scripted frame
#[derive(Debug, Clone, PartialEq)]
pub struct StubBox {
    pub bbox: NormalizedBox,
    pub objectness: f32,
    /// (class id, class probability) pairs; unlisted classes score zero
    pub class_probs: Vec<(u32, f32)>,
}

impl StubBox {
    /// Box with full objectness and a single scored class
    pub fn new(bbox: NormalizedBox, class_id: u32, probability: f32) -> Self {
        Self {
            bbox,
            objectness: 1.0,
            class_probs: vec![(class_id, probability)],
        }
    }

    pub fn with_class(mut self, class_id: u32, probability: f32) -> Self {
        self.class_probs.push((class_id, probability));
        self
    }

    pub fn with_objectness(mut self, objectness: f32) -> Self {
        self.objectness = objectness;
        self
    }
}

/// Stub detector replaying scripted outputs
pub struct StubDetector {
    input_size: (u32, u32),
    class_count: usize,
    max_boxes: usize,
    script: Vec<Vec<StubBox>>,
    cursor: usize,
    latency: Duration,
}

impl StubDetector {
    /// Create a detector that reports nothing
    pub fn new(input_size: (u32, u32), class_count: usize, max_boxes: usize) -> Self {
        log::info!(
            "Creating stub detector ({}x{}, {} classes, {} anchors)",
            input_size.0,
            input_size.1,
            class_count,
            max_boxes
        );
        Self {
            input_size,
            class_count,
            max_boxes,
            script: Vec::new(),
            cursor: 0,
            latency: Duration::ZERO,
        }
    }

    /// Report the same boxes on every frame
    pub fn with_boxes(self, boxes: Vec<StubBox>) -> Self {
        self.with_script(vec![boxes])
    }

    /// Report `script[i % script.len()]` on the i-th call to `predict`
    pub fn with_script(mut self, script: Vec<Vec<StubBox>>) -> Self {
        self.script = script;
        self.cursor = 0;
        self
    }

    /// Sleep this long inside every `predict` call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    fn stride(&self) -> usize {
        BOX_FIELDS + self.class_count
    }

    fn encode(&self, boxes: &[StubBox]) -> Vec<f32> {
        let stride = self.stride();
        let mut output = vec![0.0; self.output_len()];

        for (anchor, stub) in boxes.iter().take(self.max_boxes).enumerate() {
            let cell = &mut output[anchor * stride..(anchor + 1) * stride];
            cell[0] = stub.bbox.x;
            cell[1] = stub.bbox.y;
            cell[2] = stub.bbox.w;
            cell[3] = stub.bbox.h;
            cell[4] = stub.objectness;
            for &(class_id, prob) in &stub.class_probs {
                if let Some(slot) = cell.get_mut(BOX_FIELDS + class_id as usize) {
                    *slot = prob;
                }
            }
        }

        output
    }
}

impl Detector for StubDetector {
    fn name(&self) -> &str {
        "stub"
    }

    fn input_size(&self) -> (u32, u32) {
        self.input_size
    }

    fn output_len(&self) -> usize {
        self.max_boxes * self.stride()
    }

    fn class_count(&self) -> usize {
        self.class_count
    }

    fn predict(&mut self, input: &Array4<f32>) -> Result<Vec<f32>> {
        let (width, height) = self.input_size;
        let expected = [1, 3, height as usize, width as usize];
        if input.shape() != expected {
            return Err(DetectionError::InvalidDimensions {
                expected: expected.to_vec(),
                actual: input.shape().to_vec(),
            });
        }

        if !self.latency.is_zero() {
            std::thread::sleep(self.latency);
        }

        if self.script.is_empty() {
            return Ok(vec![0.0; self.output_len()]);
        }
        let boxes = &self.script[self.cursor % self.script.len()];
        self.cursor += 1;
        Ok(self.encode(boxes))
    }

    fn decode(
        &self,
        output: &[f32],
        _frame_size: (u32, u32),
        threshold: f32,
    ) -> Result<Vec<CandidateBox>> {
        if output.len() != self.output_len() {
            return Err(DetectionError::InvalidDimensions {
                expected: vec![self.output_len()],
                actual: vec![output.len()],
            });
        }

        let candidates = output
            .chunks_exact(self.stride())
            .filter(|cell| cell[4] > threshold)
            .map(|cell| {
                let objectness = cell[4];
                let probs = cell[BOX_FIELDS..]
                    .iter()
                    .map(|&p| {
                        let prob = objectness * p;
                        if prob > threshold {
                            prob
                        } else {
                            0.0
                        }
                    })
                    .collect();
                CandidateBox::new(
                    NormalizedBox::new(cell[0], cell[1], cell[2], cell[3]),
                    objectness,
                    probs,
                )
            })
            .collect();

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn input(width: u32, height: u32) -> Array4<f32> {
        Array4::zeros((1, 3, height as usize, width as usize))
    }

    #[test]
    fn test_stub_output_layout() {
        let mut detector = StubDetector::new((32, 32), 3, 4).with_boxes(vec![StubBox::new(
            NormalizedBox::new(0.5, 0.5, 0.2, 0.2),
            2,
            0.8,
        )]);
        assert_eq!(detector.output_len(), 4 * 8);

        let output = detector.predict(&input(32, 32)).unwrap();
        assert_eq!(output.len(), 32);
        assert_eq!(&output[..8], &[0.5, 0.5, 0.2, 0.2, 1.0, 0.0, 0.0, 0.8]);
        assert!(output[8..].iter().all(|&v| v == 0.0));
    }

    #[test]
    fn test_decode_applies_threshold() {
        let mut detector = StubDetector::new((32, 32), 2, 2).with_boxes(vec![
            StubBox::new(NormalizedBox::new(0.3, 0.3, 0.1, 0.1), 0, 0.9).with_class(1, 0.2),
            StubBox::new(NormalizedBox::new(0.7, 0.7, 0.1, 0.1), 1, 0.9).with_objectness(0.1),
        ]);
        let output = detector.predict(&input(32, 32)).unwrap();
        let candidates = detector.decode(&output, (64, 64), 0.3).unwrap();

        // The second anchor falls under the objectness threshold
        assert_eq!(candidates.len(), 1);
        assert!((candidates[0].prob(0) - 0.9).abs() < 1e-6);
        assert_eq!(candidates[0].prob(1), 0.0);
    }

    #[test]
    fn test_script_cycles() {
        let a = vec![StubBox::new(NormalizedBox::new(0.2, 0.2, 0.1, 0.1), 0, 0.9)];
        let mut detector = StubDetector::new((16, 16), 1, 1).with_script(vec![a, Vec::new()]);

        let first = detector.predict(&input(16, 16)).unwrap();
        let second = detector.predict(&input(16, 16)).unwrap();
        let third = detector.predict(&input(16, 16)).unwrap();
        assert_eq!(first[4], 1.0);
        assert_eq!(second[4], 0.0);
        assert_eq!(first, third);
    }

    #[test]
    fn test_rejects_wrong_input_shape() {
        let mut detector = StubDetector::new((32, 32), 1, 1);
        let err = detector.predict(&input(16, 16)).unwrap_err();
        assert!(matches!(err, DetectionError::InvalidDimensions { .. }));

        let err = detector.decode(&[0.0; 3], (32, 32), 0.5).unwrap_err();
        assert!(err.is_transient());
    }
}
