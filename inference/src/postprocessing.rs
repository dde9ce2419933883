//! Postprocessing: turn averaged detector output into per-class detections

use crate::config::PipelineConfig;
use crate::detector_trait::{CandidateBox, Detector};
use crate::error::Result;
use crate::types::Detection;

/// Extracts detections from the averaged output of a detector
#[derive(Debug, Clone)]
pub struct DetectionExtractor {
    /// Confidence threshold for class probabilities
    confidence_threshold: f32,
    /// NMS threshold for removing duplicate detections
    nms_threshold: f32,
    /// Boxes must be strictly wider and taller than this (normalized)
    min_box_size: f32,
    /// Only classes below this id are reported
    class_count: usize,
}

impl DetectionExtractor {
    pub fn new(
        confidence_threshold: f32,
        nms_threshold: f32,
        min_box_size: f32,
        class_count: usize,
    ) -> Self {
        Self {
            confidence_threshold,
            nms_threshold,
            min_box_size,
            class_count,
        }
    }

    pub fn from_config(config: &PipelineConfig) -> Self {
        Self::new(
            config.confidence_threshold,
            config.nms_threshold,
            config.min_box_size,
            config.class_count(),
        )
    }

    /// Decode, suppress and filter.
    ///
    /// Output is ordered by candidate, then by class; one region can yield
    /// several detections when more than one class passes the threshold.
    /// A zero NMS threshold turns suppression off.
    pub fn extract<D: Detector + ?Sized>(
        &self,
        detector: &D,
        averaged: &[f32],
        frame_size: (u32, u32),
    ) -> Result<Vec<Detection>> {
        let mut candidates = detector.decode(averaged, frame_size, self.confidence_threshold)?;
        if self.nms_threshold > 0.0 {
            self.apply_nms(&mut candidates);
        }
        Ok(self.collect(&candidates))
    }

    /// Per-class Non-Maximum Suppression.
    ///
    /// Suppressed candidates get their probability for that class zeroed;
    /// the candidate list itself keeps its order.
    pub fn apply_nms(&self, candidates: &mut [CandidateBox]) {
        let classes = candidates
            .iter()
            .map(|c| c.probs.len())
            .max()
            .unwrap_or(0);

        for class in 0..classes {
            let mut order: Vec<usize> = (0..candidates.len()).collect();
            order.sort_by(|&a, &b| candidates[b].prob(class).total_cmp(&candidates[a].prob(class)));

            for (rank, &i) in order.iter().enumerate() {
                if candidates[i].prob(class) == 0.0 {
                    continue;
                }
                let kept = candidates[i].bbox;
                for &j in &order[rank + 1..] {
                    if kept.iou(&candidates[j].bbox) > self.nms_threshold {
                        if let Some(p) = candidates[j].probs.get_mut(class) {
                            *p = 0.0;
                        }
                    }
                }
            }
        }
    }

    /// Clip, drop undersized boxes and emit one detection per scored class
    pub fn collect(&self, candidates: &[CandidateBox]) -> Vec<Detection> {
        let mut detections = Vec::new();

        for candidate in candidates {
            let bbox = candidate.bbox.clipped();
            if !(bbox.w > self.min_box_size && bbox.h > self.min_box_size) {
                continue;
            }

            for class in 0..self.class_count {
                let probability = candidate.prob(class);
                if probability > 0.0 {
                    detections.push(Detection::new(class as u32, probability, bbox));
                }
            }
        }

        detections
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector_stub::{StubBox, StubDetector};
    use crate::types::NormalizedBox;
    use ndarray::Array4;

    fn extractor(class_count: usize) -> DetectionExtractor {
        DetectionExtractor::new(0.3, 0.4, 0.01, class_count)
    }

    fn run(detector: &mut StubDetector, extractor: &DetectionExtractor) -> Vec<Detection> {
        let (w, h) = detector.input_size();
        let raw = detector
            .predict(&Array4::zeros((1, 3, h as usize, w as usize)))
            .unwrap();
        extractor.extract(&*detector, &raw, (w, h)).unwrap()
    }

    fn candidate(bbox: NormalizedBox, probs: Vec<f32>) -> CandidateBox {
        CandidateBox::new(bbox, 1.0, probs)
    }

    #[test]
    fn test_zero_detections_is_valid() {
        let mut detector = StubDetector::new((32, 32), 3, 5);
        assert!(run(&mut detector, &extractor(3)).is_empty());
    }

    #[test]
    fn test_single_box() {
        let mut detector = StubDetector::new((32, 32), 2, 4).with_boxes(vec![StubBox::new(
            NormalizedBox::new(0.5, 0.5, 0.2, 0.2),
            0,
            0.9,
        )]);
        let detections = run(&mut detector, &extractor(2));
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 0);
        assert!((detections[0].probability - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_multi_label_region() {
        let mut detector = StubDetector::new((32, 32), 3, 2).with_boxes(vec![StubBox::new(
            NormalizedBox::new(0.4, 0.4, 0.3, 0.3),
            2,
            0.7,
        )
        .with_class(0, 0.6)
        .with_class(1, 0.1)]);
        let detections = run(&mut detector, &extractor(3));

        // Class 1 is under the threshold; the rest come out in class order
        let classes: Vec<u32> = detections.iter().map(|d| d.class_id).collect();
        assert_eq!(classes, vec![0, 2]);
        assert_eq!(detections[0].bbox, detections[1].bbox);
    }

    #[test]
    fn test_classes_beyond_class_count_are_ignored() {
        let candidates = vec![candidate(NormalizedBox::new(0.5, 0.5, 0.2, 0.2), vec![0.0, 0.5, 0.8])];
        let detections = extractor(2).collect(&candidates);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].class_id, 1);
    }

    #[test]
    fn test_nms_is_per_class() {
        let a = NormalizedBox::new(0.5, 0.5, 0.2, 0.2);
        let b = NormalizedBox::new(0.51, 0.5, 0.2, 0.2);
        let mut candidates = vec![
            candidate(a, vec![0.6, 0.0]),
            candidate(b, vec![0.8, 0.0]),
            candidate(b, vec![0.0, 0.7]),
        ];
        extractor(2).apply_nms(&mut candidates);

        // The weaker class-0 box is suppressed, the class-1 box survives
        assert_eq!(candidates[0].probs, vec![0.0, 0.0]);
        assert_eq!(candidates[1].probs, vec![0.8, 0.0]);
        assert_eq!(candidates[2].probs, vec![0.0, 0.7]);
    }

    #[test]
    fn test_nms_keeps_distant_boxes_and_order() {
        let mut candidates = vec![
            candidate(NormalizedBox::new(0.2, 0.2, 0.1, 0.1), vec![0.4]),
            candidate(NormalizedBox::new(0.8, 0.8, 0.1, 0.1), vec![0.9]),
        ];
        let ex = extractor(1);
        ex.apply_nms(&mut candidates);
        let detections = ex.collect(&candidates);

        assert_eq!(detections.len(), 2);
        assert!((detections[0].probability - 0.4).abs() < 1e-6);
        assert!((detections[1].probability - 0.9).abs() < 1e-6);
    }

    #[test]
    fn test_zero_nms_threshold_disables_suppression() {
        let boxes = vec![
            StubBox::new(NormalizedBox::new(0.5, 0.5, 0.2, 0.2), 0, 0.9),
            StubBox::new(NormalizedBox::new(0.51, 0.5, 0.2, 0.2), 0, 0.8),
        ];
        let mut detector = StubDetector::new((32, 32), 1, 4).with_boxes(boxes.clone());
        assert_eq!(run(&mut detector, &extractor(1)).len(), 1);

        let mut detector = StubDetector::new((32, 32), 1, 4).with_boxes(boxes);
        let detections = run(&mut detector, &DetectionExtractor::new(0.3, 0.0, 0.01, 1));
        assert_eq!(detections.len(), 2);
    }

    #[test]
    fn test_boxes_are_clipped_to_frame() {
        let candidates = vec![
            candidate(NormalizedBox::new(0.95, 0.02, 0.2, 0.1), vec![0.9]),
            candidate(NormalizedBox::new(0.0, 1.0, 0.5, 0.5), vec![0.5]),
        ];
        let detections = extractor(1).collect(&candidates);
        assert_eq!(detections.len(), 2);

        for det in &detections {
            let b = det.bbox;
            assert!(b.xmin() >= 0.0 && b.xmax() <= 1.0 + 1e-6);
            assert!(b.ymin() >= 0.0 && b.ymax() <= 1.0 + 1e-6);
        }
        assert!((detections[1].bbox.w - 0.25).abs() < 1e-6);
        assert!((detections[1].bbox.h - 0.25).abs() < 1e-6);
    }

    #[test]
    fn test_undersized_boxes_are_excluded() {
        let ex = DetectionExtractor::new(0.3, 0.4, 0.25, 1);
        let candidates = vec![
            // Exactly the minimum width: not strictly greater
            candidate(NormalizedBox::new(0.5, 0.5, 0.25, 0.5), vec![0.9]),
            // Shrinks under the minimum once clipped
            candidate(NormalizedBox::new(1.0, 0.5, 0.4, 0.5), vec![0.9]),
            candidate(NormalizedBox::new(0.5, 0.5, 0.5, 0.5), vec![0.9]),
        ];
        let detections = ex.collect(&candidates);
        assert_eq!(detections.len(), 1);
        assert_eq!(detections[0].bbox.w, 0.5);
    }
}
