//! Frame intake: streamed camera frames and on-demand detection requests

use crate::state::{PipelineState, Responder};
use crate::types::{CameraFrame, DepthPlane, DetectionBatch, FrameHeader, ImageData, RequestId};
use crossbeam::channel::{bounded, Receiver, RecvTimeoutError, TryRecvError};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Handle for the result of one on-demand request
pub struct RequestTicket {
    id: RequestId,
    receiver: Receiver<DetectionBatch>,
    cancelled: Arc<AtomicBool>,
}

impl RequestTicket {
    pub fn id(&self) -> RequestId {
        self.id
    }

    /// Wait up to `timeout` for the batch.
    ///
    /// Returns `None` on timeout, after cancellation, or when the request was
    /// overtaken by a newer frame before it could be processed.
    pub fn wait(&self, timeout: Duration) -> Option<DetectionBatch> {
        if self.is_cancelled() {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(batch) => Some(batch),
            Err(RecvTimeoutError::Timeout) | Err(RecvTimeoutError::Disconnected) => None,
        }
    }

    pub fn try_recv(&self) -> Option<DetectionBatch> {
        match self.receiver.try_recv() {
            Ok(batch) => Some(batch),
            Err(TryRecvError::Empty) | Err(TryRecvError::Disconnected) => None,
        }
    }

    /// Withdraw the request; its batch will be discarded
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
        log::debug!("{} cancelled", self.id);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Entry point for camera drivers and request handlers
#[derive(Clone)]
pub struct FrameSource {
    state: Arc<PipelineState>,
    next_seq: Arc<AtomicU64>,
    frame_id: String,
}

impl FrameSource {
    pub fn new(state: Arc<PipelineState>) -> Self {
        Self {
            state,
            next_seq: Arc::new(AtomicU64::new(0)),
            frame_id: "camera".to_string(),
        }
    }

    /// Coordinate frame name stamped on headers built by this source
    pub fn with_frame_id<S: Into<String>>(mut self, frame_id: S) -> Self {
        self.frame_id = frame_id.into();
        self
    }

    /// Hand a captured frame to the pipeline, replacing any unfetched one
    pub fn push(&self, frame: CameraFrame) {
        log::trace!(
            "Frame {} pushed ({}x{}, depth: {})",
            frame.header.seq,
            frame.image.width,
            frame.image.height,
            frame.depth.is_some()
        );
        self.state.publish(frame, None);
    }

    /// Push an image with a freshly stamped header
    pub fn push_image(&self, image: ImageData, depth: Option<DepthPlane>) -> FrameHeader {
        let header = self.next_header();
        self.push(CameraFrame {
            image,
            depth,
            header: header.clone(),
        });
        header
    }

    /// Run detection on one image and deliver the batch only to the returned ticket
    pub fn request(&self, image: ImageData, id: RequestId) -> RequestTicket {
        let (sender, receiver) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));
        let responder = Responder {
            sender,
            cancelled: Arc::clone(&cancelled),
        };

        log::debug!("{} queued ({}x{})", id, image.width, image.height);
        let frame = CameraFrame::new(image, self.next_header());
        self.state.publish(frame, Some((id, responder)));

        RequestTicket {
            id,
            receiver,
            cancelled,
        }
    }

    pub fn state(&self) -> &Arc<PipelineState> {
        &self.state
    }

    fn next_header(&self) -> FrameHeader {
        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        FrameHeader::new(seq, self.frame_id.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ImageFormat;

    fn image() -> ImageData {
        ImageData::new(vec![0; 3 * 4 * 4], 4, 4, ImageFormat::RGB)
    }

    #[test]
    fn test_push_image_numbers_frames() {
        let state = Arc::new(PipelineState::default());
        let source = FrameSource::new(Arc::clone(&state)).with_frame_id("left");

        let first = source.push_image(image(), None);
        let second = source.push_image(image(), None);
        assert_eq!((first.seq, second.seq), (0, 1));
        assert_eq!(second.frame_id, "left");

        let snap = state.snapshot().unwrap();
        assert_eq!(snap.frame.header, second);
        assert_eq!(state.pending_signals(), 2);
    }

    #[test]
    fn test_request_reaches_ticket() {
        let state = Arc::new(PipelineState::default());
        let source = FrameSource::new(Arc::clone(&state));
        let ticket = source.request(image(), RequestId(11));
        assert_eq!(ticket.id(), RequestId(11));
        assert!(ticket.try_recv().is_none());

        let snap = state.snapshot().unwrap();
        assert_eq!(snap.request_id, Some(RequestId(11)));

        let responder = state.take_responder(RequestId(11)).unwrap();
        let batch = DetectionBatch {
            header: snap.frame.header.clone(),
            request_id: snap.request_id,
            objects: Vec::new(),
            image_width: 4,
            image_height: 4,
            inference_time_ms: 0.0,
        };
        responder.sender.send(batch).unwrap();
        assert_eq!(
            ticket.wait(Duration::from_millis(50)).unwrap().request_id,
            Some(RequestId(11))
        );
    }

    #[test]
    fn test_cancelled_ticket_yields_nothing() {
        let state = Arc::new(PipelineState::default());
        let source = FrameSource::new(Arc::clone(&state));
        let ticket = source.request(image(), RequestId(2));
        ticket.cancel();

        assert!(ticket.is_cancelled());
        assert!(state.take_responder(RequestId(2)).unwrap().is_cancelled());
        assert!(ticket.wait(Duration::from_millis(10)).is_none());
    }
}
