/// Result outputs: published detection batches, counts and frames
///
/// The pipeline only talks to the outside world through [`ResultSink`] and
/// [`Presenter`]. [`ChannelSink`] forwards everything over crossbeam channels
/// for consumers living on other threads.
use crate::error::{DetectionError, Result};
use crate::types::{DetectionBatch, FrameHeader};
use crossbeam::channel::{unbounded, Receiver, Sender};
use image::RgbImage;

/// Receives everything the pipeline publishes for streamed frames
pub trait ResultSink: Send {
    /// Detections of one frame, possibly empty
    fn publish_batch(&mut self, batch: &DetectionBatch) -> Result<()>;

    /// Number of detections of one frame, published every cycle
    fn publish_count(&mut self, count: usize) -> Result<()>;

    /// Whether anybody listens for annotated frames
    fn wants_annotated(&self) -> bool {
        false
    }

    fn publish_annotated(&mut self, _image: &RgbImage, _header: &FrameHeader) -> Result<()> {
        Ok(())
    }
}

/// Live view of annotated frames
pub trait Presenter: Send {
    fn present(&mut self, image: &RgbImage, header: &FrameHeader) -> Result<()>;
}

/// Whether a display server is reachable for the live view
pub fn display_available() -> bool {
    if cfg!(unix) && !cfg!(target_os = "macos") {
        ["DISPLAY", "WAYLAND_DISPLAY"]
            .iter()
            .any(|var| std::env::var_os(var).is_some_and(|v| !v.is_empty()))
    } else {
        true
    }
}

/// Annotated frame together with the header of the frame it was drawn on
pub type AnnotatedFrame = (RgbImage, FrameHeader);

/// Receiving ends of a [`ChannelSink`]
pub struct SinkReceivers {
    pub batches: Receiver<DetectionBatch>,
    pub counts: Receiver<usize>,
    pub annotated: Option<Receiver<AnnotatedFrame>>,
}

/// Sink forwarding results over unbounded channels
pub struct ChannelSink {
    batch_tx: Sender<DetectionBatch>,
    count_tx: Sender<usize>,
    annotated_tx: Option<Sender<AnnotatedFrame>>,
}

impl ChannelSink {
    /// Sink for batches and counts only
    pub fn new() -> (Self, SinkReceivers) {
        Self::build(false)
    }

    /// Sink that also wants annotated frames
    pub fn with_annotated() -> (Self, SinkReceivers) {
        Self::build(true)
    }

    fn build(annotated: bool) -> (Self, SinkReceivers) {
        let (batch_tx, batches) = unbounded();
        let (count_tx, counts) = unbounded();
        let (annotated_tx, annotated_rx) = if annotated {
            let (tx, rx) = unbounded();
            (Some(tx), Some(rx))
        } else {
            (None, None)
        };

        (
            Self {
                batch_tx,
                count_tx,
                annotated_tx,
            },
            SinkReceivers {
                batches,
                counts,
                annotated: annotated_rx,
            },
        )
    }
}

impl ResultSink for ChannelSink {
    fn publish_batch(&mut self, batch: &DetectionBatch) -> Result<()> {
        self.batch_tx
            .send(batch.clone())
            .map_err(|_| DetectionError::other("batch receiver disconnected"))
    }

    fn publish_count(&mut self, count: usize) -> Result<()> {
        self.count_tx
            .send(count)
            .map_err(|_| DetectionError::other("count receiver disconnected"))
    }

    fn wants_annotated(&self) -> bool {
        self.annotated_tx.is_some()
    }

    fn publish_annotated(&mut self, image: &RgbImage, header: &FrameHeader) -> Result<()> {
        match &self.annotated_tx {
            Some(tx) => tx
                .send((image.clone(), header.clone()))
                .map_err(|_| DetectionError::other("annotated frame receiver disconnected")),
            None => Ok(()),
        }
    }
}

/// Sink that drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ResultSink for NullSink {
    fn publish_batch(&mut self, _batch: &DetectionBatch) -> Result<()> {
        Ok(())
    }

    fn publish_count(&mut self, _count: usize) -> Result<()> {
        Ok(())
    }
}

/// Presenter forwarding frames over a channel, e.g. to a UI thread
pub struct ChannelPresenter {
    tx: Sender<AnnotatedFrame>,
}

impl ChannelPresenter {
    pub fn new() -> (Self, Receiver<AnnotatedFrame>) {
        let (tx, rx) = unbounded();
        (Self { tx }, rx)
    }
}

impl Presenter for ChannelPresenter {
    fn present(&mut self, image: &RgbImage, header: &FrameHeader) -> Result<()> {
        self.tx
            .send((image.clone(), header.clone()))
            .map_err(|_| DetectionError::other("live view receiver disconnected"))
    }
}
