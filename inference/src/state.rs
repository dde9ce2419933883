//! State shared between frame producers and the pipeline thread

use crate::types::{CameraFrame, DetectionBatch, RequestId};
use crossbeam::channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Where the batch of an on-demand request goes
pub(crate) struct Responder {
    pub(crate) sender: Sender<DetectionBatch>,
    pub(crate) cancelled: Arc<AtomicBool>,
}

impl Responder {
    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Pipeline states, observable from other threads.
///
/// There is no separate present state: presenting and publishing the previous
/// cycle's slot runs on the pipeline thread while fetch and infer run, so it
/// is reported as `FetchAndInfer`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineStatus {
    WaitingForFrame,
    FetchAndInfer,
    Stopped,
}

/// Why a wait on the new-frame signal returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    Frame,
    /// A poll interval passed without a new frame
    Idle,
    Stopped,
}

/// Newest frame snapshot taken by the fetch stage
pub struct FrameSnapshot {
    pub frame: Arc<CameraFrame>,
    pub request_id: Option<RequestId>,
}

/// Flags, newest frame and new-frame signal.
///
/// Every field has its own lock and locks are only held to copy or check a
/// value. Producers and the pipeline share one instance behind an `Arc`.
pub struct PipelineState {
    running: RwLock<bool>,
    status: RwLock<PipelineStatus>,
    frame_available: RwLock<bool>,
    latest: RwLock<Option<Arc<CameraFrame>>>,
    request_id: RwLock<Option<RequestId>>,
    responders: Mutex<HashMap<RequestId, Responder>>,
    signal_tx: Sender<()>,
    signal_rx: Receiver<()>,
    poll_interval: Duration,
}

impl PipelineState {
    pub fn new(poll_interval: Duration) -> Self {
        let (signal_tx, signal_rx) = unbounded();
        Self {
            running: RwLock::new(true),
            status: RwLock::new(PipelineStatus::WaitingForFrame),
            frame_available: RwLock::new(false),
            latest: RwLock::new(None),
            request_id: RwLock::new(None),
            responders: Mutex::new(HashMap::new()),
            signal_tx,
            signal_rx,
            poll_interval,
        }
    }

    pub fn is_running(&self) -> bool {
        *self.running.read()
    }

    /// Ask the pipeline to stop after the current cycle
    pub fn stop(&self) {
        *self.running.write() = false;
        log::info!("Pipeline stop requested");
    }

    pub fn status(&self) -> PipelineStatus {
        *self.status.read()
    }

    pub(crate) fn set_status(&self, status: PipelineStatus) {
        *self.status.write() = status;
    }

    /// Whether a frame arrived that no fetch has copied yet
    pub fn frame_available(&self) -> bool {
        *self.frame_available.read()
    }

    /// Pending signals not yet consumed by the pipeline
    pub fn pending_signals(&self) -> usize {
        self.signal_rx.len()
    }

    /// Replace the newest frame and wake the pipeline
    pub(crate) fn publish(&self, frame: CameraFrame, request: Option<(RequestId, Responder)>) {
        let request_id = request.as_ref().map(|(id, _)| *id);

        {
            let mut pending = self.request_id.write();
            // A request overtaken before fetch will never be answered
            if let Some(stale) = pending.take() {
                if self.responders.lock().remove(&stale).is_some() {
                    log::warn!("{} superseded by a newer frame before processing", stale);
                }
            }
            if let Some((id, responder)) = request {
                self.responders.lock().insert(id, responder);
            }
            *pending = request_id;
            // Swapped under the request lock so id, frame and flag always match
            *self.latest.write() = Some(Arc::new(frame));
            *self.frame_available.write() = true;
        }

        // The receiver lives as long as self
        let _ = self.signal_tx.send(());
    }

    /// Wait at most one poll interval for the next new-frame signal
    pub fn wait(&self) -> Wake {
        if !self.is_running() {
            return Wake::Stopped;
        }
        match self.signal_rx.recv_timeout(self.poll_interval) {
            Ok(()) if self.is_running() => Wake::Frame,
            Ok(()) => Wake::Stopped,
            Err(RecvTimeoutError::Timeout) => Wake::Idle,
            Err(RecvTimeoutError::Disconnected) => Wake::Stopped,
        }
    }

    /// Block until the next new-frame signal.
    ///
    /// Returns `false` once the running flag is cleared; it is checked at least
    /// every poll interval.
    pub fn wait_for_frame(&self) -> bool {
        loop {
            match self.wait() {
                Wake::Frame => return true,
                Wake::Idle => continue,
                Wake::Stopped => return false,
            }
        }
    }

    /// Copy the newest frame for the fetch stage, taking its request id.
    ///
    /// Returns `None` when no frame arrived since the last snapshot.
    pub fn snapshot(&self) -> Option<FrameSnapshot> {
        let mut pending = self.request_id.write();
        if !*self.frame_available.read() {
            return None;
        }
        let frame = self.latest.read().clone()?;
        let request_id = pending.take();
        *self.frame_available.write() = false;
        Some(FrameSnapshot { frame, request_id })
    }

    pub(crate) fn take_responder(&self, id: RequestId) -> Option<Responder> {
        self.responders.lock().remove(&id)
    }
}

impl Default for PipelineState {
    fn default() -> Self {
        Self::new(Duration::from_millis(100))
    }
}
