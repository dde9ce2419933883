/// Depth-aware detection pipeline
///
/// One long-lived thread drives a three-slot ring. Each cycle it spawns a
/// fetch stage (copy the newest frame, convert, letterbox) and an infer stage
/// (detect, smooth, extract, estimate distances) on scoped threads, while it
/// presents and publishes the slot inferred in the previous cycle itself.
use crate::averager::TemporalAverager;
use crate::config::PipelineConfig;
use crate::depth::DepthSampler;
use crate::detector_trait::Detector;
use crate::error::{DetectionError, Result};
use crate::image_utils;
use crate::postprocessing::DetectionExtractor;
use crate::preprocessing::ImagePreprocessor;
use crate::ring::{FrameRing, FrameSlot, RingView};
use crate::sink::{display_available, Presenter, ResultSink};
use crate::source::FrameSource;
use crate::state::{FrameSnapshot, PipelineState, PipelineStatus, Wake};
use crate::types::{ClassLabels, DetectedObject, DetectionBatch, FrameHeader};
use image::RgbImage;
use ndarray::Array4;
use std::sync::Arc;
use std::thread::{self, ScopedJoinHandle};
use std::time::{Duration, Instant};

/// Cycles between two statistics log lines
const STATS_INTERVAL: u64 = 100;

/// Counters kept by the pipeline thread
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineStats {
    pub cycles: u64,
    /// Frames that went through inference
    pub processed: u64,
    /// Frames lost to fetch, detector or averager failures
    pub dropped: u64,
    /// Batches handed to the result sink
    pub published: u64,
    /// Batches delivered to on-demand requesters
    pub answered: u64,
    /// Annotated frames written in batch mode
    pub saved: u64,
    /// Cycle rate measured between consecutive cycle starts
    pub fps: f32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchOutcome {
    Fetched,
    NoFrame,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InferOutcome {
    Processed,
    Skipped,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PresentOutcome {
    Nothing,
    Published,
    Answered,
    Saved,
    Discarded,
}

/// Fetch stage: newest frame into the fetch slot
struct Fetcher {
    state: Arc<PipelineState>,
    preprocessor: ImagePreprocessor,
}

impl Fetcher {
    fn fill(&self, slot: &mut FrameSlot) -> FetchOutcome {
        slot.ready = false;
        slot.request_id = None;
        slot.batch = None;
        slot.annotated = None;

        let Some(snapshot) = self.state.snapshot() else {
            log::trace!("No new frame for slot {}", slot.index());
            return FetchOutcome::NoFrame;
        };

        match self.load(slot, &snapshot) {
            Ok(()) => {
                slot.ready = true;
                FetchOutcome::Fetched
            }
            Err(e) => {
                log_frame_error("Dropping frame", snapshot.frame.header.seq, &e);
                if let Some(id) = snapshot.request_id {
                    // Disconnects the ticket
                    self.state.take_responder(id);
                }
                FetchOutcome::Failed
            }
        }
    }

    fn load(&self, slot: &mut FrameSlot, snapshot: &FrameSnapshot) -> Result<()> {
        let frame = &snapshot.frame;
        let image = self.preprocessor.to_rgb(&frame.image)?;
        if let Some(depth) = &frame.depth {
            if (depth.width(), depth.height()) != image.dimensions() {
                return Err(DetectionError::depth_plane(format!(
                    "{}x{} depth plane for a {}x{} frame",
                    depth.width(),
                    depth.height(),
                    image.width(),
                    image.height()
                )));
            }
        }
        let tensor = self.preprocessor.letterbox(&image)?;

        slot.image = image;
        slot.tensor = tensor;
        slot.depth = frame.depth.clone();
        slot.header = frame.header.clone();
        slot.request_id = snapshot.request_id;
        Ok(())
    }

    /// First slot of the ring, built from the first frame
    fn seed(&self) -> Result<FrameSlot> {
        let snapshot = self
            .state
            .snapshot()
            .ok_or_else(|| DetectionError::other("signalled without a frame"))?;
        let mut slot = FrameSlot::new(
            RgbImage::new(0, 0),
            Array4::zeros((1, 3, 1, 1)),
            None,
            FrameHeader::default(),
            None,
        );
        if let Err(e) = self.load(&mut slot, &snapshot) {
            if let Some(id) = snapshot.request_id {
                self.state.take_responder(id);
            }
            return Err(e);
        }
        Ok(slot)
    }
}

/// Infer stage: detector, averager, extractor and depth sampler
struct Inference {
    detector: Box<dyn Detector>,
    averager: TemporalAverager,
    extractor: DetectionExtractor,
    sampler: DepthSampler,
    labels: ClassLabels,
}

impl Inference {
    fn process(&mut self, slot: &mut FrameSlot, render: bool) -> InferOutcome {
        slot.batch = None;
        slot.annotated = None;
        if !slot.ready {
            return InferOutcome::Skipped;
        }
        slot.ready = false;

        let started = Instant::now();
        let objects = match self.detect(slot) {
            Ok(objects) => objects,
            Err(e) => {
                log_frame_error("Inference failed on frame", slot.header.seq, &e);
                return InferOutcome::Failed;
            }
        };
        let inference_time_ms = started.elapsed().as_secs_f32() * 1000.0;

        log::debug!(
            "Frame {}: {} objects in {:.1}ms",
            slot.header.seq,
            objects.len(),
            inference_time_ms
        );

        if render {
            slot.annotated = Some(image_utils::annotate(&slot.image, &objects));
        }
        let (image_width, image_height) = slot.dimensions();
        slot.batch = Some(DetectionBatch {
            header: slot.header.clone(),
            request_id: slot.request_id,
            objects,
            image_width,
            image_height,
            inference_time_ms,
        });
        InferOutcome::Processed
    }

    fn detect(&mut self, slot: &FrameSlot) -> Result<Vec<DetectedObject>> {
        let raw = self.detector.predict(&slot.tensor)?;
        let averaged = self.averager.smooth(&raw)?;
        let (width, height) = slot.dimensions();
        let detections = self
            .extractor
            .extract(self.detector.as_ref(), &averaged, (width, height))?;

        Ok(detections
            .into_iter()
            .map(|det| DetectedObject {
                class_id: det.class_id,
                label: self.labels.name(det.class_id),
                probability: det.probability,
                bbox: det.bbox.to_pixels(width, height),
                distance: self.sampler.estimate_box(&det.bbox, slot.depth.as_ref()),
            })
            .collect())
    }
}

/// Present stage: live view, sink, requesters and batch-mode files
struct Publisher {
    sink: Box<dyn ResultSink>,
    presenter: Option<Box<dyn Presenter>>,
    live_view: bool,
    output_prefix: Option<String>,
    console_output: bool,
    saved: u64,
}

impl Publisher {
    fn needs_annotated(&self) -> bool {
        self.live_view || self.output_prefix.is_some() || self.sink.wants_annotated()
    }

    fn present(&mut self, slot: &FrameSlot, state: &PipelineState, fps: f32) -> PresentOutcome {
        let Some(batch) = &slot.batch else {
            if let Some(id) = slot.request_id {
                if state.take_responder(id).is_some() {
                    log::warn!("{} produced no detections batch", id);
                }
            }
            return PresentOutcome::Nothing;
        };

        if self.console_output {
            log_batch(batch, fps);
        }

        if let Some(id) = batch.request_id {
            return match state.take_responder(id) {
                Some(responder) if responder.is_cancelled() => {
                    log::debug!("Discarding result of cancelled {}", id);
                    PresentOutcome::Discarded
                }
                Some(responder) => {
                    if responder.sender.send(batch.clone()).is_err() {
                        log::debug!("{} ticket was dropped", id);
                        return PresentOutcome::Discarded;
                    }
                    PresentOutcome::Answered
                }
                None => PresentOutcome::Discarded,
            };
        }

        if let Some(prefix) = &self.output_prefix {
            let path = format!("{}_{:08}.png", prefix, self.saved);
            let image = slot.annotated.as_ref().unwrap_or(&slot.image);
            return match image_utils::save_png(image, &path) {
                Ok(()) => {
                    log::debug!("Saved {}", path);
                    self.saved += 1;
                    PresentOutcome::Saved
                }
                Err(e) => {
                    log::error!("Failed to save {}: {}", path, e);
                    PresentOutcome::Nothing
                }
            };
        }

        if self.live_view {
            if let (Some(presenter), Some(annotated)) = (self.presenter.as_mut(), &slot.annotated) {
                if let Err(e) = presenter.present(annotated, &batch.header) {
                    log::error!("Live view failed, disabling it: {}", e);
                    self.live_view = false;
                }
            }
        }

        if let Err(e) = self.sink.publish_batch(batch) {
            log::error!("Failed to publish detections: {}", e);
        }
        if let Err(e) = self.sink.publish_count(batch.count()) {
            log::error!("Failed to publish object count: {}", e);
        }
        if self.sink.wants_annotated() {
            if let Some(annotated) = &slot.annotated {
                if let Err(e) = self.sink.publish_annotated(annotated, &batch.header) {
                    log::error!("Failed to publish annotated frame: {}", e);
                }
            }
        }
        PresentOutcome::Published
    }
}

fn log_batch(batch: &DetectionBatch, fps: f32) {
    log::info!("FPS: {:.1}", fps);
    log::info!("Objects ({}):", batch.count());
    for object in &batch.objects {
        log::info!(
            "  {}: {:.0}% [{}, {}, {}, {}] distance {}",
            object.label,
            object.probability * 100.0,
            object.bbox.xmin,
            object.bbox.ymin,
            object.bbox.xmax,
            object.bbox.ymax,
            object.distance
        );
    }
}

fn log_frame_error(what: &str, seq: u64, e: &DetectionError) {
    if e.is_transient() {
        log::warn!("{} {}: {}", what, seq, e);
    } else {
        log::error!("{} {}: {}", what, seq, e);
    }
}

fn join<T>(handle: ScopedJoinHandle<'_, T>, stage: &str, fallback: T) -> T {
    handle.join().unwrap_or_else(|_| {
        log::error!("{} stage panicked", stage);
        fallback
    })
}

/// Three-stage detection pipeline
pub struct Pipeline {
    config: PipelineConfig,
    state: Arc<PipelineState>,
    fetcher: Fetcher,
    inference: Inference,
    publisher: Publisher,
    stats: PipelineStats,
    last_cycle: Option<Instant>,
    display_check: fn() -> bool,
}

impl Pipeline {
    /// Validate the configuration and wire up the stages.
    ///
    /// Configuration and model problems are fatal here; nothing is started.
    pub fn new(
        config: PipelineConfig,
        detector: Box<dyn Detector>,
        sink: Box<dyn ResultSink>,
    ) -> Result<Self> {
        config.validate()?;

        if detector.class_count() != config.class_count() {
            log::warn!(
                "Detector {} scores {} classes, {} labels configured",
                detector.name(),
                detector.class_count(),
                config.class_count()
            );
        }

        let state = Arc::new(PipelineState::new(Duration::from_millis(
            config.poll_interval_ms,
        )));
        let preprocessor = ImagePreprocessor::new(detector.input_size());
        let averager = TemporalAverager::new(config.averaging_window, detector.output_len())?;

        log::info!(
            "Pipeline ready: detector {} ({}x{}), threshold {}, window {}, {} classes",
            detector.name(),
            detector.input_size().0,
            detector.input_size().1,
            config.confidence_threshold,
            config.averaging_window,
            config.class_count()
        );

        Ok(Self {
            fetcher: Fetcher {
                state: Arc::clone(&state),
                preprocessor,
            },
            inference: Inference {
                detector,
                averager,
                extractor: DetectionExtractor::from_config(&config),
                sampler: DepthSampler::new(),
                labels: config.class_labels.clone(),
            },
            publisher: Publisher {
                sink,
                presenter: None,
                live_view: false,
                output_prefix: config.output_prefix.clone(),
                console_output: config.console_output,
                saved: 0,
            },
            state,
            config,
            stats: PipelineStats::default(),
            last_cycle: None,
            display_check: display_available,
        })
    }

    /// Window or other live view for annotated frames
    pub fn with_presenter(mut self, presenter: Box<dyn Presenter>) -> Self {
        self.publisher.presenter = Some(presenter);
        self
    }

    /// Replace the display server check run when the live view is resolved
    pub fn with_display_check(mut self, check: fn() -> bool) -> Self {
        self.display_check = check;
        self
    }

    /// Producer handle feeding this pipeline
    pub fn source(&self) -> FrameSource {
        FrameSource::new(Arc::clone(&self.state))
    }

    /// Shared state, e.g. to stop the pipeline from another thread
    pub fn state(&self) -> Arc<PipelineState> {
        Arc::clone(&self.state)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    pub fn stats(&self) -> &PipelineStats {
        &self.stats
    }

    fn resolve_live_view(&mut self) {
        let wanted = self.config.live_view && !self.config.is_batch_mode();
        self.publisher.live_view = if !wanted {
            false
        } else if self.publisher.presenter.is_none() {
            log::info!("No presenter attached, live view disabled");
            false
        } else if !(self.display_check)() {
            log::info!("No display found, live view disabled");
            false
        } else {
            true
        };
    }

    /// Run until the running flag is cleared.
    ///
    /// Blocks for the first frame, seeds the ring from it and then cycles on
    /// every new-frame signal. Without new frames it keeps cycling once per
    /// poll interval until every fetched frame has been inferred and presented.
    pub fn run(&mut self) -> Result<PipelineStats> {
        self.resolve_live_view();
        self.state.set_status(PipelineStatus::WaitingForFrame);
        log::info!("Pipeline waiting for the first frame");

        let seed = loop {
            if !self.state.wait_for_frame() {
                self.state.set_status(PipelineStatus::Stopped);
                return Err(DetectionError::Stopped);
            }
            match self.fetcher.seed() {
                Ok(slot) => break slot,
                Err(e) => {
                    log::warn!("Dropping first frame: {}", e);
                    self.stats.dropped += 1;
                }
            }
        };
        let (width, height) = seed.dimensions();
        log::info!("First frame {}x{}, pipeline running", width, height);
        let mut ring = FrameRing::new(seed);

        loop {
            match self.state.wait() {
                Wake::Stopped => break,
                Wake::Frame => {}
                Wake::Idle if ring.has_pending() => {}
                Wake::Idle => continue,
            }
            self.cycle(&mut ring);
        }

        self.state.set_status(PipelineStatus::Stopped);
        log::info!(
            "Pipeline stopped: {} cycles, {} processed, {} dropped, {} published",
            self.stats.cycles,
            self.stats.processed,
            self.stats.dropped,
            self.stats.published
        );
        Ok(self.stats.clone())
    }

    fn cycle(&mut self, ring: &mut FrameRing) {
        let started = Instant::now();
        if let Some(last) = self.last_cycle {
            let elapsed = started.duration_since(last).as_secs_f32();
            if elapsed > 0.0 {
                self.stats.fps = 1.0 / elapsed;
            }
        }
        self.last_cycle = Some(started);
        self.state.set_status(PipelineStatus::FetchAndInfer);

        let render = self.publisher.needs_annotated();
        let fps = self.stats.fps;
        let fetcher = &self.fetcher;
        let inference = &mut self.inference;
        let publisher = &mut self.publisher;
        let state = self.state.as_ref();
        let RingView {
            fetch,
            infer,
            present,
        } = ring.advance();

        let (fetched, inferred, presented) = thread::scope(|s| {
            let fetch_handle = s.spawn(move || fetcher.fill(fetch));
            let infer_handle = s.spawn(move || inference.process(infer, render));
            let presented = publisher.present(present, state, fps);
            (
                join(fetch_handle, "fetch", FetchOutcome::Failed),
                join(infer_handle, "infer", InferOutcome::Failed),
                presented,
            )
        });

        self.stats.cycles += 1;
        match fetched {
            FetchOutcome::Failed => self.stats.dropped += 1,
            FetchOutcome::Fetched | FetchOutcome::NoFrame => {}
        }
        match inferred {
            InferOutcome::Processed => self.stats.processed += 1,
            InferOutcome::Failed => self.stats.dropped += 1,
            InferOutcome::Skipped => {}
        }
        match presented {
            PresentOutcome::Published => self.stats.published += 1,
            PresentOutcome::Answered => self.stats.answered += 1,
            PresentOutcome::Saved => self.stats.saved += 1,
            PresentOutcome::Nothing | PresentOutcome::Discarded => {}
        }

        if self.stats.cycles % STATS_INTERVAL == 0 {
            log::info!(
                "Pipeline: {} processed, {} dropped, {:.1} fps",
                self.stats.processed,
                self.stats.dropped,
                self.stats.fps
            );
        }
        self.state.set_status(PipelineStatus::WaitingForFrame);
    }
}
