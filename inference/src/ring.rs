/// Three-slot frame ring shared by the fetch, infer and present stages
///
/// Every cycle the cursor advances before anything is written. Fetch fills the
/// slot under the cursor, infer works on the slot fetched one cycle earlier and
/// present shows the slot inferred one cycle earlier. The three roles are
/// handed out as disjoint borrows, so stages running on scoped threads can
/// never touch the same slot within a cycle.
use crate::types::{DepthPlane, DetectionBatch, FrameHeader, RequestId};
use image::RgbImage;
use ndarray::Array4;

pub const RING_SIZE: usize = 3;

/// Everything the pipeline knows about one captured frame
#[derive(Debug, Clone)]
pub struct FrameSlot {
    index: usize,
    /// Native-resolution RGB frame
    pub image: RgbImage,
    /// Letterboxed detector input
    pub tensor: Array4<f32>,
    pub depth: Option<DepthPlane>,
    pub header: FrameHeader,
    pub request_id: Option<RequestId>,
    /// False when the last fetch into this slot failed
    pub ready: bool,
    /// Frame with detections drawn, when somebody asked for it
    pub annotated: Option<RgbImage>,
    /// Result of the last inference on this slot
    pub batch: Option<DetectionBatch>,
}

impl FrameSlot {
    pub fn new(
        image: RgbImage,
        tensor: Array4<f32>,
        depth: Option<DepthPlane>,
        header: FrameHeader,
        request_id: Option<RequestId>,
    ) -> Self {
        Self {
            index: 0,
            image,
            tensor,
            depth,
            header,
            request_id,
            ready: true,
            annotated: None,
            batch: None,
        }
    }

    /// Position of this slot in the ring
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// The three slots for one cycle
pub struct RingView<'a> {
    pub fetch: &'a mut FrameSlot,
    pub infer: &'a mut FrameSlot,
    pub present: &'a FrameSlot,
}

/// Fixed arena of three owned slots indexed by a cursor
pub struct FrameRing {
    slots: [FrameSlot; RING_SIZE],
    cursor: usize,
}

impl FrameRing {
    /// Seed every slot with a copy of the first frame.
    ///
    /// Only slot 0 is queued for inference and carries the frame's request;
    /// the copies are overwritten by fetch before anything reads them.
    pub fn new(seed: FrameSlot) -> Self {
        let mut slots = [seed.clone(), seed.clone(), seed];
        for (index, slot) in slots.iter_mut().enumerate() {
            slot.index = index;
            if index > 0 {
                slot.ready = false;
                slot.request_id = None;
                slot.batch = None;
            }
        }
        Self { slots, cursor: 0 }
    }

    pub fn cursor(&self) -> usize {
        self.cursor
    }

    pub fn fetch_index(&self) -> usize {
        self.cursor
    }

    pub fn infer_index(&self) -> usize {
        (self.cursor + 2) % RING_SIZE
    }

    pub fn present_index(&self) -> usize {
        (self.cursor + 1) % RING_SIZE
    }

    pub fn slot(&self, index: usize) -> &FrameSlot {
        &self.slots[index % RING_SIZE]
    }

    /// Whether the next cycle has work even without a new frame: a fetched
    /// slot waiting for inference or an inferred one waiting to be presented
    pub fn has_pending(&self) -> bool {
        self.slot(self.fetch_index()).ready || self.slot(self.infer_index()).batch.is_some()
    }

    /// Move to the next cycle and hand out its slots
    pub fn advance(&mut self) -> RingView<'_> {
        self.cursor = (self.cursor + 1) % RING_SIZE;
        self.view()
    }

    /// Slots for the current cycle
    pub fn view(&mut self) -> RingView<'_> {
        let [a, b, c] = &mut self.slots;
        match self.cursor {
            0 => RingView {
                fetch: a,
                infer: c,
                present: b,
            },
            1 => RingView {
                fetch: b,
                infer: a,
                present: c,
            },
            _ => RingView {
                fetch: c,
                infer: b,
                present: a,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;
    use std::sync::Mutex;
    use std::thread;
    use std::time::{Duration, Instant};

    fn seed() -> FrameSlot {
        FrameSlot::new(
            RgbImage::new(4, 4),
            Array4::zeros((1, 3, 4, 4)),
            None,
            FrameHeader::default(),
            None,
        )
    }

    #[test]
    fn test_roles_are_distinct_slots() {
        let mut ring = FrameRing::new(seed());
        for _ in 0..6 {
            let view = ring.advance();
            let (f, i, p) = (view.fetch.index(), view.infer.index(), view.present.index());
            assert_ne!(f, i);
            assert_ne!(f, p);
            assert_ne!(i, p);
            assert_eq!(f, ring.fetch_index());
            assert_eq!(i, ring.infer_index());
            assert_eq!(p, ring.present_index());
        }
    }

    #[test]
    fn test_slot_reuse_after_full_rotation() {
        let mut ring = FrameRing::new(seed());
        let first = ring.advance().fetch.index();
        ring.advance();
        ring.advance();
        assert_eq!(ring.advance().fetch.index(), first);
    }

    #[test]
    fn test_infer_sees_previous_fetch_and_present_sees_previous_infer() {
        let mut ring = FrameRing::new(seed());
        let mut last_fetch = None;
        let mut last_infer = None;
        for _ in 0..9 {
            let view = ring.advance();
            if let Some(prev) = last_fetch {
                assert_eq!(view.infer.index(), prev);
            }
            if let Some(prev) = last_infer {
                assert_eq!(view.present.index(), prev);
            }
            last_fetch = Some(view.fetch.index());
            last_infer = Some(view.infer.index());
        }
    }

    #[test]
    fn test_seed_queues_only_first_slot() {
        let mut slot = seed();
        slot.request_id = Some(RequestId(5));
        let ring = FrameRing::new(slot);

        assert!(ring.slot(0).ready);
        assert_eq!(ring.slot(0).request_id, Some(RequestId(5)));
        for i in 1..RING_SIZE {
            assert!(!ring.slot(i).ready);
            assert_eq!(ring.slot(i).request_id, None);
            assert_eq!(ring.slot(i).index(), i);
        }
        assert!(ring.has_pending());
    }

    #[test]
    fn test_pending_work_drains() {
        let mut ring = FrameRing::new(seed());

        // Infer the seed, nothing new fetched
        let view = ring.advance();
        view.fetch.ready = false;
        view.infer.ready = false;
        view.infer.batch = Some(DetectionBatch {
            header: view.infer.header.clone(),
            request_id: None,
            objects: Vec::new(),
            image_width: 4,
            image_height: 4,
            inference_time_ms: 0.0,
        });
        assert!(ring.has_pending());

        // Present it
        let view = ring.advance();
        view.fetch.ready = false;
        view.infer.batch = None;
        assert!(view.present.batch.is_some());
        assert!(!ring.has_pending());
    }

    #[derive(Debug, Clone, Copy, PartialEq)]
    enum Access {
        Write,
        Read,
    }

    #[derive(Debug, Clone, Copy)]
    struct Span {
        slot: usize,
        access: Access,
        start: Instant,
        end: Instant,
    }

    #[test]
    fn test_no_slot_is_read_while_written() {
        let mut ring = FrameRing::new(seed());
        let spans = Mutex::new(Vec::new());

        for cycle in 0..150u64 {
            let RingView { fetch, infer, present } = ring.advance();

            thread::scope(|s| {
                let spans = &spans;
                s.spawn(move || {
                    let start = Instant::now();
                    let jitter = rand::thread_rng().gen_range(0..1500);
                    thread::sleep(Duration::from_micros(jitter));
                    fetch.header.seq = cycle;
                    fetch.image.put_pixel(0, 0, image::Rgb([cycle as u8, 0, 0]));
                    spans.lock().unwrap().push(Span {
                        slot: fetch.index(),
                        access: Access::Write,
                        start,
                        end: Instant::now(),
                    });
                });
                s.spawn(move || {
                    let start = Instant::now();
                    let jitter = rand::thread_rng().gen_range(0..1500);
                    thread::sleep(Duration::from_micros(jitter));
                    if cycle > 0 {
                        // Fully written by the previous cycle
                        assert_eq!(infer.header.seq, cycle - 1);
                        assert_eq!(infer.image.get_pixel(0, 0)[0], (cycle - 1) as u8);
                    }
                    spans.lock().unwrap().push(Span {
                        slot: infer.index(),
                        access: Access::Read,
                        start,
                        end: Instant::now(),
                    });
                });

                let start = Instant::now();
                let _ = present.header.seq;
                spans.lock().unwrap().push(Span {
                    slot: present.index(),
                    access: Access::Read,
                    start,
                    end: Instant::now(),
                });
            });
        }

        let spans = spans.into_inner().unwrap();
        assert_eq!(spans.len(), 450);

        let writes = spans.iter().filter(|s| s.access == Access::Write);
        for write in writes {
            for read in spans
                .iter()
                .filter(|s| s.access == Access::Read && s.slot == write.slot)
            {
                let overlaps = read.start < write.end && write.start < read.end;
                assert!(
                    !overlaps,
                    "slot {} read during write ({:?} vs {:?})",
                    write.slot, read, write
                );
            }
        }
    }
}
