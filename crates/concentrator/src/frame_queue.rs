//! FrameQueue - ordered, lazily created frames indexed by bucket timestamp.
//!
//! The deque holds frames oldest first. A concurrent index gives O(1) lookup
//! for the common case of many producers hitting the same few buckets; the
//! deque lock is only taken to create or pop a frame.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;

use contracts::{DownsamplingMethod, Ticks, TICKS_PER_SECOND};
use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use crate::downsampling::MeasurementFilter;
use crate::TrackingFrame;

/// Bucket and downsampling settings applied to newly created frames
#[derive(Clone)]
pub struct QueueSettings {
    pub frames_per_second: u32,
    /// Clamped to `[0, TICKS_PER_SECOND]`
    pub time_resolution: Ticks,
    pub round_to_nearest_timestamp: bool,
    pub downsampling_method: DownsamplingMethod,
    pub filter: Option<MeasurementFilter>,
    /// Capacity hint for new frames
    pub expected_measurements: usize,
}

impl QueueSettings {
    pub fn new(frames_per_second: u32, time_resolution: Ticks) -> Self {
        Self {
            frames_per_second: frames_per_second.max(1),
            time_resolution: time_resolution.clamp(0, TICKS_PER_SECOND),
            round_to_nearest_timestamp: false,
            downsampling_method: DownsamplingMethod::LastReceived,
            filter: None,
            expected_measurements: 0,
        }
    }

    #[inline]
    fn fps(&self) -> i64 {
        i64::from(self.frames_per_second)
    }

    /// Bucket timestamp for `ticks`, or `None` when it is not representable.
    pub fn bucket(&self, ticks: Ticks) -> Option<Ticks> {
        let fps = self.fps();
        let offset = ticks.rem_euclid(TICKS_PER_SECOND);
        let base = ticks.checked_sub(offset)?;

        let (base, frame) = if self.round_to_nearest_timestamp {
            let frame = (2 * offset * fps + TICKS_PER_SECOND) / (2 * TICKS_PER_SECOND);
            if frame >= fps {
                (base.checked_add(TICKS_PER_SECOND)?, 0)
            } else {
                (base, frame)
            }
        } else {
            // Offsets that land exactly on a boundary stay in that frame
            (base, ((offset + 1) * fps - 1) / TICKS_PER_SECOND)
        };

        let destination = base.checked_add(frame * TICKS_PER_SECOND / fps)?;
        if self.time_resolution > 1 {
            return destination.checked_sub(destination.rem_euclid(self.time_resolution));
        }
        Some(destination)
    }

    /// Index of the frame within its second (`0..frames_per_second`).
    pub fn frame_index(&self, timestamp: Ticks) -> usize {
        let offset = if self.time_resolution > 1 {
            self.time_resolution / 2
        } else {
            1
        };
        let beyond = timestamp.rem_euclid(TICKS_PER_SECOND);
        let index = (beyond + offset) * self.fps() / TICKS_PER_SECOND;
        index.clamp(0, self.fps() - 1) as usize
    }

    /// Ticks covered by one frame.
    #[inline]
    pub fn ticks_per_frame(&self) -> Ticks {
        TICKS_PER_SECOND / self.fps()
    }
}

/// Why [`FrameQueue::get_frame`] found no frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoFrame {
    /// The bucket timestamp overflows the tick range
    OutOfRange,
    /// The bucket was already sealed or popped
    Closed,
}

/// Ordered frames awaiting publication.
///
/// Bucket timestamps strictly increase from head to tail and at most one
/// frame exists per bucket. Buckets at or before the horizon (the last popped
/// or sealed frame) are never created again.
pub struct FrameQueue {
    frames: Mutex<VecDeque<Arc<TrackingFrame>>>,
    index: DashMap<Ticks, Arc<TrackingFrame>>,
    settings: RwLock<QueueSettings>,
    last: Mutex<Option<Arc<TrackingFrame>>>,
    newest: Mutex<Option<Arc<TrackingFrame>>>,
    horizon: AtomicI64,
}

impl FrameQueue {
    pub fn new(settings: QueueSettings) -> Self {
        if settings.downsampling_method == DownsamplingMethod::Filtered && settings.filter.is_none() {
            warn!("filtered downsampling without a filter, falling back to last received");
        }

        Self {
            frames: Mutex::new(VecDeque::new()),
            index: DashMap::new(),
            settings: RwLock::new(settings),
            last: Mutex::new(None),
            newest: Mutex::new(None),
            horizon: AtomicI64::new(Ticks::MIN),
        }
    }

    /// Frame for the bucket containing `ticks`, created on first use.
    ///
    /// # Errors
    /// [`NoFrame::Closed`] when the bucket was already sealed or popped,
    /// [`NoFrame::OutOfRange`] when `ticks` has no representable bucket.
    pub fn get_frame(&self, ticks: Ticks, now: Ticks) -> Result<Arc<TrackingFrame>, NoFrame> {
        let settings = self.settings.read().clone();
        let destination = settings.bucket(ticks).ok_or(NoFrame::OutOfRange)?;

        if destination <= self.horizon.load(Ordering::Acquire) {
            return Err(NoFrame::Closed);
        }

        if let Some(frame) = self.index.get(&destination) {
            return Ok(frame.value().clone());
        }

        let mut frames = self.frames.lock();

        // Recheck under the lock; a pop or concurrent create may have won
        if destination <= self.horizon.load(Ordering::Acquire) {
            return Err(NoFrame::Closed);
        }
        if let Some(frame) = self.index.get(&destination) {
            return Ok(frame.value().clone());
        }

        let frame = Arc::new(TrackingFrame::new(
            destination,
            now,
            settings.downsampling_method,
            settings.filter.clone(),
            settings.expected_measurements,
        ));

        match frames.back() {
            Some(tail) if tail.timestamp() > destination => {
                let position = frames.partition_point(|f| f.timestamp() < destination);
                frames.insert(position, frame.clone());
            }
            _ => frames.push_back(frame.clone()),
        }

        self.index.insert(destination, frame.clone());
        *self.newest.lock() = Some(frame.clone());
        debug!(timestamp = destination, depth = frames.len(), "frame created");

        Ok(frame)
    }

    /// Oldest unpublished frame.
    pub fn head(&self) -> Option<Arc<TrackingFrame>> {
        self.frames.lock().front().cloned()
    }

    /// Close every bucket up to `frame` if it is still the head.
    ///
    /// Once sealed, no earlier frame can be created, so `frame` stays the head
    /// until the next [`pop`](Self::pop). Returns false, closing nothing, when
    /// `frame` is no longer the head.
    pub fn seal_head(&self, frame: &Arc<TrackingFrame>) -> bool {
        let frames = self.frames.lock();
        if !frames.front().is_some_and(|head| Arc::ptr_eq(head, frame)) {
            return false;
        }
        self.horizon.fetch_max(frame.timestamp(), Ordering::AcqRel);
        true
    }

    /// Pop the head only if it is `frame`.
    pub fn pop_if_head(&self, frame: &Arc<TrackingFrame>) -> bool {
        let mut frames = self.frames.lock();
        if !frames.front().is_some_and(|head| Arc::ptr_eq(head, frame)) {
            return false;
        }
        if let Some(head) = frames.pop_front() {
            self.remember_popped(head);
        }
        true
    }

    /// Remove the head frame, remembering it as [`last`](Self::last).
    ///
    /// No-op on an empty queue.
    pub fn pop(&self) -> Option<Arc<TrackingFrame>> {
        let mut frames = self.frames.lock();
        let head = frames.pop_front()?;
        self.remember_popped(head.clone());
        Some(head)
    }

    /// Caller holds the deque lock.
    fn remember_popped(&self, head: Arc<TrackingFrame>) {
        self.index.remove(&head.timestamp());
        self.horizon.fetch_max(head.timestamp(), Ordering::AcqRel);
        *self.last.lock() = Some(head);
    }

    /// Drop every frame and reopen all buckets. Idempotent.
    pub fn clear(&self) {
        let mut frames = self.frames.lock();
        frames.clear();
        self.index.clear();
        *self.last.lock() = None;
        *self.newest.lock() = None;
        self.horizon.store(Ticks::MIN, Ordering::Release);
    }

    /// Queue depth.
    pub fn count(&self) -> usize {
        self.frames.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Most recently popped (published) frame.
    pub fn last(&self) -> Option<Arc<TrackingFrame>> {
        self.last.lock().clone()
    }

    /// Most recently created frame.
    pub fn newest(&self) -> Option<Arc<TrackingFrame>> {
        self.newest.lock().clone()
    }

    /// Bucket timestamp of the last popped frame, if any.
    pub fn last_popped_timestamp(&self) -> Option<Ticks> {
        self.last.lock().as_ref().map(|frame| frame.timestamp())
    }

    pub fn settings(&self) -> QueueSettings {
        self.settings.read().clone()
    }

    pub fn frame_index(&self, timestamp: Ticks) -> usize {
        self.settings.read().frame_index(timestamp)
    }

    pub fn frames_per_second(&self) -> u32 {
        self.settings.read().frames_per_second
    }

    /// Applies to frames created after the call.
    pub fn set_frames_per_second(&self, frames_per_second: u32) {
        self.settings.write().frames_per_second = frames_per_second.max(1);
    }

    /// Applies to frames created after the call.
    pub fn set_time_resolution(&self, time_resolution: Ticks) {
        self.settings.write().time_resolution = time_resolution.clamp(0, TICKS_PER_SECOND);
    }

    /// Applies to frames created after the call.
    pub fn set_downsampling(&self, method: DownsamplingMethod, filter: Option<MeasurementFilter>) {
        let mut settings = self.settings.write();
        settings.downsampling_method = method;
        settings.filter = filter;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::{Measurement, TICKS_PER_MILLISECOND};

    const SECOND: Ticks = 1_700_000_000 * TICKS_PER_SECOND;

    fn make_queue(fps: u32, resolution: Ticks) -> FrameQueue {
        FrameQueue::new(QueueSettings::new(fps, resolution))
    }

    impl QueueSettings {
        fn bucket_at(&self, ticks: Ticks) -> Ticks {
            self.bucket(ticks).unwrap()
        }
    }

    /// Timestamp of frame `k` in `SECOND` at `fps`.
    fn frame_at(k: i64, fps: i64) -> Ticks {
        SECOND + k * TICKS_PER_SECOND / fps
    }

    #[test]
    fn test_bucket_floors_to_frame_boundary() {
        let settings = QueueSettings::new(30, 0);

        assert_eq!(settings.bucket_at(SECOND), SECOND);
        assert_eq!(settings.bucket_at(SECOND + 1), SECOND);
        assert_eq!(settings.bucket_at(frame_at(1, 30) + 10), frame_at(1, 30));
        assert_eq!(settings.bucket_at(frame_at(7, 30)), frame_at(7, 30));
        assert_eq!(settings.bucket_at(frame_at(7, 30) - 1), frame_at(6, 30));
        assert_eq!(settings.bucket_at(SECOND + TICKS_PER_SECOND - 1), frame_at(29, 30));
    }

    #[test]
    fn test_bucket_round_to_nearest() {
        let mut settings = QueueSettings::new(10, 0);
        settings.round_to_nearest_timestamp = true;
        let tpf = settings.ticks_per_frame();

        assert_eq!(settings.bucket_at(SECOND + tpf - 10), SECOND + tpf);
        assert_eq!(settings.bucket_at(SECOND + 10), SECOND);
        // Past the last frame of the second rolls over
        assert_eq!(
            settings.bucket_at(SECOND + TICKS_PER_SECOND - 10),
            SECOND + TICKS_PER_SECOND
        );
    }

    #[test]
    fn test_time_resolution_granularity() {
        let first = SECOND + 100 * TICKS_PER_MILLISECOND;
        let second = SECOND + 200 * TICKS_PER_MILLISECOND;

        let fine = make_queue(30, 0);
        let a = fine.get_frame(first, 0).unwrap();
        let b = fine.get_frame(second, 0).unwrap();
        assert_ne!(a.timestamp(), b.timestamp());
        assert_eq!(fine.count(), 2);

        let coarse = make_queue(30, TICKS_PER_SECOND);
        let a = coarse.get_frame(first, 0).unwrap();
        let b = coarse.get_frame(second, 0).unwrap();
        assert_eq!(a.timestamp(), b.timestamp());
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(coarse.count(), 1);
    }

    #[test]
    fn test_frames_stay_ordered() {
        let queue = make_queue(10, 0);
        let tpf = TICKS_PER_SECOND / 10;

        queue.get_frame(SECOND + 3 * tpf, 0).unwrap();
        queue.get_frame(SECOND + tpf, 0).unwrap();
        queue.get_frame(SECOND + 2 * tpf, 0).unwrap();
        queue.get_frame(SECOND + tpf, 0).unwrap();

        assert_eq!(queue.count(), 3);
        assert_eq!(queue.newest().unwrap().timestamp(), SECOND + 2 * tpf);

        let mut popped = Vec::new();
        while let Some(frame) = queue.pop() {
            popped.push(frame.timestamp());
        }
        assert_eq!(popped, vec![SECOND + tpf, SECOND + 2 * tpf, SECOND + 3 * tpf]);
    }

    #[test]
    fn test_popped_bucket_not_recreated() {
        let queue = make_queue(10, 0);
        let frame = queue.get_frame(SECOND, 0).unwrap();
        frame.sort(&Measurement::new("DEV:1".parse().unwrap(), 1.0, SECOND));

        queue.pop();
        assert_eq!(queue.last().unwrap().timestamp(), SECOND);
        assert!(queue.get_frame(SECOND + 1, 0).is_err());
        assert!(queue.get_frame(SECOND + TICKS_PER_SECOND, 0).is_ok());
    }

    #[test]
    fn test_seal_head_blocks_earlier_buckets() {
        let queue = make_queue(10, 0);
        let tpf = TICKS_PER_SECOND / 10;
        let head = queue.get_frame(SECOND + 2 * tpf, 0).unwrap();

        // An earlier bucket slipped in after the head was read
        queue.get_frame(SECOND + tpf, 0).unwrap();
        assert!(!queue.seal_head(&head));

        let head = queue.head().unwrap();
        assert_eq!(head.timestamp(), SECOND + tpf);
        assert!(queue.seal_head(&head));
        assert_eq!(queue.get_frame(SECOND, 0).unwrap_err(), NoFrame::Closed);
        assert!(Arc::ptr_eq(&queue.pop().unwrap(), &head));
    }

    #[test]
    fn test_failed_seal_leaves_buckets_open() {
        let queue = make_queue(10, 0);
        let tpf = TICKS_PER_SECOND / 10;
        let stale = queue.get_frame(SECOND + 3 * tpf, 0).unwrap();
        queue.get_frame(SECOND + tpf, 0).unwrap();

        assert!(!queue.seal_head(&stale));
        // Buckets between the new head and the stale frame still accept data
        let between = queue.get_frame(SECOND + 2 * tpf, 0).unwrap();
        assert_eq!(between.timestamp(), SECOND + 2 * tpf);
        assert_eq!(queue.count(), 3);
    }

    #[test]
    fn test_pop_if_head_only_pops_matching_frame() {
        let queue = make_queue(10, 0);
        let tpf = TICKS_PER_SECOND / 10;
        let first = queue.get_frame(SECOND, 0).unwrap();
        let second = queue.get_frame(SECOND + tpf, 0).unwrap();

        assert!(!queue.pop_if_head(&second));
        assert_eq!(queue.count(), 2);
        assert!(queue.pop_if_head(&first));
        assert!(!queue.pop_if_head(&first));
        assert_eq!(queue.last_popped_timestamp(), Some(SECOND));
        assert!(Arc::ptr_eq(&queue.head().unwrap(), &second));
    }

    #[test]
    fn test_unrepresentable_bucket_rejected() {
        let queue = make_queue(30, 0);
        assert_eq!(queue.get_frame(Ticks::MIN, 0).unwrap_err(), NoFrame::OutOfRange);

        let mut settings = QueueSettings::new(10, 0);
        settings.round_to_nearest_timestamp = true;
        assert_eq!(settings.bucket(Ticks::MAX), None);
        assert!(QueueSettings::new(30, 0).bucket(Ticks::MAX).is_some());
        assert_eq!(queue.count(), 0);
    }

    #[test]
    fn test_pop_and_clear_on_empty() {
        let queue = make_queue(30, 0);
        assert!(queue.pop().is_none());
        queue.clear();
        queue.clear();
        assert_eq!(queue.count(), 0);
        assert!(queue.head().is_none());
        assert!(queue.last().is_none());
    }

    #[test]
    fn test_clear_resets_last_popped() {
        let queue = make_queue(30, 0);
        queue.get_frame(SECOND, 0).unwrap();
        queue.pop();
        assert_eq!(queue.last_popped_timestamp(), Some(SECOND));

        queue.clear();
        assert_eq!(queue.last_popped_timestamp(), None);
        assert!(queue.get_frame(SECOND, 0).is_ok());
    }

    #[test]
    fn test_frame_index() {
        let settings = QueueSettings::new(30, 0);
        assert_eq!(settings.frame_index(SECOND), 0);
        assert_eq!(settings.frame_index(frame_at(7, 30)), 7);
        assert_eq!(settings.frame_index(frame_at(29, 30)), 29);
    }

    #[test]
    fn test_concurrent_get_frame_creates_one_frame() {
        let queue = Arc::new(make_queue(30, 0));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let queue = queue.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        queue.get_frame(SECOND + 5, 0).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(queue.count(), 1);
    }
}
