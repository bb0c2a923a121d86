//! TrackingFrame - a frame in flight between first sort and publication.

use std::collections::HashMap;

use contracts::{DownsamplingMethod, Measurement, MeasurementKey, Ticks};
use parking_lot::{MappedRwLockReadGuard, RwLock, RwLockReadGuard};

use crate::downsampling::{select, MeasurementFilter, Survivor};
use crate::Frame;

/// Result of merging one measurement into a tracking frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// First value for its key
    Inserted,
    /// Key already present; the downsampling policy picked the survivor
    Downsampled,
    /// The filter returned no value; the stored value is unchanged
    Rejected,
    /// Frame was already published
    Published,
}

struct TrackingState {
    frame: Frame,
    /// `None` until the first same-key arrival
    downsampled: Option<u64>,
    /// Every value seen per key, kept only for `Filtered`
    candidates: HashMap<MeasurementKey, Vec<Measurement>>,
}

/// Exclusively owns one [`Frame`] behind a reader/writer lock.
///
/// Producers take the write lock for a single key merge; the scheduler takes
/// it once to mark the frame published and copy it out.
pub struct TrackingFrame {
    timestamp: Ticks,
    created: Ticks,
    method: DownsamplingMethod,
    filter: Option<MeasurementFilter>,
    state: RwLock<TrackingState>,
}

impl TrackingFrame {
    pub fn new(
        timestamp: Ticks,
        created: Ticks,
        method: DownsamplingMethod,
        filter: Option<MeasurementFilter>,
        expected: usize,
    ) -> Self {
        Self {
            timestamp,
            created,
            method,
            filter,
            state: RwLock::new(TrackingState {
                frame: Frame::with_capacity(timestamp, created, expected),
                downsampled: None,
                candidates: HashMap::new(),
            }),
        }
    }

    /// Bucket timestamp, readable without the lock.
    #[inline]
    pub fn timestamp(&self) -> Ticks {
        self.timestamp
    }

    /// Local time the frame was created.
    #[inline]
    pub fn created_timestamp(&self) -> Ticks {
        self.created
    }

    #[inline]
    pub fn downsampling_method(&self) -> DownsamplingMethod {
        self.method
    }

    /// Read-locked view of the wrapped frame.
    pub fn source_frame(&self) -> MappedRwLockReadGuard<'_, Frame> {
        RwLockReadGuard::map(self.state.read(), |state| &state.frame)
    }

    /// Same-key arrivals absorbed so far; `None` before the first one.
    pub fn downsampled_measurements(&self) -> Option<u64> {
        self.state.read().downsampled
    }

    pub fn sorted_measurements(&self) -> u64 {
        self.state.read().frame.sorted_measurements()
    }

    pub fn is_published(&self) -> bool {
        self.state.read().frame.published()
    }

    /// Value the frame would hold for `candidate`'s key if it were sorted now.
    ///
    /// Returns `None` only when a filter rejects the candidate.
    pub fn derive_measurement_value(&self, candidate: &Measurement) -> Option<Measurement> {
        let state = self.state.read();
        match state.frame.get(&candidate.key) {
            None => Some(candidate.clone()),
            Some(existing) => {
                let history = state
                    .candidates
                    .get(&candidate.key)
                    .map(Vec::as_slice)
                    .unwrap_or(std::slice::from_ref(existing));
                self.derive(history, existing, candidate)
            }
        }
    }

    /// Merge a measurement under the write lock.
    pub fn sort(&self, measurement: &Measurement) -> MergeOutcome {
        let mut guard = self.state.write();
        let state = &mut *guard;

        if state.frame.published() {
            return MergeOutcome::Published;
        }

        let filtered = self.method == DownsamplingMethod::Filtered && self.filter.is_some();

        let derived = match state.frame.get(&measurement.key) {
            None => {
                if filtered {
                    state
                        .candidates
                        .insert(measurement.key.clone(), vec![measurement.clone()]);
                }
                state.frame.assign(measurement.clone(), measurement.clone());
                return MergeOutcome::Inserted;
            }
            Some(existing) => {
                let history = state
                    .candidates
                    .get(&measurement.key)
                    .map(Vec::as_slice)
                    .unwrap_or(std::slice::from_ref(existing));
                self.derive(history, existing, measurement)
            }
        };

        *state.downsampled.get_or_insert(0) += 1;
        if filtered {
            state
                .candidates
                .entry(measurement.key.clone())
                .or_default()
                .push(measurement.clone());
        }

        match derived {
            Some(value) => {
                state.frame.assign(value, measurement.clone());
                MergeOutcome::Downsampled
            }
            None => MergeOutcome::Rejected,
        }
    }

    /// Mark published, optionally stamp publication time, and return a copy.
    ///
    /// Returns `None` if the frame was already published.
    pub fn mark_published(&self, track_published_timestamp: bool, now: Ticks) -> Option<Frame> {
        let mut state = self.state.write();
        if state.frame.published() {
            return None;
        }
        state.frame.set_published(true);
        if track_published_timestamp {
            state.frame.set_published_timestamp(now);
        }

        let mut copy = state.frame.clone();
        copy.set_downsampled_measurements(state.downsampled.unwrap_or(0));
        Some(copy)
    }

    fn derive(
        &self,
        history: &[Measurement],
        existing: &Measurement,
        candidate: &Measurement,
    ) -> Option<Measurement> {
        match (self.method, &self.filter) {
            (DownsamplingMethod::Filtered, Some(filter)) => {
                let mut all = Vec::with_capacity(history.len() + 1);
                all.extend_from_slice(history);
                all.push(candidate.clone());
                filter(&all)
            }
            (method, _) => match select(method, self.timestamp, existing, candidate) {
                Survivor::Existing => Some(existing.clone()),
                Survivor::Candidate => Some(candidate.clone()),
            },
        }
    }
}

impl std::fmt::Debug for TrackingFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackingFrame")
            .field("timestamp", &self.timestamp)
            .field("method", &self.method)
            .field("sorted", &self.sorted_measurements())
            .finish()
    }
}
