//! Frame - all measurements destined for one time bucket.

use std::cmp::Ordering;
use std::collections::HashMap;

use contracts::{Measurement, MeasurementKey, PublicationMeta, PublishedFrame, Ticks};

/// Measurements for one bucket, keyed by signal.
///
/// The timestamp is fixed at construction. Equality and ordering compare the
/// timestamp only, so two frames for the same bucket are equal regardless of
/// their contents. `Clone` produces an independent copy of the measurement map.
#[derive(Debug, Clone)]
pub struct Frame {
    timestamp: Ticks,
    measurements: HashMap<MeasurementKey, Measurement>,
    published: bool,
    sorted_measurements: u64,
    downsampled_measurements: u64,
    last_sorted_measurement: Option<Measurement>,
    received_timestamp: Ticks,
    published_timestamp: Ticks,
}

impl Frame {
    /// Create an empty frame; `received_timestamp` is the local time it was created.
    pub fn new(timestamp: Ticks, received_timestamp: Ticks) -> Self {
        Self::with_capacity(timestamp, received_timestamp, 0)
    }

    /// Create an empty frame sized for `expected` measurements.
    pub fn with_capacity(timestamp: Ticks, received_timestamp: Ticks, expected: usize) -> Self {
        Self {
            timestamp,
            measurements: HashMap::with_capacity(expected),
            published: false,
            sorted_measurements: 0,
            downsampled_measurements: 0,
            last_sorted_measurement: None,
            received_timestamp,
            published_timestamp: 0,
        }
    }

    /// Create a frame holding an initial set of measurements.
    pub fn with_measurements(
        timestamp: Ticks,
        measurements: HashMap<MeasurementKey, Measurement>,
    ) -> Self {
        let mut frame = Self::new(timestamp, 0);
        frame.sorted_measurements = measurements.len() as u64;
        frame.measurements = measurements;
        frame
    }

    #[inline]
    pub fn timestamp(&self) -> Ticks {
        self.timestamp
    }

    #[inline]
    pub fn measurements(&self) -> &HashMap<MeasurementKey, Measurement> {
        &self.measurements
    }

    #[inline]
    pub fn measurements_mut(&mut self) -> &mut HashMap<MeasurementKey, Measurement> {
        &mut self.measurements
    }

    pub fn get(&self, key: &MeasurementKey) -> Option<&Measurement> {
        self.measurements.get(key)
    }

    pub fn len(&self) -> usize {
        self.measurements.len()
    }

    pub fn is_empty(&self) -> bool {
        self.measurements.is_empty()
    }

    #[inline]
    pub fn published(&self) -> bool {
        self.published
    }

    pub fn set_published(&mut self, published: bool) {
        self.published = published;
    }

    /// Measurements accepted into this frame, including downsampled arrivals.
    #[inline]
    pub fn sorted_measurements(&self) -> u64 {
        self.sorted_measurements
    }

    /// Downsampled arrivals, filled in on the publication copy.
    #[inline]
    pub fn downsampled_measurements(&self) -> u64 {
        self.downsampled_measurements
    }

    pub(crate) fn set_downsampled_measurements(&mut self, count: u64) {
        self.downsampled_measurements = count;
    }

    pub fn last_sorted_measurement(&self) -> Option<&Measurement> {
        self.last_sorted_measurement.as_ref()
    }

    #[inline]
    pub fn received_timestamp(&self) -> Ticks {
        self.received_timestamp
    }

    #[inline]
    pub fn published_timestamp(&self) -> Ticks {
        self.published_timestamp
    }

    /// Stamp publication time onto the frame and every contained measurement.
    pub fn set_published_timestamp(&mut self, ticks: Ticks) {
        self.published_timestamp = ticks;
        for measurement in self.measurements.values_mut() {
            measurement.published_timestamp = ticks;
        }
    }

    /// Store `stored` under its key and record `sorted` as the latest arrival.
    pub(crate) fn assign(&mut self, stored: Measurement, sorted: Measurement) {
        self.measurements.insert(stored.key.clone(), stored);
        self.sorted_measurements += 1;
        self.last_sorted_measurement = Some(sorted);
    }

    /// Owned snapshot for sinks, measurements ordered by `source` then `id`.
    pub fn to_published(&self, index: usize, sequence: u64, expected: u32) -> PublishedFrame {
        let mut measurements: Vec<Measurement> = self.measurements.values().cloned().collect();
        measurements.sort_by(|a, b| {
            a.key
                .source()
                .cmp(b.key.source())
                .then(a.key.id().cmp(&b.key.id()))
        });

        PublishedFrame {
            timestamp: self.timestamp,
            index,
            sequence,
            measurements,
            meta: PublicationMeta {
                sorted_measurements: self.sorted_measurements,
                downsampled_measurements: self.downsampled_measurements,
                expected_measurements: expected,
                received_timestamp: self.received_timestamp,
                published_timestamp: self.published_timestamp,
            },
        }
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.timestamp == other.timestamp
    }
}

impl Eq for Frame {}

impl PartialOrd for Frame {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Frame {
    fn cmp(&self, other: &Self) -> Ordering {
        self.timestamp.cmp(&other.timestamp)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_measurement(id: u32, value: f64, timestamp: Ticks) -> Measurement {
        Measurement::new(format!("DEV:{id}").parse().unwrap(), value, timestamp)
    }

    #[test]
    fn test_clone_is_independent() {
        let mut source = Frame::new(1_000, 5);
        let m = make_measurement(1, 1.0, 1_000);
        source.assign(m.clone(), m);

        let mut copy = source.clone();
        assert_eq!(copy.timestamp(), source.timestamp());
        assert_eq!(copy.measurements(), source.measurements());

        let key: MeasurementKey = "DEV:1".parse().unwrap();
        copy.measurements_mut().get_mut(&key).unwrap().value = 99.0;
        copy.measurements_mut()
            .insert("DEV:2".parse().unwrap(), make_measurement(2, 2.0, 1_000));

        assert_eq!(source.get(&key).unwrap().value, 1.0);
        assert_eq!(source.len(), 1);
        assert_eq!(copy.len(), 2);
    }

    #[test]
    fn test_ordering_uses_timestamp_only() {
        let mut a = Frame::new(10, 0);
        let b = Frame::new(10, 99);
        let c = Frame::new(20, 0);
        let m = make_measurement(1, 1.0, 10);
        a.assign(m.clone(), m);

        assert_eq!(a, b);
        assert!(a < c);
        assert!(c > b);
        assert_eq!(a.cmp(&b), Ordering::Equal);
    }

    #[test]
    fn test_published_timestamp_stamps_measurements() {
        let mut frame = Frame::new(10, 0);
        let m = make_measurement(1, 1.0, 10);
        frame.assign(m.clone(), m);
        frame.set_published_timestamp(42);

        assert_eq!(frame.published_timestamp(), 42);
        assert!(frame.measurements().values().all(|m| m.published_timestamp == 42));
    }

    #[test]
    fn test_to_published_orders_by_key() {
        let mut frame = Frame::new(10, 1);
        for id in [3, 1, 2] {
            let m = make_measurement(id, f64::from(id), 10);
            frame.assign(m.clone(), m);
        }

        let published = frame.to_published(4, 7, 5);
        let ids: Vec<u32> = published.measurements.iter().map(|m| m.key.id()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert_eq!(published.index, 4);
        assert_eq!(published.sequence, 7);
        assert_eq!(published.meta.sorted_measurements, 3);
        assert_eq!(published.missing_measurements(), 2);
    }

    #[test]
    fn test_with_measurements_counts_initial_set() {
        let mut map = HashMap::new();
        let m = make_measurement(1, 1.0, 10);
        map.insert(m.key.clone(), m);

        let frame = Frame::with_measurements(10, map);
        assert_eq!(frame.sorted_measurements(), 1);
        assert!(!frame.published());
    }
}
