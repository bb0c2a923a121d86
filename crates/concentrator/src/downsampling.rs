//! Downsampling policies for same-key arrivals inside one frame.
//!
//! Each policy is a pure function over the stored value and the newcomer.
//! `Filtered` is the exception: it sees every candidate for the key and is
//! applied by [`TrackingFrame`](crate::TrackingFrame).

use std::sync::Arc;

use contracts::{DownsamplingMethod, Measurement, Ticks};

/// Caller-supplied reduction over all candidates seen for one key.
///
/// The returned measurement is stored verbatim. Returning `None` keeps the
/// stored value and rejects the newcomer.
pub type MeasurementFilter = Arc<dyn Fn(&[Measurement]) -> Option<Measurement> + Send + Sync>;

/// Which of two measurements survives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Survivor {
    Existing,
    Candidate,
}

/// Newcomer always wins.
#[inline]
pub fn last_received(_frame: Ticks, _existing: &Measurement, _candidate: &Measurement) -> Survivor {
    Survivor::Candidate
}

/// Timestamp nearer the frame wins; the newcomer wins ties.
#[inline]
pub fn closest(frame: Ticks, existing: &Measurement, candidate: &Measurement) -> Survivor {
    let existing_distance = existing.timestamp.abs_diff(frame);
    let candidate_distance = candidate.timestamp.abs_diff(frame);

    if existing_distance < candidate_distance {
        Survivor::Existing
    } else {
        Survivor::Candidate
    }
}

/// Fewer error flags, then fewer warning flags, wins; ties fall back to [`closest`].
#[inline]
pub fn best_quality(frame: Ticks, existing: &Measurement, candidate: &Measurement) -> Survivor {
    let rank = |m: &Measurement| (m.state_flags.error_count(), m.state_flags.warning_count());

    match rank(existing).cmp(&rank(candidate)) {
        std::cmp::Ordering::Less => Survivor::Existing,
        std::cmp::Ordering::Greater => Survivor::Candidate,
        std::cmp::Ordering::Equal => closest(frame, existing, candidate),
    }
}

/// Dispatch a two-way policy.
///
/// `Filtered` has no two-way form and behaves like `LastReceived` here.
pub fn select(
    method: DownsamplingMethod,
    frame: Ticks,
    existing: &Measurement,
    candidate: &Measurement,
) -> Survivor {
    match method {
        DownsamplingMethod::LastReceived | DownsamplingMethod::Filtered => {
            last_received(frame, existing, candidate)
        }
        DownsamplingMethod::Closest => closest(frame, existing, candidate),
        DownsamplingMethod::BestQuality => best_quality(frame, existing, candidate),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use contracts::MeasurementStateFlags;

    fn make_measurement(value: f64, timestamp: Ticks) -> Measurement {
        Measurement::new("DEV:1".parse().unwrap(), value, timestamp)
    }

    #[test]
    fn test_last_received() {
        let a = make_measurement(1.0, 100);
        let b = make_measurement(2.0, 500);
        assert_eq!(last_received(100, &a, &b), Survivor::Candidate);
    }

    #[test]
    fn test_closest() {
        let near = make_measurement(1.0, 110);
        let far = make_measurement(2.0, 150);
        assert_eq!(closest(100, &near, &far), Survivor::Existing);
        assert_eq!(closest(100, &far, &near), Survivor::Candidate);

        // Equal distance on either side of the frame: newcomer wins
        let before = make_measurement(3.0, 90);
        assert_eq!(closest(100, &near, &before), Survivor::Candidate);
    }

    #[test]
    fn test_closest_extreme_timestamps() {
        let near = make_measurement(1.0, 110);
        let oldest = make_measurement(2.0, Ticks::MIN);
        let newest = make_measurement(3.0, Ticks::MAX);
        assert_eq!(closest(100, &near, &oldest), Survivor::Existing);
        assert_eq!(closest(100, &newest, &near), Survivor::Candidate);
    }

    #[test]
    fn test_best_quality_prefers_fewer_errors() {
        let bad = make_measurement(1.0, 100).with_flags(MeasurementStateFlags::BAD_DATA);
        let suspect = make_measurement(2.0, 180).with_flags(MeasurementStateFlags::SUSPECT_DATA);
        assert_eq!(best_quality(100, &bad, &suspect), Survivor::Candidate);
        assert_eq!(best_quality(100, &suspect, &bad), Survivor::Existing);
    }

    #[test]
    fn test_best_quality_tie_uses_closest() {
        let near = make_measurement(1.0, 101);
        let far = make_measurement(2.0, 200);
        assert_eq!(best_quality(100, &near, &far), Survivor::Existing);
    }

    #[test]
    fn test_select_dispatch() {
        let near = make_measurement(1.0, 101);
        let far = make_measurement(2.0, 200);
        assert_eq!(
            select(DownsamplingMethod::LastReceived, 100, &near, &far),
            Survivor::Candidate
        );
        assert_eq!(
            select(DownsamplingMethod::Closest, 100, &near, &far),
            Survivor::Existing
        );
    }
}
