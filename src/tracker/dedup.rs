use std::collections::VecDeque;
use std::time::Duration;

use crate::Point;

/// Centroid and stream time of an emitted crossing.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CrossingRecord {
    pub center: Point,
    pub timestamp: Duration,
}

/// Bounded, insertion-ordered log of recent crossings.
///
/// Records leave the window only by being pushed out at capacity; there is no
/// age-based expiry. A candidate is a duplicate when any retained record is
/// within `tolerance_px` on both axes and less than `time_threshold` older.
#[derive(Clone, Debug)]
pub struct DedupWindow {
    records: VecDeque<CrossingRecord>,
    capacity: usize,
    tolerance_px: f32,
    time_threshold: Duration,
}

impl DedupWindow {
    pub fn new(capacity: usize, tolerance_px: f32, time_threshold: Duration) -> Self {
        let capacity = capacity.max(1);
        Self {
            records: VecDeque::with_capacity(capacity),
            capacity,
            tolerance_px,
            time_threshold,
        }
    }

    pub fn is_duplicate(&self, center: Point, timestamp: Duration) -> bool {
        self.records.iter().any(|record| {
            (record.center.x - center.x).abs() < self.tolerance_px
                && (record.center.y - center.y).abs() < self.tolerance_px
                && timestamp.saturating_sub(record.timestamp) < self.time_threshold
        })
    }

    /// Append a crossing, evicting the oldest record when full.
    pub fn record(&mut self, center: Point, timestamp: Duration) {
        while self.records.len() >= self.capacity {
            self.records.pop_front();
        }
        self.records.push_back(CrossingRecord { center, timestamp });
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Oldest first.
    pub fn records(&self) -> impl Iterator<Item = &CrossingRecord> {
        self.records.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn secs(s: f64) -> Duration {
        Duration::from_secs_f64(s)
    }

    fn window() -> DedupWindow {
        DedupWindow::new(100, 20.0, Duration::from_secs(1))
    }

    #[test]
    fn nearby_recent_crossing_is_duplicate() {
        let mut w = window();
        w.record(Point::new(400.0, 150.0), secs(10.0));
        assert!(w.is_duplicate(Point::new(415.0, 140.0), secs(10.5)));
    }

    #[test]
    fn tolerance_is_exclusive() {
        let mut w = window();
        w.record(Point::new(400.0, 150.0), secs(10.0));
        assert!(!w.is_duplicate(Point::new(420.0, 150.0), secs(10.1)));
        assert!(!w.is_duplicate(Point::new(400.0, 170.0), secs(10.1)));
        assert!(w.is_duplicate(Point::new(419.9, 169.9), secs(10.1)));
    }

    #[test]
    fn time_threshold_is_exclusive() {
        let mut w = window();
        w.record(Point::new(400.0, 150.0), secs(10.0));
        assert!(w.is_duplicate(Point::new(400.0, 150.0), secs(10.999)));
        assert!(!w.is_duplicate(Point::new(400.0, 150.0), secs(11.0)));
    }

    #[test]
    fn out_of_order_candidate_counts_as_recent() {
        let mut w = window();
        w.record(Point::new(400.0, 150.0), secs(10.0));
        assert!(w.is_duplicate(Point::new(400.0, 150.0), secs(9.0)));
    }

    #[test]
    fn capacity_evicts_oldest() {
        let mut w = DedupWindow::new(100, 20.0, Duration::from_secs(1));
        for i in 0..101 {
            w.record(Point::new(i as f32 * 100.0, 0.0), secs(i as f64));
        }
        assert_eq!(w.len(), 100);
        let first = w.records().next().unwrap();
        assert_eq!(first.center, Point::new(100.0, 0.0));
        assert_eq!(w.records().last().unwrap().center, Point::new(10_000.0, 0.0));
    }

    #[test]
    fn old_records_are_kept_until_pushed_out() {
        let mut w = window();
        w.record(Point::new(1.0, 1.0), secs(0.0));
        assert!(!w.is_duplicate(Point::new(1.0, 1.0), secs(3600.0)));
        assert_eq!(w.len(), 1);
    }

    #[test]
    fn zero_capacity_is_clamped() {
        let mut w = DedupWindow::new(0, 20.0, Duration::from_secs(1));
        w.record(Point::new(0.0, 0.0), secs(0.0));
        w.record(Point::new(50.0, 0.0), secs(0.1));
        assert_eq!(w.capacity(), 1);
        assert_eq!(w.len(), 1);
    }
}
