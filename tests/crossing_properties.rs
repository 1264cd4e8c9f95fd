//! Crossing tracker properties.
//!
//! These tests verify that:
//! 1. One traversal of a counting line produces exactly one event
//! 2. A vehicle that leaves and crosses again later is counted again
//! 3. Near-duplicate crossings are suppressed even when identity churns
//! 4. A centroid inside both zones never double-emits; entry wins
//! 5. The dedup window keeps only the most recent K records

use std::time::Duration;

use crossing_counter::tracker::{
    CountingLines, CrossingTracker, DedupWindow, LineCrossingMachine, Track, TrackerSettings, Zone,
};
use crossing_counter::{CrossingEvent, EventKind, Point};

fn ms(v: u64) -> Duration {
    Duration::from_millis(v)
}

/// Entry band y=150 (±5), x in (362, 500); exit band further right.
fn scenario_lines() -> CountingLines {
    let entry = Zone::from_corners([[362.0, 150.0], [500.0, 150.0]]).expect("entry zone");
    let exit = Zone::from_corners([[600.0, 150.0], [800.0, 150.0]]).expect("exit zone");
    CountingLines::new(entry, exit, 5.0).expect("counting lines")
}

fn scenario_tracker() -> CrossingTracker {
    CrossingTracker::new(scenario_lines(), &TrackerSettings::default()).expect("tracker")
}

fn default_dedup() -> DedupWindow {
    let s = TrackerSettings::default();
    DedupWindow::new(s.dedup_window_capacity, s.centroid_match_tolerance, s.dedup_time_threshold)
}

/// Evaluate one centroid under a brand-new track id, as if identity were lost.
fn churned(
    machine: &LineCrossingMachine,
    dedup: &mut DedupWindow,
    id: u64,
    center: Point,
    ts: Duration,
) -> Option<CrossingEvent> {
    let mut track = Track::new(id, center, ts);
    machine.evaluate(&mut track, dedup, ts)
}

#[test]
fn single_crossing_emits_one_entered() {
    let mut tracker = scenario_tracker();
    let mut events = Vec::new();
    for (i, y) in [120.0, 135.0, 146.0, 150.0, 154.0, 170.0, 190.0].into_iter().enumerate() {
        events.extend(tracker.observe_centers(&[Point::new(430.0, y)], ms(250 * i as u64)));
    }
    assert_eq!(events, vec![CrossingEvent::entered(ms(500))]);
}

#[test]
fn re_crossing_after_threshold_emits_twice() {
    let mut tracker = scenario_tracker();
    let mut events = Vec::new();
    // Down through the band, back out above it, and through again later and further along.
    let path = [
        (0, 430.0, 140.0),
        (250, 430.0, 150.0),
        (500, 430.0, 170.0),
        (1000, 430.0, 130.0),
        (2500, 470.0, 140.0),
        (2750, 470.0, 150.0),
    ];
    for (t, x, y) in path {
        events.extend(tracker.observe_centers(&[Point::new(x, y)], ms(t)));
    }
    let kinds: Vec<EventKind> = events.iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![EventKind::Entered, EventKind::Entered]);
    assert_eq!(events[1].at, ms(2750));
}

#[test]
fn near_duplicates_with_churning_identity_emit_once() {
    let machine = LineCrossingMachine::new(scenario_lines());
    let mut dedup = default_dedup();
    let mut events = Vec::new();
    for (id, (t, x)) in [(0, 400.0), (250, 410.0), (500, 415.0)].into_iter().enumerate() {
        events.extend(churned(&machine, &mut dedup, id as u64 + 1, Point::new(x, 150.0), ms(t)));
    }
    assert_eq!(events, vec![CrossingEvent::entered(ms(0))]);
    assert_eq!(dedup.len(), 1);
}

#[test]
fn fifty_pixels_apart_are_separate_crossings() {
    let machine = LineCrossingMachine::new(scenario_lines());
    let mut dedup = default_dedup();
    let a = churned(&machine, &mut dedup, 1, Point::new(400.0, 150.0), ms(0));
    let b = churned(&machine, &mut dedup, 2, Point::new(450.0, 150.0), ms(500));
    assert_eq!(a, Some(CrossingEvent::entered(ms(0))));
    assert_eq!(b, Some(CrossingEvent::entered(ms(500))));
}

#[test]
fn tolerance_and_time_threshold_are_exclusive() {
    let machine = LineCrossingMachine::new(scenario_lines());

    // Exactly 20 px apart is not within tolerance.
    let mut dedup = default_dedup();
    assert!(churned(&machine, &mut dedup, 1, Point::new(400.0, 150.0), ms(0)).is_some());
    assert!(churned(&machine, &mut dedup, 2, Point::new(420.0, 150.0), ms(250)).is_some());

    // Exactly one threshold later is no longer a duplicate; just before it still is.
    let mut dedup = default_dedup();
    assert!(churned(&machine, &mut dedup, 1, Point::new(400.0, 150.0), ms(0)).is_some());
    assert!(churned(&machine, &mut dedup, 2, Point::new(405.0, 150.0), ms(999)).is_none());
    assert!(churned(&machine, &mut dedup, 3, Point::new(405.0, 150.0), ms(1000)).is_some());
}

#[test]
fn scenario_with_stable_identity_emits_once() {
    let mut tracker = scenario_tracker();
    let mut events = Vec::new();
    for (t, x) in [(0, 400.0), (250, 420.0), (500, 450.0)] {
        events.extend(tracker.observe_centers(&[Point::new(x, 150.0)], ms(t)));
    }
    assert_eq!(events, vec![CrossingEvent::entered(ms(0))]);
    assert_eq!(tracker.live_tracks(), 1);
}

#[test]
fn overlapping_zones_prefer_entry() {
    let entry = Zone::from_corners([[100.0, 200.0], [300.0, 200.0]]).expect("entry");
    let exit = Zone::from_corners([[200.0, 200.0], [400.0, 200.0]]).expect("exit");
    assert!(CountingLines::new(entry, exit, 5.0).is_err());

    let lines = CountingLines::allow_overlap(entry, exit, 5.0).expect("lines");
    let machine = LineCrossingMachine::new(lines);
    let mut dedup = default_dedup();
    let mut track = Track::new(1, Point::new(250.0, 200.0), ms(0));

    let event = machine.evaluate(&mut track, &mut dedup, ms(0));
    assert_eq!(event.map(|e| e.kind), Some(EventKind::Entered));
    assert!(track.in_entry_zone());
    assert!(!track.in_exit_zone());
    assert_eq!(dedup.len(), 1);

    // Lingering in the overlap never produces an exit.
    assert!(machine.evaluate(&mut track, &mut dedup, ms(250)).is_none());
}

#[test]
fn window_keeps_most_recent_k_records() {
    let k = 100;
    let mut dedup = DedupWindow::new(k, 20.0, Duration::from_secs(1));
    for i in 0..=k {
        dedup.record(Point::new(i as f32 * 50.0, 0.0), Duration::from_secs(i as u64 * 2));
    }
    assert_eq!(dedup.len(), k);
    let first = dedup.records().next().expect("oldest record");
    assert_eq!(first.center, Point::new(50.0, 0.0));
    assert!(!dedup.is_duplicate(Point::new(0.0, 0.0), Duration::from_secs(0)));
}

#[test]
fn lingering_in_band_does_not_refire() {
    let mut tracker = scenario_tracker();
    let mut fired = 0;
    for i in 0..20u64 {
        let x = 430.0 + (i % 3) as f32;
        fired += tracker.observe_centers(&[Point::new(x, 150.0)], ms(250 * i)).len();
    }
    assert_eq!(fired, 1);
}

#[test]
fn scenario_one_second_apart_with_churning_identity() {
    let machine = LineCrossingMachine::new(scenario_lines());

    // 400 -> 420 -> 450, one sample per second, a fresh identifier each time.
    let mut dedup = default_dedup();
    let mut events = Vec::new();
    for (id, x) in [400.0, 420.0, 450.0].into_iter().enumerate() {
        let ts = Duration::from_secs(id as u64);
        events.extend(churned(&machine, &mut dedup, id as u64 + 1, Point::new(x, 150.0), ts));
    }
    assert_eq!(events.len(), 3);

    // Within tolerance of each other, but exactly one threshold apart: still separate.
    let mut dedup = default_dedup();
    let mut events = Vec::new();
    for (id, x) in [400.0, 410.0, 415.0].into_iter().enumerate() {
        let ts = Duration::from_secs(id as u64);
        events.extend(churned(&machine, &mut dedup, id as u64 + 1, Point::new(x, 150.0), ts));
    }
    assert_eq!(
        events,
        vec![
            CrossingEvent::entered(ms(0)),
            CrossingEvent::entered(ms(1000)),
            CrossingEvent::entered(ms(2000)),
        ]
    );
    assert_eq!(dedup.len(), 3);
}
