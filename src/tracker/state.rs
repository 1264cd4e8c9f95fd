use std::time::Duration;

use super::dedup::DedupWindow;
use super::zone::{CountingLines, ZoneRole};
use crate::{CrossingEvent, Point};

pub type TrackId = u64;

/// Per-zone state of one track.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum ZoneState {
    #[default]
    Outside,
    Inside,
}

/// Mutable per-identifier record maintained across sampled frames.
#[derive(Clone, Debug, PartialEq)]
pub struct Track {
    pub id: TrackId,
    pub center: Point,
    pub last_seen: Duration,
    pub entry: ZoneState,
    pub exit: ZoneState,
}

impl Track {
    pub fn new(id: TrackId, center: Point, last_seen: Duration) -> Self {
        Self {
            id,
            center,
            last_seen,
            entry: ZoneState::Outside,
            exit: ZoneState::Outside,
        }
    }

    pub fn in_entry_zone(&self) -> bool {
        self.entry == ZoneState::Inside
    }

    pub fn in_exit_zone(&self) -> bool {
        self.exit == ZoneState::Inside
    }

    fn state_mut(&mut self, role: ZoneRole) -> &mut ZoneState {
        match role {
            ZoneRole::Entry => &mut self.entry,
            ZoneRole::Exit => &mut self.exit,
        }
    }
}

/// Edge-triggered crossing detection for both counting zones.
#[derive(Clone, Debug)]
pub struct LineCrossingMachine {
    lines: CountingLines,
}

impl LineCrossingMachine {
    pub fn new(lines: CountingLines) -> Self {
        Self { lines }
    }

    pub fn lines(&self) -> &CountingLines {
        &self.lines
    }

    /// Evaluate the track's current centroid against both zones.
    ///
    /// Emits at most one event per call. A rising edge that the dedup window
    /// flags as a duplicate leaves the zone `Outside`, so the track fires on a
    /// later sample once no recent record is close to it.
    pub fn evaluate(
        &self,
        track: &mut Track,
        dedup: &mut DedupWindow,
        timestamp: Duration,
    ) -> Option<CrossingEvent> {
        let membership = self.lines.membership(track.center);
        let entered = step(track, ZoneRole::Entry, membership.entry, dedup, timestamp);
        let exited = step(track, ZoneRole::Exit, membership.exit, dedup, timestamp);
        entered.or(exited)
    }
}

fn step(
    track: &mut Track,
    role: ZoneRole,
    member: bool,
    dedup: &mut DedupWindow,
    timestamp: Duration,
) -> Option<CrossingEvent> {
    let center = track.center;
    let id = track.id;
    let state = track.state_mut(role);

    if !member {
        *state = ZoneState::Outside;
        return None;
    }
    if *state == ZoneState::Inside {
        return None;
    }

    if dedup.is_duplicate(center, timestamp) {
        log::debug!(
            "track {} {:?} crossing at ({:.0}, {:.0}) suppressed as duplicate",
            id,
            role,
            center.x,
            center.y
        );
        return None;
    }

    *state = ZoneState::Inside;
    dedup.record(center, timestamp);
    Some(CrossingEvent {
        kind: role.event_kind(),
        at: timestamp,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::zone::Zone;
    use crate::EventKind;

    fn machine() -> LineCrossingMachine {
        let entry = Zone::from_corners([[362.0, 150.0], [500.0, 150.0]]).unwrap();
        let exit = Zone::from_corners([[362.0, 400.0], [500.0, 400.0]]).unwrap();
        LineCrossingMachine::new(CountingLines::new(entry, exit, 5.0).unwrap())
    }

    fn dedup() -> DedupWindow {
        DedupWindow::new(100, 20.0, Duration::from_secs(1))
    }

    fn at(track: &mut Track, x: f32, y: f32) -> &mut Track {
        track.center = Point::new(x, y);
        track
    }

    #[test]
    fn fires_only_on_rising_edge() {
        let m = machine();
        let mut d = dedup();
        let mut track = Track::new(1, Point::new(400.0, 100.0), Duration::ZERO);

        assert_eq!(m.evaluate(&mut track, &mut d, Duration::from_secs(0)), None);
        let ev = m.evaluate(at(&mut track, 400.0, 148.0), &mut d, Duration::from_secs(1));
        assert_eq!(ev.map(|e| e.kind), Some(EventKind::Entered));
        assert!(track.in_entry_zone());

        // Lingering inside the band stays silent, even once the dedup window has expired.
        for s in 2..6 {
            let ev = m.evaluate(at(&mut track, 401.0, 152.0), &mut d, Duration::from_secs(s));
            assert_eq!(ev, None);
        }

        assert_eq!(m.evaluate(at(&mut track, 400.0, 200.0), &mut d, Duration::from_secs(6)), None);
        assert!(!track.in_entry_zone());
    }

    #[test]
    fn leaving_rearms_the_zone() {
        let m = machine();
        let mut d = dedup();
        let mut track = Track::new(1, Point::new(400.0, 150.0), Duration::ZERO);

        assert!(m.evaluate(&mut track, &mut d, Duration::from_secs(0)).is_some());
        assert!(m.evaluate(at(&mut track, 400.0, 300.0), &mut d, Duration::from_secs(1)).is_none());
        let again = m.evaluate(at(&mut track, 400.0, 150.0), &mut d, Duration::from_secs(5));
        assert_eq!(again.map(|e| e.kind), Some(EventKind::Entered));
        assert_eq!(d.len(), 2);
    }

    #[test]
    fn exit_zone_emits_exited() {
        let m = machine();
        let mut d = dedup();
        let mut track = Track::new(7, Point::new(450.0, 402.0), Duration::ZERO);
        let ev = m.evaluate(&mut track, &mut d, Duration::from_secs(3)).unwrap();
        assert_eq!(ev, CrossingEvent::exited(Duration::from_secs(3)));
        assert!(track.in_exit_zone());
        assert!(!track.in_entry_zone());
    }

    #[test]
    fn duplicate_rising_edge_stays_outside_until_window_passes() {
        let m = machine();
        let mut d = dedup();
        d.record(Point::new(405.0, 150.0), Duration::from_millis(0));

        let mut track = Track::new(2, Point::new(400.0, 150.0), Duration::ZERO);
        assert_eq!(m.evaluate(&mut track, &mut d, Duration::from_millis(300)), None);
        assert!(!track.in_entry_zone());
        assert_eq!(d.len(), 1);

        // Still in the band once the earlier record is a full threshold old.
        let ev = m.evaluate(&mut track, &mut d, Duration::from_millis(1000));
        assert_eq!(ev, Some(CrossingEvent::entered(Duration::from_millis(1000))));
        assert!(track.in_entry_zone());
        assert_eq!(d.len(), 2);

        assert_eq!(m.evaluate(&mut track, &mut d, Duration::from_secs(4)), None);
    }
}
