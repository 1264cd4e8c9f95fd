use std::collections::{HashMap, HashSet};
use std::time::Duration;

use super::state::{Track, TrackId};
use crate::Point;

type CellKey = (i64, i64);

/// Centroid-based identity assignment.
///
/// This is a heuristic, not multi-object tracking. A centroid is quantized to
/// a grid cell; an exact cell match reuses that track, otherwise the nearest
/// unclaimed track within `match_distance_px` is reused, otherwise a new
/// identifier is minted. Identity only has to survive one traversal of a
/// counting zone. A Kalman-filter association is the natural replacement if
/// that ever stops being enough.
#[derive(Debug)]
pub struct IdentityAssigner {
    tracks: HashMap<TrackId, Track>,
    by_cell: HashMap<CellKey, TrackId>,
    next_id: TrackId,
    quantization_px: f32,
    match_distance_px: f32,
    stale_after: Duration,
}

impl IdentityAssigner {
    /// `match_distance_px == 0` disables the nearest-centroid fallback.
    pub fn new(quantization_px: f32, match_distance_px: f32, stale_after: Duration) -> Self {
        Self {
            tracks: HashMap::new(),
            by_cell: HashMap::new(),
            next_id: 1,
            quantization_px: quantization_px.max(f32::EPSILON),
            match_distance_px: match_distance_px.max(0.0),
            stale_after,
        }
    }

    /// Assign an identifier to each centroid of one sampled frame, in order.
    ///
    /// A track is claimed by at most one centroid per frame.
    pub fn assign(&mut self, centers: &[Point], timestamp: Duration) -> Vec<TrackId> {
        let mut claimed = HashSet::with_capacity(centers.len());
        let mut ids = Vec::with_capacity(centers.len());

        for &center in centers {
            let cell = self.cell(center);
            let id = self
                .by_cell
                .get(&cell)
                .copied()
                .filter(|id| !claimed.contains(id))
                .or_else(|| self.nearest(center, &claimed))
                .unwrap_or_else(|| self.mint(center, timestamp));

            self.move_track(id, center, cell, timestamp);
            claimed.insert(id);
            ids.push(id);
        }

        ids
    }

    pub fn track(&self, id: TrackId) -> Option<&Track> {
        self.tracks.get(&id)
    }

    pub fn track_mut(&mut self, id: TrackId) -> Option<&mut Track> {
        self.tracks.get_mut(&id)
    }

    pub fn len(&self) -> usize {
        self.tracks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tracks.is_empty()
    }

    /// Drop tracks not seen for longer than the staleness period. Returns how many were dropped.
    pub fn evict_stale(&mut self, now: Duration) -> usize {
        let stale_after = self.stale_after;
        let before = self.tracks.len();
        self.tracks
            .retain(|_, track| now.saturating_sub(track.last_seen) <= stale_after);
        let tracks = &self.tracks;
        self.by_cell.retain(|_, id| tracks.contains_key(id));
        before - self.tracks.len()
    }

    fn cell(&self, p: Point) -> CellKey {
        (
            (p.x / self.quantization_px).round() as i64,
            (p.y / self.quantization_px).round() as i64,
        )
    }

    fn nearest(&self, center: Point, claimed: &HashSet<TrackId>) -> Option<TrackId> {
        if self.match_distance_px <= 0.0 {
            return None;
        }
        self.tracks
            .values()
            .filter(|track| !claimed.contains(&track.id))
            .map(|track| (track.id, track.center.distance(center)))
            .filter(|(_, distance)| *distance <= self.match_distance_px)
            .min_by(|a, b| a.1.total_cmp(&b.1).then(a.0.cmp(&b.0)))
            .map(|(id, _)| id)
    }

    fn mint(&mut self, center: Point, timestamp: Duration) -> TrackId {
        let id = self.next_id;
        self.next_id += 1;
        self.tracks.insert(id, Track::new(id, center, timestamp));
        id
    }

    fn move_track(&mut self, id: TrackId, center: Point, cell: CellKey, timestamp: Duration) {
        let Some(track) = self.tracks.get_mut(&id) else {
            return;
        };
        let old_cell = (
            (track.center.x / self.quantization_px).round() as i64,
            (track.center.y / self.quantization_px).round() as i64,
        );
        track.center = center;
        track.last_seen = timestamp;
        if old_cell != cell && self.by_cell.get(&old_cell) == Some(&id) {
            self.by_cell.remove(&old_cell);
        }
        self.by_cell.insert(cell, id);
    }
}
