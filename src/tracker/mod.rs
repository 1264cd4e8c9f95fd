//! Line-crossing tracker.
//!
//! Turns the bounding boxes of each sampled frame into crossing events:
//! - `identity`: centroid → track identifier
//! - `state`: per-track, per-zone edge-triggered state machine
//! - `dedup`: capacity-bounded log of recent crossings
//! - `zone`: counting zones and their validation
//!
//! All state here is owned by the pipeline worker; nothing is shared.

mod dedup;
mod identity;
mod state;
mod zone;

use anyhow::{anyhow, Result};
use std::time::Duration;

pub use dedup::{CrossingRecord, DedupWindow};
pub use identity::IdentityAssigner;
pub use state::{LineCrossingMachine, Track, TrackId, ZoneState};
pub use zone::{CountingLines, Membership, Zone, ZoneRole, DEFAULT_ZONE_MARGIN};

use crate::detect::BoundingBox;
use crate::{CrossingEvent, Point};

/// Tracker tunables. The pixel values are calibrated to one camera framing and
/// should be revisited for any other setup.
#[derive(Clone, Debug, PartialEq)]
pub struct TrackerSettings {
    /// Per-axis distance under which two crossings count as the same vehicle.
    pub centroid_match_tolerance: f32,
    /// Crossings closer than this in time (and within tolerance) are duplicates.
    pub dedup_time_threshold: Duration,
    pub dedup_window_capacity: usize,
    /// Grid size for exact centroid matching (1.0 = rounded integer pixels).
    pub track_quantization_px: f32,
    /// Nearest-centroid fallback radius; 0 disables it.
    pub track_match_distance: f32,
    pub track_stale_after: Duration,
}

impl Default for TrackerSettings {
    fn default() -> Self {
        Self {
            centroid_match_tolerance: 20.0,
            dedup_time_threshold: Duration::from_secs(1),
            dedup_window_capacity: 100,
            track_quantization_px: 1.0,
            track_match_distance: 60.0,
            track_stale_after: Duration::from_secs(2),
        }
    }
}

impl TrackerSettings {
    pub fn validate(&self) -> Result<()> {
        if !(self.centroid_match_tolerance.is_finite() && self.centroid_match_tolerance > 0.0) {
            return Err(anyhow!("centroid_match_tolerance must be > 0"));
        }
        if self.dedup_time_threshold.is_zero() {
            return Err(anyhow!("dedup_time_threshold must be > 0"));
        }
        if self.dedup_window_capacity == 0 {
            return Err(anyhow!("dedup_window_capacity must be >= 1"));
        }
        if !(self.track_quantization_px.is_finite() && self.track_quantization_px > 0.0) {
            return Err(anyhow!("track_quantization_px must be > 0"));
        }
        if !(self.track_match_distance.is_finite() && self.track_match_distance >= 0.0) {
            return Err(anyhow!("track_match_distance must be >= 0"));
        }
        Ok(())
    }
}

/// Identity assignment, crossing state and deduplication for one camera.
#[derive(Debug)]
pub struct CrossingTracker {
    identities: IdentityAssigner,
    machine: LineCrossingMachine,
    dedup: DedupWindow,
}

impl CrossingTracker {
    pub fn new(lines: CountingLines, settings: &TrackerSettings) -> Result<Self> {
        settings.validate()?;
        Ok(Self {
            identities: IdentityAssigner::new(
                settings.track_quantization_px,
                settings.track_match_distance,
                settings.track_stale_after,
            ),
            machine: LineCrossingMachine::new(lines),
            dedup: DedupWindow::new(
                settings.dedup_window_capacity,
                settings.centroid_match_tolerance,
                settings.dedup_time_threshold,
            ),
        })
    }

    /// Process the detections of one sampled frame.
    pub fn observe(&mut self, boxes: &[BoundingBox], timestamp: Duration) -> Vec<CrossingEvent> {
        let centers: Vec<Point> = boxes.iter().map(BoundingBox::center).collect();
        self.observe_centers(&centers, timestamp)
    }

    /// Process detection centroids of one sampled frame, in detection order.
    pub fn observe_centers(&mut self, centers: &[Point], timestamp: Duration) -> Vec<CrossingEvent> {
        // Drop tracks unseen for too long before matching, so a new vehicle
        // never inherits an old track's zone state.
        let evicted = self.identities.evict_stale(timestamp);
        if evicted > 0 {
            log::debug!("evicted {} stale tracks ({} live)", evicted, self.identities.len());
        }

        let ids = self.identities.assign(centers, timestamp);
        let mut events = Vec::new();

        for id in ids {
            let Some(track) = self.identities.track_mut(id) else {
                continue;
            };
            if let Some(event) = self.machine.evaluate(track, &mut self.dedup, timestamp) {
                log::info!(
                    "track {} {} at ({:.0}, {:.0}) t={:.2}s",
                    track.id,
                    event.kind.as_str(),
                    track.center.x,
                    track.center.y,
                    timestamp.as_secs_f64()
                );
                events.push(event);
            }
        }

        events
    }

    pub fn live_tracks(&self) -> usize {
        self.identities.len()
    }

    pub fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    pub fn lines(&self) -> &CountingLines {
        self.machine.lines()
    }
}
