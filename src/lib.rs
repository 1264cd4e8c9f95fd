//! Vehicle line-crossing counter
//!
//! This crate turns a noisy per-frame stream of object-detector bounding boxes
//! into discrete "vehicle entered" / "vehicle exited" events for a camera that
//! watches two reference lines.
//!
//! # Architecture
//!
//! One crossing produces at most one event. Two mechanisms enforce this jointly:
//!
//! 1. **Edge triggering**: a track only fires when it moves from outside a zone
//!    to inside it, never while it lingers inside.
//! 2. **Deduplication window**: a bounded log of recent crossings suppresses
//!    candidates that are close in space and time to an event already emitted,
//!    even when the identity assigner minted a fresh track for the same vehicle.
//!
//! # Module Structure
//!
//! - `frame`: decoded RGB frames and downscaling
//! - `ingest`: video sources (`stub://` synthetic, ffmpeg files and streams) and the frame sampler
//! - `detect`: detector backends and their registry
//! - `tracker`: zones, identity assignment, the crossing state machine, deduplication
//! - `pipeline`: the single worker thread tying the above together
//! - `sink`: event delivery
//! - `occupancy`: parking occupancy counters fed by crossing events, persisted in sqlite
//! - `control`: loopback socket for manual adjustments to a running daemon
//! - Core types: `Point`, `EventKind`, `CrossingEvent`

use serde::{Deserialize, Serialize};
use std::time::Duration;

pub mod config;
pub mod control;
pub mod detect;
pub mod frame;
pub mod ingest;
pub mod occupancy;
pub mod pipeline;
pub mod sink;
pub mod tracker;

pub use detect::{BackendRegistry, BoundingBox, CpuBackend, DetectorBackend};
pub use frame::Frame;
pub use ingest::{Capture, FrameSampler, FrameSource, Sample, StreamEnd, VideoSource};
pub use occupancy::{
    AdminSchedule, CounterHandle, CounterInbox, CounterService, Occupancy, OccupancyStore, Section,
    SqliteOccupancyStore,
};
pub use pipeline::{CountingPipeline, PipelineHandle, RunOutcome, RunStats, StopSignal};
pub use sink::{EventSink, FanOut, JsonLinesSink, SinkWorker, ThreadedSink};
pub use tracker::{CountingLines, CrossingTracker, DedupWindow, TrackerSettings, Zone};

// -------------------- Geometry --------------------

/// A point in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    pub fn distance(self, other: Point) -> f32 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// -------------------- Events --------------------

#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    /// A vehicle crossed the entry line.
    Entered,
    /// A vehicle crossed the exit line.
    Exited,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Entered => "entered",
            Self::Exited => "exited",
        }
    }
}

/// A crossing delivered to the event sink.
///
/// Serializes to the service schema `{"type": "entered"|"exited", "at": <seconds>}`,
/// where `at` is the stream timestamp of the sampled frame that fired it.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq)]
pub struct CrossingEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    #[serde(with = "secs_f64")]
    pub at: Duration,
}

impl CrossingEvent {
    pub fn entered(at: Duration) -> Self {
        Self {
            kind: EventKind::Entered,
            at,
        }
    }

    pub fn exited(at: Duration) -> Self {
        Self {
            kind: EventKind::Exited,
            at,
        }
    }
}

mod secs_f64 {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crossing_event_uses_service_schema() {
        let ev = CrossingEvent::entered(Duration::from_millis(1500));
        let json = serde_json::to_value(ev).unwrap();
        assert_eq!(json, serde_json::json!({"type": "entered", "at": 1.5}));

        let back: CrossingEvent =
            serde_json::from_str(r#"{"type":"exited","at":2.25}"#).unwrap();
        assert_eq!(back, CrossingEvent::exited(Duration::from_millis(2250)));
    }

    #[test]
    fn crossing_event_rejects_negative_time() {
        let parsed = serde_json::from_str::<CrossingEvent>(r#"{"type":"exited","at":-1.0}"#);
        assert!(parsed.is_err());
    }

    #[test]
    fn point_distance_is_euclidean() {
        assert_eq!(Point::new(0.0, 0.0).distance(Point::new(3.0, 4.0)), 5.0);
    }
}
