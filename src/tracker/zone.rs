use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::{EventKind, Point};

/// Default cross-axis tolerance around a counting line, in pixels.
pub const DEFAULT_ZONE_MARGIN: f32 = 5.0;

/// Axis-aligned counting band. Corners are normalized so that `x1 < x2` and `y1 <= y2`.
///
/// A horizontal counting line is simply a zone with `y1 == y2`; the margin
/// passed to [`Zone::contains`] gives it thickness.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
}

impl Zone {
    pub fn new(a: Point, b: Point) -> Result<Self> {
        if ![a.x, a.y, b.x, b.y].iter().all(|v| v.is_finite()) {
            return Err(anyhow!("zone corners must be finite"));
        }
        let zone = Self {
            x1: a.x.min(b.x),
            y1: a.y.min(b.y),
            x2: a.x.max(b.x),
            y2: a.y.max(b.y),
        };
        // Membership is strict on the x axis, so a zero-width zone could never match.
        if zone.x1 >= zone.x2 {
            return Err(anyhow!(
                "zone ({}, {})-({}, {}) has no horizontal extent",
                a.x,
                a.y,
                b.x,
                b.y
            ));
        }
        Ok(zone)
    }

    pub fn from_corners(corners: [[f32; 2]; 2]) -> Result<Self> {
        let [[x1, y1], [x2, y2]] = corners;
        Self::new(Point::new(x1, y1), Point::new(x2, y2))
    }

    pub fn corners(&self) -> [[f32; 2]; 2] {
        [[self.x1, self.y1], [self.x2, self.y2]]
    }

    /// Point-in-band test: open on x, closed and widened by `margin` on y.
    pub fn contains(&self, p: Point, margin: f32) -> bool {
        self.x1 < p.x && p.x < self.x2 && self.y1 - margin <= p.y && p.y <= self.y2 + margin
    }

    /// True when some point satisfies `contains` for both zones.
    fn overlaps(&self, other: &Zone, margin: f32) -> bool {
        let x = self.x1.max(other.x1) < self.x2.min(other.x2);
        let y = (self.y1 - margin).max(other.y1 - margin) <= (self.y2 + margin).min(other.y2 + margin);
        x && y
    }
}

/// Which counting line a zone represents.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ZoneRole {
    Entry,
    Exit,
}

impl ZoneRole {
    pub fn event_kind(self) -> EventKind {
        match self {
            Self::Entry => EventKind::Entered,
            Self::Exit => EventKind::Exited,
        }
    }
}

/// Zone membership of one centroid, after precedence is applied.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Membership {
    pub entry: bool,
    pub exit: bool,
}

/// The configured entry and exit zones plus their shared margin.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CountingLines {
    entry: Zone,
    exit: Zone,
    margin: f32,
}

impl CountingLines {
    /// Validated constructor: rejects negative margins and zones that a single
    /// centroid could satisfy at the same time.
    pub fn new(entry: Zone, exit: Zone, margin: f32) -> Result<Self> {
        let lines = Self::allow_overlap(entry, exit, margin)?;
        if entry.overlaps(&exit, margin) {
            return Err(anyhow!(
                "entry zone {:?} and exit zone {:?} overlap (margin {})",
                entry.corners(),
                exit.corners(),
                margin
            ));
        }
        Ok(lines)
    }

    /// Like [`CountingLines::new`] but skips the overlap check. Overlapping
    /// zones still never double-emit: the entry zone takes precedence.
    pub fn allow_overlap(entry: Zone, exit: Zone, margin: f32) -> Result<Self> {
        if !margin.is_finite() || margin < 0.0 {
            return Err(anyhow!("zone margin must be a non-negative number of pixels"));
        }
        Ok(Self {
            entry,
            exit,
            margin,
        })
    }

    pub fn entry(&self) -> &Zone {
        &self.entry
    }

    pub fn exit(&self) -> &Zone {
        &self.exit
    }

    pub fn margin(&self) -> f32 {
        self.margin
    }

    /// Membership for a centroid. Entry is checked first; a centroid inside the
    /// entry zone is never reported inside the exit zone.
    pub fn membership(&self, center: Point) -> Membership {
        let entry = self.entry.contains(center, self.margin);
        let exit = !entry && self.exit.contains(center, self.margin);
        Membership { entry, exit }
    }
}
