//! Parking occupancy counters.
//!
//! Crossing events move the general lot count; staff adjust the special
//! sections by hand. Executive spaces follow the administrative schedule:
//! full inside office hours, empty outside them.
//!
//! - `Occupancy`: the counters and their rules
//! - `store`: persistence (`SqliteOccupancyStore`)
//! - `service`: the single-writer `CounterService` thread and its inbox

mod service;
mod store;

pub use service::{CounterHandle, CounterInbox, CounterService};
pub use store::{MemoryOccupancyStore, OccupancyStore, SqliteOccupancyStore};

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{CrossingEvent, EventKind};

/// Spaces in the general lot.
pub const GENERAL_CAPACITY: u32 = 214;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Section {
    Executive,
    Reserved,
    Disabled,
    Mechanic,
    Ambulance,
}

impl Section {
    pub const ALL: [Section; 5] = [
        Section::Executive,
        Section::Reserved,
        Section::Disabled,
        Section::Mechanic,
        Section::Ambulance,
    ];

    pub fn capacity(self) -> u32 {
        match self {
            Section::Executive => 14,
            Section::Reserved => 10,
            Section::Disabled => 7,
            Section::Mechanic => 2,
            Section::Ambulance => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Section::Executive => "executive",
            Section::Reserved => "reserved",
            Section::Disabled => "disabled",
            Section::Mechanic => "mechanic",
            Section::Ambulance => "ambulance",
        }
    }

    fn slot(self) -> usize {
        self as usize
    }
}

impl fmt::Display for Section {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Section {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Section::ALL
            .into_iter()
            .find(|section| section.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| {
                anyhow!(
                    "unknown section '{}' (expected one of: executive, reserved, disabled, mechanic, ambulance)",
                    s
                )
            })
    }
}

/// Office hours as a half-open range of local hours, `start <= hour < end`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "ScheduleHours")]
pub struct AdminSchedule {
    start_hour: u32,
    end_hour: u32,
}

impl Default for AdminSchedule {
    fn default() -> Self {
        Self {
            start_hour: 8,
            end_hour: 17,
        }
    }
}

#[derive(Deserialize)]
struct ScheduleHours {
    start_hour: u32,
    end_hour: u32,
}

impl TryFrom<ScheduleHours> for AdminSchedule {
    type Error = anyhow::Error;

    fn try_from(hours: ScheduleHours) -> Result<Self> {
        AdminSchedule::new(hours.start_hour, hours.end_hour)
    }
}

impl AdminSchedule {
    pub fn new(start_hour: u32, end_hour: u32) -> Result<Self> {
        if start_hour > 23 || end_hour > 23 {
            return Err(anyhow!("schedule hours must be within 0-23"));
        }
        Ok(Self {
            start_hour,
            end_hour,
        })
    }

    pub fn start_hour(&self) -> u32 {
        self.start_hour
    }

    pub fn end_hour(&self) -> u32 {
        self.end_hour
    }

    /// An empty or inverted window never contains any hour.
    pub fn contains(&self, hour: u32) -> bool {
        self.start_hour <= hour && hour < self.end_hour
    }
}

/// Lot counters. Every mutation keeps each count within `[0, capacity]`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OccupancyParts")]
pub struct Occupancy {
    general: u32,
    sections: [u32; 5],
    schedule: AdminSchedule,
}

impl Default for Occupancy {
    fn default() -> Self {
        Self {
            general: 0,
            sections: [0; 5],
            schedule: AdminSchedule::default(),
        }
    }
}

/// Wire form; deserializing goes through `from_parts` so counts are clamped.
#[derive(Deserialize)]
struct OccupancyParts {
    general: u32,
    sections: [u32; 5],
    schedule: AdminSchedule,
}

impl From<OccupancyParts> for Occupancy {
    fn from(parts: OccupancyParts) -> Self {
        let sections = Section::ALL.map(|section| (section, parts.sections[section.slot()]));
        Occupancy::from_parts(parts.general, sections, parts.schedule)
    }
}

impl Occupancy {
    /// Build from stored values, clamping each count to its capacity.
    pub fn from_parts(general: u32, sections: [(Section, u32); 5], schedule: AdminSchedule) -> Self {
        let mut occupancy = Self {
            general: general.min(GENERAL_CAPACITY),
            sections: [0; 5],
            schedule,
        };
        for (section, count) in sections {
            occupancy.sections[section.slot()] = count.min(section.capacity());
        }
        occupancy
    }

    pub fn general(&self) -> u32 {
        self.general
    }

    pub fn occupied(&self, section: Section) -> u32 {
        self.sections[section.slot()]
    }

    pub fn schedule(&self) -> AdminSchedule {
        self.schedule
    }

    /// Occupied spaces as shown to drivers: general plus executive.
    pub fn reported(&self) -> u32 {
        self.general + self.occupied(Section::Executive)
    }

    pub fn available(&self) -> u32 {
        GENERAL_CAPACITY.saturating_sub(self.reported())
    }

    /// Count a vehicle in. Ignored when the lot is already full.
    pub fn vehicle_entered(&mut self) -> bool {
        if self.general < GENERAL_CAPACITY {
            self.general += 1;
            true
        } else {
            false
        }
    }

    /// Count a vehicle out. Ignored when the lot is already empty.
    pub fn vehicle_exited(&mut self) -> bool {
        if self.general > 0 {
            self.general -= 1;
            true
        } else {
            false
        }
    }

    pub fn apply(&mut self, event: &CrossingEvent) -> bool {
        match event.kind {
            EventKind::Entered => self.vehicle_entered(),
            EventKind::Exited => self.vehicle_exited(),
        }
    }

    /// Move a section count by `delta`. The general count moves with it,
    /// saturating at its own bounds. Returns the new section count.
    pub fn adjust(&mut self, section: Section, delta: i32) -> Result<u32> {
        let current = i64::from(self.occupied(section));
        let next = current + i64::from(delta);
        if next < 0 || next > i64::from(section.capacity()) {
            return Err(anyhow!(
                "{} would be {} (allowed 0-{})",
                section,
                next,
                section.capacity()
            ));
        }
        self.sections[section.slot()] = next as u32;
        let general = (i64::from(self.general) + i64::from(delta)).clamp(0, i64::from(GENERAL_CAPACITY));
        self.general = general as u32;
        Ok(next as u32)
    }

    /// Executive spaces are full inside office hours and empty outside them.
    pub fn apply_schedule(&mut self, hour: u32) {
        let executive = if self.schedule.contains(hour) {
            Section::Executive.capacity()
        } else {
            0
        };
        self.sections[Section::Executive.slot()] = executive;
    }

    /// Periodic check: fills executive spaces once office hours start.
    /// Outside the window manual adjustments are left alone.
    pub fn tick(&mut self, hour: u32) -> bool {
        let full = Section::Executive.capacity();
        if self.schedule.contains(hour) && self.occupied(Section::Executive) != full {
            self.sections[Section::Executive.slot()] = full;
            return true;
        }
        false
    }

    /// Replace the schedule and re-apply it for the current hour.
    pub fn set_schedule(&mut self, schedule: AdminSchedule, hour: u32) {
        self.schedule = schedule;
        self.apply_schedule(hour);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn entries_stop_at_capacity() {
        let mut occ = Occupancy::from_parts(
            GENERAL_CAPACITY - 1,
            Section::ALL.map(|s| (s, 0)),
            AdminSchedule::default(),
        );
        assert!(occ.vehicle_entered());
        assert!(!occ.vehicle_entered());
        assert_eq!(occ.general(), GENERAL_CAPACITY);
        assert_eq!(occ.available(), 0);
    }

    #[test]
    fn exits_stop_at_zero() {
        let mut occ = Occupancy::default();
        assert!(!occ.apply(&CrossingEvent::exited(Duration::ZERO)));
        assert!(occ.apply(&CrossingEvent::entered(Duration::ZERO)));
        assert!(occ.apply(&CrossingEvent::exited(Duration::ZERO)));
        assert_eq!(occ.general(), 0);
    }

    #[test]
    fn adjust_moves_general_within_bounds() -> Result<()> {
        let mut occ = Occupancy::default();
        assert_eq!(occ.adjust(Section::Reserved, 1)?, 1);
        assert_eq!(occ.general(), 1);
        assert!(occ.adjust(Section::Ambulance, -1).is_err());
        assert_eq!(occ.adjust(Section::Ambulance, 1)?, 1);
        assert!(occ.adjust(Section::Ambulance, 1).is_err());
        assert_eq!(occ.general(), 2);
        assert_eq!(occ.adjust(Section::Reserved, -1)?, 0);
        assert_eq!(occ.general(), 1);
        Ok(())
    }

    #[test]
    fn reported_includes_executive() -> Result<()> {
        let mut occ = Occupancy::default();
        occ.vehicle_entered();
        occ.apply_schedule(9);
        assert_eq!(occ.occupied(Section::Executive), 14);
        assert_eq!(occ.reported(), 15);
        assert_eq!(occ.available(), GENERAL_CAPACITY - 15);
        occ.apply_schedule(17);
        assert_eq!(occ.reported(), 1);
        Ok(())
    }

    #[test]
    fn tick_only_fills_inside_window() -> Result<()> {
        let mut occ = Occupancy::default();
        assert!(!occ.tick(7));
        assert!(occ.tick(8));
        assert!(!occ.tick(8));
        occ.adjust(Section::Executive, -3)?;
        assert!(!occ.tick(20));
        assert_eq!(occ.occupied(Section::Executive), 11);
        assert!(occ.tick(16));
        Ok(())
    }

    #[test]
    fn schedule_validation_and_window() -> Result<()> {
        assert!(AdminSchedule::new(8, 24).is_err());
        let night = AdminSchedule::new(22, 6)?;
        assert!(!night.contains(23));
        let mut occ = Occupancy::default();
        occ.set_schedule(AdminSchedule::new(6, 10)?, 6);
        assert_eq!(occ.occupied(Section::Executive), 14);
        Ok(())
    }

    #[test]
    fn sections_parse_case_insensitively() -> Result<()> {
        assert_eq!("Mechanic".parse::<Section>()?, Section::Mechanic);
        assert!("valet".parse::<Section>().is_err());
        Ok(())
    }

    #[test]
    fn stored_values_are_clamped() {
        let occ = Occupancy::from_parts(
            500,
            [
                (Section::Executive, 99),
                (Section::Reserved, 3),
                (Section::Disabled, 0),
                (Section::Mechanic, 0),
                (Section::Ambulance, 4),
            ],
            AdminSchedule::default(),
        );
        assert_eq!(occ.general(), GENERAL_CAPACITY);
        assert_eq!(occ.occupied(Section::Executive), 14);
        assert_eq!(occ.occupied(Section::Reserved), 3);
        assert_eq!(occ.occupied(Section::Ambulance), 1);
    }

    #[test]
    fn json_round_trip_clamps_counts() {
        let mut occ = Occupancy::default();
        occ.adjust(Section::Reserved, 3).unwrap();
        let json = serde_json::to_string(&occ).unwrap();
        assert_eq!(serde_json::from_str::<Occupancy>(&json).unwrap(), occ);

        let raw = r#"{"general": 500, "sections": [99, 1, 0, 0, 0], "schedule": {"start_hour": 8, "end_hour": 17}}"#;
        let occ: Occupancy = serde_json::from_str(raw).unwrap();
        assert_eq!(occ.general(), GENERAL_CAPACITY);
        assert_eq!(occ.occupied(Section::Executive), 14);
        assert_eq!(occ.occupied(Section::Reserved), 1);

        let bad = r#"{"general": 0, "sections": [0, 0, 0, 0, 0], "schedule": {"start_hour": 30, "end_hour": 17}}"#;
        assert!(serde_json::from_str::<Occupancy>(bad).is_err());
    }

}
