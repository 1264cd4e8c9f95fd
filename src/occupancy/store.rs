use anyhow::{anyhow, Result};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;

use super::{AdminSchedule, Occupancy, Section};

const KEY_GENERAL: &str = "occupied_general";
const KEY_START: &str = "admin_start_hour";
const KEY_END: &str = "admin_end_hour";

/// Persistence for the occupancy counters.
pub trait OccupancyStore: Send {
    /// Load saved counters; anything never saved falls back to its default.
    fn load(&mut self) -> Result<Occupancy>;

    fn save(&mut self, occupancy: &Occupancy) -> Result<()>;
}

/// Counters in a sqlite key/value table.
pub struct SqliteOccupancyStore {
    conn: Connection,
}

impl SqliteOccupancyStore {
    pub fn open(db_path: &str) -> Result<Self> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<()> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS occupancy (
              key TEXT PRIMARY KEY,
              value INTEGER NOT NULL
            );
            "#,
        )?;
        Ok(())
    }

    fn read_all(&self) -> Result<BTreeMap<String, i64>> {
        let mut stmt = self.conn.prepare("SELECT key, value FROM occupancy")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        let mut values = BTreeMap::new();
        for row in rows {
            let (key, value) = row?;
            values.insert(key, value);
        }
        Ok(values)
    }
}

fn section_key(section: Section) -> String {
    format!("occupied_{}", section.as_str())
}

fn stored_u32(values: &BTreeMap<String, i64>, key: &str, default: u32) -> Result<u32> {
    match values.get(key) {
        Some(&value) => u32::try_from(value).map_err(|_| anyhow!("corrupt occupancy value for '{}': {}", key, value)),
        None => Ok(default),
    }
}

impl OccupancyStore for SqliteOccupancyStore {
    fn load(&mut self) -> Result<Occupancy> {
        let values = self.read_all()?;
        let defaults = AdminSchedule::default();
        let schedule = AdminSchedule::new(
            stored_u32(&values, KEY_START, defaults.start_hour())?,
            stored_u32(&values, KEY_END, defaults.end_hour())?,
        )?;
        let mut sections = Section::ALL.map(|s| (s, 0));
        for (section, count) in &mut sections {
            *count = stored_u32(&values, &section_key(*section), 0)?;
        }
        if values.is_empty() {
            log::info!("no saved occupancy state, using defaults");
        }
        Ok(Occupancy::from_parts(
            stored_u32(&values, KEY_GENERAL, 0)?,
            sections,
            schedule,
        ))
    }

    fn save(&mut self, occupancy: &Occupancy) -> Result<()> {
        let tx = self.conn.transaction()?;
        {
            let mut stmt = tx.prepare(
                "INSERT INTO occupancy(key, value) VALUES (?1, ?2)
                 ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            )?;
            stmt.execute(params![KEY_GENERAL, occupancy.general()])?;
            for section in Section::ALL {
                stmt.execute(params![section_key(section), occupancy.occupied(section)])?;
            }
            let schedule = occupancy.schedule();
            stmt.execute(params![KEY_START, schedule.start_hour()])?;
            stmt.execute(params![KEY_END, schedule.end_hour()])?;
        }
        tx.commit()?;
        Ok(())
    }
}

/// In-memory store; keeps the last saved snapshot.
#[derive(Debug, Default)]
pub struct MemoryOccupancyStore {
    saved: Option<Occupancy>,
    saves: u64,
}

impl MemoryOccupancyStore {
    pub fn new(initial: Option<Occupancy>) -> Self {
        Self {
            saved: initial,
            saves: 0,
        }
    }

    pub fn saved(&self) -> Option<&Occupancy> {
        self.saved.as_ref()
    }

    pub fn saves(&self) -> u64 {
        self.saves
    }
}

impl OccupancyStore for MemoryOccupancyStore {
    fn load(&mut self) -> Result<Occupancy> {
        Ok(self.saved.clone().unwrap_or_default())
    }

    fn save(&mut self, occupancy: &Occupancy) -> Result<()> {
        self.saved = Some(occupancy.clone());
        self.saves += 1;
        Ok(())
    }
}
