//! Single-writer counter service.
//!
//! The service thread owns the `Occupancy` and its store. Crossing events from
//! the pipeline, manual adjustments and schedule ticks all arrive on one
//! `mpsc` inbox and are applied in arrival order, so no lock is needed.

use anyhow::{anyhow, Context, Result};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread::JoinHandle;

use super::{AdminSchedule, Occupancy, OccupancyStore, Section};
use crate::sink::EventSink;
use crate::CrossingEvent;

enum Command {
    Crossing(CrossingEvent),
    Adjust {
        section: Section,
        delta: i32,
        reply: Sender<Result<u32>>,
    },
    SetSchedule {
        schedule: AdminSchedule,
        hour: u32,
        reply: Sender<Result<()>>,
    },
    Tick {
        hour: u32,
    },
    Snapshot(Sender<Occupancy>),
    Shutdown,
}

pub struct CounterService<St> {
    store: St,
    state: Occupancy,
    inbox: Receiver<Command>,
}

impl<St: OccupancyStore + 'static> CounterService<St> {
    /// Load saved counters, apply the schedule for `hour`, and start the
    /// service thread.
    pub fn spawn(mut store: St, hour: u32) -> Result<CounterHandle> {
        let mut state = store.load().context("load occupancy state")?;
        state.apply_schedule(hour);
        log::info!(
            "occupancy loaded: general={} executive={} reported={} available={}",
            state.general(),
            state.occupied(Section::Executive),
            state.reported(),
            state.available()
        );

        let (tx, rx) = mpsc::channel();
        let service = Self {
            store,
            state,
            inbox: rx,
        };
        let join = std::thread::Builder::new()
            .name("counter-service".to_string())
            .spawn(move || service.run())
            .context("spawn counter service")?;

        Ok(CounterHandle {
            inbox: CounterInbox { tx },
            join: Some(join),
        })
    }

    fn run(mut self) -> Result<Occupancy> {
        while let Ok(command) = self.inbox.recv() {
            match command {
                Command::Crossing(event) => {
                    if !self.state.apply(&event) {
                        log::warn!(
                            "{} at t={:.2}s ignored: general lot at {}",
                            event.kind.as_str(),
                            event.at.as_secs_f64(),
                            self.state.general()
                        );
                    }
                }
                Command::Adjust {
                    section,
                    delta,
                    reply,
                } => {
                    let result = self.adjust(section, delta);
                    match &result {
                        Ok(count) => log::info!("{} adjusted by {} to {}", section, delta, count),
                        Err(e) => log::warn!("{} adjustment rejected: {:#}", section, e),
                    }
                    let _ = reply.send(result);
                }
                Command::SetSchedule {
                    schedule,
                    hour,
                    reply,
                } => {
                    let result = self.commit(|state| {
                        state.set_schedule(schedule, hour);
                        Ok(())
                    });
                    if result.is_ok() {
                        log::info!(
                            "administrative schedule set to {:02}:00-{:02}:00",
                            schedule.start_hour(),
                            schedule.end_hour()
                        );
                    }
                    let _ = reply.send(result);
                }
                Command::Tick { hour } => {
                    if self.state.tick(hour) {
                        log::info!("office hours: executive spaces marked occupied");
                    }
                }
                Command::Snapshot(reply) => {
                    let _ = reply.send(self.state.clone());
                }
                Command::Shutdown => break,
            }
        }

        self.store
            .save(&self.state)
            .context("save occupancy on shutdown")?;
        log::info!(
            "occupancy saved: general={} reported={}",
            self.state.general(),
            self.state.reported()
        );
        Ok(self.state)
    }

    fn adjust(&mut self, section: Section, delta: i32) -> Result<u32> {
        let mut count = 0;
        self.commit(|state| {
            count = state.adjust(section, delta)?;
            Ok(())
        })?;
        Ok(count)
    }

    /// Apply `change` to a copy, save it, and only then make it current.
    fn commit(&mut self, change: impl FnOnce(&mut Occupancy) -> Result<()>) -> Result<()> {
        let mut next = self.state.clone();
        change(&mut next)?;
        self.store.save(&next).context("save occupancy")?;
        self.state = next;
        Ok(())
    }
}

/// Cloneable sender half of the counter inbox.
#[derive(Clone, Debug)]
pub struct CounterInbox {
    tx: Sender<Command>,
}

impl CounterInbox {
    fn send(&self, command: Command) -> Result<()> {
        self.tx
            .send(command)
            .map_err(|_| anyhow!("counter service is not running"))
    }

    fn request<T>(&self, build: impl FnOnce(Sender<T>) -> Command) -> Result<T> {
        let (reply, response) = mpsc::channel();
        self.send(build(reply))?;
        response
            .recv()
            .map_err(|_| anyhow!("counter service stopped before replying"))
    }

    pub fn crossing(&self, event: CrossingEvent) -> Result<()> {
        self.send(Command::Crossing(event))
    }

    pub fn adjust(&self, section: Section, delta: i32) -> Result<u32> {
        self.request(|reply| Command::Adjust {
            section,
            delta,
            reply,
        })?
    }

    pub fn set_schedule(&self, schedule: AdminSchedule, hour: u32) -> Result<()> {
        self.request(|reply| Command::SetSchedule {
            schedule,
            hour,
            reply,
        })?
    }

    pub fn tick(&self, hour: u32) -> Result<()> {
        self.send(Command::Tick { hour })
    }

    pub fn snapshot(&self) -> Result<Occupancy> {
        self.request(Command::Snapshot)
    }
}

impl std::fmt::Debug for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Command::Crossing(event) => write!(f, "Crossing({:?})", event.kind),
            Command::Adjust { section, delta, .. } => write!(f, "Adjust({}, {})", section, delta),
            Command::SetSchedule { schedule, .. } => write!(f, "SetSchedule({:?})", schedule),
            Command::Tick { hour } => write!(f, "Tick({})", hour),
            Command::Snapshot(_) => f.write_str("Snapshot"),
            Command::Shutdown => f.write_str("Shutdown"),
        }
    }
}

impl EventSink for CounterInbox {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        self.crossing(event)
    }
}

/// Owner handle: the inbox plus the service thread.
#[derive(Debug)]
pub struct CounterHandle {
    inbox: CounterInbox,
    join: Option<JoinHandle<Result<Occupancy>>>,
}

impl CounterHandle {
    pub fn inbox(&self) -> CounterInbox {
        self.inbox.clone()
    }

    pub fn adjust(&self, section: Section, delta: i32) -> Result<u32> {
        self.inbox.adjust(section, delta)
    }

    pub fn set_schedule(&self, schedule: AdminSchedule, hour: u32) -> Result<()> {
        self.inbox.set_schedule(schedule, hour)
    }

    pub fn tick(&self, hour: u32) -> Result<()> {
        self.inbox.tick(hour)
    }

    pub fn snapshot(&self) -> Result<Occupancy> {
        self.inbox.snapshot()
    }

    /// Stop the service, persist the counters and return the final state.
    /// Commands queued before the call are applied first.
    pub fn shutdown(mut self) -> Result<Occupancy> {
        // A send error means the thread already exited; join reports why.
        let _ = self.inbox.send(Command::Shutdown);
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("counter service already joined"))?;
        join.join()
            .map_err(|_| anyhow!("counter service thread panicked"))?
    }
}
