//! Crossing event delivery.
//!
//! The pipeline hands each event to an `EventSink` and moves on. Delivery is
//! fire-and-forget: a sink must not block the worker, and a delivery error is
//! logged by the pipeline, never retried.
//!
//! Implementations:
//! - `mpsc::Sender<CrossingEvent>` (in-process consumers)
//! - `CounterInbox` (occupancy counter inbox, see `occupancy`)
//! - `JsonLinesSink` (service schema, one object per line)
//! - `ThreadedSink` (moves a blocking sink such as `JsonLinesSink` onto its own thread)
//! - `MqttSink` (feature: sink-mqtt)

#[cfg(feature = "sink-mqtt")]
mod mqtt;

#[cfg(feature = "sink-mqtt")]
pub use mqtt::{MqttSink, MqttSinkConfig};

use anyhow::{anyhow, Context, Result};
use std::io::Write;
use std::sync::mpsc;
use std::thread::JoinHandle;

use crate::CrossingEvent;

pub trait EventSink: Send {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()>;
}

impl<T: EventSink + ?Sized> EventSink for Box<T> {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        (**self).deliver(event)
    }
}

impl EventSink for mpsc::Sender<CrossingEvent> {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        self.send(event)
            .map_err(|_| anyhow!("event receiver disconnected"))
    }
}

/// Writes each event as one JSON object per line, flushing after each.
///
/// Writes block on the underlying writer; wrap it in a `ThreadedSink` before
/// handing it to the pipeline.
pub struct JsonLinesSink<W> {
    out: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write + Send> EventSink for JsonLinesSink<W> {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        let line = serde_json::to_string(&event).context("serialize crossing event")?;
        writeln!(self.out, "{}", line).context("write crossing event")?;
        self.out.flush().context("flush crossing event")?;
        Ok(())
    }
}

/// Queue in front of a sink that runs on its own thread.
///
/// `deliver` only enqueues, so a slow writer never stalls the pipeline worker.
/// Dropping every `ThreadedSink` lets the worker drain the queue and exit;
/// `SinkWorker::join` waits for that.
#[derive(Debug)]
pub struct ThreadedSink {
    name: String,
    tx: mpsc::Sender<CrossingEvent>,
}

impl ThreadedSink {
    pub fn spawn<K: EventSink + 'static>(name: &str, mut inner: K) -> Result<(Self, SinkWorker)> {
        let (tx, rx) = mpsc::channel::<CrossingEvent>();
        let worker_name = name.to_string();
        let join = std::thread::Builder::new()
            .name(format!("sink-{}", name))
            .spawn(move || {
                let mut delivered = 0u64;
                for event in rx {
                    match inner.deliver(event) {
                        Ok(()) => delivered += 1,
                        Err(e) => log::warn!("{} sink dropped a crossing event: {:#}", worker_name, e),
                    }
                }
                delivered
            })
            .with_context(|| format!("spawn {} sink worker", name))?;
        Ok((
            Self {
                name: name.to_string(),
                tx,
            },
            SinkWorker {
                name: name.to_string(),
                join,
            },
        ))
    }
}

impl EventSink for ThreadedSink {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        self.tx
            .send(event)
            .map_err(|_| anyhow!("{} sink worker has stopped", self.name))
    }
}

/// Owner side of a `ThreadedSink` worker thread.
#[derive(Debug)]
pub struct SinkWorker {
    name: String,
    join: JoinHandle<u64>,
}

impl SinkWorker {
    /// Wait until the queue is drained; returns the number of events the
    /// inner sink accepted. Every `ThreadedSink` must be dropped first.
    pub fn join(self) -> Result<u64> {
        self.join
            .join()
            .map_err(|_| anyhow!("{} sink worker panicked", self.name))
    }
}

/// Delivers every event to each inner sink; one failing sink does not starve the others.
pub struct FanOut {
    sinks: Vec<Box<dyn EventSink>>,
}

impl FanOut {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn with(mut self, sink: impl EventSink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl Default for FanOut {
    fn default() -> Self {
        Self::new()
    }
}

impl EventSink for FanOut {
    fn deliver(&mut self, event: CrossingEvent) -> Result<()> {
        let mut failures = Vec::new();
        for sink in &mut self.sinks {
            if let Err(e) = sink.deliver(event) {
                failures.push(format!("{:#}", e));
            }
        }
        if failures.is_empty() {
            Ok(())
        } else {
            Err(anyhow!("{} sink(s) failed: {}", failures.len(), failures.join("; ")))
        }
    }
}
