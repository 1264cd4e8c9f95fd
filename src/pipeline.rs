//! Counting pipeline.
//!
//! One worker owns the sampler, the detector and the tracker:
//!
//! ```text
//! source -> FrameSampler -> DetectorBackend -> CrossingTracker -> EventSink
//! ```
//!
//! The stop signal is checked once per raw read. A corrupt frame is skipped,
//! a stream failure ends the run with `StreamEnd::Failed`, and a detector
//! failure aborts the run with an error. Nothing is retried.

use anyhow::{anyhow, Context, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::detect::DetectorBackend;
use crate::ingest::{FrameSampler, FrameSource, Sample, StreamEnd};
use crate::sink::EventSink;
use crate::tracker::CrossingTracker;
use crate::{EventKind, Frame};

/// Cooperative stop flag shared between the worker and its owner.
#[derive(Clone, Debug, Default)]
pub struct StopSignal(Arc<AtomicBool>);

impl StopSignal {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RunStats {
    pub frames_read: u64,
    pub frames_sampled: u64,
    pub frames_corrupt: u64,
    pub detections: u64,
    pub entered: u64,
    pub exited: u64,
    /// Events the sink refused.
    pub undelivered: u64,
}

/// How a run ended and what it saw.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunOutcome {
    pub end: StreamEnd,
    pub stats: RunStats,
}

/// Live counters readable from other threads while the worker runs.
#[derive(Debug, Default)]
pub struct Progress {
    frames_read: AtomicU64,
    frames_sampled: AtomicU64,
    entered: AtomicU64,
    exited: AtomicU64,
}

impl Progress {
    pub fn frames_read(&self) -> u64 {
        self.frames_read.load(Ordering::Relaxed)
    }

    pub fn frames_sampled(&self) -> u64 {
        self.frames_sampled.load(Ordering::Relaxed)
    }

    pub fn entered(&self) -> u64 {
        self.entered.load(Ordering::Relaxed)
    }

    pub fn exited(&self) -> u64 {
        self.exited.load(Ordering::Relaxed)
    }

    fn publish(&self, stats: &RunStats) {
        self.frames_read.store(stats.frames_read, Ordering::Relaxed);
        self.frames_sampled.store(stats.frames_sampled, Ordering::Relaxed);
        self.entered.store(stats.entered, Ordering::Relaxed);
        self.exited.store(stats.exited, Ordering::Relaxed);
    }
}

pub struct CountingPipeline<S, D> {
    sampler: FrameSampler<S>,
    detector: D,
    tracker: CrossingTracker,
    confidence_threshold: f32,
    stats: RunStats,
    progress: Arc<Progress>,
}

impl<S: FrameSource, D: DetectorBackend> CountingPipeline<S, D> {
    pub fn new(
        sampler: FrameSampler<S>,
        detector: D,
        tracker: CrossingTracker,
        confidence_threshold: f32,
    ) -> Result<Self> {
        if !(0.0..=1.0).contains(&confidence_threshold) {
            return Err(anyhow!("confidence threshold must be within [0, 1]"));
        }
        Ok(Self {
            sampler,
            detector,
            tracker,
            confidence_threshold,
            stats: RunStats::default(),
            progress: Arc::new(Progress::default()),
        })
    }

    pub fn progress(&self) -> Arc<Progress> {
        Arc::clone(&self.progress)
    }

    pub fn stats(&self) -> RunStats {
        self.stats
    }

    pub fn tracker(&self) -> &CrossingTracker {
        &self.tracker
    }

    /// Run on the calling thread until the stream ends or `stop` is raised.
    pub fn run(&mut self, stop: &StopSignal, sink: &mut dyn EventSink) -> Result<RunOutcome> {
        self.detector
            .warm_up()
            .with_context(|| format!("detector '{}' failed to warm up", self.detector.name()))?;
        log::info!(
            "pipeline started: source={} detector={} interval={} confidence={:.2}",
            self.sampler.source().describe(),
            self.detector.name(),
            self.sampler.interval(),
            self.confidence_threshold
        );

        let end = loop {
            if stop.is_stopped() {
                break self.sampler.stop();
            }
            match self.sampler.poll() {
                Sample::Frame(frame) => self.process(&frame, sink)?,
                Sample::Skipped => {}
                Sample::Ended(end) => break end,
            }
            self.sync_sampler_stats();
        };
        self.sync_sampler_stats();

        match &end {
            StreamEnd::Exhausted => log::info!("stream exhausted"),
            StreamEnd::Stopped => log::info!("pipeline stopped"),
            StreamEnd::Failed(reason) => log::error!("stream failed: {}", reason),
        }
        log::info!(
            "run summary: read={} sampled={} corrupt={} detections={} entered={} exited={}",
            self.stats.frames_read,
            self.stats.frames_sampled,
            self.stats.frames_corrupt,
            self.stats.detections,
            self.stats.entered,
            self.stats.exited
        );

        Ok(RunOutcome {
            end,
            stats: self.stats,
        })
    }

    fn process(&mut self, frame: &Frame, sink: &mut dyn EventSink) -> Result<()> {
        let boxes = self
            .detector
            .detect(frame, self.confidence_threshold)
            .with_context(|| {
                format!(
                    "detector '{}' failed on frame {}",
                    self.detector.name(),
                    frame.index
                )
            })?;
        self.stats.detections += boxes.len() as u64;

        for event in self.tracker.observe(&boxes, frame.timestamp) {
            match event.kind {
                EventKind::Entered => self.stats.entered += 1,
                EventKind::Exited => self.stats.exited += 1,
            }
            if let Err(e) = sink.deliver(event) {
                self.stats.undelivered += 1;
                log::warn!("crossing event not delivered: {:#}", e);
            }
        }
        Ok(())
    }

    fn sync_sampler_stats(&mut self) {
        let sampled = self.sampler.stats();
        self.stats.frames_read = sampled.frames_read;
        self.stats.frames_sampled = sampled.frames_sampled;
        self.stats.frames_corrupt = sampled.frames_corrupt;
        self.progress.publish(&self.stats);
    }
}

impl<S, D> CountingPipeline<S, D>
where
    S: FrameSource + 'static,
    D: DetectorBackend + 'static,
{
    /// Move the pipeline onto its own worker thread.
    pub fn spawn<K: EventSink + 'static>(mut self, mut sink: K) -> Result<PipelineHandle> {
        let stop = StopSignal::new();
        let stop_thread = stop.clone();
        let progress = self.progress();
        let join = std::thread::Builder::new()
            .name("counting-pipeline".to_string())
            .spawn(move || self.run(&stop_thread, &mut sink))
            .context("spawn pipeline worker")?;
        Ok(PipelineHandle {
            stop,
            progress,
            join: Some(join),
        })
    }
}

#[derive(Debug)]
pub struct PipelineHandle {
    stop: StopSignal,
    progress: Arc<Progress>,
    join: Option<JoinHandle<Result<RunOutcome>>>,
}

impl PipelineHandle {
    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    pub fn progress(&self) -> &Progress {
        &self.progress
    }

    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Ask the worker to stop after its current read.
    pub fn stop(&self) {
        self.stop.stop();
    }

    pub fn join(mut self) -> Result<RunOutcome> {
        let join = self
            .join
            .take()
            .ok_or_else(|| anyhow!("pipeline worker already joined"))?;
        join.join()
            .map_err(|_| anyhow!("pipeline worker panicked"))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{BoundingBox, ScriptedBackend};
    use crate::ingest::Capture;
    use crate::tracker::{CountingLines, TrackerSettings, Zone};
    use crate::CrossingEvent;
    use std::sync::mpsc;
    use std::time::Duration;

    struct Blank {
        remaining: u64,
        index: u64,
    }

    impl FrameSource for Blank {
        fn describe(&self) -> String {
            "blank".to_string()
        }

        fn next_frame(&mut self) -> Result<Capture> {
            if self.remaining == 0 {
                return Ok(Capture::EndOfStream);
            }
            self.remaining -= 1;
            self.index += 1;
            let ts = Duration::from_millis(100 * self.index);
            Ok(Capture::Frame(Frame::new(vec![0; 12], 2, 2, self.index, ts)?))
        }
    }

    fn tracker() -> CrossingTracker {
        let lines = CountingLines::new(
            Zone::from_corners([[1000.0, 500.0], [1500.0, 500.0]]).unwrap(),
            Zone::from_corners([[400.0, 500.0], [950.0, 500.0]]).unwrap(),
            5.0,
        )
        .unwrap();
        CrossingTracker::new(lines, &TrackerSettings::default()).unwrap()
    }

    fn vehicle(cx: f32, cy: f32) -> Vec<BoundingBox> {
        vec![BoundingBox::new(cx - 30.0, cy - 20.0, cx + 30.0, cy + 20.0, 0.9)]
    }

    #[test]
    fn counts_a_scripted_crossing() -> Result<()> {
        let detector = ScriptedBackend::new()
            .with_frame(1, vehicle(1200.0, 470.0))
            .with_frame(2, vehicle(1200.0, 500.0))
            .with_frame(3, vehicle(1200.0, 530.0));
        let sampler = FrameSampler::new(Blank { remaining: 5, index: 0 }, 1, None)?;
        let mut pipeline = CountingPipeline::new(sampler, detector, tracker(), 0.5)?;
        let (mut tx, rx) = mpsc::channel::<CrossingEvent>();

        let outcome = pipeline.run(&StopSignal::new(), &mut tx)?;
        assert_eq!(outcome.end, StreamEnd::Exhausted);
        assert_eq!(outcome.stats.frames_read, 5);
        assert_eq!(outcome.stats.detections, 3);
        assert_eq!(outcome.stats.entered, 1);
        let events: Vec<CrossingEvent> = rx.try_iter().collect();
        assert_eq!(events, vec![CrossingEvent::entered(Duration::from_millis(200))]);
        Ok(())
    }

    #[test]
    fn raised_stop_ends_before_reading() -> Result<()> {
        let sampler = FrameSampler::new(Blank { remaining: 5, index: 0 }, 1, None)?;
        let mut pipeline = CountingPipeline::new(sampler, ScriptedBackend::new(), tracker(), 0.5)?;
        let stop = StopSignal::new();
        stop.stop();
        let (mut tx, _rx) = mpsc::channel::<CrossingEvent>();
        let outcome = pipeline.run(&stop, &mut tx)?;
        assert_eq!(outcome.end, StreamEnd::Stopped);
        assert_eq!(outcome.stats.frames_read, 0);
        Ok(())
    }

    #[test]
    fn detector_failure_aborts_run() -> Result<()> {
        let sampler = FrameSampler::new(Blank { remaining: 5, index: 0 }, 1, None)?;
        let detector = ScriptedBackend::new().failing_at(2);
        let mut pipeline = CountingPipeline::new(sampler, detector, tracker(), 0.5)?;
        let (mut tx, _rx) = mpsc::channel::<CrossingEvent>();
        let err = pipeline.run(&StopSignal::new(), &mut tx).err();
        assert!(err.is_some_and(|e| format!("{:#}", e).contains("frame 2")));
        Ok(())
    }

    #[test]
    fn rejects_out_of_range_confidence() -> Result<()> {
        let sampler = FrameSampler::new(Blank { remaining: 0, index: 0 }, 1, None)?;
        assert!(CountingPipeline::new(sampler, ScriptedBackend::new(), tracker(), 1.5).is_err());
        Ok(())
    }

    #[test]
    fn undelivered_events_do_not_stop_the_run() -> Result<()> {
        let detector = ScriptedBackend::new()
            .with_frame(1, vehicle(700.0, 470.0))
            .with_frame(2, vehicle(700.0, 500.0));
        let sampler = FrameSampler::new(Blank { remaining: 3, index: 0 }, 1, None)?;
        let mut pipeline = CountingPipeline::new(sampler, detector, tracker(), 0.5)?;
        let (mut tx, rx) = mpsc::channel::<CrossingEvent>();
        drop(rx);
        let outcome = pipeline.run(&StopSignal::new(), &mut tx)?;
        assert_eq!(outcome.end, StreamEnd::Exhausted);
        assert_eq!(outcome.stats.exited, 1);
        assert_eq!(outcome.stats.undelivered, 1);
        Ok(())
    }
}
