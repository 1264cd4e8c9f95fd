//! Frame sampling.
//!
//! `FrameSampler` reads raw frames from a source and forwards every Nth one
//! (1-indexed: with N=3 the 3rd, 6th, 9th... reads are forwarded),
//! optionally downscaled to a target width. Corrupt reads count toward the
//! cadence and are skipped. The first end-of-stream or stream failure is
//! latched; later polls report the same end.

use anyhow::{anyhow, Result};

use super::{Capture, FrameSource};
use crate::frame::Frame;

/// Why a stream stopped producing frames.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamEnd {
    /// The source reported end of stream.
    Exhausted,
    /// The source failed and cannot continue.
    Failed(String),
    /// A stop was requested before the stream ended.
    Stopped,
}

impl StreamEnd {
    pub fn is_failure(&self) -> bool {
        matches!(self, StreamEnd::Failed(_))
    }
}

/// Result of one raw read through the sampler.
#[derive(Debug)]
pub enum Sample {
    /// A frame selected for detection.
    Frame(Frame),
    /// A raw read that was not forwarded (off-cadence or corrupt).
    Skipped,
    Ended(StreamEnd),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    /// Raw reads, corrupt ones included.
    pub frames_read: u64,
    pub frames_sampled: u64,
    pub frames_corrupt: u64,
}

pub struct FrameSampler<S> {
    source: S,
    interval: u64,
    target_width: Option<u32>,
    stats: SamplerStats,
    ended: Option<StreamEnd>,
}

impl<S: FrameSource> FrameSampler<S> {
    pub fn new(source: S, interval: u32, target_width: Option<u32>) -> Result<Self> {
        if interval == 0 {
            return Err(anyhow!("frame interval must be >= 1"));
        }
        if target_width == Some(0) {
            return Err(anyhow!("target width must be > 0"));
        }
        Ok(Self {
            source,
            interval: u64::from(interval),
            target_width,
            stats: SamplerStats::default(),
            ended: None,
        })
    }

    /// Perform one raw read.
    pub fn poll(&mut self) -> Sample {
        if let Some(end) = &self.ended {
            return Sample::Ended(end.clone());
        }

        match self.source.next_frame() {
            Ok(Capture::Frame(frame)) => {
                self.stats.frames_read += 1;
                if self.stats.frames_read % self.interval != 0 {
                    return Sample::Skipped;
                }
                let frame = match self.target_width {
                    Some(width) => match frame.resized_to_width(width) {
                        Ok(frame) => frame,
                        Err(e) => {
                            self.stats.frames_corrupt += 1;
                            log::debug!("dropping frame that could not be resized: {:#}", e);
                            return Sample::Skipped;
                        }
                    },
                    None => frame,
                };
                self.stats.frames_sampled += 1;
                Sample::Frame(frame)
            }
            Ok(Capture::Corrupt(reason)) => {
                self.stats.frames_read += 1;
                self.stats.frames_corrupt += 1;
                log::debug!("skipping corrupt frame from {}: {}", self.source.describe(), reason);
                Sample::Skipped
            }
            Ok(Capture::EndOfStream) => self.finish(StreamEnd::Exhausted),
            Err(e) => {
                log::error!("video source {} failed: {:#}", self.source.describe(), e);
                self.finish(StreamEnd::Failed(format!("{:#}", e)))
            }
        }
    }

    /// Mark the stream as stopped; no further reads reach the source.
    pub fn stop(&mut self) -> StreamEnd {
        self.ended.get_or_insert(StreamEnd::Stopped).clone()
    }

    pub fn end(&self) -> Option<&StreamEnd> {
        self.ended.as_ref()
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    pub fn interval(&self) -> u32 {
        self.interval as u32
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    fn finish(&mut self, end: StreamEnd) -> Sample {
        self.ended = Some(end.clone());
        Sample::Ended(end)
    }
}

/// Yields sampled frames until the stream ends; see [`FrameSampler::end`] for why.
impl<S: FrameSource> Iterator for FrameSampler<S> {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        loop {
            match self.poll() {
                Sample::Frame(frame) => return Some(frame),
                Sample::Skipped => continue,
                Sample::Ended(_) => return None,
            }
        }
    }
}
