//! Frame ingestion.
//!
//! This module provides the sources of decoded frames and the sampler that
//! throttles them before detection:
//! - `stub://` synthetic scenes (testing, demos)
//! - local files and network streams via FFmpeg (feature: ingest-ffmpeg)
//! - `FrameSampler`: every Nth frame, optionally downscaled
//!
//! Paths and URIs are treated uniformly; transport details belong to the decoder.
//!
//! A source distinguishes three outcomes per read:
//! - a decoded frame
//! - a corrupt frame (skipped by the sampler, never fatal)
//! - end of stream
//!
//! An `Err` from a source is a terminal stream failure.

#[cfg(feature = "ingest-ffmpeg")]
mod ffmpeg;
pub mod sampler;
pub mod synthetic;
pub mod video;

pub use sampler::{FrameSampler, Sample, SamplerStats, StreamEnd};
pub use synthetic::{SyntheticConfig, SyntheticSource};
pub use video::VideoSource;

use anyhow::Result;

use crate::frame::Frame;

/// Outcome of one raw read from a source.
#[derive(Debug)]
pub enum Capture {
    Frame(Frame),
    /// The source read something it could not decode; reading can continue.
    Corrupt(String),
    EndOfStream,
}

/// Sequential, non-restartable supplier of decoded frames.
pub trait FrameSource: Send {
    /// Human-readable source identifier for logs.
    fn describe(&self) -> String;

    /// Read the next frame. `Err` means the stream failed and cannot continue.
    fn next_frame(&mut self) -> Result<Capture>;
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn describe(&self) -> String {
        (**self).describe()
    }

    fn next_frame(&mut self) -> Result<Capture> {
        (**self).next_frame()
    }
}
