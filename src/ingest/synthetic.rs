//! Synthetic traffic scene for `stub://` sources.
//!
//! Two bright vehicles loop forever on a dark road: one drives down through
//! the right half of the frame, the other drives up through the left half,
//! half a lap behind. With the default counting lines (entry on the right,
//! exit on the left, both at y=500 in a 1920x1080 frame) every lap produces
//! one entry and one exit.

use anyhow::{anyhow, Result};
use std::time::Duration;

use super::{Capture, FrameSource};
use crate::frame::Frame;

const ROAD_LUMA: u8 = 30;
const VEHICLE_LUMA: u8 = 240;

/// Parameters parsed from a `stub://name?key=value&...` URI.
#[derive(Clone, Debug, PartialEq)]
pub struct SyntheticConfig {
    pub name: String,
    pub width: u32,
    pub height: u32,
    pub fps: u32,
    /// Total frames before end of stream; `None` is an endless stream.
    pub frames: Option<u64>,
    /// Vehicle speed in pixels per raw frame.
    pub speed: f32,
    /// Every Nth read is reported corrupt; `None` never.
    pub corrupt_every: Option<u64>,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "lane".to_string(),
            width: 1920,
            height: 1080,
            fps: 30,
            frames: None,
            speed: 2.0,
            corrupt_every: None,
        }
    }
}

impl SyntheticConfig {
    pub fn from_uri(uri: &str) -> Result<Self> {
        let rest = uri
            .strip_prefix("stub://")
            .ok_or_else(|| anyhow!("synthetic source URI must start with stub://"))?;
        let (name, query) = rest.split_once('?').unwrap_or((rest, ""));
        let mut cfg = Self {
            name: if name.is_empty() { "lane".to_string() } else { name.to_string() },
            ..Self::default()
        };

        for pair in query.split('&').filter(|p| !p.is_empty()) {
            let (key, value) = pair
                .split_once('=')
                .ok_or_else(|| anyhow!("malformed stub:// parameter '{}'", pair))?;
            let bad = || anyhow!("invalid value '{}' for stub:// parameter '{}'", value, key);
            match key {
                "width" => cfg.width = value.parse().map_err(|_| bad())?,
                "height" => cfg.height = value.parse().map_err(|_| bad())?,
                "fps" => cfg.fps = value.parse().map_err(|_| bad())?,
                "frames" => cfg.frames = Some(value.parse().map_err(|_| bad())?),
                "speed" => cfg.speed = value.parse().map_err(|_| bad())?,
                "corrupt_every" => cfg.corrupt_every = Some(value.parse().map_err(|_| bad())?),
                other => return Err(anyhow!("unknown stub:// parameter '{}'", other)),
            }
        }

        if cfg.width < 16 || cfg.height < 16 {
            return Err(anyhow!("synthetic frame must be at least 16x16"));
        }
        if cfg.fps == 0 {
            return Err(anyhow!("synthetic fps must be >= 1"));
        }
        if !(cfg.speed.is_finite() && cfg.speed > 0.0) {
            return Err(anyhow!("synthetic speed must be > 0"));
        }
        if cfg.corrupt_every == Some(0) {
            return Err(anyhow!("corrupt_every must be >= 1"));
        }
        Ok(cfg)
    }
}

/// Endless (or `frames`-bounded) synthetic scene.
pub struct SyntheticSource {
    config: SyntheticConfig,
    reads: u64,
    decoded: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            reads: 0,
            decoded: 0,
        }
    }

    fn vehicle_size(&self) -> (f32, f32) {
        let scale = self.config.width as f32 / 1920.0;
        (120.0 * scale, 80.0 * scale)
    }

    /// Vertical centres of the down-bound and up-bound vehicles at a raw frame.
    fn vehicle_rows(&self, frame: u64) -> (f32, f32) {
        let (_, h) = self.vehicle_size();
        let travel = self.config.height as f32 + 2.0 * h;
        let lap = (travel / self.config.speed).ceil().max(1.0) as u64;
        let down = -h + (frame % lap) as f32 * self.config.speed;
        let up = self.config.height as f32 + h - ((frame + lap / 2) % lap) as f32 * self.config.speed;
        (down, up)
    }

    fn render(&self, frame: u64) -> Vec<u8> {
        let (width, height) = (self.config.width, self.config.height);
        let mut pixels = vec![ROAD_LUMA; (width * height * 3) as usize];
        let (w, h) = self.vehicle_size();
        let (down_y, up_y) = self.vehicle_rows(frame);
        let lanes = [(width as f32 * 0.651, down_y), (width as f32 * 0.3516, up_y)];

        for (cx, cy) in lanes {
            let x1 = (cx - w / 2.0).max(0.0) as u32;
            let x2 = ((cx + w / 2.0).max(0.0) as u32).min(width);
            let y1 = (cy - h / 2.0).max(0.0) as u32;
            let y2 = ((cy + h / 2.0).max(0.0) as u32).min(height);
            for y in y1..y2 {
                let row = (y * width) as usize * 3;
                pixels[row + x1 as usize * 3..row + x2 as usize * 3].fill(VEHICLE_LUMA);
            }
        }
        pixels
    }
}

impl FrameSource for SyntheticSource {
    fn describe(&self) -> String {
        format!(
            "stub://{} ({}x{} @ {} fps)",
            self.config.name, self.config.width, self.config.height, self.config.fps
        )
    }

    fn next_frame(&mut self) -> Result<Capture> {
        if self.config.frames.is_some_and(|limit| self.reads >= limit) {
            return Ok(Capture::EndOfStream);
        }
        let frame_no = self.reads;
        self.reads += 1;

        if self.config.corrupt_every.is_some_and(|n| self.reads % n == 0) {
            return Ok(Capture::Corrupt(format!("synthetic corruption at read {}", self.reads)));
        }

        self.decoded += 1;
        let timestamp = Duration::from_secs_f64(frame_no as f64 / self.config.fps as f64);
        let frame = Frame::new(
            self.render(frame_no),
            self.config.width,
            self.config.height,
            self.decoded,
            timestamp,
        )?;
        Ok(Capture::Frame(frame))
    }
}
