//! Decoded video frames.
//!
//! - `Frame`: RGB24 pixels of one decoded picture plus its stream position.
//!
//! Frames are ephemeral. A source produces one, the sampler either drops it or
//! forwards it (possibly downscaled) to the detector, and it is gone after the
//! detector returns.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use std::time::Duration;

/// One decoded RGB24 frame.
pub struct Frame {
    pixels: Vec<u8>,

    pub width: u32,
    pub height: u32,

    /// 1-based position among frames decoded by the source.
    pub index: u64,

    /// Presentation time relative to the start of the stream.
    pub timestamp: Duration,
}

impl Frame {
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        index: u64,
        timestamp: Duration,
    ) -> Result<Self> {
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(3))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if pixels.len() != expected {
            return Err(anyhow!(
                "RGB frame length mismatch: expected {}, got {}",
                expected,
                pixels.len()
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            index,
            timestamp,
        })
    }

    /// Packed RGB24 rows, `width * 3` bytes each.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    /// BT.601 luma of the pixel at `(x, y)`.
    pub fn luma(&self, x: u32, y: u32) -> u8 {
        let offset = (y as usize * self.width as usize + x as usize) * 3;
        let r = self.pixels[offset] as u32;
        let g = self.pixels[offset + 1] as u32;
        let b = self.pixels[offset + 2] as u32;
        ((299 * r + 587 * g + 114 * b) / 1000) as u8
    }

    /// Downscale to `target_width`, preserving aspect ratio.
    ///
    /// Frames already at or below the target width are returned unchanged.
    pub fn resized_to_width(self, target_width: u32) -> Result<Self> {
        if target_width == 0 {
            return Err(anyhow!("target width must be > 0"));
        }
        if target_width >= self.width {
            return Ok(self);
        }
        let Frame {
            pixels,
            width,
            height,
            index,
            timestamp,
        } = self;
        let target_height = scaled_height(width, height, target_width);
        let image = RgbImage::from_raw(width, height, pixels)
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", width, height))?;
        let resized = imageops::resize(&image, target_width, target_height, FilterType::Triangle);
        Ok(Self {
            pixels: resized.into_raw(),
            width: target_width,
            height: target_height,
            index,
            timestamp,
        })
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("index", &self.index)
            .field("timestamp", &self.timestamp)
            .finish_non_exhaustive()
    }
}

fn scaled_height(width: u32, height: u32, target_width: u32) -> u32 {
    let scaled = (height as u64 * target_width as u64 + width as u64 / 2) / width as u64;
    scaled.max(1) as u32
}

#[cfg(test)]
mod tests {
    use super::*;

    fn solid(width: u32, height: u32, value: u8) -> Frame {
        let pixels = vec![value; (width * height * 3) as usize];
        Frame::new(pixels, width, height, 1, Duration::ZERO).unwrap()
    }

    #[test]
    fn rejects_wrong_buffer_length() {
        let err = Frame::new(vec![0u8; 10], 2, 2, 1, Duration::ZERO).unwrap_err();
        assert!(err.to_string().contains("length mismatch"));
    }

    #[test]
    fn resize_preserves_aspect_ratio() -> Result<()> {
        let frame = solid(1920, 1080, 90).resized_to_width(640)?;
        assert_eq!((frame.width, frame.height), (640, 360));
        assert_eq!(frame.pixels().len(), 640 * 360 * 3);
        assert_eq!(frame.luma(10, 10), 90);
        Ok(())
    }

    #[test]
    fn resize_never_upscales() -> Result<()> {
        let frame = solid(320, 240, 0).resized_to_width(640)?;
        assert_eq!((frame.width, frame.height), (320, 240));
        Ok(())
    }
}
