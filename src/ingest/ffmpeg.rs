//! FFmpeg-backed decoder for files and network streams.
//!
//! Packets that fail to decode are reported as corrupt and reading continues.
//! At end of input the decoder is flushed so buffered frames are still
//! delivered before end of stream. Any other read error ends the stream.

use anyhow::{anyhow, Context, Result};
use ffmpeg_next as ffmpeg;
use std::time::Duration;

use super::Capture;
use crate::frame::Frame;

pub(crate) struct FfmpegSource {
    uri: String,
    input: ffmpeg::format::context::Input,
    stream_index: usize,
    time_base: ffmpeg::Rational,
    fallback_fps: f64,
    decoder: ffmpeg::codec::decoder::Video,
    scaler: ffmpeg::software::scaling::Context,
    frame_count: u64,
    flushed: bool,
}

impl FfmpegSource {
    pub(crate) fn open(uri: &str) -> Result<Self> {
        ffmpeg::init().context("initialize ffmpeg")?;
        let input = ffmpeg::format::input(&uri)
            .with_context(|| format!("failed to open video source '{}' with ffmpeg", uri))?;
        let input_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or_else(|| anyhow!("'{}' has no video track", uri))?;
        let stream_index = input_stream.index();
        let time_base = input_stream.time_base();
        let rate = input_stream.avg_frame_rate();
        let fallback_fps = if rate.denominator() != 0 && rate.numerator() > 0 {
            f64::from(rate)
        } else {
            30.0
        };
        let context = ffmpeg::codec::context::Context::from_parameters(input_stream.parameters())
            .context("load video decoder parameters")?;
        let decoder = context
            .decoder()
            .video()
            .context("open ffmpeg video decoder")?;

        let scaler = ffmpeg::software::scaling::context::Context::get(
            decoder.format(),
            decoder.width(),
            decoder.height(),
            ffmpeg::util::format::pixel::Pixel::RGB24,
            decoder.width(),
            decoder.height(),
            ffmpeg::software::scaling::flag::Flags::BILINEAR,
        )
        .context("create ffmpeg scaler")?;

        Ok(Self {
            uri: uri.to_string(),
            input,
            stream_index,
            time_base,
            fallback_fps,
            decoder,
            scaler,
            frame_count: 0,
            flushed: false,
        })
    }

    pub(crate) fn describe(&self) -> String {
        format!("{} ({}x{})", self.uri, self.decoder.width(), self.decoder.height())
    }

    pub(crate) fn next_frame(&mut self) -> Result<Capture> {
        let mut decoded = ffmpeg::frame::Video::empty();
        loop {
            if self.decoder.receive_frame(&mut decoded).is_ok() {
                return self.convert(&decoded);
            }
            if self.flushed {
                return Ok(Capture::EndOfStream);
            }
            match self.next_video_packet()? {
                Some(packet) => {
                    if let Err(e) = self.decoder.send_packet(&packet) {
                        return Ok(Capture::Corrupt(format!("decode error: {}", e)));
                    }
                }
                None => {
                    self.decoder.send_eof().context("flush ffmpeg decoder")?;
                    self.flushed = true;
                }
            }
        }
    }

    fn next_video_packet(&mut self) -> Result<Option<ffmpeg::Packet>> {
        loop {
            let mut packet = ffmpeg::Packet::empty();
            match packet.read(&mut self.input) {
                Ok(()) if packet.stream() == self.stream_index => return Ok(Some(packet)),
                Ok(()) => continue,
                Err(ffmpeg::Error::Eof) => return Ok(None),
                Err(e) => return Err(anyhow!("reading '{}' failed: {}", self.uri, e)),
            }
        }
    }

    fn convert(&mut self, decoded: &ffmpeg::frame::Video) -> Result<Capture> {
        let mut rgb_frame = ffmpeg::frame::Video::empty();
        if let Err(e) = self.scaler.run(decoded, &mut rgb_frame) {
            return Ok(Capture::Corrupt(format!("scale to RGB failed: {}", e)));
        }
        let (pixels, width, height) = match frame_to_pixels(&rgb_frame) {
            Ok(parts) => parts,
            Err(e) => return Ok(Capture::Corrupt(format!("{:#}", e))),
        };

        self.frame_count += 1;
        let timestamp = self.timestamp_of(decoded);
        Ok(Capture::Frame(Frame::new(
            pixels,
            width,
            height,
            self.frame_count,
            timestamp,
        )?))
    }

    /// Stream time of a decoded frame, falling back to frame count over fps
    /// when the container carries no timestamps.
    fn timestamp_of(&self, decoded: &ffmpeg::frame::Video) -> Duration {
        let secs = match decoded.timestamp() {
            Some(pts) if self.time_base.denominator() != 0 => {
                pts as f64 * f64::from(self.time_base)
            }
            _ => (self.frame_count.saturating_sub(1)) as f64 / self.fallback_fps,
        };
        Duration::try_from_secs_f64(secs).unwrap_or(Duration::ZERO)
    }
}

fn frame_to_pixels(frame: &ffmpeg::frame::Video) -> Result<(Vec<u8>, u32, u32)> {
    let width = frame.width();
    let height = frame.height();
    let row_bytes = (width as usize) * 3;
    let stride = frame.stride(0);
    let data = frame.data(0);

    if stride == row_bytes {
        let len = row_bytes * height as usize;
        let pixels = data
            .get(..len)
            .context("ffmpeg frame buffer is shorter than expected")?;
        return Ok((pixels.to_vec(), width, height));
    }

    let mut pixels = Vec::with_capacity(row_bytes * height as usize);
    for row in 0..height as usize {
        let start = row * stride;
        let end = start + row_bytes;
        pixels.extend_from_slice(
            data.get(start..end)
                .context("ffmpeg frame row is out of bounds")?,
        );
    }

    Ok((pixels, width, height))
}
