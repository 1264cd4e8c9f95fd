//! Video source facade.
//!
//! `VideoSource` opens a path or URI and picks a backend:
//! - `stub://...` is served by the synthetic scene generator
//! - anything else goes to FFmpeg (feature: ingest-ffmpeg), which handles
//!   local files and network streams (rtsp://, http://, ...) the same way
//!
//! Failing to open the source is an error; the caller treats it as fatal.

use anyhow::{anyhow, Result};

#[cfg(feature = "ingest-ffmpeg")]
use super::ffmpeg::FfmpegSource;
use super::synthetic::{SyntheticConfig, SyntheticSource};
use super::{Capture, FrameSource};

/// Frame source for a configured path or URI.
pub struct VideoSource {
    uri: String,
    backend: VideoBackend,
}

enum VideoBackend {
    Synthetic(SyntheticSource),
    #[cfg(feature = "ingest-ffmpeg")]
    Ffmpeg(FfmpegSource),
}

impl VideoSource {
    /// Open the source. Fails when the path or URI cannot be opened.
    pub fn open(uri: &str) -> Result<Self> {
        let uri = uri.trim();
        if uri.is_empty() {
            return Err(anyhow!("video source is empty"));
        }

        let backend = if uri.starts_with("stub://") {
            let config = SyntheticConfig::from_uri(uri)?;
            log::info!("VideoSource: opened {} (synthetic)", uri);
            VideoBackend::Synthetic(SyntheticSource::new(config))
        } else {
            Self::open_decoder(uri)?
        };

        Ok(Self {
            uri: uri.to_string(),
            backend,
        })
    }

    #[cfg(feature = "ingest-ffmpeg")]
    fn open_decoder(uri: &str) -> Result<VideoBackend> {
        let source = FfmpegSource::open(uri)?;
        log::info!("VideoSource: opened {} (ffmpeg)", uri);
        Ok(VideoBackend::Ffmpeg(source))
    }

    #[cfg(not(feature = "ingest-ffmpeg"))]
    fn open_decoder(uri: &str) -> Result<VideoBackend> {
        Err(anyhow!(
            "cannot open '{}': decoding video requires the ingest-ffmpeg feature",
            uri
        ))
    }

    pub fn uri(&self) -> &str {
        &self.uri
    }
}

impl FrameSource for VideoSource {
    fn describe(&self) -> String {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.describe(),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.describe(),
        }
    }

    fn next_frame(&mut self) -> Result<Capture> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.next_frame(),
            #[cfg(feature = "ingest-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.next_frame(),
        }
    }
}
