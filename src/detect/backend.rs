use anyhow::Result;

use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Detector backend trait.
///
/// A backend is a black box: given a frame it returns the bounding boxes it
/// finds at or above `confidence_threshold`, in the frame's pixel coordinates.
/// It keeps no identity across calls. Calls are synchronous and may be slow;
/// an error is fatal for the pipeline run.
pub trait DetectorBackend: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Run detection on a frame.
    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<BoundingBox>>;

    /// Optional warm-up hook.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }
}

impl<D: DetectorBackend + ?Sized> DetectorBackend for Box<D> {
    fn name(&self) -> &'static str {
        (**self).name()
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<BoundingBox>> {
        (**self).detect(frame, confidence_threshold)
    }

    fn warm_up(&mut self) -> Result<()> {
        (**self).warm_up()
    }
}
