use anyhow::{anyhow, Result};
use std::collections::BTreeMap;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// Backend that replays pre-recorded boxes keyed by frame index.
///
/// Useful for replaying detections exported from another detector, and for
/// exercising the pipeline without a model.
#[derive(Clone, Debug, Default)]
pub struct ScriptedBackend {
    script: BTreeMap<u64, Vec<BoundingBox>>,
    fail_at: Option<u64>,
    calls: u64,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Boxes to return for the frame with this source index.
    pub fn with_frame(mut self, index: u64, boxes: Vec<BoundingBox>) -> Self {
        self.script.insert(index, boxes);
        self
    }

    /// Make detection fail on the frame with this source index.
    pub fn failing_at(mut self, index: u64) -> Self {
        self.fail_at = Some(index);
        self
    }

    /// Number of `detect` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl DetectorBackend for ScriptedBackend {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<BoundingBox>> {
        self.calls += 1;
        if self.fail_at == Some(frame.index) {
            return Err(anyhow!("scripted failure at frame {}", frame.index));
        }
        Ok(self
            .script
            .get(&frame.index)
            .map(|boxes| {
                boxes
                    .iter()
                    .filter(|b| b.confidence >= confidence_threshold)
                    .copied()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn frame(index: u64) -> Frame {
        Frame::new(vec![0u8; 12], 2, 2, index, Duration::ZERO).unwrap()
    }

    #[test]
    fn replays_boxes_above_threshold() -> Result<()> {
        let mut backend = ScriptedBackend::new().with_frame(
            3,
            vec![
                BoundingBox::new(0.0, 0.0, 10.0, 10.0, 0.9),
                BoundingBox::new(20.0, 0.0, 30.0, 10.0, 0.3),
            ],
        );
        assert!(backend.detect(&frame(1), 0.5)?.is_empty());
        assert_eq!(backend.detect(&frame(3), 0.5)?.len(), 1);
        assert_eq!(backend.calls(), 2);
        Ok(())
    }

    #[test]
    fn scripted_failure() {
        let mut backend = ScriptedBackend::new().failing_at(2);
        assert!(backend.detect(&frame(1), 0.5).is_ok());
        assert!(backend.detect(&frame(2), 0.5).is_err());
    }
}
