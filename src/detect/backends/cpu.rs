use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::BoundingBox;
use crate::frame::Frame;

/// CPU backend that reports bright foreground blobs as boxes.
///
/// Pixels are sampled on a `stride` grid; connected cells at or above
/// `luma_threshold` form one blob. Confidence is the blob's fill ratio of its
/// own box, so solid shapes score close to 1.0. Intended for the synthetic
/// `stub://` source and for high-contrast test footage, not for real traffic.
#[derive(Clone, Debug)]
pub struct CpuBackend {
    luma_threshold: u8,
    stride: u32,
    min_area: f32,
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self {
            luma_threshold: 200,
            stride: 4,
            min_area: 64.0,
        }
    }
}

impl CpuBackend {
    pub fn new(luma_threshold: u8, stride: u32, min_area: f32) -> Self {
        Self {
            luma_threshold,
            stride: stride.max(1),
            min_area,
        }
    }
}

impl DetectorBackend for CpuBackend {
    fn name(&self) -> &'static str {
        "cpu"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<BoundingBox>> {
        let stride = self.stride;
        let cols = frame.width.div_ceil(stride) as usize;
        let rows = frame.height.div_ceil(stride) as usize;

        let mut mask = vec![false; cols * rows];
        for gy in 0..rows {
            for gx in 0..cols {
                let luma = frame.luma(gx as u32 * stride, gy as u32 * stride);
                mask[gy * cols + gx] = luma >= self.luma_threshold;
            }
        }

        let mut seen = vec![false; cols * rows];
        let mut queue = VecDeque::new();
        let mut boxes = Vec::new();

        for start in 0..mask.len() {
            if !mask[start] || seen[start] {
                continue;
            }
            seen[start] = true;
            queue.push_back(start);

            let (mut min_x, mut min_y) = (usize::MAX, usize::MAX);
            let (mut max_x, mut max_y) = (0usize, 0usize);
            let mut cells = 0usize;

            while let Some(idx) = queue.pop_front() {
                let (x, y) = (idx % cols, idx / cols);
                cells += 1;
                min_x = min_x.min(x);
                min_y = min_y.min(y);
                max_x = max_x.max(x);
                max_y = max_y.max(y);

                let mut visit = |n: usize| {
                    if mask[n] && !seen[n] {
                        seen[n] = true;
                        queue.push_back(n);
                    }
                };
                if x > 0 {
                    visit(idx - 1);
                }
                if x + 1 < cols {
                    visit(idx + 1);
                }
                if y > 0 {
                    visit(idx - cols);
                }
                if y + 1 < rows {
                    visit(idx + cols);
                }
            }

            let span = ((max_x - min_x + 1) * (max_y - min_y + 1)) as f32;
            let confidence = cells as f32 / span;
            let bbox = BoundingBox::new(
                (min_x as u32 * stride) as f32,
                (min_y as u32 * stride) as f32,
                ((max_x as u32 + 1) * stride).min(frame.width) as f32,
                ((max_y as u32 + 1) * stride).min(frame.height) as f32,
                confidence,
            );
            if bbox.area() >= self.min_area && confidence >= confidence_threshold {
                boxes.push(bbox);
            }
        }

        Ok(boxes)
    }
}
