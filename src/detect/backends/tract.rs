#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;
use tract_onnx::prelude::*;

use crate::detect::backend::DetectorBackend;
use crate::detect::result::{non_max_suppression, BoundingBox};
use crate::frame::Frame;

/// COCO class ids for car, motorcycle, bus and truck.
pub const COCO_VEHICLE_CLASSES: &[u32] = &[2, 3, 5, 7];

const NMS_IOU_THRESHOLD: f32 = 0.45;

/// Tract-based backend for YOLOv8-style ONNX detectors.
///
/// Expects a square `1x3xSxS` input and a `1x(4+C)xN` output of
/// `(cx, cy, w, h, class scores...)` rows. It performs no network I/O and
/// writes nothing to disk beyond model loading.
pub struct TractBackend {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    input_size: u32,
    classes: Vec<u32>,
}

impl TractBackend {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, input_size: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let side = input_size as usize;
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(0, InferenceFact::dt_shape(f32::datum_type(), tvec!(1, 3, side, side)))
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            input_size,
            classes: COCO_VEHICLE_CLASSES.to_vec(),
        })
    }

    /// Restrict output to these class ids. An empty list keeps every class.
    pub fn with_classes(mut self, classes: Vec<u32>) -> Self {
        self.classes = classes;
        self
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        let image = RgbImage::from_raw(frame.width, frame.height, frame.pixels().to_vec())
            .ok_or_else(|| anyhow!("frame buffer does not match {}x{}", frame.width, frame.height))?;
        let side = self.input_size;
        let resized = imageops::resize(&image, side, side, FilterType::Triangle);
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, side as usize, side as usize),
            |(_, channel, y, x)| resized.get_pixel(x as u32, y as u32)[channel] as f32 / 255.0,
        );
        Ok(input.into_tensor())
    }

    fn decode(&self, output: &Tensor, frame: &Frame, confidence_threshold: f32) -> Result<Vec<BoundingBox>> {
        let rows = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?
            .into_dimensionality::<tract_ndarray::Ix3>()
            .context("expected a 1x(4+C)xN detection tensor")?;
        let (attrs, candidates) = (rows.shape()[1], rows.shape()[2]);
        if attrs < 5 {
            return Err(anyhow!("detection tensor has {} attributes, need at least 5", attrs));
        }

        let sx = frame.width as f32 / self.input_size as f32;
        let sy = frame.height as f32 / self.input_size as f32;
        let mut boxes = Vec::new();

        for i in 0..candidates {
            let (class_id, score) = (4..attrs)
                .map(|a| (a - 4, rows[[0, a, i]]))
                .fold((0usize, f32::NEG_INFINITY), |best, c| if c.1 > best.1 { c } else { best });
            if score < confidence_threshold {
                continue;
            }
            let class_id = class_id as u32;
            if !self.classes.is_empty() && !self.classes.contains(&class_id) {
                continue;
            }
            let (cx, cy, w, h) = (rows[[0, 0, i]], rows[[0, 1, i]], rows[[0, 2, i]], rows[[0, 3, i]]);
            boxes.push(
                BoundingBox::new(
                    (cx - w / 2.0) * sx,
                    (cy - h / 2.0) * sy,
                    (cx + w / 2.0) * sx,
                    (cy + h / 2.0) * sy,
                    score,
                )
                .with_class(class_id),
            );
        }

        Ok(non_max_suppression(boxes, NMS_IOU_THRESHOLD))
    }
}

impl DetectorBackend for TractBackend {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn detect(&mut self, frame: &Frame, confidence_threshold: f32) -> Result<Vec<BoundingBox>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        self.decode(output, frame, confidence_threshold)
    }
}
