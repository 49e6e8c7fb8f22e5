#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::detect::model::{ModelBox, ObjectModel};
use crate::frame::{BBox, Frame};

/// Tract-based ONNX object model.
///
/// Loads a local detection model (e.g. an exported person/fire/gear model)
/// and maps its output rows to `ModelBox` candidates. The expected output
/// layout is one row per detection: `[x1, y1, x2, y2, confidence, class]`
/// in pixels of the model's input resolution.
pub struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractModel {
    /// Load an ONNX model from disk and prepare it for inference at the
    /// given input resolution.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, 3, height as usize, width as usize),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, frame: &Frame) -> Result<Tensor> {
        if frame.width() != self.width || frame.height() != self.height {
            return Err(anyhow!(
                "frame size {}x{} does not match model input {}x{}",
                frame.width(),
                frame.height(),
                self.width,
                self.height
            ));
        }

        let image = frame.image();
        let width = self.width as usize;
        let input = tract_ndarray::Array4::from_shape_fn(
            (1, 3, self.height as usize, width),
            |(_, channel, y, x)| image.get_pixel(x as u32, y as u32).0[channel] as f32 / 255.0,
        );

        Ok(input.into_tensor())
    }

    fn extract_boxes(&self, frame: &Frame, outputs: TVec<TValue>) -> Result<Vec<ModelBox>> {
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        let flat: Vec<f32> = values.iter().copied().collect();

        let mut boxes = Vec::new();
        for row in flat.chunks_exact(6) {
            let confidence = row[4];
            if !confidence.is_finite() || confidence <= 0.0 {
                continue;
            }
            boxes.push(ModelBox {
                bbox: BBox::clamped(
                    row[0] as i32,
                    row[1] as i32,
                    row[2] as i32,
                    row[3] as i32,
                    frame.width(),
                    frame.height(),
                ),
                class_id: row[5].max(0.0) as u32,
                confidence,
            });
        }
        Ok(boxes)
    }
}

impl ObjectModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn infer(&mut self, frame: &Frame) -> Result<Vec<ModelBox>> {
        let input = self.build_input(frame)?;
        let outputs = self
            .model
            .run(tvec!(input.into()))
            .context("ONNX inference failed")?;
        self.extract_boxes(frame, outputs)
    }
}
