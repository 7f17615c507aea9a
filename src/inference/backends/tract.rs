#![cfg(feature = "backend-tract")]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use tract_onnx::prelude::*;

use crate::inference::{ModelInput, SteeringModel};

/// Tract-based steering model loaded from an ONNX file.
///
/// The model takes one NHWC `[1, H, W, 3]` f32 tensor (the preprocessed YUV
/// frame) and returns its first output flattened.
pub struct TractModel {
    model: SimplePlan<TypedFact, Box<dyn TypedOp>>,
    width: u32,
    height: u32,
}

impl TractModel {
    /// Load an ONNX model from disk and prepare it for inference.
    pub fn new<P: AsRef<Path>>(model_path: P, width: u32, height: u32) -> Result<Self> {
        let model_path = model_path.as_ref();
        let model = tract_onnx::onnx()
            .model_for_path(model_path)
            .with_context(|| format!("failed to load ONNX model from {}", model_path.display()))?
            .with_input_fact(
                0,
                InferenceFact::dt_shape(
                    f32::datum_type(),
                    tvec!(1, height as usize, width as usize, 3),
                ),
            )
            .context("failed to set input fact")?
            .into_optimized()
            .context("failed to optimize ONNX model")?
            .into_runnable()
            .context("failed to build runnable ONNX model")?;

        log::info!(
            "TractModel: loaded {} ({}x{} NHWC input)",
            model_path.display(),
            width,
            height
        );
        Ok(Self {
            model,
            width,
            height,
        })
    }

    fn build_input(&self, input: &ModelInput) -> Result<Tensor> {
        if input.width != self.width || input.height != self.height || input.channels != 3 {
            return Err(anyhow!(
                "input {}x{}x{} does not match model input {}x{}x3",
                input.width,
                input.height,
                input.channels,
                self.width,
                self.height
            ));
        }
        let shape = (1, self.height as usize, self.width as usize, 3);
        let array = tract_ndarray::Array4::from_shape_vec(shape, input.data.clone())
            .context("model input buffer has the wrong length")?;
        Ok(array.into_tensor())
    }
}

impl SteeringModel for TractModel {
    fn name(&self) -> &'static str {
        "tract"
    }

    fn predict(&mut self, input: &ModelInput) -> Result<Vec<f32>> {
        let tensor = self.build_input(input)?;
        let outputs = self
            .model
            .run(tvec!(tensor.into()))
            .context("ONNX inference failed")?;
        let output = outputs
            .first()
            .ok_or_else(|| anyhow!("model produced no outputs"))?;
        let values = output
            .to_array_view::<f32>()
            .context("model output tensor was not f32")?;
        Ok(values.iter().copied().collect())
    }
}
