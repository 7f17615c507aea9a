use anyhow::Result;

use crate::inference::{ModelInput, SteeringModel};

/// Model that ignores its input and returns a fixed output vector.
///
/// Used for dry runs and tests. The output is returned verbatim, so a
/// malformed vector exercises the same fault path as a broken real model.
pub struct ConstantModel {
    output: Vec<f32>,
    calls: u64,
}

impl ConstantModel {
    pub fn new(output: Vec<f32>) -> Self {
        Self { output, calls: 0 }
    }

    /// Number of `predict` calls so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }
}

impl Default for ConstantModel {
    fn default() -> Self {
        Self::new(vec![0.0, 0.0])
    }
}

impl SteeringModel for ConstantModel {
    fn name(&self) -> &'static str {
        "constant"
    }

    fn predict(&mut self, _input: &ModelInput) -> Result<Vec<f32>> {
        self.calls += 1;
        Ok(self.output.clone())
    }
}
