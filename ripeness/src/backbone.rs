use crate::preprocess::INPUT_SIZE;
use anyhow::{Context, ensure};
use std::fmt;
use std::path::Path;
use tract_onnx::prelude::*;

/// Frozen image backbone producing one pooled feature vector per image.
///
/// All weights are graph constants: nothing here can be trained, and
/// batch-norm layers of the backbone run on their frozen statistics.
pub struct FeatureExtractor {
    plan: TypedRunnableModel<TypedModel>,
    width: usize,
}

impl fmt::Debug for FeatureExtractor {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "FeatureExtractor(width: {})", self.width)
    }
}

impl FeatureExtractor {
    /// Loads an ONNX export of the backbone.
    ///
    /// With `output`, the graph is cut after that node (typically the global
    /// average pooling of a full ResNet-50 export), dropping the original
    /// classification head. Without it the export must already end there.
    pub fn load(path: impl AsRef<Path>, output: Option<&str>) -> TractResult<FeatureExtractor> {
        let path = path.as_ref();
        info!("Loading backbone from {}", path.display());
        let model = tract_onnx::onnx()
            .model_for_path(path)
            .with_context(|| format!("Loading ONNX backbone {}", path.display()))?;
        Self::from_inference_model(model, output)
    }

    /// Pins the graph to a single 224x224 RGB image, optionally cuts it at
    /// `output`, then types and optimizes it.
    pub fn from_inference_model(
        model: InferenceModel,
        output: Option<&str>,
    ) -> TractResult<FeatureExtractor> {
        let mut model =
            model.with_input_fact(0, f32::fact([1, 3, INPUT_SIZE, INPUT_SIZE]).into())?;
        if let Some(output) = output {
            model = model
                .with_output_names([output])
                .with_context(|| format!("Selecting backbone output node `{output}`"))?;
        }
        Self::from_typed_model(model.into_typed()?)
    }

    /// Wraps an already built graph taking a `[1, 3, 224, 224]` f32 input.
    pub fn from_typed_model(model: TypedModel) -> TractResult<FeatureExtractor> {
        let plan = model.into_optimized()?.into_runnable()?;
        let fact = plan.model().output_fact(0)?;
        let shape = fact
            .shape
            .as_concrete()
            .with_context(|| format!("Backbone output shape is not concrete: {fact:?}"))?;
        ensure!(
            shape.first() == Some(&1),
            "Backbone output should have a leading batch of 1, got {shape:?}"
        );
        let width = shape.iter().skip(1).product();
        Ok(FeatureExtractor { plan, width })
    }

    /// Length of the flattened feature vector.
    pub fn width(&self) -> usize {
        self.width
    }

    /// Runs the backbone on one preprocessed image and flattens its output.
    pub fn features(&self, image: Tensor) -> TractResult<Vec<f32>> {
        let outputs = self.plan.run(tvec!(image.into()))?;
        let features = outputs[0].as_slice::<f32>()?;
        ensure!(
            features.len() == self.width,
            "Backbone produced {} features, expected {}",
            features.len(),
            self.width
        );
        Ok(features.to_vec())
    }
}
