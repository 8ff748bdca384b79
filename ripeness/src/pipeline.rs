use crate::backbone::FeatureExtractor;
use crate::classifier::{Classifier, argmax};
use crate::internal::*;
use crate::labels::{NUM_CLASSES, Ripeness};
use crate::preprocess::{decode, preprocess};
use crate::source::ImageSource;
use crate::weights::load_model;
use image::RgbImage;
use serde::Serialize;
use std::path::PathBuf;
use std::time::Duration;

/// Where the two networks live and how images are fetched.
#[derive(Debug, Clone, PartialEq)]
pub struct PipelineConfig {
    pub model: PathBuf,
    pub backbone: PathBuf,
    /// Node to cut the backbone after, when the export still has its head.
    pub backbone_output: Option<String>,
    pub fetch_timeout: Option<Duration>,
}

impl Default for PipelineConfig {
    fn default() -> PipelineConfig {
        PipelineConfig {
            model: "dnn.npz".into(),
            backbone: "resnet50.onnx".into(),
            backbone_output: None,
            fetch_timeout: None,
        }
    }
}

/// Command line flags shared by the entry points, with environment fallbacks.
#[cfg(feature = "cli")]
#[derive(Debug, Clone, clap::Args)]
pub struct PipelineArgs {
    /// Classifier head file (.npz with config_json and model_weights/*)
    #[arg(long, env = "RIPENESS_MODEL", default_value = "dnn.npz")]
    pub model: PathBuf,

    /// ONNX export of the ResNet-50 backbone
    #[arg(long, env = "RIPENESS_BACKBONE", default_value = "resnet50.onnx")]
    pub backbone: PathBuf,

    /// Backbone node to cut after (the avg-pool of a full export)
    #[arg(long, env = "RIPENESS_BACKBONE_OUTPUT")]
    pub backbone_output: Option<String>,

    /// Timeout for remote images, in seconds (none by default)
    #[arg(long)]
    pub fetch_timeout_secs: Option<u64>,
}

#[cfg(feature = "cli")]
impl From<&PipelineArgs> for PipelineConfig {
    fn from(args: &PipelineArgs) -> PipelineConfig {
        PipelineConfig {
            model: args.model.clone(),
            backbone: args.backbone.clone(),
            backbone_output: args.backbone_output.clone(),
            fetch_timeout: args.fetch_timeout_secs.map(Duration::from_secs),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label: Ripeness,
    pub index: usize,
    pub scores: Vec<f32>,
}

/// Image in, ripeness out. Immutable once loaded and safe to share across threads.
#[derive(Debug)]
pub struct Pipeline {
    extractor: FeatureExtractor,
    classifier: Classifier,
    fetch_timeout: Option<Duration>,
}

impl Pipeline {
    pub fn new(extractor: FeatureExtractor, classifier: Classifier) -> TractResult<Pipeline> {
        ensure!(
            extractor.width() == classifier.input_dim(),
            "Backbone emits {} features but the classifier expects {}",
            extractor.width(),
            classifier.input_dim()
        );
        ensure!(
            classifier.num_classes() == NUM_CLASSES,
            "Classifier has {} outputs for {} ripeness labels",
            classifier.num_classes(),
            NUM_CLASSES
        );
        Ok(Pipeline { extractor, classifier, fetch_timeout: None })
    }

    pub fn load(config: &PipelineConfig) -> TractResult<Pipeline> {
        info!("Running on CPU");
        let extractor =
            FeatureExtractor::load(&config.backbone, config.backbone_output.as_deref())?;
        let classifier = load_model(&config.model)?;
        Ok(Pipeline::new(extractor, classifier)?.with_fetch_timeout(config.fetch_timeout))
    }

    pub fn with_fetch_timeout(self, fetch_timeout: Option<Duration>) -> Pipeline {
        Pipeline { fetch_timeout, ..self }
    }

    pub fn predict(&self, source: &ImageSource) -> TractResult<Prediction> {
        let bytes = source.read_bytes(self.fetch_timeout)?;
        let prediction =
            self.predict_bytes(&bytes).with_context(|| format!("Classifying {source}"))?;
        debug!("{source}: {} (scores: {:?})", prediction.label, prediction.scores);
        Ok(prediction)
    }

    pub fn predict_bytes(&self, bytes: &[u8]) -> TractResult<Prediction> {
        self.predict_image(&decode(bytes)?)
    }

    pub fn predict_image(&self, image: &RgbImage) -> TractResult<Prediction> {
        let features = self.extractor.features(preprocess(image))?;
        let scores = self.classifier.scores(&features)?;
        let index = argmax(&scores)?;
        let label = Ripeness::from_index(index)?;
        Ok(Prediction { label, index, scores })
    }
}
