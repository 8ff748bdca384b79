//! Fruit ripeness classification.
//!
//! A frozen ResNet-50 backbone turns a 224x224 image into a pooled feature
//! vector, and a small fully connected head, rebuilt from its persisted
//! architecture and weights, scores it against the four [`Ripeness`] classes.
//!
//! ```no_run
//! use ripeness::prelude::*;
//!
//! # fn main() -> ripeness::internal::TractResult<()> {
//! let pipeline = Pipeline::load(&PipelineConfig::default())?;
//! let prediction = pipeline.predict(&ImageSource::parse("Decay.jpg"))?;
//! println!("{}", prediction.label);
//! # Ok(())
//! # }
//! ```
#[macro_use]
extern crate log;

pub mod backbone;
pub mod classifier;
pub mod config;
pub mod labels;
pub mod pipeline;
pub mod preprocess;
pub mod source;
pub mod weights;

pub use tract_core;
pub use tract_onnx;

pub mod prelude {
    pub use crate::backbone::FeatureExtractor;
    pub use crate::classifier::{Classifier, reconstruct_model};
    pub use crate::config::ClassifierConfig;
    pub use crate::labels::Ripeness;
    #[cfg(feature = "cli")]
    pub use crate::pipeline::PipelineArgs;
    pub use crate::pipeline::{Pipeline, PipelineConfig, Prediction};
    pub use crate::source::ImageSource;
    pub use crate::weights::load_model;
}

pub mod internal {
    pub use anyhow::{Context, bail, ensure, format_err};
    pub use tract_core::internal::*;
}
