use crate::config::ClassifierConfig;
use crate::internal::*;
use std::collections::{HashMap, HashSet};
use std::fmt;
use tract_core::axes::AxesMapping;
use tract_core::ops::einsum::EinSum;
use tract_core::ops::math;

/// Width of the pooled feature vector the backbone emits.
pub const FEATURE_DIM: usize = 2048;

/// BatchNorm epsilon of the training framework.
pub const BATCHNORM_EPSILON: f32 = 1e-5;

#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Linear { input: usize, output: usize },
    BatchNorm { width: usize },
    Relu,
    Dropout { rate: f32 },
}

impl Stage {
    /// Parameters owned by the stage, as (suffix, shape, is_integer).
    fn parameters(&self) -> Vec<(&'static str, TVec<usize>, bool)> {
        match self {
            Stage::Linear { input, output } => {
                vec![("weight", tvec!(*output, *input), false), ("bias", tvec!(*output), false)]
            }
            Stage::BatchNorm { width } => vec![
                ("weight", tvec!(*width), false),
                ("bias", tvec!(*width), false),
                ("running_mean", tvec!(*width), false),
                ("running_var", tvec!(*width), false),
                ("num_batches_tracked", tvec!(), true),
            ],
            Stage::Relu | Stage::Dropout { .. } => vec![],
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterInfo {
    pub name: String,
    pub shape: TVec<usize>,
    pub integer: bool,
}

/// Layer sequence of the classifier head, before any weight is attached.
///
/// Stage indices are the positions in the sequence, which is where parameter
/// names come from (`4.running_var` is the running variance of stage 4).
#[derive(Debug, Clone, PartialEq)]
pub struct Sequential {
    pub stages: Vec<Stage>,
}

/// Builds the classifier layer sequence for `config`, fed by the backbone features.
pub fn reconstruct_model(config: &ClassifierConfig, num_classes: usize) -> Sequential {
    reconstruct_model_with_input(config, FEATURE_DIM, num_classes)
}

pub fn reconstruct_model_with_input(
    config: &ClassifierConfig,
    input_dim: usize,
    num_classes: usize,
) -> Sequential {
    let mut stages = vec![];
    let mut width = input_dim;
    for layer in &config.layers {
        stages.push(Stage::Linear { input: width, output: layer.units });
        if config.use_batchnorm {
            stages.push(Stage::BatchNorm { width: layer.units });
        }
        stages.push(Stage::Relu);
        stages.push(Stage::Dropout { rate: layer.dropout });
        width = layer.units;
    }
    stages.push(Stage::Linear { input: width, output: num_classes });
    Sequential { stages }
}

impl Sequential {
    pub fn input_dim(&self) -> usize {
        match self.stages.first() {
            Some(Stage::Linear { input, .. }) => *input,
            _ => 0,
        }
    }

    pub fn output_dim(&self) -> usize {
        match self.stages.last() {
            Some(Stage::Linear { output, .. }) => *output,
            _ => 0,
        }
    }

    pub fn parameters(&self) -> Vec<ParameterInfo> {
        self.stages
            .iter()
            .enumerate()
            .flat_map(|(ix, stage)| {
                stage.parameters().into_iter().map(move |(suffix, shape, integer)| {
                    ParameterInfo { name: format!("{ix}.{suffix}"), shape, integer }
                })
            })
            .collect()
    }

    /// Checks that `weights` holds exactly the expected parameters.
    ///
    /// Every missing, unexpected or mis-shaped entry is reported at once.
    pub fn check_state_dict(&self, weights: &HashMap<String, Tensor>) -> TractResult<()> {
        let expected = self.parameters();
        let mut problems = vec![];
        for info in &expected {
            let Some(tensor) = weights.get(&info.name) else {
                problems.push(format!("missing `{}`", info.name));
                continue;
            };
            if tensor.shape() != &*info.shape {
                problems.push(format!(
                    "`{}` has shape {:?}, expected {:?}",
                    info.name,
                    tensor.shape(),
                    &*info.shape
                ));
            } else if info.integer && !tensor.datum_type().is_integer() {
                problems.push(format!("`{}` should be integer", info.name));
            } else if !info.integer && tensor.datum_type() != f32::datum_type() {
                problems.push(format!(
                    "`{}` is {:?}, expected f32",
                    info.name,
                    tensor.datum_type()
                ));
            }
        }
        let names: HashSet<&str> = expected.iter().map(|p| p.name.as_str()).collect();
        let mut unexpected: Vec<&String> =
            weights.keys().filter(|k| !names.contains(k.as_str())).collect();
        unexpected.sort();
        problems.extend(unexpected.into_iter().map(|k| format!("unexpected `{k}`")));
        if !problems.is_empty() {
            bail!("Weights do not match the classifier layout: {}", problems.join(", "));
        }
        Ok(())
    }

    /// Lowers the sequence to an inference-mode tract graph.
    ///
    /// Dropout vanishes and BatchNorm is folded into its running statistics.
    pub fn to_typed_model(&self, weights: &HashMap<String, Tensor>) -> TractResult<TypedModel> {
        self.check_state_dict(weights)?;
        let tensor = |ix: usize, suffix: &str| param(weights, ix, suffix);
        let mut model = TypedModel::default();
        let mut wire = model.add_source("features", f32::fact([1, self.input_dim()]))?;
        for (ix, stage) in self.stages.iter().enumerate() {
            match stage {
                Stage::Linear { output, .. } => {
                    let weight =
                        model.add_const(format!("{ix}.weight"), tensor(ix, "weight").clone())?;
                    let bias = tensor(ix, "bias").clone().into_shape(&[1, *output])?;
                    let bias = model.add_const(format!("{ix}.bias"), bias)?;
                    let axes: AxesMapping = "ik,jk->ij".parse()?;
                    wire = model.wire_node(
                        format!("{ix}.matmul"),
                        EinSum::new(axes, f32::datum_type()),
                        &[wire, weight],
                    )?[0];
                    wire =
                        model.wire_node(format!("{ix}.add_bias"), math::add(), &[wire, bias])?[0];
                }
                Stage::BatchNorm { width } => {
                    let (slope, inter) = fold_batch_norm(
                        tensor(ix, "weight"),
                        tensor(ix, "bias"),
                        tensor(ix, "running_mean"),
                        tensor(ix, "running_var"),
                    )?;
                    let slope = model.add_const(
                        format!("{ix}.slope"),
                        Tensor::from_shape(&[1, *width], &slope)?,
                    )?;
                    let inter = model.add_const(
                        format!("{ix}.inter"),
                        Tensor::from_shape(&[1, *width], &inter)?,
                    )?;
                    wire = model.wire_node(format!("{ix}.mul"), math::mul(), &[wire, slope])?[0];
                    wire = model.wire_node(format!("{ix}.add"), math::add(), &[wire, inter])?[0];
                }
                Stage::Relu => {
                    let zero = model.add_const(format!("{ix}.zero"), tensor2(&[[0f32]]))?;
                    wire = model.wire_node(format!("{ix}.relu"), math::max(), &[wire, zero])?[0];
                }
                Stage::Dropout { .. } => (),
            }
        }
        model.set_output_outlets(&[wire])?;
        Ok(model)
    }

    /// Attaches weights and compiles the head. Strict: names and shapes must match exactly.
    pub fn load_state_dict(self, weights: &HashMap<String, Tensor>) -> TractResult<Classifier> {
        let plan = self
            .to_typed_model(weights)
            .context("Building classifier graph")?
            .into_optimized()?
            .into_runnable()?;
        Ok(Classifier { layout: self, plan })
    }
}

impl fmt::Display for Sequential {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let stages: Vec<String> = self
            .stages
            .iter()
            .map(|s| match s {
                Stage::Linear { input, output } => format!("Linear({input}->{output})"),
                Stage::BatchNorm { width } => format!("BatchNorm({width})"),
                Stage::Relu => "ReLU".to_string(),
                Stage::Dropout { rate } => format!("Dropout({rate})"),
            })
            .collect();
        write!(f, "{}", stages.join(" > "))
    }
}

fn param<'w>(weights: &'w HashMap<String, Tensor>, ix: usize, suffix: &str) -> &'w Tensor {
    &weights[&format!("{ix}.{suffix}")]
}

/// slope = gamma / sqrt(var + eps), intercept = beta - mean * slope
fn fold_batch_norm(
    gamma: &Tensor,
    beta: &Tensor,
    mean: &Tensor,
    var: &Tensor,
) -> TractResult<(Vec<f32>, Vec<f32>)> {
    let gamma = gamma.as_slice::<f32>()?;
    let beta = beta.as_slice::<f32>()?;
    let mean = mean.as_slice::<f32>()?;
    let var = var.as_slice::<f32>()?;
    let slope: Vec<f32> =
        gamma.iter().zip(var).map(|(g, v)| g / (v + BATCHNORM_EPSILON).sqrt()).collect();
    let inter = beta.iter().zip(mean).zip(&slope).map(|((b, m), s)| b - m * s).collect();
    Ok((slope, inter))
}

/// The frozen classifier head.
pub struct Classifier {
    layout: Sequential,
    plan: TypedRunnableModel<TypedModel>,
}

impl fmt::Debug for Classifier {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Classifier({})", self.layout)
    }
}

impl Classifier {
    pub fn layout(&self) -> &Sequential {
        &self.layout
    }

    pub fn input_dim(&self) -> usize {
        self.layout.input_dim()
    }

    pub fn num_classes(&self) -> usize {
        self.layout.output_dim()
    }

    /// Scores one feature vector (length `input_dim()`), one score per class.
    pub fn scores(&self, features: &[f32]) -> TractResult<Vec<f32>> {
        ensure!(
            features.len() == self.input_dim(),
            "Classifier expects {} features, got {}",
            self.input_dim(),
            features.len()
        );
        let input = Tensor::from_shape(&[1, features.len()], features)?;
        let outputs = self.plan.run(tvec!(input.into()))?;
        let scores = outputs[0].as_slice::<f32>()?.to_vec();
        ensure!(
            scores.len() == self.num_classes(),
            "Classifier produced {} scores for {} classes",
            scores.len(),
            self.num_classes()
        );
        Ok(scores)
    }
}

/// Index of the highest score. Ties go to the first index.
pub fn argmax(scores: &[f32]) -> TractResult<usize> {
    ensure!(!scores.is_empty(), "No score to pick from");
    if let Some(ix) = scores.iter().position(|s| s.is_nan()) {
        bail!("Score {ix} is NaN");
    }
    let mut best = 0;
    for (ix, score) in scores.iter().enumerate().skip(1) {
        if *score > scores[best] {
            best = ix;
        }
    }
    Ok(best)
}
