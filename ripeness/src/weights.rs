//! Persisted classifier: architecture document plus parameter tensors.
//!
//! The container is a numpy `.npz` archive:
//! * `config_json`: 1-D `uint8` array, the UTF-8 bytes of the JSON architecture
//!   document (see [`crate::config`]);
//! * `model_weights/<name>`: one array per parameter, `<name>` being the
//!   sequential parameter name (`0.weight`, `1.running_var`, ...).
//!
//! Float arrays may be f32 or f64 and are loaded as f32.
use crate::classifier::{Classifier, reconstruct_model};
use crate::config::ClassifierConfig;
use crate::internal::*;
use crate::labels::NUM_CLASSES;
use ndarray::{Array1, ArrayD, IxDyn, OwnedRepr};
use ndarray_npy::{NpzReader, NpzWriter};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Seek, Write};
use std::path::Path;

pub const CONFIG_ATTRIBUTE: &str = "config_json";
pub const WEIGHTS_GROUP: &str = "model_weights";

#[derive(Debug, Clone)]
pub struct ModelFile {
    pub config: ClassifierConfig,
    pub weights: HashMap<String, Tensor>,
}

impl ModelFile {
    pub fn read(path: impl AsRef<Path>) -> TractResult<ModelFile> {
        let path = path.as_ref();
        let file = File::open(path)
            .with_context(|| format!("Opening classifier file {}", path.display()))?;
        Self::read_from(file).with_context(|| format!("Reading classifier file {}", path.display()))
    }

    pub fn read_from<R: Read + Seek>(reader: R) -> TractResult<ModelFile> {
        let mut npz = NpzReader::new(reader)?;
        let mut config = None;
        let mut weights = HashMap::new();
        let prefix = format!("{WEIGHTS_GROUP}/");
        for raw in npz.names()? {
            let name = raw.trim_end_matches(".npy");
            if name == CONFIG_ATTRIBUTE {
                let bytes: Array1<u8> = npz
                    .by_name(&raw)
                    .with_context(|| format!("`{CONFIG_ATTRIBUTE}` must be a uint8 array"))?;
                let json = String::from_utf8(bytes.to_vec())
                    .with_context(|| format!("`{CONFIG_ATTRIBUTE}` is not UTF-8"))?;
                config = Some(ClassifierConfig::from_json(&json)?);
            } else if let Some(param) = name.strip_prefix(&prefix) {
                let tensor = read_tensor(&mut npz, &raw)
                    .with_context(|| format!("Reading parameter `{param}`"))?;
                weights.insert(param.to_string(), tensor);
            } else {
                debug!("Ignoring {raw} in classifier file");
            }
        }
        let config = config.with_context(|| format!("No `{CONFIG_ATTRIBUTE}` entry"))?;
        ensure!(!weights.is_empty(), "No `{WEIGHTS_GROUP}` entries");
        Ok(ModelFile { config, weights })
    }

    pub fn write(&self, path: impl AsRef<Path>) -> TractResult<()> {
        let path = path.as_ref();
        let file = File::create(path)
            .with_context(|| format!("Creating classifier file {}", path.display()))?;
        self.write_to(file)?;
        Ok(())
    }

    pub fn write_to<W: Write + Seek>(&self, writer: W) -> TractResult<W> {
        let mut npz = NpzWriter::new(writer);
        let config = Array1::from(self.config.to_json().into_bytes());
        npz.add_array(CONFIG_ATTRIBUTE, &config)?;
        let mut names: Vec<&String> = self.weights.keys().collect();
        names.sort();
        for name in names {
            let tensor = &self.weights[name];
            let entry = format!("{WEIGHTS_GROUP}/{name}");
            let shape = IxDyn(tensor.shape());
            if tensor.datum_type() == f32::datum_type() {
                let array = ArrayD::from_shape_vec(shape, tensor.as_slice::<f32>()?.to_vec())?;
                npz.add_array(entry, &array)?;
            } else {
                let tensor = tensor.cast_to::<i64>()?;
                let array = ArrayD::from_shape_vec(shape, tensor.as_slice::<i64>()?.to_vec())?;
                npz.add_array(entry, &array)?;
            }
        }
        Ok(npz.finish()?)
    }

    pub fn into_classifier(self) -> TractResult<Classifier> {
        let layout = reconstruct_model(&self.config, NUM_CLASSES);
        info!("Classifier layout: {layout}");
        layout.load_state_dict(&self.weights)
    }
}

/// Loads the classifier head from its persisted file, failing on any mismatch
/// between the described architecture and the stored parameters.
pub fn load_model(path: impl AsRef<Path>) -> TractResult<Classifier> {
    let path = path.as_ref();
    ModelFile::read(path)?
        .into_classifier()
        .with_context(|| format!("Loading classifier from {}", path.display()))
}

fn read_tensor<R: Read + Seek>(npz: &mut NpzReader<R>, name: &str) -> TractResult<Tensor> {
    fn to_tensor<T: Datum + Copy>(array: ArrayD<T>) -> TractResult<Tensor> {
        let data: Vec<T> = array.iter().copied().collect();
        Tensor::from_shape(array.shape(), &data)
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<f32>, IxDyn>(name) {
        return to_tensor(array);
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<f64>, IxDyn>(name) {
        return to_tensor(array.mapv(|x| x as f32));
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i64>, IxDyn>(name) {
        return to_tensor(array);
    }
    if let Ok(array) = npz.by_name::<OwnedRepr<i32>, IxDyn>(name) {
        return to_tensor(array.mapv(|x| x as i64));
    }
    bail!("Unsupported array type (expected f32, f64, i64 or i32)")
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::classifier::test::{reference_forward, weights_for};
    use crate::classifier::{FEATURE_DIM, argmax};
    use crate::config::LayerConfig;
    use approx::assert_relative_eq;

    fn model_file(use_batchnorm: bool) -> ModelFile {
        let config = ClassifierConfig::new(
            use_batchnorm,
            vec![LayerConfig { units: 16, dropout: 0.3 }, LayerConfig { units: 8, dropout: 0.1 }],
        )
        .unwrap();
        let weights = weights_for(&reconstruct_model(&config, NUM_CLASSES));
        ModelFile { config, weights }
    }

    #[test]
    fn write_then_load() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        for use_batchnorm in [false, true] {
            let file = model_file(use_batchnorm);
            let path = dir.path().join(format!("dnn-{use_batchnorm}.npz"));
            file.write(&path)?;
            let reread = ModelFile::read(&path)?;
            assert_eq!(reread.config, file.config);
            assert_eq!(reread.weights, file.weights);

            let classifier = load_model(&path)?;
            assert_eq!(classifier.input_dim(), FEATURE_DIM);
            assert_eq!(classifier.num_classes(), NUM_CLASSES);
            let features: Vec<f32> = (0..FEATURE_DIM).map(|i| (i % 10) as f32 / 10.0).collect();
            let scores = classifier.scores(&features)?;
            let expected = reference_forward(classifier.layout(), &file.weights, &features);
            for (s, e) in scores.iter().zip(&expected) {
                assert_relative_eq!(*s, *e, epsilon = 1e-3, max_relative = 1e-3);
            }
            assert!(argmax(&scores)? < NUM_CLASSES);
        }
        Ok(())
    }

    #[test]
    fn f64_arrays_are_accepted() -> TractResult<()> {
        let file = model_file(false);
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dnn.npz");
        let mut npz = NpzWriter::new(File::create(&path)?);
        npz.add_array(CONFIG_ATTRIBUTE, &Array1::from(file.config.to_json().into_bytes()))?;
        for (name, tensor) in &file.weights {
            let data: Vec<f64> = tensor.as_slice::<f32>()?.iter().map(|&x| x as f64).collect();
            let array = ArrayD::from_shape_vec(IxDyn(tensor.shape()), data)?;
            npz.add_array(format!("{WEIGHTS_GROUP}/{name}"), &array)?;
        }
        npz.finish()?;
        let reread = ModelFile::read(&path)?;
        assert_eq!(reread.weights["0.weight"].datum_type(), f32::datum_type());
        reread.into_classifier()?;
        Ok(())
    }

    #[test]
    fn head_only_file() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dnn.npz");
        let mut npz = NpzWriter::new(File::create(&path)?);
        let config = r#"{"params": {"n_layers": 0, "use_batchnorm": false, "lr": 0.01}}"#;
        npz.add_array(CONFIG_ATTRIBUTE, &Array1::from(config.as_bytes().to_vec()))?;
        let weight = ArrayD::from_shape_fn(IxDyn(&[NUM_CLASSES, FEATURE_DIM]), |ix| {
            if ix[1] == ix[0] { 1.0f64 } else { 0.0 }
        });
        npz.add_array(format!("{WEIGHTS_GROUP}/0.weight"), &weight)?;
        let bias = ArrayD::from_shape_vec(IxDyn(&[NUM_CLASSES]), vec![0.0f64, 0.0, 0.5, 0.0])?;
        npz.add_array(format!("{WEIGHTS_GROUP}/0.bias"), &bias)?;
        npz.finish()?;

        let classifier = load_model(&path)?;
        assert_eq!(classifier.layout().parameters().len(), 2);
        let mut features = vec![0.0; FEATURE_DIM];
        features[3] = 0.25;
        let scores = classifier.scores(&features)?;
        for (s, e) in scores.iter().zip([0.0f32, 0.0, 0.5, 0.25]) {
            assert_relative_eq!(*s, e, epsilon = 1e-6);
        }
        assert_eq!(argmax(&scores)?, 2);
        Ok(())
    }

    #[test]
    fn missing_file() {
        let err = load_model("/definitely/not/here/dnn.npz").unwrap_err();
        assert!(format!("{err:#}").contains("Opening classifier file"));
    }

    #[test]
    fn malformed_config() -> TractResult<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dnn.npz");
        let mut npz = NpzWriter::new(File::create(&path)?);
        npz.add_array(CONFIG_ATTRIBUTE, &Array1::from(b"{\"params\": {".to_vec()))?;
        npz.add_array(format!("{WEIGHTS_GROUP}/0.bias"), &ArrayD::<f32>::zeros(IxDyn(&[4])))?;
        npz.finish()?;
        assert!(load_model(&path).is_err());
        Ok(())
    }

    #[test]
    fn mismatched_weights() -> TractResult<()> {
        let mut file = model_file(true);
        file.weights.remove("5.running_var");
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("dnn.npz");
        file.write(&path)?;
        let err = load_model(&path).unwrap_err();
        assert!(format!("{err:#}").contains("missing `5.running_var`"));
        Ok(())
    }
}
