//! Classifier head architecture, as persisted next to the weights.
//!
//! The training side stores its hyper-parameter search result as a JSON
//! document with a `params` object:
//!
//! ```json
//! {"params": {"n_layers": 2, "use_batchnorm": true,
//!             "n_units_l0": 512, "dropout_l0": 0.3,
//!             "n_units_l1": 128, "dropout_l1": 0.2, "lr": 0.0004}}
//! ```
//!
//! Keys that do not describe the architecture (learning rate, optimizer...)
//! are ignored.
use crate::internal::*;
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq)]
pub struct LayerConfig {
    pub units: usize,
    /// Only meaningful while training; kept so the layer sequence is complete.
    pub dropout: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierConfig {
    pub use_batchnorm: bool,
    pub layers: Vec<LayerConfig>,
}

impl ClassifierConfig {
    pub fn new(use_batchnorm: bool, layers: Vec<LayerConfig>) -> TractResult<ClassifierConfig> {
        let config = ClassifierConfig { use_batchnorm, layers };
        config.validate()?;
        Ok(config)
    }

    pub fn n_layers(&self) -> usize {
        self.layers.len()
    }

    /// Parses the full persisted document (`{"params": {...}}`).
    pub fn from_json(json: &str) -> TractResult<ClassifierConfig> {
        let doc: Value = serde_json::from_str(json).context("Parsing classifier config JSON")?;
        let params = doc
            .get("params")
            .context("Classifier config has no `params` key")?
            .as_object()
            .context("Classifier config `params` is not an object")?;
        Self::from_params(params)
    }

    pub fn from_params(params: &Map<String, Value>) -> TractResult<ClassifierConfig> {
        let n_layers = integer(params, "n_layers")?;
        let use_batchnorm = params
            .get("use_batchnorm")
            .context("Missing `use_batchnorm`")?
            .as_bool()
            .context("`use_batchnorm` must be a boolean")?;
        let layers = (0..n_layers)
            .map(|i| {
                let units = integer(params, &format!("n_units_l{i}"))?;
                let key = format!("dropout_l{i}");
                let dropout = params
                    .get(&key)
                    .with_context(|| format!("Missing `{key}`"))?
                    .as_f64()
                    .with_context(|| format!("`{key}` must be a number"))?;
                Ok(LayerConfig { units, dropout: dropout as f32 })
            })
            .collect::<TractResult<Vec<_>>>()?;
        ClassifierConfig::new(use_batchnorm, layers)
    }

    /// Serializes back to the persisted document layout.
    pub fn to_json(&self) -> String {
        let mut params = Map::new();
        params.insert("n_layers".into(), self.n_layers().into());
        params.insert("use_batchnorm".into(), self.use_batchnorm.into());
        for (i, layer) in self.layers.iter().enumerate() {
            params.insert(format!("n_units_l{i}"), layer.units.into());
            params.insert(format!("dropout_l{i}"), (layer.dropout as f64).into());
        }
        serde_json::json!({ "params": params }).to_string()
    }

    fn validate(&self) -> TractResult<()> {
        for (i, layer) in self.layers.iter().enumerate() {
            ensure!(layer.units > 0, "Layer {i} has zero units");
            ensure!(
                (0.0..=1.0).contains(&layer.dropout),
                "Layer {i} dropout rate {} is not in [0, 1]",
                layer.dropout
            );
        }
        Ok(())
    }
}

// Search frameworks sometimes write integral parameters as floats (`512.0`).
fn integer(params: &Map<String, Value>, key: &str) -> TractResult<usize> {
    let value = params.get(key).with_context(|| format!("Missing `{key}`"))?;
    if let Some(v) = value.as_u64() {
        return Ok(v as usize);
    }
    match value.as_f64() {
        Some(v) if v >= 0.0 && v.fract() == 0.0 => Ok(v as usize),
        _ => bail!("`{key}` must be a non-negative integer, got {value}"),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn parse_two_layers() -> TractResult<()> {
        let config = ClassifierConfig::from_json(
            r#"{"params": {"n_layers": 2, "use_batchnorm": true, "lr": 0.001,
                "n_units_l0": 512, "dropout_l0": 0.3, "n_units_l1": 64.0, "dropout_l1": 0}}"#,
        )?;
        assert!(config.use_batchnorm);
        assert_eq!(
            config.layers,
            vec![LayerConfig { units: 512, dropout: 0.3 }, LayerConfig { units: 64, dropout: 0.0 }]
        );
        Ok(())
    }

    #[test]
    fn json_roundtrip() -> TractResult<()> {
        let config = ClassifierConfig::new(
            false,
            vec![LayerConfig { units: 7, dropout: 0.5 }, LayerConfig { units: 3, dropout: 0.1 }],
        )?;
        assert_eq!(ClassifierConfig::from_json(&config.to_json())?, config);
        Ok(())
    }

    #[test]
    fn malformed_json() {
        assert!(ClassifierConfig::from_json("{\"params\": ").is_err());
        assert!(ClassifierConfig::from_json("{}").is_err());
        assert!(ClassifierConfig::from_json("{\"params\": []}").is_err());
    }

    #[test]
    fn missing_layer_keys() {
        let err = ClassifierConfig::from_json(
            r#"{"params": {"n_layers": 2, "use_batchnorm": false,
                "n_units_l0": 16, "dropout_l0": 0.2}}"#,
        )
        .unwrap_err();
        assert!(format!("{err:#}").contains("n_units_l1"));
    }

    #[test]
    fn no_hidden_layer() -> TractResult<()> {
        let config =
            ClassifierConfig::from_json(r#"{"params": {"n_layers": 0, "use_batchnorm": true}}"#)?;
        assert_eq!(config.n_layers(), 0);
        assert_eq!(ClassifierConfig::from_json(&config.to_json())?, config);
        Ok(())
    }

    #[test]
    fn dropout_bounds() -> TractResult<()> {
        let config = ClassifierConfig::from_json(
            r#"{"params": {"n_layers": 2, "use_batchnorm": false,
                "n_units_l0": 8, "dropout_l0": 1.0, "n_units_l1": 8, "dropout_l1": 0}}"#,
        )?;
        assert_eq!(config.layers[0].dropout, 1.0);
        assert!(ClassifierConfig::new(false, vec![LayerConfig { units: 8, dropout: -0.1 }]).is_err());
        Ok(())
    }

    #[test]
    fn invalid_values() {
        assert!(ClassifierConfig::from_json(
            r#"{"params": {"n_layers": 1, "use_batchnorm": "yes", "n_units_l0": 4, "dropout_l0": 0.1}}"#
        )
        .is_err());
        assert!(ClassifierConfig::from_json(
            r#"{"params": {"n_layers": 1, "use_batchnorm": false, "n_units_l0": 4.5, "dropout_l0": 0.1}}"#
        )
        .is_err());
        assert!(ClassifierConfig::from_json(
            r#"{"params": {"n_layers": 1, "use_batchnorm": false, "n_units_l0": 4, "dropout_l0": 1.5}}"#
        )
        .is_err());
    }
}
