//! Per-device calibration models, consumed as opaque feature → value functions.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Deserialize;
use thiserror::Error;
use tracing::{debug, info};

use crate::table::TimeSeriesTable;

#[derive(Debug, Error)]
pub enum ModelError {
    #[error("No model registered for device {0}")]
    NotFound(String),
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid model registry {path}: {source}")]
    Registry {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
    #[error("invalid model artifact {path}: {source}")]
    Artifact {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid model: {0}")]
    Invalid(String),
    #[error("model expects {expected} features, got {actual}")]
    FeatureCount { expected: usize, actual: usize },
    #[error("table has no column {0} required by the model")]
    MissingFeature(String),
    #[error("model cache unavailable")]
    CachePoisoned,
}

pub trait Regressor: Send + Sync {
    /// Column names the model consumes, in input order.
    fn features(&self) -> &[String];

    fn predict(&self, features: &[f64]) -> Result<f64, ModelError>;
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Standardization {
    pub means: Vec<f64>,
    pub scales: Vec<f64>,
}

/// `intercept + Σ coefficient·x`, with optional per-feature standardization
/// `(x - mean) / scale` applied first.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LinearModel {
    features: Vec<String>,
    intercept: f64,
    coefficients: Vec<f64>,
    #[serde(default)]
    scaler: Option<Standardization>,
}

impl LinearModel {
    pub fn new(
        features: Vec<String>,
        intercept: f64,
        coefficients: Vec<f64>,
        scaler: Option<Standardization>,
    ) -> Result<Self, ModelError> {
        let model = Self {
            features,
            intercept,
            coefficients,
            scaler,
        };
        model.validate()?;
        Ok(model)
    }

    fn validate(&self) -> Result<(), ModelError> {
        let width = self.features.len();
        if self.coefficients.len() != width {
            return Err(ModelError::Invalid(format!(
                "{} coefficients for {width} features",
                self.coefficients.len()
            )));
        }
        if let Some(scaler) = &self.scaler {
            if scaler.means.len() != width || scaler.scales.len() != width {
                return Err(ModelError::Invalid(
                    "scaler dimensions do not match features".to_string(),
                ));
            }
            if scaler.scales.iter().any(|scale| *scale == 0.0 || !scale.is_finite()) {
                return Err(ModelError::Invalid("scaler has a zero scale".to_string()));
            }
        }
        Ok(())
    }
}

impl Regressor for LinearModel {
    fn features(&self) -> &[String] {
        &self.features
    }

    fn predict(&self, features: &[f64]) -> Result<f64, ModelError> {
        if features.len() != self.coefficients.len() {
            return Err(ModelError::FeatureCount {
                expected: self.coefficients.len(),
                actual: features.len(),
            });
        }
        let total = features
            .iter()
            .enumerate()
            .map(|(i, x)| {
                let x = match &self.scaler {
                    Some(scaler) => (x - scaler.means[i]) / scaler.scales[i],
                    None => *x,
                };
                self.coefficients[i] * x
            })
            .sum::<f64>();
        Ok(self.intercept + total)
    }
}

/// Source of per-device models.
pub trait ModelStore: Send + Sync {
    fn load(&self, device_id: &str) -> Result<Arc<dyn Regressor>, ModelError>;

    fn contains(&self, device_id: &str) -> bool;
}

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    models: BTreeMap<String, PathBuf>,
}

/// Models listed in a TOML registry:
///
/// ```toml
/// [models]
/// qH013 = "qH013.json"
/// ```
///
/// Artifact paths are relative to the registry file. Each artifact is parsed
/// the first time it is asked for and cached afterwards.
pub struct FileModelStore {
    registry: BTreeMap<String, PathBuf>,
    cache: Mutex<HashMap<String, Arc<dyn Regressor>>>,
}

impl FileModelStore {
    pub fn from_registry(path: impl AsRef<Path>) -> Result<Self, ModelError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let registry: RegistryFile = toml::from_str(&text).map_err(|source| ModelError::Registry {
            path: path.to_path_buf(),
            source,
        })?;

        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let registry: BTreeMap<String, PathBuf> = registry
            .models
            .into_iter()
            .map(|(device, artifact)| (device, base.join(artifact)))
            .collect();

        info!(path = %path.display(), models = registry.len(), "loaded model registry");
        Ok(Self {
            registry,
            cache: Mutex::new(HashMap::new()),
        })
    }

    pub fn device_ids(&self) -> impl Iterator<Item = &str> {
        self.registry.keys().map(String::as_str)
    }
}

fn read_artifact(path: &Path) -> Result<LinearModel, ModelError> {
    let text = fs::read_to_string(path).map_err(|source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let model: LinearModel = serde_json::from_str(&text).map_err(|source| ModelError::Artifact {
        path: path.to_path_buf(),
        source,
    })?;
    model.validate()?;
    Ok(model)
}

impl ModelStore for FileModelStore {
    fn load(&self, device_id: &str) -> Result<Arc<dyn Regressor>, ModelError> {
        let path = self
            .registry
            .get(device_id)
            .ok_or_else(|| ModelError::NotFound(device_id.to_string()))?;

        let mut cache = self.cache.lock().map_err(|_| ModelError::CachePoisoned)?;
        if let Some(model) = cache.get(device_id) {
            return Ok(Arc::clone(model));
        }

        let model: Arc<dyn Regressor> = Arc::new(read_artifact(path)?);
        debug!(device_id, path = %path.display(), "loaded model artifact");
        cache.insert(device_id.to_string(), Arc::clone(&model));
        Ok(model)
    }

    fn contains(&self, device_id: &str) -> bool {
        self.registry.contains_key(device_id)
    }
}

/// Fixed in-memory set of models.
#[derive(Default, Clone)]
pub struct StaticModelStore {
    models: HashMap<String, Arc<dyn Regressor>>,
}

impl StaticModelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, device_id: impl Into<String>, model: impl Regressor + 'static) -> Self {
        self.models.insert(device_id.into(), Arc::new(model));
        self
    }
}

impl ModelStore for StaticModelStore {
    fn load(&self, device_id: &str) -> Result<Arc<dyn Regressor>, ModelError> {
        self.models
            .get(device_id)
            .cloned()
            .ok_or_else(|| ModelError::NotFound(device_id.to_string()))
    }

    fn contains(&self, device_id: &str) -> bool {
        self.models.contains_key(device_id)
    }
}

/// Predicts one value per table row. Rows missing any model feature yield
/// missing.
pub fn predict_table(
    table: &TimeSeriesTable,
    model: &dyn Regressor,
) -> Result<Vec<Option<f64>>, ModelError> {
    let inputs = model
        .features()
        .iter()
        .map(|name| {
            table
                .column(name)
                .ok_or_else(|| ModelError::MissingFeature(name.clone()))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let mut predictions = Vec::with_capacity(table.len());
    let mut row_features = Vec::with_capacity(inputs.len());
    for row in 0..table.len() {
        row_features.clear();
        row_features.extend(inputs.iter().map_while(|column| column[row]));
        if row_features.len() == inputs.len() {
            predictions.push(Some(model.predict(&row_features)?));
        } else {
            predictions.push(None);
        }
    }
    Ok(predictions)
}
