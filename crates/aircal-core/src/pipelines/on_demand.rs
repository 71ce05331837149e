use aircal_parser::{parse_feature_rows, FeatureRow, ParserError};
use serde_json::Value;
use tracing::debug;

use crate::error::PipelineError;
use crate::model::ModelStore;
use crate::schema::qhawax_source_name;

const MISSING_FEATURES: &str = "The input data is missing one or more required features.";

/// Predicts one value per caller-supplied row, in input order. Rows must be
/// objects carrying every feature the device's model needs; anything less is
/// a validation error rather than a silently dropped row.
pub fn predict_on_demand(
    models: &dyn ModelStore,
    device_id: &str,
    data: &Value,
) -> Result<Vec<f64>, PipelineError> {
    let rows = parse_feature_rows(data).map_err(|err| match err {
        ParserError::DataRow { message, .. } => PipelineError::Validation(message),
        other => PipelineError::from(other),
    })?;
    let model = models.load(device_id)?;

    if rows.is_empty() {
        return Err(PipelineError::Validation(MISSING_FEATURES.to_string()));
    }

    let sources: Vec<&str> = model
        .features()
        .iter()
        .map(|feature| qhawax_source_name(feature))
        .collect();

    let predictions = rows
        .iter()
        .map(|row| {
            let features = feature_vector(row, &sources)?;
            Ok(model.predict(&features)?)
        })
        .collect::<Result<Vec<f64>, PipelineError>>()?;

    debug!(device_id, rows = predictions.len(), "on-demand predictions");
    Ok(predictions)
}

fn feature_vector(row: &FeatureRow, sources: &[&str]) -> Result<Vec<f64>, PipelineError> {
    sources
        .iter()
        .map(|source| {
            row.get(source)
                .ok_or_else(|| PipelineError::Validation(MISSING_FEATURES.to_string()))
        })
        .collect()
}
