use serde_json::Value;

use crate::errors::ParserError;
use crate::model::FeatureRow;

const NAME: &str = "ON_DEMAND_REQUEST";

/// Decodes the `data` field of an on-demand prediction request. The value
/// must be a list of objects; field-level completeness is checked later,
/// against the model's feature list.
pub fn parse_feature_rows(data: &Value) -> Result<Vec<FeatureRow>, ParserError> {
    let items = data.as_array().ok_or_else(|| ParserError::DataRow {
        parser: NAME,
        row_index: 0,
        message: "Data must be a list of dictionaries".into(),
    })?;

    items
        .iter()
        .enumerate()
        .map(|(row_index, item)| {
            if !item.is_object() {
                return Err(ParserError::DataRow {
                    parser: NAME,
                    row_index,
                    message: "Data must be a list of dictionaries".into(),
                });
            }
            serde_json::from_value(item.clone()).map_err(|err| ParserError::DataRow {
                parser: NAME,
                row_index,
                message: err.to_string(),
            })
        })
        .collect()
}
