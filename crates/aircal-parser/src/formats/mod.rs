mod on_demand;
mod qhawax;
mod reference;

pub use on_demand::parse_feature_rows;
pub use qhawax::{parse_device_payload, QhawaxRecord};
pub use reference::parse_reference_export;

use serde_json::Value;

/// Coerces a raw cell to a number. Empty cells, `nan` and anything that does
/// not parse as a float are treated as missing.
pub(crate) fn coerce_number(raw: &str) -> Option<f64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() || trimmed.eq_ignore_ascii_case("nan") {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|value| value.is_finite())
}

/// Numeric interpretation of a JSON value; `None` for nulls and for values
/// that have no numeric reading.
pub(crate) fn json_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64().filter(|v| v.is_finite()),
        Value::String(text) => coerce_number(text),
        _ => None,
    }
}
