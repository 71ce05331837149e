//! Canonical column names and the per-source normalization presets.

use once_cell::sync::Lazy;

use crate::normalize::{MissingPolicy, NormalizeSpec};

pub const PM25: &str = "Pm2.5";
pub const PM10: &str = "PM10";
pub const TEMPERATURE: &str = "Temp";
pub const HUMIDITY: &str = "Humedad";
pub const PRESSURE: &str = "Presion";
pub const PREDICTED_PM25: &str = "Prediccion_Pm2.5";
pub const DEVICE_LABEL: &str = "qhawax_id";

pub const QHAWAX_TIMESTAMP: &str = "timestamp_zone";
pub const QHAWAX_TIMESTAMP_FORMAT: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// qHAWAX timestamps are UTC; published data is labelled in GMT-5.
pub const QHAWAX_OFFSET_HOURS: i64 = 5;

pub const REFERENCE_TIMESTAMP: &str = "Date & Time (Local)";
pub const REFERENCE_TIMESTAMP_FORMAT: &str = "%m/%d/%Y %I:%M:%S %p";
pub const REFERENCE_PM25: &str = "PM2.5 Conc";
pub const REFERENCE_JOINED_PM25: &str = "Teledyne_pm2.5";

/// Upstream field name → canonical column name.
pub static QHAWAX_COLUMN_MAPPING: Lazy<Vec<(String, String)>> = Lazy::new(|| {
    [
        ("PM25", PM25),
        ("temperature", TEMPERATURE),
        ("humidity", HUMIDITY),
        ("pressure", PRESSURE),
    ]
    .into_iter()
    .map(|(source, canonical)| (source.to_string(), canonical.to_string()))
    .collect()
});

/// Feature columns the calibration models consume, in model order.
pub static MODEL_FEATURES: Lazy<Vec<String>> = Lazy::new(|| {
    [PM25, TEMPERATURE, HUMIDITY, PRESSURE]
        .into_iter()
        .map(str::to_string)
        .collect()
});

/// Upstream name for a canonical column, falling back to the column itself.
pub fn qhawax_source_name(canonical: &str) -> &str {
    QHAWAX_COLUMN_MAPPING
        .iter()
        .find(|(_, target)| target == canonical)
        .map(|(source, _)| source.as_str())
        .unwrap_or(canonical)
}

impl NormalizeSpec {
    /// qHAWAX 5-minute averages as returned by the upstream API.
    pub fn qhawax() -> Self {
        Self {
            timestamp_column: QHAWAX_TIMESTAMP.to_string(),
            timestamp_format: QHAWAX_TIMESTAMP_FORMAT.to_string(),
            offset_hours: QHAWAX_OFFSET_HOURS,
            mapping: QHAWAX_COLUMN_MAPPING.clone(),
            keep: None,
            exclude: vec!["id".to_string()],
            required: MODEL_FEATURES.clone(),
            missing: MissingPolicy::DropRow,
            window: None,
        }
    }

    /// Reference-instrument exports, already in local civil time.
    pub fn reference() -> Self {
        Self {
            timestamp_column: REFERENCE_TIMESTAMP.to_string(),
            timestamp_format: REFERENCE_TIMESTAMP_FORMAT.to_string(),
            offset_hours: 0,
            mapping: Vec::new(),
            keep: Some(vec![REFERENCE_PM25.to_string()]),
            exclude: Vec::new(),
            required: vec![REFERENCE_PM25.to_string()],
            missing: MissingPolicy::DropRow,
            window: None,
        }
    }
}
