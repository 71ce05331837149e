use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Deserialize;

/// One raw observation: the source timestamp string plus every numeric field
/// the source reported, keyed by its source-specific name.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RawRecord {
    pub timestamp: String,
    pub values: BTreeMap<String, Option<f64>>,
}

impl RawRecord {
    pub fn new(timestamp: impl Into<String>) -> Self {
        Self {
            timestamp: timestamp.into(),
            values: BTreeMap::new(),
        }
    }

    pub fn with_value(mut self, name: impl Into<String>, value: Option<f64>) -> Self {
        self.values.insert(name.into(), value);
        self
    }
}

/// Records reported by a single device for one request window. A device
/// whose part of the payload could not be decoded carries the decode error
/// instead, leaving its neighbours usable.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecords {
    pub device_id: String,
    pub records: Result<Vec<RawRecord>, String>,
}

impl DeviceRecords {
    pub fn new(device_id: impl Into<String>, records: Vec<RawRecord>) -> Self {
        Self {
            device_id: device_id.into(),
            records: Ok(records),
        }
    }

    pub fn rejected(device_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            device_id: device_id.into(),
            records: Err(error.into()),
        }
    }

    /// Decoded record count; zero for a rejected device.
    pub fn record_count(&self) -> usize {
        self.records.as_ref().map_or(0, Vec::len)
    }
}

/// One row of an on-demand prediction request, using the upstream field names.
#[derive(Debug, Clone, Copy, PartialEq, Default, Deserialize)]
pub struct FeatureRow {
    #[serde(rename = "PM25", default)]
    pub pm25: Option<f64>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub pressure: Option<f64>,
}

impl FeatureRow {
    /// Value of an upstream field by name, `None` when absent or unknown.
    pub fn get(&self, field: &str) -> Option<f64> {
        match field {
            "PM25" => self.pm25,
            "temperature" => self.temperature,
            "humidity" => self.humidity,
            "pressure" => self.pressure,
            _ => None,
        }
    }
}

/// Builds a frame with a string timestamp column followed by one Float64
/// column per field seen in any record (missing fields become nulls).
pub fn records_to_frame(records: &[RawRecord], timestamp_column: &str) -> PolarsResult<DataFrame> {
    let mut names: Vec<&str> = Vec::new();
    for record in records {
        for name in record.values.keys() {
            if name != timestamp_column && !names.contains(&name.as_str()) {
                names.push(name);
            }
        }
    }

    let timestamps: Vec<Option<&str>> = records
        .iter()
        .map(|record| Some(record.timestamp.as_str()))
        .collect();

    let mut columns: Vec<Column> = Vec::with_capacity(names.len() + 1);
    columns.push(Series::new(timestamp_column.into(), timestamps).into());

    for name in names {
        let values: Vec<Option<f64>> = records
            .iter()
            .map(|record| record.values.get(name).copied().flatten())
            .collect();
        columns.push(Series::new(name.into(), values).into());
    }

    DataFrame::new(columns)
}
