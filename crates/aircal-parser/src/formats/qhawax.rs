use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer};
use serde_json::Value;

use super::json_number;
use crate::errors::ParserError;
use crate::model::{DeviceRecords, RawRecord};

const NAME: &str = "QHAWAX_PAYLOAD";

/// A single 5-minute average reported by the qHAWAX API. The sensor columns
/// the models rely on are typed; every other numeric field is carried in
/// `extra` under its source name.
#[derive(Debug, Clone, Deserialize)]
pub struct QhawaxRecord {
    pub timestamp_zone: Option<String>,
    #[serde(rename = "PM25", default, deserialize_with = "lenient_number")]
    pub pm25: Option<f64>,
    #[serde(rename = "PM10", default, deserialize_with = "lenient_number")]
    pub pm10: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub temperature: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub humidity: Option<f64>,
    #[serde(default, deserialize_with = "lenient_number")]
    pub pressure: Option<f64>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, Value>,
}

fn lenient_number<'de, D>(deserializer: D) -> Result<Option<f64>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(json_number(&value))
}

impl QhawaxRecord {
    fn into_raw(self, row_index: usize) -> Result<RawRecord, ParserError> {
        let timestamp = self
            .timestamp_zone
            .filter(|ts| !ts.trim().is_empty())
            .ok_or_else(|| ParserError::DataRow {
                parser: NAME,
                row_index,
                message: "missing timestamp_zone".into(),
            })?;

        let mut values = BTreeMap::new();
        for (name, value) in self.extra {
            let numeric_like = matches!(value, Value::Null | Value::Number(_))
                || json_number(&value).is_some();
            if numeric_like {
                values.insert(name, json_number(&value));
            }
        }
        values.insert("PM25".to_string(), self.pm25);
        values.insert("PM10".to_string(), self.pm10);
        values.insert("temperature".to_string(), self.temperature);
        values.insert("humidity".to_string(), self.humidity);
        values.insert("pressure".to_string(), self.pressure);

        Ok(RawRecord { timestamp, values })
    }
}

/// Decodes the `data` object of the qHAWAX "5 minute averages" response:
/// `{ "<device id>": [ { "data": [record, ...], ... } ], ... }`.
///
/// Devices are decoded independently: a malformed record only rejects its own
/// device. Devices with no records produce an entry with an empty record list
/// so the caller can report them as skipped. Only a payload that is not an
/// object fails as a whole.
pub fn parse_device_payload(payload: &Value) -> Result<Vec<DeviceRecords>, ParserError> {
    let devices = payload.as_object().ok_or_else(|| ParserError::Validation {
        parser: NAME,
        message: "expected an object keyed by device id".into(),
    })?;

    let output = devices
        .iter()
        .map(|(device_id, entries)| match parse_device_records(entries) {
            Ok(records) => DeviceRecords::new(device_id.clone(), records),
            Err(err) => DeviceRecords::rejected(device_id.clone(), err.to_string()),
        })
        .collect();
    Ok(output)
}

fn parse_device_records(entries: &Value) -> Result<Vec<RawRecord>, ParserError> {
    let raw_records = entries
        .as_array()
        .and_then(|items| items.first())
        .and_then(|first| first.get("data"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();

    let mut records = Vec::with_capacity(raw_records.len());
    for (row_index, raw) in raw_records.into_iter().enumerate() {
        let record: QhawaxRecord =
            serde_json::from_value(raw).map_err(|source| ParserError::Json {
                parser: NAME,
                source,
            })?;
        records.push(record.into_raw(row_index)?);
    }
    Ok(records)
}
