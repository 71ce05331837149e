//! Reads published daily artifacts back for a date range and lines the
//! predictions up with the reference instrument.

use std::collections::HashSet;

use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::Serialize;
use tracing::debug;

use crate::codec::decode_csv;
use crate::error::PipelineError;
use crate::join::{join_reference, ReferenceColumn};
use crate::object_store::ObjectStore;
use crate::publish::{daily_key, parse_daily_key};
use crate::schema::{
    DEVICE_LABEL, PM10, PM25, PREDICTED_PM25, REFERENCE_JOINED_PM25, REFERENCE_PM25,
};
use crate::table::{Frequency, Segment, TimeSeriesTable};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const SERVED_TIMESTAMP_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// Inclusive range of civil days.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PredictionQuery {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl PredictionQuery {
    pub fn parse(start: Option<&str>, end: Option<&str>) -> Result<Self, PipelineError> {
        let (Some(start), Some(end)) = (start, end) else {
            return Err(PipelineError::Validation(
                "The parameters start_date and end_date cannot be None".to_string(),
            ));
        };
        let parse = |raw: &str| {
            NaiveDate::parse_from_str(raw.trim(), DATE_FORMAT).map_err(|_| {
                PipelineError::Validation("Invalid date format. Please use YYYY-MM-DD.".to_string())
            })
        };
        let (start, end) = (parse(start)?, parse(end)?);
        if end < start {
            return Err(PipelineError::Validation(
                "The end_date must be greater than or equal to start_date.".to_string(),
            ));
        }
        Ok(Self { start, end })
    }

    pub fn contains(&self, day: NaiveDate) -> bool {
        self.start <= day && day <= self.end
    }
}

#[derive(Debug, Clone)]
pub struct ServingConfig {
    pub frequency: Frequency,
    pub suffix: String,
    pub label_column: String,
    pub reference: ReferenceColumn,
}

impl Default for ServingConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::five_minutes(),
            suffix: "prediction".to_string(),
            label_column: DEVICE_LABEL.to_string(),
            reference: ReferenceColumn::new(REFERENCE_PM25, REFERENCE_JOINED_PM25),
        }
    }
}

/// One served row. `reference_pm25` is omitted entirely when no reference
/// data covered the range, and `null` when it did but not this timestamp.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServedRow {
    pub date: String,
    #[serde(rename = "PM10")]
    pub pm10: Option<f64>,
    #[serde(rename = "Pm2.5")]
    pub pm25: Option<f64>,
    #[serde(rename = "Prediccion_Pm2.5")]
    pub predicted_pm25: Option<f64>,
    pub qhawax_id: Option<String>,
    #[serde(rename = "Teledyne_pm2.5", skip_serializing_if = "Option::is_none")]
    pub reference_pm25: Option<Option<f64>>,
}

/// Keys in `store` whose day falls inside the query, in key order.
async fn keys_in_range(
    store: &dyn ObjectStore,
    query: &PredictionQuery,
    config: &ServingConfig,
) -> Result<Vec<String>, PipelineError> {
    let start_after = query
        .start
        .checked_sub_days(Days::new(1))
        .map(|day| daily_key(day, config.frequency, &config.suffix));
    let keys = store.list(start_after.as_deref()).await?;
    Ok(keys
        .into_iter()
        .filter(|key| key.ends_with(".csv"))
        .filter(|key| parse_daily_key(key).is_some_and(|day| query.contains(day)))
        .collect())
}

async fn load_segments(
    store: &dyn ObjectStore,
    query: &PredictionQuery,
    config: &ServingConfig,
    label_column: Option<&str>,
) -> Result<Vec<Segment>, PipelineError> {
    let mut segments = Vec::new();
    for key in keys_in_range(store, query, config).await? {
        let bytes = store.get(&key).await?;
        let decoded = decode_csv(&bytes, label_column)?;
        debug!(key = %key, segments = decoded.len(), "loaded artifact");
        segments.extend(decoded);
    }
    Ok(segments)
}

/// Stored predictions for the query range joined with the reference
/// instrument by exact timestamp. Rows are deduplicated on (timestamp,
/// device) alone, keeping the first occurrence: a later row for the same
/// device and timestamp is dropped even when its values differ. No
/// prediction artifacts yields an empty list.
pub async fn query_predictions(
    predictions: &dyn ObjectStore,
    reference: &dyn ObjectStore,
    query: &PredictionQuery,
    config: &ServingConfig,
) -> Result<Vec<ServedRow>, PipelineError> {
    let segments = load_segments(predictions, query, config, Some(&config.label_column)).await?;
    if segments.is_empty() {
        return Ok(Vec::new());
    }

    let reference_tables: Vec<TimeSeriesTable> = load_segments(reference, query, config, None)
        .await?
        .into_iter()
        .map(|segment| segment.table)
        .filter(|table| table.has_column(&config.reference.source))
        .collect();
    let reference_table = if reference_tables.is_empty() {
        None
    } else {
        Some(TimeSeriesTable::concat(&reference_tables)?)
    };

    let mut seen: HashSet<(NaiveDateTime, Option<String>)> = HashSet::new();
    let mut rows = Vec::new();
    for segment in segments {
        let joined = join_reference(&segment.table, reference_table.as_ref(), &config.reference)?;
        let pm10 = joined.column(PM10);
        let pm25 = joined.column(PM25);
        let predicted = joined.column(PREDICTED_PM25);
        let reference_values = joined.column(&config.reference.target);

        for (row, ts) in joined.index().into_iter().enumerate() {
            if !seen.insert((ts, segment.label.clone())) {
                continue;
            }
            rows.push(ServedRow {
                date: ts.format(SERVED_TIMESTAMP_FORMAT).to_string(),
                pm10: pm10.as_ref().and_then(|values| values[row]),
                pm25: pm25.as_ref().and_then(|values| values[row]),
                predicted_pm25: predicted.as_ref().and_then(|values| values[row]),
                qhawax_id: segment.label.clone(),
                reference_pm25: reference_values.as_ref().map(|values| values[row]),
            });
        }
    }

    debug!(rows = rows.len(), "served predictions");
    Ok(rows)
}
