use aircal_parser::{records_to_frame, RawRecord};
use chrono::{Duration, NaiveDateTime};
use polars::prelude::*;
use thiserror::Error;
use tracing::debug;

use crate::table::{TableError, TimeSeriesTable};

/// What to do with a row that lacks a value for a required column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MissingPolicy {
    /// Silently drop the row (resampling windows).
    DropRow,
    /// Fail the whole batch (caller-supplied inference rows).
    Reject,
}

#[derive(Debug, Clone)]
pub struct NormalizeSpec {
    pub timestamp_column: String,
    pub timestamp_format: String,
    /// Hours subtracted from every parsed timestamp to reach the target civil time.
    pub offset_hours: i64,
    /// Source column name → canonical column name.
    pub mapping: Vec<(String, String)>,
    /// When set, only these canonical columns are retained.
    pub keep: Option<Vec<String>>,
    pub exclude: Vec<String>,
    pub required: Vec<String>,
    pub missing: MissingPolicy,
    /// Inclusive bounds on the corrected timestamps.
    pub window: Option<(NaiveDateTime, NaiveDateTime)>,
}

#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("The input data is missing one or more required features: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("timestamp column '{0}' not found")]
    MissingTimestampColumn(String),
    #[error("row {row}: invalid timestamp '{value}' (expected {format})")]
    InvalidTimestamp {
        row: usize,
        value: String,
        format: String,
    },
    #[error("row {row}: missing value for required column {column}")]
    MissingValue { row: usize, column: String },
    #[error(transparent)]
    Table(#[from] TableError),
    #[error("polars operation failed: {0}")]
    Polars(#[from] PolarsError),
}

impl NormalizeError {
    pub fn is_validation(&self) -> bool {
        !matches!(self, NormalizeError::Polars(_) | NormalizeError::Table(_))
    }
}

/// Normalizes raw records into a time-indexed table. See [`normalize_frame`].
pub fn normalize(
    records: &[RawRecord],
    spec: &NormalizeSpec,
) -> Result<TimeSeriesTable, NormalizeError> {
    if records.is_empty() {
        return Ok(TimeSeriesTable::empty(&spec.required)?);
    }
    let frame = records_to_frame(records, &spec.timestamp_column)?;
    normalize_frame(&frame, spec)
}

/// Renames columns, parses and corrects timestamps, coerces values to
/// numbers, applies the missing-value policy, then sorts by time keeping the
/// first row of any duplicated timestamp.
pub fn normalize_frame(
    frame: &DataFrame,
    spec: &NormalizeSpec,
) -> Result<TimeSeriesTable, NormalizeError> {
    let mut df = frame.clone();
    for (source, canonical) in &spec.mapping {
        if source != canonical && df.column(source).is_ok() && df.column(canonical).is_err() {
            df.rename(source, canonical.as_str().into())?;
        }
    }

    let value_names: Vec<String> = df
        .get_columns()
        .iter()
        .map(|column| column.name().to_string())
        .filter(|name| name != &spec.timestamp_column)
        .filter(|name| !spec.exclude.contains(name))
        .filter(|name| spec.keep.as_ref().is_none_or(|keep| keep.contains(name)))
        .collect();

    let missing_columns: Vec<String> = spec
        .required
        .iter()
        .filter(|name| !value_names.contains(name))
        .cloned()
        .collect();
    if !missing_columns.is_empty() {
        return Err(NormalizeError::MissingColumns(missing_columns));
    }

    let timestamps = parse_timestamps(&df, spec)?;

    let mut value_columns = Vec::with_capacity(value_names.len());
    for name in &value_names {
        value_columns.push(numeric_values(df.column(name)?)?);
    }

    let required_positions: Vec<usize> = spec
        .required
        .iter()
        .filter_map(|name| value_names.iter().position(|candidate| candidate == name))
        .collect();

    let mut rows = Vec::with_capacity(df.height());
    for (row, ts) in timestamps.into_iter().enumerate() {
        let values: Vec<Option<f64>> = value_columns.iter().map(|column| column[row]).collect();

        if let Some(&position) = required_positions.iter().find(|&&p| values[p].is_none()) {
            match spec.missing {
                MissingPolicy::DropRow => continue,
                MissingPolicy::Reject => {
                    return Err(NormalizeError::MissingValue {
                        row,
                        column: value_names[position].clone(),
                    })
                }
            }
        }

        if let Some((start, end)) = spec.window {
            if ts < start || ts > end {
                continue;
            }
        }

        rows.push((ts, values));
    }

    let kept = rows.len();
    let table = TimeSeriesTable::from_rows(value_names, rows)?;
    debug!(
        input_rows = df.height(),
        kept_rows = kept,
        unique_rows = table.len(),
        "normalized records"
    );
    Ok(table)
}

fn parse_timestamps(
    df: &DataFrame,
    spec: &NormalizeSpec,
) -> Result<Vec<NaiveDateTime>, NormalizeError> {
    let column = df
        .column(&spec.timestamp_column)
        .map_err(|_| NormalizeError::MissingTimestampColumn(spec.timestamp_column.clone()))?;
    let as_text = column.as_materialized_series().cast(&DataType::String)?;
    let offset = Duration::hours(spec.offset_hours);

    let mut parsed = Vec::with_capacity(df.height());
    for (row, value) in as_text.str()?.into_iter().enumerate() {
        let raw = value.unwrap_or_default().trim();
        let ts = NaiveDateTime::parse_from_str(raw, &spec.timestamp_format).map_err(|_| {
            NormalizeError::InvalidTimestamp {
                row,
                value: raw.to_string(),
                format: spec.timestamp_format.clone(),
            }
        })?;
        parsed.push(ts - offset);
    }
    Ok(parsed)
}

fn numeric_values(column: &Column) -> PolarsResult<Vec<Option<f64>>> {
    let series = column.as_materialized_series();
    if matches!(series.dtype(), DataType::String) {
        return Ok(series
            .str()?
            .into_iter()
            .map(|value| value.and_then(coerce_number))
            .collect());
    }
    let cast = series.cast(&DataType::Float64)?;
    Ok(cast
        .f64()?
        .into_iter()
        .map(|value| value.filter(|v| v.is_finite()))
        .collect())
}

fn coerce_number(raw: &str) -> Option<f64> {
    raw.trim().parse::<f64>().ok().filter(|v| v.is_finite())
}
