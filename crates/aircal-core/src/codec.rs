//! CSV layout of published daily artifacts.
//!
//! ```text
//! timestamp,PM10,Pm2.5,...,Prediccion_Pm2.5,qhawax_id
//! 2025-03-02 00:00:00,20.1,12.5,...,11.9,qH013
//! ```
//!
//! Missing values are empty fields. Identical segments always encode to
//! identical bytes.

use std::collections::HashMap;

use chrono::NaiveDateTime;
use thiserror::Error;

use crate::table::{Segment, TableError, TimeSeriesTable};

pub const TIMESTAMP_HEADER: &str = "timestamp";
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("failed to flush csv writer: {0}")]
    Flush(String),
    #[error("artifact has no header row")]
    MissingHeader,
    #[error("row {row}: invalid timestamp '{value}'")]
    InvalidTimestamp { row: usize, value: String },
    #[error("row {row}: column {column} holds non-numeric value '{value}'")]
    InvalidValue {
        row: usize,
        column: String,
        value: String,
    },
    #[error(transparent)]
    Table(#[from] TableError),
}

/// Writes segments one after another under a shared header made of the union
/// of their columns in first-seen order, followed by `label_column` when given.
pub fn encode_csv(segments: &[Segment], label_column: Option<&str>) -> Result<Vec<u8>, CodecError> {
    let mut names: Vec<&str> = Vec::new();
    for segment in segments {
        for name in segment.table.column_names() {
            if !names.contains(&name) && Some(name) != label_column {
                names.push(name);
            }
        }
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    let mut header: Vec<&str> = Vec::with_capacity(names.len() + 2);
    header.push(TIMESTAMP_HEADER);
    header.extend(names.iter().copied());
    if let Some(label) = label_column {
        header.push(label);
    }
    writer.write_record(&header)?;

    for segment in segments {
        let lookup: Vec<Option<Vec<Option<f64>>>> = names
            .iter()
            .map(|name| segment.table.column(name))
            .collect();
        for (row, ts) in segment.table.index().into_iter().enumerate() {
            let mut record: Vec<String> = Vec::with_capacity(header.len());
            record.push(ts.format(TIMESTAMP_FORMAT).to_string());
            for values in &lookup {
                record.push(
                    values
                        .as_ref()
                        .and_then(|values| values[row])
                        .map(|value| value.to_string())
                        .unwrap_or_default(),
                );
            }
            if label_column.is_some() {
                record.push(segment.label.clone().unwrap_or_default());
            }
            writer.write_record(&record)?;
        }
    }

    writer
        .into_inner()
        .map_err(|err| CodecError::Flush(err.to_string()))
}

/// Reads an artifact back. The first column is the timestamp whatever its
/// header says. When `label_column` is present rows are grouped into one
/// segment per label, in first-seen order; otherwise a single unlabelled
/// segment is returned.
pub fn decode_csv(bytes: &[u8], label_column: Option<&str>) -> Result<Vec<Segment>, CodecError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(bytes);
    let headers = reader.headers()?.clone();
    if headers.is_empty() {
        return Err(CodecError::MissingHeader);
    }

    let label_position =
        label_column.and_then(|label| headers.iter().position(|header| header == label));
    let value_positions: Vec<usize> = (1..headers.len())
        .filter(|position| Some(*position) != label_position)
        .collect();
    let names: Vec<String> = value_positions
        .iter()
        .map(|position| headers[*position].to_string())
        .collect();

    let mut order: Vec<Option<String>> = Vec::new();
    let mut groups: HashMap<Option<String>, Vec<(NaiveDateTime, Vec<Option<f64>>)>> = HashMap::new();

    for (row, record) in reader.records().enumerate() {
        let record = record?;
        let raw_ts = record.get(0).unwrap_or_default();
        let ts = NaiveDateTime::parse_from_str(raw_ts, TIMESTAMP_FORMAT).map_err(|_| {
            CodecError::InvalidTimestamp {
                row,
                value: raw_ts.to_string(),
            }
        })?;

        let mut values = Vec::with_capacity(value_positions.len());
        for (position, name) in value_positions.iter().zip(&names) {
            values.push(parse_cell(record.get(*position).unwrap_or_default(), row, name)?);
        }

        let label = label_position
            .and_then(|position| record.get(position))
            .filter(|label| !label.is_empty())
            .map(str::to_string);
        if !groups.contains_key(&label) {
            order.push(label.clone());
        }
        groups.entry(label).or_default().push((ts, values));
    }

    let mut segments = Vec::with_capacity(order.len());
    for label in order {
        let rows = groups.remove(&label).unwrap_or_default();
        let table = TimeSeriesTable::from_rows(names.clone(), rows)?;
        segments.push(Segment { label, table });
    }
    Ok(segments)
}

fn parse_cell(raw: &str, row: usize, column: &str) -> Result<Option<f64>, CodecError> {
    if raw.is_empty() || raw.eq_ignore_ascii_case("nan") {
        return Ok(None);
    }
    raw.parse::<f64>()
        .map(Some)
        .map_err(|_| CodecError::InvalidValue {
            row,
            column: column.to_string(),
            value: raw.to_string(),
        })
}
