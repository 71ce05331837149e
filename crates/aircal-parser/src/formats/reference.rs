use csv::{ReaderBuilder, Trim};
use polars::prelude::*;

use crate::errors::ParserError;

const NAME: &str = "REFERENCE_EXPORT";

/// Parses a reference-instrument text export (comma + space separated, one
/// header row) into a frame of string columns. Header names are stripped;
/// empty cells become nulls. Rows repeating an earlier raw date string (the
/// first column) are dropped before anything else looks at their values, so
/// the first occurrence wins even when it is the incomplete one. Numeric
/// coercion is left to normalization.
pub fn parse_reference_export(content: &str) -> Result<DataFrame, ParserError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(b',')
        .trim(Trim::All)
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|source| ParserError::Csv {
            parser: NAME,
            source,
        })?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();

    if headers.iter().all(|name| name.is_empty()) {
        return Err(ParserError::Validation {
            parser: NAME,
            message: "header row is empty".into(),
        });
    }

    let mut cells: Vec<Vec<Option<String>>> = vec![Vec::new(); headers.len()];
    for (row_index, row) in reader.records().enumerate() {
        let row = row.map_err(|source| ParserError::Csv {
            parser: NAME,
            source,
        })?;
        if row.len() != headers.len() {
            return Err(ParserError::DataRow {
                parser: NAME,
                row_index,
                message: format!("expected {} fields, found {}", headers.len(), row.len()),
            });
        }
        for (column, value) in cells.iter_mut().zip(row.iter()) {
            let value = value.trim();
            column.push((!value.is_empty()).then(|| value.to_string()));
        }
    }

    if cells.first().is_none_or(|column| column.is_empty()) {
        return Err(ParserError::EmptyData { parser: NAME });
    }

    let columns: Vec<Column> = headers
        .iter()
        .zip(cells.iter())
        .map(|(name, values)| {
            let utf8: Vec<Option<&str>> = values.iter().map(|v| v.as_deref()).collect();
            Series::new(name.as_str().into(), utf8).into()
        })
        .collect();

    let date_column: PlSmallStr = headers[0].as_str().into();
    DataFrame::new(columns)
        .and_then(|frame| {
            frame
                .lazy()
                .unique_stable(Some(vec![date_column]), UniqueKeepStrategy::First)
                .collect()
        })
        .map_err(|err| ParserError::Validation {
            parser: NAME,
            message: format!("failed to build reference frame: {err}"),
        })
}
