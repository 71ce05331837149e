use polars::prelude::*;

use crate::table::{TableError, TimeSeriesTable, INDEX_COLUMN};

/// Which secondary column to bring across, and what to call it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReferenceColumn {
    pub source: String,
    pub target: String,
}

impl ReferenceColumn {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Left join on exact timestamp: the result has the primary's rows, in the
/// primary's order, plus `column.target` holding the secondary value at the
/// same timestamp (missing when there is none). With no secondary table the
/// primary is returned unchanged.
pub fn join_reference(
    primary: &TimeSeriesTable,
    secondary: Option<&TimeSeriesTable>,
    column: &ReferenceColumn,
) -> Result<TimeSeriesTable, TableError> {
    let Some(secondary) = secondary else {
        return Ok(primary.clone());
    };

    if !secondary.has_column(&column.source) {
        return Err(TableError::UnknownColumn(column.source.clone()));
    }
    if primary.has_column(&column.target) {
        return Err(TableError::DuplicateColumn(column.target.clone()));
    }

    let reference = secondary.frame().clone().lazy().select([
        col(INDEX_COLUMN),
        col(column.source.as_str()).alias(column.target.as_str()),
    ]);
    let joined = primary
        .frame()
        .clone()
        .lazy()
        .join(
            reference,
            [col(INDEX_COLUMN)],
            [col(INDEX_COLUMN)],
            JoinArgs::new(JoinType::Left),
        )
        .sort([INDEX_COLUMN], SortMultipleOptions::default())
        .collect()?;
    TimeSeriesTable::from_frame(joined)
}
