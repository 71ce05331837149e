use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime};
use polars::prelude::*;
use thiserror::Error;

/// Name of the datetime column every table frame starts with.
pub const INDEX_COLUMN: &str = "timestamp";

#[derive(Debug, Error)]
pub enum TableError {
    #[error("index is not strictly increasing at row {row}")]
    UnorderedIndex { row: usize },
    #[error("index holds {0} missing timestamps")]
    MissingTimestamps(usize),
    #[error("column {column} has {actual} rows, index has {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },
    #[error("duplicate column name {0}")]
    DuplicateColumn(String),
    #[error("unknown column {0}")]
    UnknownColumn(String),
    #[error("invalid frequency '{0}'")]
    InvalidFrequency(String),
    #[error("frame operation failed: {0}")]
    Polars(#[from] PolarsError),
}

/// Sampling period of a regular grid, in whole minutes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Frequency(u32);

impl Frequency {
    pub fn minutes(minutes: u32) -> Result<Self, TableError> {
        if minutes == 0 || 1440 % minutes != 0 {
            return Err(TableError::InvalidFrequency(format!("{minutes}min")));
        }
        Ok(Self(minutes))
    }

    pub const fn one_minute() -> Self {
        Self(1)
    }

    pub const fn five_minutes() -> Self {
        Self(5)
    }

    pub fn as_minutes(&self) -> u32 {
        self.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::minutes(i64::from(self.0))
    }

    /// The same period as a window length for frame grouping.
    pub fn as_window(&self) -> Result<polars::prelude::Duration, TableError> {
        Ok(polars::prelude::Duration::try_parse(&format!("{}m", self.0))?)
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}min", self.0)
    }
}

impl FromStr for Frequency {
    type Err = TableError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let digits = s
            .trim()
            .strip_suffix("min")
            .ok_or_else(|| TableError::InvalidFrequency(s.to_string()))?;
        let minutes = digits
            .parse::<u32>()
            .map_err(|_| TableError::InvalidFrequency(s.to_string()))?;
        Self::minutes(minutes)
    }
}

/// Named column handed to [`TimeSeriesTable::new`].
#[derive(Debug, Clone, PartialEq)]
pub struct TableColumn {
    pub name: String,
    pub values: Vec<Option<f64>>,
}

/// A polars frame with a strictly increasing civil-time `timestamp` column
/// (millisecond precision, no zone) followed by named `f64` columns. Missing
/// values are nulls, never zero or NaN.
#[derive(Debug, Clone)]
pub struct TimeSeriesTable {
    frame: DataFrame,
}

pub(crate) fn timestamp_millis(ts: &NaiveDateTime) -> i64 {
    ts.and_utc().timestamp_millis()
}

pub(crate) fn timestamp_from_millis(millis: i64) -> Option<NaiveDateTime> {
    DateTime::from_timestamp_millis(millis).map(|dt| dt.naive_utc())
}

fn index_column(index: &[NaiveDateTime]) -> Column {
    Int64Chunked::from_vec(INDEX_COLUMN.into(), index.iter().map(timestamp_millis).collect())
        .into_datetime(TimeUnit::Milliseconds, None)
        .into_column()
}

fn check_ordered(index: &[NaiveDateTime]) -> Result<(), TableError> {
    for (row, pair) in index.windows(2).enumerate() {
        if pair[1] <= pair[0] {
            return Err(TableError::UnorderedIndex { row: row + 1 });
        }
    }
    Ok(())
}

fn check_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<(), TableError> {
    let mut seen = HashSet::from([INDEX_COLUMN]);
    for name in names {
        if !seen.insert(name) {
            return Err(TableError::DuplicateColumn(name.to_string()));
        }
    }
    Ok(())
}

impl TimeSeriesTable {
    pub fn new(index: Vec<NaiveDateTime>, columns: Vec<TableColumn>) -> Result<Self, TableError> {
        check_ordered(&index)?;
        check_names(columns.iter().map(|column| column.name.as_str()))?;

        let mut frame_columns = Vec::with_capacity(columns.len() + 1);
        frame_columns.push(index_column(&index));
        for column in columns {
            if column.values.len() != index.len() {
                return Err(TableError::LengthMismatch {
                    column: column.name,
                    expected: index.len(),
                    actual: column.values.len(),
                });
            }
            frame_columns.push(Column::new(column.name.into(), column.values));
        }

        Ok(Self {
            frame: DataFrame::new(frame_columns)?,
        })
    }

    /// A table with the given columns and no rows.
    pub fn empty<S: AsRef<str>>(names: &[S]) -> Result<Self, TableError> {
        let columns = names
            .iter()
            .map(|name| TableColumn {
                name: name.as_ref().to_string(),
                values: Vec::new(),
            })
            .collect();
        Self::new(Vec::new(), columns)
    }

    /// Builds a table from rows in arbitrary order. Rows are sorted by
    /// timestamp and, when several share a timestamp, the first one wins.
    pub fn from_rows(
        names: Vec<String>,
        rows: Vec<(NaiveDateTime, Vec<Option<f64>>)>,
    ) -> Result<Self, TableError> {
        check_names(names.iter().map(String::as_str))?;

        let mut index = Vec::with_capacity(rows.len());
        let mut columns: Vec<Vec<Option<f64>>> = vec![Vec::with_capacity(rows.len()); names.len()];
        for (row_number, (ts, values)) in rows.into_iter().enumerate() {
            if values.len() != names.len() {
                return Err(TableError::LengthMismatch {
                    column: format!("row {row_number}"),
                    expected: names.len(),
                    actual: values.len(),
                });
            }
            index.push(ts);
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }

        let mut frame_columns = Vec::with_capacity(names.len() + 1);
        frame_columns.push(index_column(&index));
        for (name, values) in names.into_iter().zip(columns) {
            frame_columns.push(Column::new(name.into(), values));
        }

        let frame = DataFrame::new(frame_columns)?
            .lazy()
            .unique_stable(Some(vec![INDEX_COLUMN.into()]), UniqueKeepStrategy::First)
            .sort([INDEX_COLUMN], SortMultipleOptions::default())
            .collect()?;
        Self::from_frame(frame)
    }

    /// Wraps a frame produced by a polars operation. The first column must
    /// be the timestamp; value columns are cast to `f64`.
    pub fn from_frame(frame: DataFrame) -> Result<Self, TableError> {
        let mut columns = frame.take_columns().into_iter();
        let Some(index) = columns.next() else {
            return Err(TableError::UnknownColumn(INDEX_COLUMN.to_string()));
        };
        if index.name().as_str() != INDEX_COLUMN {
            return Err(TableError::UnknownColumn(INDEX_COLUMN.to_string()));
        }
        let index = index.cast(&DataType::Datetime(TimeUnit::Milliseconds, None))?;
        let missing = index.null_count();
        if missing > 0 {
            return Err(TableError::MissingTimestamps(missing));
        }

        let mut frame_columns = vec![index];
        for column in columns {
            frame_columns.push(column.cast(&DataType::Float64)?);
        }
        let table = Self {
            frame: DataFrame::new(frame_columns)?,
        };
        check_ordered(&table.index())?;
        Ok(table)
    }

    /// The backing frame: `timestamp` first, then the value columns.
    pub fn frame(&self) -> &DataFrame {
        &self.frame
    }

    pub fn len(&self) -> usize {
        self.frame.height()
    }

    pub fn is_empty(&self) -> bool {
        self.frame.height() == 0
    }

    pub fn width(&self) -> usize {
        self.frame.width().saturating_sub(1)
    }

    fn timestamps(&self) -> Option<&DatetimeChunked> {
        self.frame
            .get_columns()
            .first()
            .and_then(|column| column.datetime().ok())
    }

    pub fn index(&self) -> Vec<NaiveDateTime> {
        self.timestamps()
            .map(|stamps| {
                stamps
                    .physical()
                    .iter()
                    .flatten()
                    .filter_map(timestamp_from_millis)
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.frame
            .get_columns()
            .iter()
            .skip(1)
            .map(|column| column.name().as_str())
    }

    fn values(&self, name: &str) -> Option<&Float64Chunked> {
        if name == INDEX_COLUMN {
            return None;
        }
        self.frame.column(name).ok()?.f64().ok()
    }

    pub fn column(&self, name: &str) -> Option<Vec<Option<f64>>> {
        self.values(name).map(|values| values.iter().collect())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.values(name).is_some()
    }

    pub fn first_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps()
            .and_then(|stamps| stamps.physical().first())
            .and_then(timestamp_from_millis)
    }

    pub fn last_timestamp(&self) -> Option<NaiveDateTime> {
        self.timestamps()
            .and_then(|stamps| stamps.physical().last())
            .and_then(timestamp_from_millis)
    }

    pub fn null_count(&self, name: &str) -> Option<usize> {
        self.values(name).map(|values| values.null_count())
    }

    pub fn total_nulls(&self) -> usize {
        self.frame
            .get_columns()
            .iter()
            .skip(1)
            .map(|column| column.null_count())
            .sum()
    }

    pub fn value(&self, row: usize, column: &str) -> Option<f64> {
        if row >= self.len() {
            return None;
        }
        self.values(column).and_then(|values| values.get(row))
    }

    pub fn push_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Option<f64>>,
    ) -> Result<(), TableError> {
        let name = name.into();
        if name == INDEX_COLUMN || self.has_column(&name) {
            return Err(TableError::DuplicateColumn(name));
        }
        if values.len() != self.len() {
            return Err(TableError::LengthMismatch {
                column: name,
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.frame.with_column(Column::new(name.into(), values))?;
        Ok(())
    }

    /// Removes every row whose timestamp is in `timestamps`, across all columns.
    pub fn drop_timestamps(
        &mut self,
        timestamps: &HashSet<NaiveDateTime>,
    ) -> Result<usize, TableError> {
        if timestamps.is_empty() {
            return Ok(0);
        }
        let before = self.len();
        let keep: BooleanChunked = self
            .index()
            .iter()
            .map(|ts| !timestamps.contains(ts))
            .collect();
        self.frame = self.frame.filter(&keep)?;
        Ok(before - self.len())
    }

    /// Adds `delta` to every timestamp. Ordering is preserved.
    pub fn shift_index(&mut self, delta: Duration) -> Result<(), TableError> {
        let shifted: Vec<NaiveDateTime> = self.index().into_iter().map(|ts| ts + delta).collect();
        self.frame.with_column(index_column(&shifted))?;
        Ok(())
    }

    /// Keeps only the named columns, in the given order.
    pub fn select<S: AsRef<str>>(&self, names: &[S]) -> Result<Self, TableError> {
        let mut selection: Vec<PlSmallStr> = Vec::with_capacity(names.len() + 1);
        selection.push(INDEX_COLUMN.into());
        for name in names {
            let name = name.as_ref();
            if !self.has_column(name) {
                return Err(TableError::UnknownColumn(name.to_string()));
            }
            selection.push(name.into());
        }
        check_names(selection.iter().skip(1).map(PlSmallStr::as_str))?;
        Ok(Self {
            frame: self.frame.select(selection)?,
        })
    }

    /// Rows whose timestamps fall in `[start, end)`.
    pub fn slice_between(&self, start: NaiveDateTime, end: NaiveDateTime) -> Self {
        let index = self.index();
        let from = index.partition_point(|ts| *ts < start);
        let to = index.partition_point(|ts| *ts < end);
        Self {
            frame: self.frame.slice(from as i64, to.saturating_sub(from)),
        }
    }

    /// Calendar days covered by the index, in order.
    pub fn days(&self) -> Vec<NaiveDate> {
        let mut days: Vec<NaiveDate> = self.index().iter().map(|ts| ts.date()).collect();
        days.dedup();
        days
    }

    /// Stacks tables sharing a time axis. Columns are the union in first-seen
    /// order; on duplicate timestamps the earlier table's row is kept.
    pub fn concat(tables: &[TimeSeriesTable]) -> Result<Self, TableError> {
        if tables.is_empty() {
            return Ok(Self::default());
        }
        let frames: Vec<LazyFrame> = tables
            .iter()
            .map(|table| table.frame.clone().lazy())
            .collect();
        let stacked = concat_lf_diagonal(frames, UnionArgs::default())?
            .unique_stable(Some(vec![INDEX_COLUMN.into()]), UniqueKeepStrategy::First)
            .sort([INDEX_COLUMN], SortMultipleOptions::default())
            .collect()?;
        Self::from_frame(stacked)
    }
}

impl Default for TimeSeriesTable {
    fn default() -> Self {
        Self {
            frame: DataFrame::new(vec![index_column(&[])]).unwrap_or_default(),
        }
    }
}

impl PartialEq for TimeSeriesTable {
    fn eq(&self, other: &Self) -> bool {
        self.frame.equals_missing(&other.frame)
    }
}

/// A table optionally labelled with the device that produced it. Published
/// files stack several labelled segments under one header.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub label: Option<String>,
    pub table: TimeSeriesTable,
}

impl Segment {
    pub fn unlabeled(table: TimeSeriesTable) -> Self {
        Self { label: None, table }
    }

    pub fn labeled(label: impl Into<String>, table: TimeSeriesTable) -> Self {
        Self {
            label: Some(label.into()),
            table,
        }
    }
}
