//! Regular-grid resampling and the cleaning chain built on it.

use std::collections::HashSet;

use chrono::Duration;
use polars::prelude::*;
use tracing::debug;

use crate::interpolate::interpolate_gaps;
use crate::null_runs::{eliminate_null_runs, EliminationPass, NullRunConfig};
use crate::table::{Frequency, TableError, TimeSeriesTable, INDEX_COLUMN};

/// Averages rows into clock-aligned buckets of width `freq`, each labelled by
/// its start. Missing values do not contribute; a bucket with no present
/// value for a column yields missing for it. Only buckets that received at
/// least one row are emitted, see [`reindex`] for filling the grid.
pub fn resample_mean(table: &TimeSeriesTable, freq: Frequency) -> Result<TimeSeriesTable, TableError> {
    if table.is_empty() {
        return Ok(table.clone());
    }

    let window = freq.as_window()?;
    let options = DynamicGroupOptions {
        index_column: INDEX_COLUMN.into(),
        every: window,
        period: window,
        offset: polars::prelude::Duration::try_parse("0m")?,
        label: Label::Left,
        include_boundaries: false,
        closed_window: ClosedWindow::Left,
        start_by: StartBy::WindowBound,
    };
    let means: Vec<Expr> = table.column_names().map(|name| col(name).mean()).collect();

    let frame = table
        .frame()
        .clone()
        .lazy()
        .group_by_dynamic(col(INDEX_COLUMN), Vec::<Expr>::new(), options)
        .agg(means)
        .collect()?;
    TimeSeriesTable::from_frame(frame)
}

/// Reindexes onto the gap-free grid from the first to the last timestamp with
/// step `freq`. Slots without an exact match become missing rows; rows that do
/// not sit on the grid are discarded.
pub fn reindex(table: &TimeSeriesTable, freq: Frequency) -> Result<TimeSeriesTable, TableError> {
    if table.is_empty() {
        return Ok(table.clone());
    }

    let frame = table
        .frame()
        .upsample(Vec::<PlSmallStr>::new(), INDEX_COLUMN, freq.as_window()?)?
        .sort([INDEX_COLUMN], SortMultipleOptions::default())?;
    TimeSeriesTable::from_frame(frame)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanConfig {
    /// Intermediate grid on which long null runs are removed and gaps filled.
    pub base: Frequency,
    /// Output grid.
    pub target: Frequency,
    pub min_null_run: usize,
    /// Applied to the output index last.
    pub shift: Duration,
}

impl Default for CleanConfig {
    fn default() -> Self {
        Self {
            base: Frequency::one_minute(),
            target: Frequency::five_minutes(),
            min_null_run: 61,
            shift: Duration::minutes(-5),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CleanReport {
    pub input_rows: usize,
    pub base_rows: usize,
    pub passes: Vec<EliminationPass>,
    pub interpolated: usize,
    pub output_rows: usize,
}

/// Resamples to the base grid, removes long null runs, interpolates what is
/// left, then averages onto the target grid, fills it, and shifts the index.
pub fn clean_and_resample(
    table: &TimeSeriesTable,
    config: &CleanConfig,
) -> Result<(TimeSeriesTable, CleanReport), TableError> {
    let mut base = reindex(&resample_mean(table, config.base)?, config.base)?;
    let base_rows = base.len();

    let null_config = NullRunConfig {
        period: config.base,
        min_run: config.min_null_run,
    };
    let passes = eliminate_null_runs(&mut base, &null_config, &HashSet::new())?;
    let interpolated = interpolate_gaps(&mut base)?;

    let mut output = reindex(&resample_mean(&base, config.target)?, config.target)?;
    output.shift_index(config.shift)?;

    let report = CleanReport {
        input_rows: table.len(),
        base_rows,
        passes,
        interpolated,
        output_rows: output.len(),
    };
    debug!(?report, "clean and resample finished");
    Ok((output, report))
}
