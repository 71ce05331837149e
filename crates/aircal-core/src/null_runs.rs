//! Removal of long sensor-dead intervals before gap filling.

use std::collections::HashSet;

use chrono::{Duration, NaiveDateTime};
use tracing::{debug, info};

use crate::table::{timestamp_from_millis, Frequency, TableError, TimeSeriesTable, INDEX_COLUMN};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NullRunConfig {
    /// Spacing of the regular grid the table sits on.
    pub period: Frequency,
    /// Runs of at least this many consecutive missing samples are removed.
    pub min_run: usize,
}

impl Default for NullRunConfig {
    fn default() -> Self {
        Self {
            period: Frequency::one_minute(),
            min_run: 61,
        }
    }
}

/// One column's turn through the eliminator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EliminationPass {
    pub column: String,
    pub null_count: usize,
    pub rows_removed: usize,
    pub rows_after: usize,
}

/// Repeatedly picks the unprocessed column with the most missing values (ties
/// go to the earlier column) and, while that count reaches `min_run`, drops
/// every timestamp belonging to one of its long null runs from the whole
/// table. Each column is considered at most once; columns in `skip` never.
pub fn eliminate_null_runs(
    table: &mut TimeSeriesTable,
    config: &NullRunConfig,
    skip: &HashSet<String>,
) -> Result<Vec<EliminationPass>, TableError> {
    let mut processed: HashSet<String> = skip.clone();
    let mut passes = Vec::new();
    let step = config.period.as_duration();

    debug!(rows = table.len(), columns = table.width(), "null-run elimination started");

    for _ in 0..table.width() {
        let Some((column, null_count)) = column_with_most_nulls(table, &processed, config.min_run)
        else {
            break;
        };

        let missing = missing_timestamps(table, &column)?;
        let doomed: HashSet<NaiveDateTime> = consecutive_runs(&missing, step, config.min_run)
            .into_iter()
            .collect();
        let rows_removed = table.drop_timestamps(&doomed)?;

        info!(
            column = %column,
            null_count,
            rows_removed,
            rows_after = table.len(),
            "removed long null runs"
        );

        passes.push(EliminationPass {
            column: column.clone(),
            null_count,
            rows_removed,
            rows_after: table.len(),
        });
        processed.insert(column);
    }

    Ok(passes)
}

fn missing_timestamps(table: &TimeSeriesTable, column: &str) -> Result<Vec<NaiveDateTime>, TableError> {
    let frame = table.frame();
    let stamps = frame.column(INDEX_COLUMN)?.datetime()?;
    let values = frame.column(column)?.f64()?;

    let mut missing = Vec::new();
    for idx in 0..frame.height() {
        if values.get(idx).is_some() {
            continue;
        }
        if let Some(ts) = stamps.get(idx).and_then(timestamp_from_millis) {
            missing.push(ts);
        }
    }
    Ok(missing)
}

fn column_with_most_nulls(
    table: &TimeSeriesTable,
    processed: &HashSet<String>,
    min_run: usize,
) -> Option<(String, usize)> {
    let mut best: Option<(&str, usize)> = None;
    for name in table.column_names() {
        if processed.contains(name) {
            continue;
        }
        let nulls = table.null_count(name).unwrap_or_default();
        if best.is_none_or(|(_, most)| nulls > most) {
            best = Some((name, nulls));
        }
    }
    best.filter(|(_, nulls)| *nulls >= min_run)
        .map(|(name, nulls)| (name.to_string(), nulls))
}

/// Timestamps belonging to maximal runs of at least `min_run` entries whose
/// neighbours are exactly `step` apart. `timestamps` must be sorted.
pub fn consecutive_runs(
    timestamps: &[NaiveDateTime],
    step: Duration,
    min_run: usize,
) -> Vec<NaiveDateTime> {
    let mut selected = Vec::new();
    let mut start = 0;

    for end in 1..=timestamps.len() {
        let breaks = end == timestamps.len() || timestamps[end] - timestamps[end - 1] != step;
        if breaks {
            if end - start >= min_run {
                selected.extend_from_slice(&timestamps[start..end]);
            }
            start = end;
        }
    }

    selected
}
