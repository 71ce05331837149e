use polars::prelude::*;
use tracing::info;

use crate::table::{TableError, TimeSeriesTable};

/// Fills interior gaps of every column by linear interpolation between the
/// nearest present neighbours, weighting by row position. Leading and
/// trailing gaps have a missing neighbour and stay missing, so no value is
/// ever extrapolated. Returns the number of values filled.
pub fn interpolate_gaps(table: &mut TimeSeriesTable) -> Result<usize, TableError> {
    let total_nulls = table.total_nulls();
    if total_nulls == 0 {
        return Ok(0);
    }

    let filled_columns: Vec<Expr> = table
        .column_names()
        .map(|name| col(name).interpolate(InterpolationMethod::Linear))
        .collect();
    let frame = table
        .frame()
        .clone()
        .lazy()
        .with_columns(filled_columns)
        .collect()?;
    *table = TimeSeriesTable::from_frame(frame)?;

    let filled = total_nulls - table.total_nulls();
    info!(total_nulls, filled, "interpolated missing values");
    Ok(filled)
}
