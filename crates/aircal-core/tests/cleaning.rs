use std::collections::HashSet;

use aircal_core::interpolate::interpolate_gaps;
use aircal_core::null_runs::{eliminate_null_runs, NullRunConfig};
use aircal_core::resample::{clean_and_resample, reindex, resample_mean, CleanConfig};
use aircal_core::{Frequency, TableColumn, TimeSeriesTable};
use chrono::{Duration, NaiveDate, NaiveDateTime};

fn t0() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2025, 3, 1)
        .unwrap()
        .and_hms_opt(22, 0, 0)
        .unwrap()
}

fn minute(n: i64) -> NaiveDateTime {
    t0() + Duration::minutes(n)
}

fn one_minute_table(columns: Vec<(&str, Vec<Option<f64>>)>) -> TimeSeriesTable {
    let rows = columns[0].1.len() as i64;
    let index = (0..rows).map(minute).collect();
    let columns = columns
        .into_iter()
        .map(|(name, values)| TableColumn {
            name: name.to_string(),
            values,
        })
        .collect();
    TimeSeriesTable::new(index, columns).unwrap()
}

fn with_null_run(len: usize, run: std::ops::Range<usize>) -> Vec<Option<f64>> {
    (0..len)
        .map(|i| if run.contains(&i) { None } else { Some(i as f64) })
        .collect()
}

#[test]
fn long_null_run_is_dropped_from_every_column() {
    // t0 = 10, t0+1m ..= t0+70m missing, t0+71m = 12
    let mut pm = vec![Some(10.0)];
    pm.extend(std::iter::repeat(None).take(70));
    pm.push(Some(12.0));
    let temp: Vec<Option<f64>> = (0..72).map(|i| Some(20.0 + i as f64)).collect();
    let mut table = one_minute_table(vec![("Pm2.5", pm), ("Temp", temp)]);

    let passes = eliminate_null_runs(&mut table, &NullRunConfig::default(), &HashSet::new()).unwrap();

    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].column, "Pm2.5");
    assert_eq!(passes[0].null_count, 70);
    assert_eq!(passes[0].rows_removed, 70);
    assert_eq!(table.index(), &[minute(0), minute(71)]);
    assert_eq!(table.column("Temp").unwrap(), &[Some(20.0), Some(91.0)]);
    assert_eq!(table.column("Pm2.5").unwrap(), &[Some(10.0), Some(12.0)]);
}

#[test]
fn run_shorter_than_threshold_is_kept() {
    let mut table = one_minute_table(vec![("Pm2.5", with_null_run(100, 10..70))]);
    let passes = eliminate_null_runs(&mut table, &NullRunConfig::default(), &HashSet::new()).unwrap();

    assert!(passes.is_empty());
    assert_eq!(table.len(), 100);
    assert_eq!(table.null_count("Pm2.5"), Some(60));
}

#[test]
fn scattered_nulls_never_form_a_run() {
    let values: Vec<Option<f64>> = (0..200)
        .map(|i| if i % 2 == 0 { None } else { Some(1.0) })
        .collect();
    let mut table = one_minute_table(vec![("Pm2.5", values)]);
    let passes = eliminate_null_runs(&mut table, &NullRunConfig::default(), &HashSet::new()).unwrap();

    assert_eq!(passes.len(), 1);
    assert_eq!(passes[0].null_count, 100);
    assert_eq!(passes[0].rows_removed, 0);
    assert_eq!(table.len(), 200);
}

#[test]
fn column_with_most_nulls_goes_first_and_each_column_once() {
    let mut table = one_minute_table(vec![
        ("a", with_null_run(300, 0..61)),
        ("b", with_null_run(300, 150..215)),
    ]);
    let passes = eliminate_null_runs(&mut table, &NullRunConfig::default(), &HashSet::new()).unwrap();

    let order: Vec<&str> = passes.iter().map(|pass| pass.column.as_str()).collect();
    assert_eq!(order, vec!["b", "a"]);
    assert_eq!(table.len(), 300 - 65 - 61);
    assert_eq!(table.total_nulls(), 0);
}

#[test]
fn skipped_columns_are_left_alone() {
    let mut table = one_minute_table(vec![("a", with_null_run(100, 0..80))]);
    let skip: HashSet<String> = ["a".to_string()].into_iter().collect();
    let passes = eliminate_null_runs(&mut table, &NullRunConfig::default(), &skip).unwrap();

    assert!(passes.is_empty());
    assert_eq!(table.len(), 100);
}

#[test]
fn interpolation_never_extrapolates() {
    let mut table = one_minute_table(vec![
        ("edge", vec![None, None, Some(2.0), None, Some(4.0), None]),
        ("dead", vec![None; 6]),
    ]);
    let filled = interpolate_gaps(&mut table).unwrap();

    assert_eq!(filled, 1);
    assert_eq!(
        table.column("edge").unwrap(),
        &[None, None, Some(2.0), Some(3.0), Some(4.0), None]
    );
    assert!(table.column("dead").unwrap().iter().all(Option::is_none));
}

#[test]
fn resample_averages_present_values_per_bucket() {
    let table = one_minute_table(vec![(
        "Pm2.5",
        vec![
            Some(1.0),
            None,
            Some(3.0),
            None,
            None,
            None,
            None,
            None,
            None,
            None,
            Some(8.0),
        ],
    )]);
    let resampled = resample_mean(&table, Frequency::five_minutes()).unwrap();

    assert_eq!(resampled.index(), &[minute(0), minute(5), minute(10)]);
    assert_eq!(
        resampled.column("Pm2.5").unwrap(),
        &[Some(2.0), None, Some(8.0)]
    );
}

#[test]
fn buckets_align_to_the_clock() {
    let start = minute(3);
    let index = vec![start, start + Duration::minutes(4)];
    let table = TimeSeriesTable::new(
        index,
        vec![TableColumn {
            name: "x".into(),
            values: vec![Some(1.0), Some(5.0)],
        }],
    )
    .unwrap();
    let resampled = resample_mean(&table, Frequency::five_minutes()).unwrap();

    assert_eq!(resampled.index(), &[minute(0), minute(5)]);
}

#[test]
fn reindex_fills_every_slot() {
    let index = vec![minute(0), minute(15), minute(20)];
    let table = TimeSeriesTable::new(
        index,
        vec![TableColumn {
            name: "x".into(),
            values: vec![Some(1.0), Some(2.0), Some(3.0)],
        }],
    )
    .unwrap();
    let filled = reindex(&table, Frequency::five_minutes()).unwrap();

    assert_eq!(filled.len(), 5);
    assert_eq!(
        filled.column("x").unwrap(),
        &[Some(1.0), None, None, Some(2.0), Some(3.0)]
    );
}

#[test]
fn clean_and_resample_produces_shifted_regular_grid() {
    let values: Vec<Option<f64>> = (0..15).map(|i| Some(i as f64)).collect();
    let table = one_minute_table(vec![("PM2.5 Conc", values)]);

    let (cleaned, report) = clean_and_resample(&table, &CleanConfig::default()).unwrap();

    assert_eq!(report.input_rows, 15);
    assert_eq!(report.output_rows, 3);
    assert_eq!(cleaned.index(), &[minute(-5), minute(0), minute(5)]);
    assert_eq!(
        cleaned.column("PM2.5 Conc").unwrap(),
        &[Some(2.0), Some(7.0), Some(12.0)]
    );
}

#[test]
fn clean_output_has_constant_step_even_after_removing_an_outage() {
    // Four hours of data with a 90 minute outage in the middle.
    let values = with_null_run(240, 60..150);
    let sparse: Vec<(NaiveDateTime, Vec<Option<f64>>)> = values
        .iter()
        .enumerate()
        .filter(|(_, value)| value.is_some())
        .map(|(i, value)| (minute(i as i64), vec![*value]))
        .collect();
    let table = TimeSeriesTable::from_rows(vec!["v".to_string()], sparse).unwrap();

    let (cleaned, report) = clean_and_resample(&table, &CleanConfig::default()).unwrap();

    assert_eq!(report.base_rows, 240);
    assert_eq!(report.passes.len(), 1);
    assert_eq!(report.passes[0].rows_removed, 90);
    assert_eq!(report.interpolated, 0);
    let steps: HashSet<Duration> = cleaned
        .index()
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .collect();
    assert_eq!(steps, HashSet::from([Duration::minutes(5)]));
    assert_eq!(cleaned.len(), 48);
    assert_eq!(cleaned.null_count("v"), Some(18));
}

#[test]
fn short_gap_is_interpolated_on_the_base_grid() {
    let values = with_null_run(20, 5..8);
    let table = one_minute_table(vec![("v", values)]);
    let (cleaned, report) = clean_and_resample(&table, &CleanConfig::default()).unwrap();

    assert!(report.passes.is_empty());
    assert_eq!(report.interpolated, 3);
    assert_eq!(cleaned.total_nulls(), 0);
    assert_eq!(cleaned.value(1, "v"), Some(7.0));
}
