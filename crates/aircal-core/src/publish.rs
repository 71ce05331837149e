//! One artifact per civil day, rewritten only while the day is still open.

use std::collections::BTreeSet;
use std::fmt;

use bytes::Bytes;
use chrono::{Days, NaiveDate};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::codec::{encode_csv, CodecError};
use crate::object_store::{ObjectStore, StoreError, CSV_CONTENT_TYPE};
use crate::retry::RetryPolicy;
use crate::schema::DEVICE_LABEL;
use crate::table::{Frequency, Segment, TimeSeriesTable};

#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to encode {key}: {source}")]
    Encode {
        key: String,
        #[source]
        source: CodecError,
    },
    #[error("failed to write {key}: {source}")]
    Write {
        key: String,
        #[source]
        source: StoreError,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishConfig {
    pub frequency: Frequency,
    pub suffix: String,
    /// Column holding each segment's label, if segments are labelled.
    pub label_column: Option<String>,
    pub exists_retry: RetryPolicy,
}

impl Default for PublishConfig {
    fn default() -> Self {
        Self {
            frequency: Frequency::five_minutes(),
            suffix: "prediction".to_string(),
            label_column: Some(DEVICE_LABEL.to_string()),
            exists_retry: RetryPolicy::exists_check(),
        }
    }
}

impl PublishConfig {
    /// Unlabelled reference-instrument artifacts.
    pub fn reference() -> Self {
        Self {
            label_column: None,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum PublishAction {
    Written,
    Skipped,
}

impl fmt::Display for PublishAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PublishAction::Written => f.write_str("written"),
            PublishAction::Skipped => f.write_str("skipped"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PublishedDay {
    pub key: String,
    pub day: NaiveDate,
    pub rows: usize,
    pub action: PublishAction,
}

/// Rows of one civil day, across every segment that has any.
#[derive(Debug, Clone, PartialEq)]
pub struct DailySlice {
    pub day: NaiveDate,
    pub segments: Vec<Segment>,
}

impl DailySlice {
    pub fn rows(&self) -> usize {
        self.segments.iter().map(|segment| segment.table.len()).sum()
    }
}

/// `{YYYY}_{MM}_{DD}_{freq}_{suffix}.csv`
pub fn daily_key(day: NaiveDate, frequency: Frequency, suffix: &str) -> String {
    format!("{}_{frequency}_{suffix}.csv", day.format("%Y_%m_%d"))
}

/// Day encoded in a daily key, if the key follows the naming scheme.
pub fn parse_daily_key(key: &str) -> Option<NaiveDate> {
    let name = key.rsplit('/').next().unwrap_or(key);
    let prefix = name.get(..10)?;
    NaiveDate::parse_from_str(prefix, "%Y_%m_%d").ok()
}

/// Splits segments at midnight of their labelled civil time, in day order.
pub fn partition_by_day(segments: &[Segment]) -> Vec<DailySlice> {
    let days: BTreeSet<NaiveDate> = segments
        .iter()
        .flat_map(|segment| segment.table.days())
        .collect();

    days.into_iter()
        .filter_map(|day| {
            let start = day.and_hms_opt(0, 0, 0)?;
            let end = day.checked_add_days(Days::new(1))?.and_hms_opt(0, 0, 0)?;
            let segments = segments
                .iter()
                .map(|segment| Segment {
                    label: segment.label.clone(),
                    table: segment.table.slice_between(start, end),
                })
                .filter(|segment| !segment.table.is_empty())
                .collect();
            Some(DailySlice { day, segments })
        })
        .collect()
}

/// Publishes every day found in `segments`. Days before the latest are only
/// written when no artifact exists yet; an existence check that keeps failing
/// counts as absent. The latest day is always written.
pub async fn publish_daily(
    segments: &[Segment],
    store: &dyn ObjectStore,
    config: &PublishConfig,
) -> Result<Vec<PublishedDay>, PublishError> {
    let slices = partition_by_day(segments);
    let last = slices.len().saturating_sub(1);
    let mut published = Vec::with_capacity(slices.len());

    for (position, slice) in slices.iter().enumerate() {
        let key = daily_key(slice.day, config.frequency, &config.suffix);
        let rows = slice.rows();

        if position < last && artifact_exists(store, &key, &config.exists_retry).await {
            info!(key = %key, rows, "day already published, skipping");
            published.push(PublishedDay {
                key,
                day: slice.day,
                rows,
                action: PublishAction::Skipped,
            });
            continue;
        }

        let body = encode_csv(&slice.segments, config.label_column.as_deref()).map_err(|source| {
            PublishError::Encode {
                key: key.clone(),
                source,
            }
        })?;
        store
            .put(&key, Bytes::from(body), CSV_CONTENT_TYPE)
            .await
            .map_err(|source| PublishError::Write {
                key: key.clone(),
                source,
            })?;

        info!(key = %key, rows, location = %store.location(), "published day");
        published.push(PublishedDay {
            key,
            day: slice.day,
            rows,
            action: PublishAction::Written,
        });
    }

    Ok(published)
}

/// Publishes a single unlabelled table.
pub async fn publish_table(
    table: &TimeSeriesTable,
    store: &dyn ObjectStore,
    config: &PublishConfig,
) -> Result<Vec<PublishedDay>, PublishError> {
    publish_daily(&[Segment::unlabeled(table.clone())], store, config).await
}

async fn artifact_exists(store: &dyn ObjectStore, key: &str, policy: &RetryPolicy) -> bool {
    match policy
        .run("exists", StoreError::is_retryable, || store.exists(key))
        .await
    {
        Ok(exists) => exists,
        Err(err) => {
            warn!(key, error = %err, "existence check failed, treating as absent");
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_round_trips_through_name() {
        let day = NaiveDate::from_ymd_opt(2025, 3, 2).expect("valid day");
        let key = daily_key(day, Frequency::five_minutes(), "prediction");
        assert_eq!(key, "2025_03_02_5min_prediction.csv");
        assert_eq!(parse_daily_key(&key), Some(day));
        assert_eq!(parse_daily_key("latest_folder.txt"), None);
    }
}
