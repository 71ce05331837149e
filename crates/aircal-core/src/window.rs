use chrono::{DateTime, Days, Duration, NaiveDate, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;

use crate::error::PipelineError;

/// Civil time zone of every published artifact (UTC-5, no daylight saving).
pub const CIVIL_ZONE: Tz = chrono_tz::Etc::GMTPlus5;

/// Timestamp layout the qHAWAX API expects in query strings.
pub const UPSTREAM_FORMAT: &str = "%d-%m-%Y %H:%M:%S";

/// One civil day, from midnight to one second before the next midnight,
/// expressed in UTC for upstream queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IngestWindow {
    pub day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl IngestWindow {
    pub fn for_day(day: NaiveDate, zone: Tz) -> Result<Self, PipelineError> {
        let midnight = |date: NaiveDate| -> Result<DateTime<Utc>, PipelineError> {
            let local = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                PipelineError::Validation(format!("no midnight on {date}"))
            })?;
            zone.from_local_datetime(&local)
                .single()
                .map(|ts| ts.with_timezone(&Utc))
                .ok_or_else(|| {
                    PipelineError::Validation(format!("ambiguous midnight on {date} in {zone}"))
                })
        };

        let next = day
            .checked_add_days(Days::new(1))
            .ok_or_else(|| PipelineError::Validation(format!("day out of range: {day}")))?;

        Ok(Self {
            day,
            start: midnight(day)?,
            end: midnight(next)? - Duration::seconds(1),
        })
    }

    /// The civil day before the one containing `now`.
    pub fn previous_civil_day(now: DateTime<Utc>, zone: Tz) -> Result<Self, PipelineError> {
        let today = now.with_timezone(&zone).date_naive();
        let yesterday = today
            .checked_sub_days(Days::new(1))
            .ok_or_else(|| PipelineError::Validation(format!("day out of range: {today}")))?;
        Self::for_day(yesterday, zone)
    }

    pub fn upstream_start(&self) -> String {
        self.start.format(UPSTREAM_FORMAT).to_string()
    }

    pub fn upstream_end(&self) -> String {
        self.end.format(UPSTREAM_FORMAT).to_string()
    }

    /// Inclusive window bounds in the zone's civil time.
    pub fn civil_bounds(&self, zone: Tz) -> (NaiveDateTime, NaiveDateTime) {
        (
            self.start.with_timezone(&zone).naive_local(),
            self.end.with_timezone(&zone).naive_local(),
        )
    }
}
