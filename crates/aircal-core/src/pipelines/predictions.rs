//! Scheduled run: fetch the previous day's averages, calibrate, publish.

use aircal_parser::{DeviceRecords, RawRecord};
use async_trait::async_trait;
use tracing::{error, info, warn};

use crate::error::PipelineError;
use crate::model::{predict_table, ModelStore, Regressor};
use crate::normalize::{normalize, NormalizeSpec};
use crate::object_store::ObjectStore;
use crate::publish::{publish_daily, PublishConfig};
use crate::resample::reindex;
use crate::schema::PREDICTED_PM25;
use crate::table::{Frequency, Segment, TimeSeriesTable};
use crate::window::{IngestWindow, CIVIL_ZONE};

use super::{DeviceOutcome, RunReport};

/// Upstream sensor API.
#[async_trait]
pub trait SensorSource: Send + Sync {
    async fn fetch(
        &self,
        window: &IngestWindow,
        device_ids: &[String],
    ) -> Result<Vec<DeviceRecords>, PipelineError>;
}

#[derive(Debug, Clone)]
pub struct PredictionConfig {
    pub normalize: NormalizeSpec,
    pub frequency: Frequency,
    pub prediction_column: String,
    pub publish: PublishConfig,
}

impl Default for PredictionConfig {
    fn default() -> Self {
        Self {
            normalize: NormalizeSpec::qhawax(),
            frequency: Frequency::five_minutes(),
            prediction_column: PREDICTED_PM25.to_string(),
            publish: PublishConfig::default(),
        }
    }
}

/// Normalizes one device's records, appends the model's prediction for every
/// complete row, and fills the 5-minute grid between the first and last row.
pub fn predict_device(
    records: &[RawRecord],
    model: &dyn Regressor,
    config: &PredictionConfig,
) -> Result<TimeSeriesTable, PipelineError> {
    let mut table = normalize(records, &config.normalize)?;
    if table.is_empty() {
        return Ok(table);
    }
    let predictions = predict_table(&table, model)?;
    table.push_column(config.prediction_column.clone(), predictions)?;
    Ok(reindex(&table, config.frequency)?)
}

pub async fn run_prediction_ingest(
    source: &dyn SensorSource,
    models: &dyn ModelStore,
    store: &dyn ObjectStore,
    window: &IngestWindow,
    device_ids: &[String],
    config: &PredictionConfig,
) -> Result<RunReport, PipelineError> {
    info!(
        day = %window.day,
        start = %window.upstream_start(),
        end = %window.upstream_end(),
        devices = device_ids.len(),
        "prediction ingest started"
    );

    let devices = source.fetch(window, device_ids).await?;

    let mut config = config.clone();
    config.normalize.window = Some(window.civil_bounds(CIVIL_ZONE));

    let mut report = RunReport::default();
    let mut segments = Vec::new();

    for device in devices {
        let outcome = process_device(&device, models, &config, &mut segments);
        match &outcome {
            DeviceOutcome::Processed { device_id, rows } => {
                info!(device_id = %device_id, rows, "device processed")
            }
            DeviceOutcome::Skipped { device_id, reason } => {
                warn!(device_id = %device_id, reason = %reason, "device skipped")
            }
            DeviceOutcome::Failed { device_id, error } => {
                error!(device_id = %device_id, error = %error, "device failed")
            }
        }
        report.devices.push(outcome);
    }

    if segments.is_empty() {
        warn!(day = %window.day, "no device produced data, nothing to publish");
        return Ok(report);
    }

    report.published = publish_daily(&segments, store, &config.publish).await?;
    Ok(report)
}

fn process_device(
    device: &DeviceRecords,
    models: &dyn ModelStore,
    config: &PredictionConfig,
    segments: &mut Vec<Segment>,
) -> DeviceOutcome {
    let device_id = device.device_id.clone();
    let records = match &device.records {
        Ok(records) => records,
        Err(error) => {
            return DeviceOutcome::Failed {
                device_id,
                error: format!("malformed payload: {error}"),
            }
        }
    };
    if records.is_empty() {
        return DeviceOutcome::Skipped {
            device_id,
            reason: "no records in window".to_string(),
        };
    }
    if !models.contains(&device_id) {
        return DeviceOutcome::Skipped {
            device_id,
            reason: "no model registered".to_string(),
        };
    }

    let result = models
        .load(&device_id)
        .map_err(PipelineError::from)
        .and_then(|model| predict_device(records, model.as_ref(), config));

    match result {
        Ok(table) if table.is_empty() => DeviceOutcome::Skipped {
            device_id,
            reason: "no complete rows in window".to_string(),
        },
        Ok(table) => {
            let rows = table.len();
            segments.push(Segment::labeled(device_id.clone(), table));
            DeviceOutcome::Processed { device_id, rows }
        }
        Err(err) => DeviceOutcome::Failed {
            device_id,
            error: err.to_string(),
        },
    }
}
