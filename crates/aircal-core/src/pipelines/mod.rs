//! End-to-end runs assembled from the core stages.

pub mod on_demand;
pub mod predictions;
pub mod reference;
pub mod serving;

use serde::Serialize;

use crate::publish::PublishedDay;

/// What happened to one device during a batch run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum DeviceOutcome {
    Processed { device_id: String, rows: usize },
    /// The device had nothing usable; the run carried on without it.
    Skipped { device_id: String, reason: String },
    Failed { device_id: String, error: String },
}

impl DeviceOutcome {
    pub fn device_id(&self) -> &str {
        match self {
            DeviceOutcome::Processed { device_id, .. }
            | DeviceOutcome::Skipped { device_id, .. }
            | DeviceOutcome::Failed { device_id, .. } => device_id,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunReport {
    pub devices: Vec<DeviceOutcome>,
    pub published: Vec<PublishedDay>,
}

impl RunReport {
    pub fn processed(&self) -> usize {
        self.devices
            .iter()
            .filter(|outcome| matches!(outcome, DeviceOutcome::Processed { .. }))
            .count()
    }
}
