use std::fs;

use aircal_core::codec::decode_csv;
use aircal_core::model::{LinearModel, StaticModelStore};
use aircal_core::object_store::{MemoryObjectStore, ObjectStore};
use aircal_core::pipelines::on_demand::predict_on_demand;
use aircal_core::pipelines::predictions::{run_prediction_ingest, PredictionConfig, SensorSource};
use aircal_core::pipelines::reference::{
    run_reference_ingest, FsReferenceSource, ReferenceConfig, ReferenceOutcome, MARKER_KEY,
};
use aircal_core::pipelines::DeviceOutcome;
use aircal_core::publish::{PublishAction, PublishConfig};
use aircal_core::retry::RetryPolicy;
use aircal_core::schema::MODEL_FEATURES;
use aircal_core::window::{IngestWindow, CIVIL_ZONE};
use aircal_core::PipelineError;
use aircal_parser::{parse_device_payload, DeviceRecords, RawRecord};
use async_trait::async_trait;
use chrono::{Duration, NaiveDate};
use serde_json::json;

struct FixedSource(Vec<DeviceRecords>);

#[async_trait]
impl SensorSource for FixedSource {
    async fn fetch(
        &self,
        _window: &IngestWindow,
        _device_ids: &[String],
    ) -> Result<Vec<DeviceRecords>, PipelineError> {
        Ok(self.0.clone())
    }
}

struct DownSource;

#[async_trait]
impl SensorSource for DownSource {
    async fn fetch(
        &self,
        _window: &IngestWindow,
        _device_ids: &[String],
    ) -> Result<Vec<DeviceRecords>, PipelineError> {
        Err(PipelineError::UpstreamUnavailable("login failed".into()))
    }
}

/// Prediction = 2 × PM2.5, ignoring the weather features.
fn doubling_models() -> StaticModelStore {
    let model = LinearModel::new(MODEL_FEATURES.clone(), 0.0, vec![2.0, 0.0, 0.0, 0.0], None)
        .unwrap();
    StaticModelStore::new().with_model("qH013", model)
}

fn record(timestamp: &str, pm25: Option<f64>) -> RawRecord {
    RawRecord::new(timestamp)
        .with_value("PM25", pm25)
        .with_value("PM10", Some(20.0))
        .with_value("temperature", Some(22.0))
        .with_value("humidity", Some(75.0))
        .with_value("pressure", Some(1013.0))
        .with_value("id", Some(1.0))
}

fn march_second() -> IngestWindow {
    IngestWindow::for_day(NaiveDate::from_ymd_opt(2025, 3, 2).unwrap(), CIVIL_ZONE).unwrap()
}

fn prediction_config() -> PredictionConfig {
    PredictionConfig {
        publish: PublishConfig {
            exists_retry: RetryPolicy::none(),
            ..PublishConfig::default()
        },
        ..PredictionConfig::default()
    }
}

#[tokio::test]
async fn prediction_ingest_publishes_labelled_grid() {
    let source = FixedSource(vec![
        DeviceRecords::new(
            "qH013",
            vec![
                record("Sun, 02 Mar 2025 05:10:00 GMT", Some(6.0)),
                record("Sun, 02 Mar 2025 05:00:00 GMT", Some(5.0)),
                record("Sun, 02 Mar 2025 05:00:00 GMT", Some(99.0)),
                record("Sun, 02 Mar 2025 05:15:00 GMT", None),
            ],
        ),
        DeviceRecords::new("qH014", vec![]),
        DeviceRecords::new(
            "qH015",
            vec![record("Sun, 02 Mar 2025 05:00:00 GMT", Some(1.0))],
        ),
    ]);
    let store = MemoryObjectStore::new();
    let devices = vec!["qH013".to_string(), "qH014".to_string(), "qH015".to_string()];

    let report = run_prediction_ingest(
        &source,
        &doubling_models(),
        &store,
        &march_second(),
        &devices,
        &prediction_config(),
    )
    .await
    .unwrap();

    assert_eq!(report.processed(), 1);
    assert_eq!(
        report.devices[0],
        DeviceOutcome::Processed {
            device_id: "qH013".into(),
            rows: 3
        }
    );
    assert!(matches!(report.devices[1], DeviceOutcome::Skipped { .. }));
    assert!(matches!(report.devices[2], DeviceOutcome::Skipped { .. }));
    assert_eq!(report.published.len(), 1);
    assert_eq!(report.published[0].key, "2025_03_02_5min_prediction.csv");
    assert_eq!(report.published[0].action, PublishAction::Written);

    let body = store.get("2025_03_02_5min_prediction.csv").await.unwrap();
    let segments = decode_csv(&body, Some("qhawax_id")).unwrap();
    assert_eq!(segments.len(), 1);
    let table = &segments[0].table;
    assert_eq!(segments[0].label.as_deref(), Some("qH013"));
    assert!(!table.has_column("id"));
    assert_eq!(
        table.column("Prediccion_Pm2.5").unwrap(),
        &[Some(10.0), None, Some(12.0)]
    );
    let start = NaiveDate::from_ymd_opt(2025, 3, 2)
        .unwrap()
        .and_hms_opt(0, 0, 0)
        .unwrap();
    assert_eq!(
        table.index(),
        &[start, start + Duration::minutes(5), start + Duration::minutes(10)]
    );
}

#[tokio::test]
async fn prediction_ingest_surfaces_upstream_failure() {
    let store = MemoryObjectStore::new();
    let err = run_prediction_ingest(
        &DownSource,
        &doubling_models(),
        &store,
        &march_second(),
        &[],
        &prediction_config(),
    )
    .await
    .unwrap_err();

    assert!(matches!(err, PipelineError::UpstreamUnavailable(_)));
    assert_eq!(store.write_count(), 0);
}

#[tokio::test]
async fn malformed_device_fails_alone_and_healthy_device_is_published() {
    let payload = json!({
        "qH013": [{
            "qhawax_name": "qH013",
            "data": [
                {
                    "timestamp_zone": "Sun, 02 Mar 2025 05:00:00 GMT",
                    "PM25": 5.0, "PM10": 20.0, "temperature": 22.0, "humidity": 75.0, "pressure": 1013.0
                },
                {
                    "timestamp_zone": "Sun, 02 Mar 2025 05:05:00 GMT",
                    "PM25": 6.0, "PM10": 21.0, "temperature": 22.0, "humidity": 75.0, "pressure": 1013.0
                }
            ]
        }],
        "qH014": [{
            "qhawax_name": "qH014",
            "data": [{ "PM25": 7.0, "PM10": 30.0, "temperature": 22.0, "humidity": 75.0, "pressure": 1013.0 }]
        }]
    });
    let devices = parse_device_payload(&payload).unwrap();
    let model = LinearModel::new(MODEL_FEATURES.clone(), 0.0, vec![2.0, 0.0, 0.0, 0.0], None)
        .unwrap();
    let models = StaticModelStore::new()
        .with_model("qH013", model.clone())
        .with_model("qH014", model);
    let store = MemoryObjectStore::new();

    let report = run_prediction_ingest(
        &FixedSource(devices),
        &models,
        &store,
        &march_second(),
        &["13".to_string(), "14".to_string()],
        &prediction_config(),
    )
    .await
    .unwrap();

    assert_eq!(
        report.devices[0],
        DeviceOutcome::Processed {
            device_id: "qH013".into(),
            rows: 2
        }
    );
    match &report.devices[1] {
        DeviceOutcome::Failed { device_id, error } => {
            assert_eq!(device_id, "qH014");
            assert!(error.contains("missing timestamp_zone"), "{error}");
        }
        other => panic!("expected qH014 to fail, got {other:?}"),
    }
    assert_eq!(report.processed(), 1);

    let body = store.get("2025_03_02_5min_prediction.csv").await.unwrap();
    let segments = decode_csv(&body, Some("qhawax_id")).unwrap();
    assert_eq!(segments.len(), 1);
    assert_eq!(segments[0].label.as_deref(), Some("qH013"));
    assert_eq!(
        segments[0].table.column("Prediccion_Pm2.5").unwrap(),
        &[Some(10.0), Some(12.0)]
    );
}

#[test]
fn on_demand_predicts_each_row_in_order() {
    let data = json!([
        {"PM25": 12.5, "temperature": 22, "humidity": 75, "pressure": 1013},
        {"PM25": 13.2, "temperature": 21.8, "humidity": 78, "pressure": 1011}
    ]);
    let predictions = predict_on_demand(&doubling_models(), "qH013", &data).unwrap();
    assert_eq!(predictions, vec![25.0, 26.4]);
}

#[test]
fn on_demand_rejects_incomplete_rows() {
    let data = json!([{"PM25": 12.5, "temperature": 22, "humidity": 75}]);
    let err = predict_on_demand(&doubling_models(), "qH013", &data).unwrap_err();
    assert!(err.is_validation());
    assert_eq!(
        err.to_string(),
        "The input data is missing one or more required features."
    );
}

#[test]
fn on_demand_rejects_non_object_rows() {
    let err = predict_on_demand(&doubling_models(), "qH013", &json!([1, 2])).unwrap_err();
    assert_eq!(err.to_string(), "Data must be a list of dictionaries");
}

#[test]
fn on_demand_unknown_device_is_model_not_found() {
    let data = json!([{"PM25": 1, "temperature": 1, "humidity": 1, "pressure": 1}]);
    let err = predict_on_demand(&doubling_models(), "qH999", &data).unwrap_err();
    assert!(matches!(err, PipelineError::ModelNotFound(id) if id == "qH999"));
}

fn reference_export(start: chrono::NaiveDateTime, minutes: i64) -> String {
    let mut text = String::from("Date & Time (Local), PM2.5 Conc , Flow\n");
    for n in 0..minutes {
        let ts = start + Duration::minutes(n);
        text.push_str(&format!(
            "{}, {}, 16.7\n",
            ts.format("%m/%d/%Y %I:%M:%S %p"),
            n
        ));
    }
    text
}

#[tokio::test]
async fn reference_ingest_publishes_newest_export_once() {
    let root = tempfile::tempdir().unwrap();
    let newest = root.path().join("Upload 030225_010000");
    let older = root.path().join("Upload 030125_010000");
    fs::create_dir_all(&newest).unwrap();
    fs::create_dir_all(&older).unwrap();

    let start = NaiveDate::from_ymd_opt(2025, 3, 1)
        .unwrap()
        .and_hms_opt(23, 50, 0)
        .unwrap();
    fs::write(newest.join("T640_PUCP_export.txt"), reference_export(start, 20)).unwrap();
    fs::write(newest.join("notes.txt"), "ignored").unwrap();
    fs::write(older.join("T640_PUCP_export.txt"), "not parsed").unwrap();

    let source = FsReferenceSource::new(root.path());
    let store = MemoryObjectStore::new();
    let mut config = ReferenceConfig::default();
    config.publish.exists_retry = RetryPolicy::none();

    let outcome = run_reference_ingest(&source, &store, &config).await.unwrap();
    let ReferenceOutcome::Published {
        folder, published, ..
    } = outcome
    else {
        panic!("expected a published outcome");
    };
    assert_eq!(folder, "Upload 030225_010000");
    let keys: Vec<&str> = published.iter().map(|day| day.key.as_str()).collect();
    assert_eq!(
        keys,
        vec!["2025_03_01_5min_prediction.csv", "2025_03_02_5min_prediction.csv"]
    );
    let marker = store.get(MARKER_KEY).await.unwrap();
    assert_eq!(&marker[..], b"Upload 030225_010000");

    // 23:50..00:09 → buckets 23:50, 23:55, 00:00, 00:05, shifted back five minutes.
    let day_one = store.get("2025_03_01_5min_prediction.csv").await.unwrap();
    let segments = decode_csv(&day_one, None).unwrap();
    assert_eq!(
        segments[0].table.column("PM2.5 Conc").unwrap(),
        &[Some(2.0), Some(7.0), Some(12.0)]
    );

    let writes = store.write_count();
    let again = run_reference_ingest(&source, &store, &config).await.unwrap();
    assert!(matches!(again, ReferenceOutcome::UpToDate { .. }));
    assert_eq!(store.write_count(), writes);
}

#[tokio::test]
async fn reference_ingest_without_exports_is_a_no_op() {
    let root = tempfile::tempdir().unwrap();
    let store = MemoryObjectStore::new();
    let outcome = run_reference_ingest(
        &FsReferenceSource::new(root.path()),
        &store,
        &ReferenceConfig::default(),
    )
    .await
    .unwrap();

    assert_eq!(outcome, ReferenceOutcome::NoExport);
    assert!(store.keys().is_empty());
}
