use std::sync::Arc;

use aircal::api::{router, AppState};
use aircal::auth::{Credentials, TokenIssuer};
use aircal_core::model::{LinearModel, StaticModelStore};
use aircal_core::object_store::MemoryObjectStore;
use aircal_core::pipelines::serving::ServingConfig;
use aircal_core::schema::MODEL_FEATURES;
use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use chrono::{Duration, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

const SECRET: &str = "test-secret";
const EMAIL: &str = "ops@example.org";
const PASSWORD: &str = "hunter2";

const MARCH_1: &str = "timestamp,PM10,Pm2.5,Temp,Prediccion_Pm2.5,qhawax_id\n\
2025-03-01 23:50:00,20,10,22,9.5,qH013\n\
2025-03-01 23:55:00,21,11,22,10.5,qH013\n";

const REFERENCE_MARCH_1: &str = "timestamp,PM2.5 Conc\n\
2025-03-01 23:55:00,9\n";

fn issuer() -> TokenIssuer {
    TokenIssuer::new(SECRET, Duration::seconds(60))
}

fn app() -> Router {
    let model = LinearModel::new(MODEL_FEATURES.clone(), 1.0, vec![2.0, 0.1, 0.0, 0.0], None)
        .unwrap();
    let state = AppState {
        tokens: issuer(),
        credentials: Credentials {
            email: EMAIL.to_string(),
            password: PASSWORD.to_string(),
        },
        models: Arc::new(StaticModelStore::new().with_model("qH013", model)),
        predictions: Arc::new(
            MemoryObjectStore::new().with_object("2025_03_01_5min_prediction.csv", MARCH_1),
        ),
        reference: Arc::new(
            MemoryObjectStore::new()
                .with_object("2025_03_01_5min_prediction.csv", REFERENCE_MARCH_1),
        ),
        serving: ServingConfig::default(),
    };
    router(Arc::new(state))
}

fn bearer() -> String {
    format!("Bearer {}", issuer().issue(EMAIL).unwrap())
}

fn post(uri: &str, auth: Option<&str>, body: impl Into<Body>) -> Request<Body> {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(auth) = auth {
        builder = builder.header(header::AUTHORIZATION, auth);
    }
    builder.body(body.into()).unwrap()
}

fn post_json(uri: &str, auth: Option<&str>, body: Value) -> Request<Body> {
    post(uri, auth, body.to_string())
}

async fn send(request: Request<Body>) -> (StatusCode, Value) {
    let response = app().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn login_issues_a_verifiable_token() {
    let (status, body) = send(post_json(
        "/login",
        None,
        json!({ "email": EMAIL, "password": PASSWORD }),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    let token = body["token"].as_str().unwrap();
    assert_eq!(issuer().verify(token).unwrap().email, EMAIL);
}

#[tokio::test]
async fn login_rejects_wrong_password() {
    let (status, body) = send(post_json(
        "/login",
        None,
        json!({ "email": EMAIL, "password": "nope" }),
    ))
    .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "message": "Invalid credentials" }));
}

#[tokio::test]
async fn data_routes_require_a_bearer_token() {
    let request = json!({ "start_date": "2025-03-01", "end_date": "2025-03-01" });

    let (status, body) = send(post_json("/predictions", None, request.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(
        body,
        json!({ "message": "Missing or invalid Authorization header" })
    );

    let (status, _) = send(post_json("/predictions", Some("Token abc"), request.clone())).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, body) = send(post_json("/predictions", Some("Bearer abc"), request)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid token" }));
}

#[tokio::test]
async fn expired_and_forged_tokens_are_rejected() {
    let stale = issuer()
        .issue_at(EMAIL, Utc::now() - Duration::minutes(2))
        .unwrap();
    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&format!("Bearer {stale}")),
        json!({}),
    ))
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Token has expired" }));

    let forged = TokenIssuer::new("someone-else", Duration::seconds(60))
        .issue(EMAIL)
        .unwrap();
    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&format!("Bearer {forged}")),
        json!({}),
    ))
    .await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body, json!({ "error": "Invalid token" }));
}

#[tokio::test]
async fn predictions_are_joined_with_reference() {
    let (status, body) = send(post_json(
        "/predictions",
        Some(&bearer()),
        json!({ "start_date": "2025-03-01", "end_date": "2025-03-01" }),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!([
            {
                "date": "01-03-2025 23:50:00",
                "PM10": 20.0,
                "Pm2.5": 10.0,
                "Prediccion_Pm2.5": 9.5,
                "qhawax_id": "qH013",
                "Teledyne_pm2.5": null
            },
            {
                "date": "01-03-2025 23:55:00",
                "PM10": 21.0,
                "Pm2.5": 11.0,
                "Prediccion_Pm2.5": 10.5,
                "qhawax_id": "qH013",
                "Teledyne_pm2.5": 9.0
            }
        ])
    );
}

#[tokio::test]
async fn empty_range_returns_empty_list() {
    let (status, body) = send(post_json(
        "/predictions",
        Some(&bearer()),
        json!({ "start_date": "2024-01-01", "end_date": "2024-01-31" }),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));
}

#[tokio::test]
async fn prediction_query_is_validated() {
    let cases = [
        (
            json!({ "start_date": "2025-03-01" }),
            "The parameters start_date and end_date cannot be None",
        ),
        (
            json!({ "start_date": "01/03/2025", "end_date": "2025-03-02" }),
            "Invalid date format. Please use YYYY-MM-DD.",
        ),
        (
            json!({ "start_date": "2025-03-02", "end_date": "2025-03-01" }),
            "The end_date must be greater than or equal to start_date.",
        ),
    ];

    for (request, message) in cases {
        let (status, body) = send(post_json("/predictions", Some(&bearer()), request)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["message"], message);
    }
}

#[tokio::test]
async fn malformed_body_is_a_bad_request() {
    let (status, body) = send(post("/predictions", Some(&bearer()), "{not json")).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Invalid JSON format in request body");
}

#[tokio::test]
async fn on_demand_predicts_in_input_order() {
    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&bearer()),
        json!({
            "qhawax_id": "qH013",
            "data": [
                { "PM25": 10.0, "temperature": 20.0, "humidity": 70.0, "pressure": 1000.0 },
                { "PM25": 12.0, "temperature": 10.0, "humidity": 80.0, "pressure": 1010.0 }
            ]
        }),
    ))
    .await;

    assert_eq!(status, StatusCode::OK);
    // 1 + 2 * PM25 + 0.1 * temperature
    assert_eq!(body, json!({ "predictions": [23.0, 26.0] }));
}

#[tokio::test]
async fn on_demand_rejects_bad_requests() {
    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&bearer()),
        json!({ "data": [] }),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Missing required fields: qhawax_id and data");

    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&bearer()),
        json!({ "qhawax_id": "qH013", "data": [1, 2] }),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], "Data must be a list of dictionaries");

    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&bearer()),
        json!({ "qhawax_id": "qH013", "data": [{ "PM25": 10.0 }] }),
    ))
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "The input data is missing one or more required features."
    );
}

#[tokio::test]
async fn on_demand_unknown_device_is_not_found() {
    let (status, body) = send(post_json(
        "/predictions/on-demand",
        Some(&bearer()),
        json!({
            "qhawax_id": "qH099",
            "data": [{ "PM25": 10.0, "temperature": 20.0, "humidity": 70.0, "pressure": 1000.0 }]
        }),
    ))
    .await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "No model registered for device qH099");
}
