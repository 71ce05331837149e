use std::sync::Arc;

use aircal_core::pipelines::on_demand::predict_on_demand;
use aircal_core::pipelines::serving::{query_predictions, PredictionQuery, ServedRow};
use axum::extract::rejection::JsonRejection;
use axum::extract::{FromRequestParts, State};
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::Json;
use serde::Serialize;
use serde_json::Value;
use tracing::info;

use super::error::{ApiError, INVALID_JSON};
use super::AppState;
use crate::auth::{bearer_token, AuthError, Claims};

const MISSING_ON_DEMAND_FIELDS: &str = "Missing required fields: qhawax_id and data";

/// Claims of a verified bearer token.
pub struct Authenticated(pub Claims);

impl FromRequestParts<Arc<AppState>> for Authenticated {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok());
        let token = bearer_token(header)?;
        let claims = state.tokens.verify(token)?;
        Ok(Authenticated(claims))
    }
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiError> {
    body.map(|Json(value)| value)
        .map_err(|_| ApiError::BadRequest(INVALID_JSON.to_string()))
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

pub async fn login(
    State(state): State<Arc<AppState>>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<TokenResponse>, ApiError> {
    let body = json_body(body)?;
    let email = body.get("email").and_then(Value::as_str);
    let password = body.get("password").and_then(Value::as_str);

    if !state.credentials.matches(email, password) {
        return Err(AuthError::BadCredentials.into());
    }
    let token = state.tokens.issue(&state.credentials.email)?;
    Ok(Json(TokenResponse { token }))
}

pub async fn predictions(
    State(state): State<Arc<AppState>>,
    Authenticated(claims): Authenticated,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Vec<ServedRow>>, ApiError> {
    let body = json_body(body)?;
    let query = PredictionQuery::parse(
        body.get("start_date").and_then(Value::as_str),
        body.get("end_date").and_then(Value::as_str),
    )?;

    let rows = query_predictions(
        state.predictions.as_ref(),
        state.reference.as_ref(),
        &query,
        &state.serving,
    )
    .await?;
    info!(
        user = %claims.email,
        start = %query.start,
        end = %query.end,
        rows = rows.len(),
        "served stored predictions"
    );
    Ok(Json(rows))
}

#[derive(Debug, Serialize)]
pub struct OnDemandResponse {
    pub predictions: Vec<f64>,
}

pub async fn on_demand(
    State(state): State<Arc<AppState>>,
    Authenticated(_): Authenticated,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<OnDemandResponse>, ApiError> {
    let body = json_body(body)?;
    let device_id = match body.get("qhawax_id") {
        Some(Value::String(id)) => Some(id.clone()),
        Some(Value::Number(id)) => Some(id.to_string()),
        _ => None,
    };
    let (Some(device_id), Some(data)) = (device_id, body.get("data")) else {
        return Err(ApiError::BadRequest(MISSING_ON_DEMAND_FIELDS.to_string()));
    };

    let predictions = predict_on_demand(state.models.as_ref(), &device_id, data)?;
    info!(device = %device_id, rows = predictions.len(), "served on-demand predictions");
    Ok(Json(OnDemandResponse { predictions }))
}
