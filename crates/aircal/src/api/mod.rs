//! HTTP API: token issuance, stored predictions and on-demand inference.

mod error;
mod routes;

use std::sync::Arc;

use aircal_core::model::ModelStore;
use aircal_core::object_store::ObjectStore;
use aircal_core::pipelines::serving::ServingConfig;
use axum::{routing::post, Router};

use crate::auth::{Credentials, TokenIssuer};

pub use error::ApiError;

pub struct AppState {
    pub tokens: TokenIssuer,
    pub credentials: Credentials,
    pub models: Arc<dyn ModelStore>,
    pub predictions: Arc<dyn ObjectStore>,
    pub reference: Arc<dyn ObjectStore>,
    pub serving: ServingConfig,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/login", post(routes::login))
        .route("/predictions", post(routes::predictions))
        .route("/predictions/on-demand", post(routes::on_demand))
        .with_state(state)
}
