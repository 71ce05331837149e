//! HTTP client for the qHAWAX sensor API.

use aircal_core::pipelines::predictions::SensorSource;
use aircal_core::retry::RetryPolicy;
use aircal_core::window::IngestWindow;
use aircal_core::PipelineError;
use aircal_parser::{parse_device_payload, DeviceRecords};
use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tracing::{debug, info};

const LOGIN_PATH: &str = "/api/v2/login/";
const AVERAGES_PATH: &str = "/api/external/get_promedio_5min_qhawax_all/";

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{url} returned {status}")]
    Status { url: String, status: StatusCode },
    #[error("unexpected response from {url}: {message}")]
    Payload { url: String, message: String },
}

impl ClientError {
    /// Network failures and server-side statuses are retried. A rejected
    /// login or a malformed body is not.
    pub fn is_retryable(&self) -> bool {
        match self {
            ClientError::Transport { .. } => true,
            ClientError::Status { status, .. } => {
                status.is_server_error() || *status == StatusCode::TOO_MANY_REQUESTS
            }
            ClientError::Payload { .. } => false,
        }
    }
}

#[derive(Debug, Deserialize)]
struct LoginResponse {
    jwt: String,
}

#[derive(Debug, Deserialize)]
struct AveragesResponse {
    #[serde(default)]
    data: Value,
}

pub struct QhawaxClient {
    http: reqwest::Client,
    base_url: String,
    email: String,
    password: String,
    retry: RetryPolicy,
}

impl QhawaxClient {
    pub fn new(
        base_url: impl Into<String>,
        email: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            email: email.into(),
            password: password.into(),
            retry: RetryPolicy::http(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    pub async fn login(&self) -> Result<String, ClientError> {
        let url = self.url(LOGIN_PATH);
        self.retry
            .run("qhawax login", ClientError::is_retryable, || async {
                let response = self
                    .http
                    .post(&url)
                    .json(&json!({ "email": self.email, "password": self.password }))
                    .send()
                    .await
                    .map_err(|source| ClientError::Transport {
                        url: url.clone(),
                        source,
                    })?;
                let body: LoginResponse = decode(&url, response).await?;
                Ok(body.jwt)
            })
            .await
    }

    /// Raw `data` object of the 5-minute averages endpoint.
    pub async fn averages(
        &self,
        token: &str,
        window: &IngestWindow,
        device_ids: &[String],
    ) -> Result<Value, ClientError> {
        let url = self.url(AVERAGES_PATH);
        let ids = device_ids.join(",");
        let start = window.upstream_start();
        let end = window.upstream_end();
        self.retry
            .run("qhawax averages", ClientError::is_retryable, || async {
                let response = self
                    .http
                    .get(&url)
                    .bearer_auth(token)
                    .query(&[
                        ("initial_timestamp", start.as_str()),
                        ("final_timestamp", end.as_str()),
                        ("qhawax_ids", ids.as_str()),
                    ])
                    .send()
                    .await
                    .map_err(|source| ClientError::Transport {
                        url: url.clone(),
                        source,
                    })?;
                let body: AveragesResponse = decode(&url, response).await?;
                Ok(body.data)
            })
            .await
    }
}

async fn decode<T: for<'de> Deserialize<'de>>(
    url: &str,
    response: reqwest::Response,
) -> Result<T, ClientError> {
    let status = response.status();
    if !status.is_success() {
        return Err(ClientError::Status {
            url: url.to_string(),
            status,
        });
    }
    response.json::<T>().await.map_err(|err| ClientError::Payload {
        url: url.to_string(),
        message: err.to_string(),
    })
}

#[async_trait]
impl SensorSource for QhawaxClient {
    async fn fetch(
        &self,
        window: &IngestWindow,
        device_ids: &[String],
    ) -> Result<Vec<DeviceRecords>, PipelineError> {
        let token = self
            .login()
            .await
            .map_err(|err| PipelineError::UpstreamUnavailable(err.to_string()))?;
        debug!("qhawax login succeeded");

        let data = self
            .averages(&token, window, device_ids)
            .await
            .map_err(|err| PipelineError::UpstreamUnavailable(err.to_string()))?;
        if data.is_null() {
            return Ok(Vec::new());
        }

        let devices = parse_device_payload(&data)?;
        info!(
            devices = devices.len(),
            rejected = devices.iter().filter(|d| d.records.is_err()).count(),
            records = devices.iter().map(DeviceRecords::record_count).sum::<usize>(),
            "fetched qhawax averages"
        );
        Ok(devices)
    }
}
