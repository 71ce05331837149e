//! Command-line and environment configuration.

use std::path::PathBuf;
use std::sync::Arc;

use aircal_core::model::FileModelStore;
use aircal_core::object_store::{LocalObjectStore, ObjectStore, S3Config, S3ObjectStore};
use anyhow::{Context, Result};
use clap::{Args, ValueEnum};
use tracing::info;

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageBackend {
    S3,
    Local,
}

#[derive(Args, Debug, Clone)]
pub struct StorageArgs {
    #[arg(long, env = "STORAGE_BACKEND", value_enum, default_value_t = StorageBackend::S3)]
    pub storage_backend: StorageBackend,

    #[arg(long, env = "PREDICTIONS_BUCKET", default_value = "air-quality-predictions")]
    pub predictions_bucket: String,

    #[arg(long, env = "REFERENCE_BUCKET", default_value = "air-quality-teledyne")]
    pub reference_bucket: String,

    /// Custom endpoint for S3-compatible services; enables path-style addressing.
    #[arg(long, env = "S3_ENDPOINT")]
    pub s3_endpoint: Option<String>,

    #[arg(long, env = "S3_REGION", default_value = "us-east-1")]
    pub s3_region: String,

    #[arg(long, env = "S3_ACCESS_KEY_ID")]
    pub s3_access_key_id: Option<String>,

    #[arg(long, env = "S3_SECRET_ACCESS_KEY", hide_env_values = true)]
    pub s3_secret_access_key: Option<String>,

    /// Buckets become subdirectories of this path with the local backend.
    #[arg(long, env = "LOCAL_STORAGE_ROOT", default_value = "./data")]
    pub local_storage_root: PathBuf,
}

impl StorageArgs {
    pub async fn open(&self, bucket: &str) -> Result<Arc<dyn ObjectStore>> {
        let store: Arc<dyn ObjectStore> = match self.storage_backend {
            StorageBackend::Local => {
                Arc::new(LocalObjectStore::new(self.local_storage_root.join(bucket)))
            }
            StorageBackend::S3 => {
                let config = S3Config {
                    bucket: bucket.to_string(),
                    region: self.s3_region.clone(),
                    endpoint: self.s3_endpoint.clone(),
                    access_key_id: self.s3_access_key_id.clone(),
                    secret_access_key: self.s3_secret_access_key.clone(),
                    force_path_style: self.s3_endpoint.is_some(),
                };
                Arc::new(
                    S3ObjectStore::new(config)
                        .await
                        .with_context(|| format!("failed to configure bucket {bucket}"))?,
                )
            }
        };
        info!(location = %store.location(), "object store ready");
        Ok(store)
    }

    pub async fn predictions(&self) -> Result<Arc<dyn ObjectStore>> {
        self.open(&self.predictions_bucket).await
    }

    pub async fn reference(&self) -> Result<Arc<dyn ObjectStore>> {
        self.open(&self.reference_bucket).await
    }
}

#[derive(Args, Debug, Clone)]
pub struct ModelArgs {
    /// TOML registry mapping device ids to model artifacts.
    #[arg(long, env = "MODELS_CONFIG", default_value = "models/models.toml")]
    pub models_config: PathBuf,
}

impl ModelArgs {
    pub fn load(&self) -> Result<Arc<FileModelStore>> {
        let store = FileModelStore::from_registry(&self.models_config).with_context(|| {
            format!("failed to load model registry {}", self.models_config.display())
        })?;
        Ok(Arc::new(store))
    }
}

#[derive(Args, Debug, Clone)]
pub struct UpstreamArgs {
    #[arg(long, env = "QHAWAX_API_URL", default_value = "https://qhapi.qairadrones.com")]
    pub qhawax_api_url: String,

    #[arg(long, env = "QHAWAX_EMAIL")]
    pub qhawax_email: String,

    #[arg(long, env = "QHAWAX_PASSWORD", hide_env_values = true)]
    pub qhawax_password: String,

    /// Numeric device ids passed to the averages endpoint.
    #[arg(
        long,
        env = "QHAWAX_DEVICE_IDS",
        value_delimiter = ',',
        default_value = "13,14,15,17,18"
    )]
    pub qhawax_device_ids: Vec<String>,
}

#[derive(Args, Debug, Clone)]
pub struct AuthArgs {
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    pub jwt_secret: String,

    #[arg(long, env = "API_EMAIL")]
    pub api_email: String,

    #[arg(long, env = "API_PASSWORD", hide_env_values = true)]
    pub api_password: String,

    /// Lifetime of issued tokens.
    #[arg(long, env = "TOKEN_TTL_SECS", default_value_t = 60)]
    pub token_ttl_secs: i64,
}
