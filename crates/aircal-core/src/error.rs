use aircal_parser::ParserError;
use thiserror::Error;

use crate::codec::CodecError;
use crate::model::ModelError;
use crate::normalize::NormalizeError;
use crate::object_store::StoreError;
use crate::publish::PublishError;
use crate::table::TableError;

#[derive(Debug, Error)]
pub enum PipelineError {
    /// Malformed or incomplete caller input. Never retried.
    #[error("{0}")]
    Validation(String),

    /// An upstream API or storage call kept failing.
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("No model registered for device {0}")]
    ModelNotFound(String),

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error(transparent)]
    Parser(#[from] ParserError),

    #[error(transparent)]
    Table(#[from] TableError),

    #[error(transparent)]
    Codec(#[from] CodecError),

    #[error(transparent)]
    Publish(#[from] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Model(ModelError),
}

impl From<ModelError> for PipelineError {
    fn from(err: ModelError) -> Self {
        match err {
            ModelError::NotFound(device) => PipelineError::ModelNotFound(device),
            other => PipelineError::Model(other),
        }
    }
}

impl PipelineError {
    /// True for errors caused by the caller's input.
    pub fn is_validation(&self) -> bool {
        match self {
            PipelineError::Validation(_) => true,
            PipelineError::Normalize(err) => err.is_validation(),
            PipelineError::Parser(err) => err.is_input_error(),
            _ => false,
        }
    }
}
