use crate::{channels::ChannelGroupError, registry::RegistryError, volume_loader::VolumeLoaderError};

use axum::extract::{
    multipart::MultipartError,
    rejection::{JsonRejection, QueryRejection},
};
use std::sync::Arc;
use thiserror::Error;

/// How a failure should be reported to whoever made the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request itself is malformed (400).
    InvalidInput,
    /// The identifier does not resolve (404).
    NotFound,
    /// The request is well formed but its file cannot be processed (422).
    Unprocessable,
    /// Something went wrong on our side (500).
    Internal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Registry(#[from] RegistryError),

    #[error(transparent)]
    ChannelGroup(#[from] ChannelGroupError),

    #[error("Failed to load volume: {0}")]
    Load(#[source] Arc<VolumeLoaderError>),

    #[error("Invalid upload: {0}")]
    Upload(#[from] MultipartError),

    #[error("Invalid request body: {0}")]
    Body(#[from] JsonRejection),

    #[error("Invalid query string: {0}")]
    Query(#[from] QueryRejection),

    #[error("Missing multipart field: {0}")]
    MissingField(&'static str),

    #[error("{resource} {id} not found")]
    NotFound { resource: &'static str, id: String },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    pub fn not_found(resource: &'static str, id: impl Into<String>) -> Self {
        Error::NotFound {
            resource,
            id: id.into(),
        }
    }

    pub fn category(&self) -> ErrorCategory {
        match self {
            Error::Registry(RegistryError::Io(_)) => ErrorCategory::Internal,
            Error::Registry(_)
            | Error::ChannelGroup(_)
            | Error::Upload(_)
            | Error::Body(_)
            | Error::Query(_)
            | Error::MissingField(_) => ErrorCategory::InvalidInput,
            Error::Load(err) if err.is_bad_input() => ErrorCategory::Unprocessable,
            Error::Load(_) | Error::Internal(_) => ErrorCategory::Internal,
            Error::NotFound { .. } => ErrorCategory::NotFound,
        }
    }
}

impl From<Arc<VolumeLoaderError>> for Error {
    fn from(err: Arc<VolumeLoaderError>) -> Self {
        Error::Load(err)
    }
}

impl From<VolumeLoaderError> for Error {
    fn from(err: VolumeLoaderError) -> Self {
        Error::Load(Arc::new(err))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
