// fed-core/src/error.rs

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FedError {

    #[error("no global state persisted for round {round}")]
    NotFound {
        round: u64,
    },

    #[error("duplicate submission from provider '{provider}' for round {round}")]
    DuplicateSubmission {
        round: u64,
        provider: String,
    },

    #[error("schema mismatch in submission from provider '{provider}', parameter '{parameter}': {detail}")]
    SchemaMismatch {
        provider: String,
        parameter: String,
        detail: String,
    },

    #[error("submission window for round {round} is closed")]
    RoundClosed {
        round: u64,
    },

    #[error("global state for round {round} already exists (global states are write-once)")]
    StateExists {
        round: u64,
    },

    #[error("provider identity '{provider}' is not a valid artifact name")]
    InvalidProvider {
        provider: String,
    },

    #[error("invalid weight {weight} for provider '{provider}'")]
    InvalidWeight {
        provider: String,
        weight: f64,
    },

    #[error("model error: {message}")]
    Model {
        message: String,
    },

    #[error("storage error at '{path}': {message}")]
    Storage {
        path: PathBuf,
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("artifact error: {message}")]
    Artifact {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("serialization error: {message}")]
    Serialization {
        message: String,
    },

    #[error("configuration error: {message}")]
    Config {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },
}

pub type Result<T> = std::result::Result<T, FedError>;

// Convenience constructors
impl FedError {

    pub fn not_found(round: u64) -> Self {
        Self::NotFound { round }
    }

    pub fn duplicate_submission(round: u64, provider: impl Into<String>) -> Self {
        Self::DuplicateSubmission {
            round,
            provider: provider.into(),
        }
    }

    pub fn schema_mismatch(
        provider: impl Into<String>,
        parameter: impl Into<String>,
        detail: impl Into<String>,
    ) -> Self {
        Self::SchemaMismatch {
            provider: provider.into(),
            parameter: parameter.into(),
            detail: detail.into(),
        }
    }

    pub fn model(message: impl Into<String>) -> Self {
        Self::Model {
            message: message.into(),
        }
    }

    pub fn storage(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: None,
        }
    }

    pub fn storage_with_source(
        path: impl Into<PathBuf>,
        message: impl Into<String>,
        source: std::io::Error,
    ) -> Self {
        Self::Storage {
            path: path.into(),
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn artifact(message: impl Into<String>) -> Self {
        Self::Artifact {
            message: message.into(),
            source: None,
        }
    }

    pub fn artifact_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Artifact {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization {
            message: message.into(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    pub fn config_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// True for errors that abort a round during validation rather than
    /// signaling a broken store.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::DuplicateSubmission { .. } | Self::SchemaMismatch { .. }
        )
    }
}
