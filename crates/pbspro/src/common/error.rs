use thiserror::Error;

use crate::common::error::PbsError::GenericError;
use crate::pbs::command::CommandError;

#[derive(Debug, Error)]
pub enum PbsError {
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    #[error("{0}")]
    ResourceParsingError(String),
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
    #[error(transparent)]
    CommandError(#[from] CommandError),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Deserialization error: {0}")]
    DeserializationError(String),
    #[error("Lock error: {0}")]
    LockError(String),
    #[error("Scalelib error: {0}")]
    ScalelibError(#[from] scalelib::Error),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for PbsError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}

impl From<toml::de::Error> for PbsError {
    fn from(error: toml::de::Error) -> Self {
        Self::DeserializationError(error.to_string())
    }
}

impl From<anyhow::Error> for PbsError {
    fn from(error: anyhow::Error) -> Self {
        Self::GenericError(error.to_string())
    }
}

impl From<regex::Error> for PbsError {
    fn from(error: regex::Error) -> Self {
        Self::ConfigurationError(error.to_string())
    }
}

pub fn error<T>(message: String) -> crate::Result<T> {
    Err(GenericError(message))
}

impl From<String> for PbsError {
    fn from(e: String) -> Self {
        GenericError(e)
    }
}
