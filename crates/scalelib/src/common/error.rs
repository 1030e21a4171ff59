use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScaleError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[error("Serialization error: {0}")]
    SerializationError(String),
    #[error("Cluster manager error: {0}")]
    ClusterError(String),
    #[error("Error: {0}")]
    GenericError(String),
}

impl From<serde_json::error::Error> for ScaleError {
    fn from(e: serde_json::error::Error) -> Self {
        Self::SerializationError(e.to_string())
    }
}
impl From<String> for ScaleError {
    fn from(e: String) -> Self {
        Self::GenericError(e)
    }
}
impl From<&str> for ScaleError {
    fn from(e: &str) -> Self {
        Self::GenericError(e.to_string())
    }
}
