#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(#[from] serde_json::Error),
    #[error("Invalid max age: {0}")]
    InvalidMaxAge(f64),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
