//! Engine error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Storage Error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON Error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Configuration Error: {0}")]
    Config(String),

    #[error("Invalid engine handle")]
    InvalidHandle,

    #[error("JNI Error: {0}")]
    Jni(#[from] jni::errors::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
