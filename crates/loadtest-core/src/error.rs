use thiserror::Error;
use uuid::Uuid;

use crate::model::ExecutionStatus;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("invalid load test config: {0}")]
    Validation(String),
    #[error("execution {0} not found")]
    NotFound(Uuid),
    #[error("execution {id} is {status}, operation not allowed")]
    InvalidState { id: Uuid, status: ExecutionStatus },
    #[error("scheduling failed: {0}")]
    Scheduling(String),
    #[error("HTTP client error: {0}")]
    Client(#[from] reqwest::Error),
    #[error("config error: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, EngineError>;
