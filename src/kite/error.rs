//! Broker-specific error types

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KiteError {
    #[error("API error: {0}")]
    Api(String),
    #[error("auth error: {0}")]
    Auth(String),
    #[error("network error: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Parse(String),
    #[error("circuit breaker is open")]
    CircuitOpen,
}

impl From<reqwest::Error> for KiteError {
    fn from(err: reqwest::Error) -> Self {
        Self::Network(err.to_string())
    }
}

pub type KiteResult<T> = Result<T, KiteError>;
