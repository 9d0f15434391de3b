use domain::{DomainError, RepositoryError};
use thiserror::Error;

use crate::transport::TransportError;

#[derive(Debug, Error)]
pub enum ApplicationError {
    #[error("domain error: {0}")]
    Domain(#[from] DomainError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("notification store unavailable")]
    StoreUnavailable,
}

impl ApplicationError {
    /// 回给客户端 `error` 事件的文案，不暴露内部细节
    pub fn client_message(&self) -> &'static str {
        match self {
            ApplicationError::Domain(_) => "invalid payload",
            ApplicationError::StoreUnavailable
            | ApplicationError::Repository(RepositoryError::Unavailable) => {
                "service temporarily unavailable"
            }
            _ => "failed to process read receipt",
        }
    }
}
