use thiserror::Error;
use trendcast_store::StoreError;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Store(#[from] StoreError),

    /// The observation failed the defensive bounds checks and was not merged.
    #[error("invalid observation: {0}")]
    InvalidObservation(String),
}

impl EngineError {
    #[must_use]
    pub fn is_retriable(&self) -> bool {
        match self {
            EngineError::Store(e) => e.is_retriable(),
            EngineError::InvalidObservation(_) => false,
        }
    }
}
