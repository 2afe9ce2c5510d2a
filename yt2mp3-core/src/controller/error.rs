use thiserror::Error;

use crate::client::ClientError;

#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Client(#[from] ClientError),
    #[error("{0}")]
    Task(String),
}

impl ConversionError {
    /// Validation problems leave the state machine untouched.
    pub fn is_validation(&self) -> bool {
        matches!(self, ConversionError::Validation(_))
    }
}
