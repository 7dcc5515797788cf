pub mod fills;
pub mod portfolio;
pub mod simulator;

use thiserror::Error;

/// Failures the HTTP layer must distinguish: bad input (400), missing
/// entity (404), everything else (500).
#[derive(Debug, Error)]
pub enum PaperError {
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("{0}")]
    Invalid(String),
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}
