//! Error taxonomy for a generation request.
//!
//! Seed-encoding failures and out-of-vocabulary samples are recovered inside
//! the generation loop; every other variant ends the request.

use thiserror::Error;

use crate::sampling::SamplingError;

#[derive(Error, Debug)]
pub enum GenerationError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("model load error: {0}")]
    ModelLoad(String),

    #[error("seed encoding error: {0}")]
    SeedEncoding(String),

    #[error("sampling error: {0}")]
    Sampling(#[from] SamplingError),

    #[error("prediction error: {0}")]
    Prediction(String),

    #[error("decode error after {tokens} tokens: {message}")]
    Decode { tokens: usize, message: String },

    #[error("generation loop is in state {state}, expected {expected}")]
    InvalidState {
        state: &'static str,
        expected: &'static str,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, GenerationError>;

impl GenerationError {
    /// Errors the loop recovers from locally instead of failing the request.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, GenerationError::SeedEncoding(_))
    }
}
