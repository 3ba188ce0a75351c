// src/error.rs

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SolverError {
    #[error("invalid solver configuration: {0}")]
    InvalidConfig(String),

    #[error("equation schema violation: {0}")]
    Schema(String),

    /// No damping factor in (0, 1] decreased the residual norm. The Newton
    /// step is unusable and the caller must restart from a different guess.
    #[error("line search failed at depth {depth}: no damping factor in (0, 1] decreases the residual")]
    LineSearchFailed { depth: usize },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type SolverResult<T> = Result<T, SolverError>;
