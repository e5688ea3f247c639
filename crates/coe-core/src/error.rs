//! Unified error types for COE

use thiserror::Error;

/// Unified error type for all COE operations
#[derive(Error, Debug)]
pub enum CoeError {
    // Agent errors
    #[error("Agent error: {0}")]
    Agent(String),

    #[error("Agent not configured: {0}")]
    AgentNotConfigured(String),

    #[error("Agent timed out after {0}s")]
    AgentTimeout(u64),

    // Queue errors
    #[error("Task not found: {0}")]
    TaskNotFound(String),

    #[error("Invalid task transition: {0}")]
    InvalidTransition(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    // Planning errors
    #[error("Task breakdown error: {0}")]
    Breakdown(String),

    // File watching
    #[error("Watch error: {0}")]
    Watch(String),

    #[error("Config error: {0}")]
    Config(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic
    #[error("{0}")]
    Other(String),
}

/// Result type alias using CoeError
pub type Result<T> = std::result::Result<T, CoeError>;
