//! Error types for the triage agent.

use std::time::Duration;

use crate::pipeline::types::CycleStage;

/// Top-level error type for the agent.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    #[error("Triage error: {0}")]
    Triage(#[from] TriageError),

    #[error("Triage cycle failed: {0}")]
    Cycle(#[from] CycleError),

    #[error("Agent error: {0}")]
    Agent(#[from] AgentError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// LLM provider errors.
#[derive(Debug, thiserror::Error)]
pub enum LlmError {
    #[error("Provider {provider} request failed: {reason}")]
    RequestFailed { provider: String, reason: String },

    #[error("Provider {provider} rate limited, retry after {retry_after:?}")]
    RateLimited {
        provider: String,
        retry_after: Option<Duration>,
    },

    #[error("Invalid response from {provider}: {reason}")]
    InvalidResponse { provider: String, reason: String },

    #[error("Authentication failed for provider {provider}")]
    AuthFailed { provider: String },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Example memory errors.
#[derive(Debug, thiserror::Error)]
pub enum MemoryError {
    #[error("Embedding generation failed: {reason}")]
    EmbeddingFailed { reason: String },

    #[error("Failed to load embedding model {model}: {reason}")]
    ModelLoadFailed { model: String, reason: String },

    #[error("Example store unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Errors raised inside a single triage step.
#[derive(Debug, thiserror::Error)]
pub enum TriageError {
    #[error("Invalid classification: {0}")]
    InvalidClassification(String),

    #[error("Invalid feedback '{0}': expected empty, 'ignore', 'notify' or 'respond'")]
    InvalidFeedback(String),

    #[error("Invalid email: {0}")]
    InvalidEmail(String),

    #[error("Feedback channel closed: {0}")]
    FeedbackClosed(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Store error: {0}")]
    Store(#[from] MemoryError),
}

/// A fatal triage cycle failure.
///
/// Carries the email identity and the last stage reached so the caller can
/// retry the whole cycle.
#[derive(Debug, thiserror::Error)]
#[error("cycle for '{subject}' aborted after {stage}: {source}")]
pub struct CycleError {
    pub email_key: String,
    pub subject: String,
    pub stage: CycleStage,
    #[source]
    pub source: TriageError,
}

/// Response sub-agent errors.
#[derive(Debug, thiserror::Error)]
pub enum AgentError {
    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    #[error("Agent exceeded {max} iterations without a final answer")]
    MaxIterations { max: usize },
}

/// Tool execution errors.
#[derive(Debug, thiserror::Error)]
pub enum ToolError {
    #[error("Tool {name} not found")]
    NotFound { name: String },

    #[error("Invalid parameters for tool {name}: {reason}")]
    InvalidParameters { name: String, reason: String },
}

/// Result type alias for the agent.
pub type Result<T> = std::result::Result<T, Error>;
