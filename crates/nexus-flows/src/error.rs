use thiserror::Error;

/// Errors raised while parsing or executing a flow (C8, spec §4.8).
#[derive(Debug, Error)]
pub enum FlowError {
    #[error("invalid flow spec: {0}")]
    InvalidSpec(String),

    #[error("flow {id} not found")]
    NotFound { id: String },

    #[error("agent step '{agent_id}' produced no valid JSON output: {reason}")]
    StepOutputInvalid { agent_id: String, reason: String },

    #[error("agent step '{agent_id}' may not use flow management tools: {tools:?}")]
    ForbiddenTools {
        agent_id: String,
        tools: Vec<String>,
    },

    #[error("scheduler error: {0}")]
    Scheduler(#[from] nexus_scheduler::SchedulerError),

    #[error("provider error: {0}")]
    Provider(#[from] nexus_agent::provider::ProviderError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl FlowError {
    /// Short error code, matching the §7 error taxonomy's wire-facing kind strings.
    pub fn code(&self) -> &'static str {
        match self {
            FlowError::InvalidSpec(_) => "SCHEMA_VIOLATION",
            FlowError::NotFound { .. } => "NOT_FOUND",
            FlowError::StepOutputInvalid { .. } => "SCHEMA_VIOLATION",
            FlowError::ForbiddenTools { .. } => "PERMISSION_DENIED",
            FlowError::Scheduler(_) => "DATABASE_ERROR",
            FlowError::Provider(_) => "LLM_PROVIDER_ERROR",
            FlowError::Serialization(_) => "SERIALIZATION_ERROR",
        }
    }
}

pub type Result<T> = std::result::Result<T, FlowError>;
