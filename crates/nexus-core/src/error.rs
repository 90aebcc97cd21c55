use thiserror::Error;

#[derive(Debug, Error)]
pub enum NexusError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Authentication failed: {0}")]
    AuthFailed(String),

    #[error("WebSocket protocol error: {0}")]
    Protocol(String),

    #[error("Method not found: {method}")]
    MethodNotFound { method: String },

    #[error("Permission denied: {reason}")]
    PermissionDenied { reason: String },

    #[error("User not found: {id}")]
    UserNotFound { id: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("LLM provider error: {0}")]
    LlmProvider(String),

    #[error("Channel error ({channel}): {reason}")]
    Channel { channel: String, reason: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    #[error("Request timeout after {ms}ms")]
    Timeout { ms: u64 },

    #[error("Workspace not found: {0}")]
    WorkspaceNotFound(String),

    #[error("Path traversal rejected: {0}")]
    PathTraversal(String),

    #[error("Extension denied: {0}")]
    ExtensionDenied(String),

    #[error("Size exceeded: {size} bytes (max {max})")]
    SizeExceeded { size: u64, max: u64 },

    #[error("Schema violation: {0}")]
    SchemaViolation(String),

    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Rate limited, retry after {retry_after_ms}ms")]
    RateLimit { retry_after_ms: u64 },

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Loop detected: {0}")]
    LoopDetected(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl NexusError {
    /// Short error code string sent to clients in WS RES frames.
    pub fn code(&self) -> &'static str {
        match self {
            NexusError::Config(_) => "CONFIG_ERROR",
            NexusError::AuthFailed(_) => "AUTH_FAILED",
            NexusError::Protocol(_) => "PROTOCOL_ERROR",
            NexusError::MethodNotFound { .. } => "METHOD_NOT_FOUND",
            NexusError::PermissionDenied { .. } => "PERMISSION_DENIED",
            NexusError::UserNotFound { .. } => "USER_NOT_FOUND",
            NexusError::Database(_) => "DATABASE_ERROR",
            NexusError::LlmProvider(_) => "LLM_PROVIDER_ERROR",
            NexusError::Channel { .. } => "CHANNEL_ERROR",
            NexusError::Serialization(_) => "SERIALIZATION_ERROR",
            NexusError::Io(_) => "IO_ERROR",
            NexusError::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            NexusError::Timeout { .. } => "TIMEOUT",
            NexusError::WorkspaceNotFound(_) => "WORKSPACE_NOT_FOUND",
            NexusError::PathTraversal(_) => "PATH_TRAVERSAL",
            NexusError::ExtensionDenied(_) => "EXTENSION_DENIED",
            NexusError::SizeExceeded { .. } => "SIZE_EXCEEDED",
            NexusError::SchemaViolation(_) => "SCHEMA_VIOLATION",
            NexusError::ToolNotFound(_) => "TOOL_NOT_FOUND",
            NexusError::RateLimit { .. } => "RATE_LIMIT",
            NexusError::ModelNotFound(_) => "MODEL_NOT_FOUND",
            NexusError::LoopDetected(_) => "LOOP_DETECTED",
            NexusError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl NexusError {
    /// Render as the single-line `"Error: <message>"` string the tool
    /// dispatch boundary (§4.3) returns to the model. Never propagated as a
    /// Rust error past the dispatcher — this is the uniform surface every
    /// `ToolNotFound`/`SchemaViolation`/`Timeout`/`PermissionDenied`/... kind
    /// collapses to.
    pub fn as_tool_result(&self) -> String {
        let msg = self.to_string().replace('\n', " ");
        format!("Error: {msg}")
    }
}

pub type Result<T> = std::result::Result<T, NexusError>;
