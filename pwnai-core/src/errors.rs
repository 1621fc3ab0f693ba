// pwnai-core/src/errors.rs
use thiserror::Error;

/// Errors produced by the orchestration engine.
///
/// Tool-level variants (`InvalidInput` through `Execution`) are reported back to the
/// model as tool-result text so the conversation can continue. `Provider` ends a
/// completion stream with a single error event.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PwnaiError {
    /// Schema, shape or range violation. The tool was never executed.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Well-shaped input that is semantically unusable (e.g. a path that is not a directory).
    #[error("verification failed: {0}")]
    Verification(String),

    /// A human explicitly rejected the call.
    #[error("approval denied: {0}")]
    ApprovalDenied(String),

    /// Unknown backend or tool name, or an unresolved widget id.
    #[error("not found: {0}")]
    NotFound(String),

    /// The side effect itself failed (transport failure, timeout, store error).
    #[error("execution failed: {0}")]
    Execution(String),

    /// The model provider call failed or returned a non-success status.
    #[error("provider error: {0}")]
    Provider(String),

    /// Configuration loading or validation.
    #[error("configuration error: {0}")]
    Config(String),
}

impl PwnaiError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        PwnaiError::InvalidInput(msg.into())
    }

    pub fn verification(msg: impl Into<String>) -> Self {
        PwnaiError::Verification(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        PwnaiError::NotFound(msg.into())
    }

    pub fn execution(msg: impl Into<String>) -> Self {
        PwnaiError::Execution(msg.into())
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        PwnaiError::Provider(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        PwnaiError::Config(msg.into())
    }

    /// Short machine-friendly name of the variant, used in logs and telemetry.
    pub fn kind(&self) -> &'static str {
        match self {
            PwnaiError::InvalidInput(_) => "invalid_input",
            PwnaiError::Verification(_) => "verification",
            PwnaiError::ApprovalDenied(_) => "approval_denied",
            PwnaiError::NotFound(_) => "not_found",
            PwnaiError::Execution(_) => "execution",
            PwnaiError::Provider(_) => "provider",
            PwnaiError::Config(_) => "config",
        }
    }

    /// Prefixes the message with extra context while keeping the variant.
    pub fn with_context(self, context: impl std::fmt::Display) -> Self {
        match self {
            PwnaiError::InvalidInput(m) => PwnaiError::InvalidInput(format!("{}: {}", context, m)),
            PwnaiError::Verification(m) => PwnaiError::Verification(format!("{}: {}", context, m)),
            PwnaiError::ApprovalDenied(m) => {
                PwnaiError::ApprovalDenied(format!("{}: {}", context, m))
            }
            PwnaiError::NotFound(m) => PwnaiError::NotFound(format!("{}: {}", context, m)),
            PwnaiError::Execution(m) => PwnaiError::Execution(format!("{}: {}", context, m)),
            PwnaiError::Provider(m) => PwnaiError::Provider(format!("{}: {}", context, m)),
            PwnaiError::Config(m) => PwnaiError::Config(format!("{}: {}", context, m)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_with_context_keeps_variant() {
        let err = PwnaiError::execution("connection reset").with_context("failed to send command");
        assert_eq!(
            err,
            PwnaiError::Execution("failed to send command: connection reset".to_string())
        );
        assert_eq!(err.kind(), "execution");
    }

    #[test]
    fn test_display_includes_category() {
        let err = PwnaiError::not_found("backend 'nope'");
        assert_eq!(err.to_string(), "not found: backend 'nope'");
    }
}
