//! Agent task error taxonomy.
//!
//! Errors that cross the task boundary carry a stable machine-readable code
//! so callers can distinguish failure kinds without parsing messages. Tool
//! failures never appear here: they are reflected into the conversation as
//! tool-result turns and the model decides recovery. Only infrastructural
//! failures escape the loop.

use thiserror::Error;

/// A fatal task-level failure.
#[derive(Debug, Error)]
pub enum AgentError {
    /// Empty prompt, out-of-range iteration bound, malformed parameters.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// The model errored, returned neither text nor tool calls, or violated
    /// the tool-use contract.
    #[error("model failure: {0}")]
    ModelFailure(String),

    /// The bounded loop exhausted its iteration budget without a final text.
    #[error("task too complex; maximum tool usage reached ({0} iterations)")]
    MaxIterationsExceeded(u32),

    /// Deadline exceeded or explicit cancellation. Already-executed side
    /// effects are not rolled back.
    #[error("cancelled: {0}")]
    Cancelled(String),

    /// Unrecoverable backend failure outside any single tool call.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Stable error code for the `{success, code, message}` envelope.
    pub fn code(&self) -> &'static str {
        match self {
            AgentError::BadRequest(_) => "BAD_REQUEST",
            AgentError::ModelFailure(_) => "MODEL_FAILURE",
            AgentError::MaxIterationsExceeded(_) => "MAX_ITERATIONS_EXCEEDED",
            AgentError::Cancelled(_) => "CANCELLED",
            AgentError::Internal(_) => "INTERNAL",
        }
    }

    /// Render as the user-visible failure envelope.
    pub fn to_envelope(&self) -> serde_json::Value {
        serde_json::json!({
            "success": false,
            "code": self.code(),
            "message": self.to_string(),
        })
    }
}
