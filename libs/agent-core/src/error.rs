use crate::{model::ModelError, retry::RetryError, session::SessionStoreError};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error(transparent)]
    SessionStore(#[from] SessionStoreError),

    #[error("inference failed: {0}")]
    Inference(#[from] RetryError<ModelError>),

    #[error("iteration budget exhausted after {max_iterations} iterations")]
    IterationBudgetExhausted { max_iterations: usize },

    #[error("model answered without calling `{tool}`; structured output is required")]
    MissingStructuredOutput { tool: String },

    #[error("session {session_id} belongs to agent `{found}`, not `{expected}`")]
    AgentTypeMismatch {
        session_id: String,
        expected: String,
        found: String,
    },

    #[error("invalid agent configuration: {0}")]
    InvalidConfig(String),

    #[error("run cancelled")]
    Cancelled,
}
