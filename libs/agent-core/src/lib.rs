//! Orchestration core of gitsage: bounded, resumable, tool-augmented
//! conversations with a streaming chat model.

pub mod agent;
pub mod classify;
pub mod error;
pub mod history;
pub mod model;
pub mod retry;
pub mod session;
pub mod stream;
pub mod tools;
pub mod types;

pub use agent::{CANCELLED_RESULT, SKIPPED_RESULT, SUBMITTED_RESULT, run_agent};
pub use classify::{ErrorClass, RetryClassify, classify, classify_status, is_context_limit_error};
pub use error::AgentError;
pub use history::{
    Compression, ConsecutiveDedup, ContextInjection, HistoryConfig, HistoryPipeline,
    HistoryTransform, RecentContextMarker, RepairToolPairs, TokenBudget, ToolResultFilter,
    ToolResultSummarizer, estimate_message_tokens, estimate_tokens,
};
pub use model::{DeltaStream, ModelClient, ModelError};
pub use retry::{RetryAttempt, RetryError, backoff, with_retry, with_retry_notify};
pub use session::{
    FileSessionStore, InMemorySessionStore, Session, SessionStore, SessionStoreError,
    SessionSummary, generate_session_id, validate_session_id,
};
pub use stream::{
    AccumulatedResponse, StreamAccumulator, StreamDelta, ToolCallFragment, accumulate_stream,
};
pub use tools::{Tool, ToolError, ToolRegistry, optional_str, parse_arguments, required_str};
pub use types::{
    AgentConfig, AgentEvent, AgentLoopResult, AgentOutcome, AgentRunContext, FinalAnswerPolicy,
    Message, RetryConfig, RetryConfigError, Role, Seed, TerminalTool, TokenUsage,
    ToolCallRequest, ToolSchema,
};
