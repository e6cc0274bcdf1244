use crate::{error::AgentError, history::HistoryConfig};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::System => "system",
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::Tool => "tool",
        }
    }
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// A tool invocation requested by the model.
///
/// `index` is the slot position in the delta stream and only matters while the
/// response is being accumulated; `arguments` is raw JSON text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    pub id: String,
    pub index: usize,
    pub name: String,
    pub arguments: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallRequest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(tool_call_id.into()),
        }
    }

    pub fn has_tool_calls(&self) -> bool {
        !self.tool_calls.is_empty()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl TokenUsage {
    /// Add the usage of one completed inference to a run total.
    pub fn add(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.saturating_add(other.prompt_tokens);
        self.completion_tokens = self
            .completion_tokens
            .saturating_add(other.completion_tokens);
        self.total_tokens = self.total_tokens.saturating_add(other.total_tokens);
    }

    /// Keep the per-counter maximum, so both cumulative and delta reporting
    /// providers end up with a sane snapshot.
    pub fn merge_max(&mut self, other: &TokenUsage) {
        self.prompt_tokens = self.prompt_tokens.max(other.prompt_tokens);
        self.completion_tokens = self.completion_tokens.max(other.completion_tokens);
        self.total_tokens = self.total_tokens.max(other.total_tokens);
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RetryConfigError {
    #[error("retry backoff max ({max:?}) must not be lower than backoff base ({base:?})")]
    MaxBelowBase { base: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryConfig {
    pub enabled: bool,
    pub max_attempts: u32,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl RetryConfig {
    pub fn new(
        enabled: bool,
        max_attempts: u32,
        backoff_base: Duration,
        backoff_max: Duration,
    ) -> Result<Self, RetryConfigError> {
        if backoff_max < backoff_base {
            return Err(RetryConfigError::MaxBelowBase {
                base: backoff_base,
                max: backoff_max,
            });
        }

        Ok(Self {
            enabled,
            max_attempts,
            backoff_base,
            backoff_max,
        })
    }

    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff_base: Duration::from_secs(1),
            backoff_max: Duration::from_secs(30),
        }
    }
}

/// Schema of one tool as advertised to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolSchema {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

/// The tool whose successful call ends a run with a structured payload.
#[derive(Debug, Clone, PartialEq)]
pub struct TerminalTool {
    pub schema: ToolSchema,
}

impl TerminalTool {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: Value) -> Self {
        Self {
            schema: ToolSchema {
                name: name.into(),
                description: description.into(),
                parameters,
            },
        }
    }

    pub fn name(&self) -> &str {
        &self.schema.name
    }
}

/// What to do when the model answers with free text and no tool call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinalAnswerPolicy {
    /// Conversational agents: the text is the result.
    #[default]
    AcceptText,
    /// Structured-output agents: only the terminal tool may end the run.
    RequireTerminalTool,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub agent_type: String,
    pub system_prompt: String,
    pub max_iterations: usize,
    pub retry: RetryConfig,
    pub history: HistoryConfig,
    pub terminal_tool: Option<TerminalTool>,
    pub final_answer: FinalAnswerPolicy,
    pub inject_progress: bool,
}

impl AgentConfig {
    pub fn new(agent_type: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            agent_type: agent_type.into(),
            system_prompt: system_prompt.into(),
            max_iterations: 20,
            retry: RetryConfig::default(),
            history: HistoryConfig::default(),
            terminal_tool: None,
            final_answer: FinalAnswerPolicy::default(),
            inject_progress: true,
        }
    }

    /// A structured-output agent needs a terminal tool to finish with.
    pub fn validate(&self) -> Result<(), AgentError> {
        if self.final_answer == FinalAnswerPolicy::RequireTerminalTool
            && self.terminal_tool.is_none()
        {
            return Err(AgentError::InvalidConfig(format!(
                "agent `{}` requires a terminal tool but none is configured",
                self.agent_type
            )));
        }
        Ok(())
    }
}

/// Identity of one invocation of the agent loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentRunContext {
    pub run_id: Uuid,
}

impl AgentRunContext {
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
        }
    }
}

impl Default for AgentRunContext {
    fn default() -> Self {
        Self::new()
    }
}

/// How a run begins: a fresh task, or a cold load of a stored session.
#[derive(Debug, Clone, PartialEq)]
pub enum Seed {
    Fresh {
        session_id: String,
        task: String,
        metadata: std::collections::BTreeMap<String, String>,
    },
    Resume {
        session_id: String,
    },
}

impl Seed {
    pub fn session_id(&self) -> &str {
        match self {
            Seed::Fresh { session_id, .. } | Seed::Resume { session_id } => session_id,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AgentOutcome {
    /// The terminal tool was called with well-formed arguments.
    Submitted { tool: String, payload: Value },
    /// The model answered with free text and the policy accepts it.
    Answer { text: String },
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct AgentLoopResult {
    pub session_id: String,
    pub outcome: AgentOutcome,
    pub iterations: usize,
    pub total_usage: TokenUsage,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum AgentEvent {
    RunStarted {
        session_id: String,
        resumed: bool,
    },
    IterationStarted {
        iteration: usize,
        max_iterations: usize,
    },
    TextDelta {
        delta: String,
    },
    RetryAttempt {
        attempt: u32,
        delay_ms: u64,
        reason: String,
    },
    HistoryCompressed {
        messages_before: usize,
        messages_after: usize,
    },
    ToolExecutionStarted {
        tool_call_id: String,
        tool_name: String,
    },
    ToolExecutionCompleted {
        tool_call_id: String,
        tool_name: String,
        is_error: bool,
    },
    CheckpointSaved {
        session_id: String,
        iteration: usize,
    },
    RunCompleted {
        session_id: String,
        iterations: usize,
        total_usage: TokenUsage,
    },
}
