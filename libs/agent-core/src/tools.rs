use crate::types::ToolSchema;
use async_trait::async_trait;
use serde_json::Value;
use std::{collections::HashMap, sync::Arc};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error)]
pub enum ToolError {
    #[error("invalid arguments: {0}")]
    InvalidArguments(String),

    #[error("unknown tool `{0}`")]
    UnknownTool(String),

    #[error("{0}")]
    Execution(String),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// A named capability the model can invoke.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn schema(&self) -> ToolSchema;

    /// `arguments` is always a JSON object.
    async fn execute(&self, arguments: &Value, cancel: &CancellationToken)
    -> Result<String, ToolError>;
}

/// Tools available to one agent, advertised in registration order.
#[derive(Default, Clone)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    by_name: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, tool: impl Tool + 'static) -> Self {
        self.register(Arc::new(tool));
        self
    }

    /// Registering a name twice replaces the earlier tool in place.
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        let name = tool.name().to_string();
        match self.by_name.get(&name) {
            Some(&slot) => self.tools[slot] = tool,
            None => {
                self.by_name.insert(name, self.tools.len());
                self.tools.push(tool);
            }
        }
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.by_name.get(name).map(|&slot| &self.tools[slot])
    }

    pub fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.iter().map(|tool| tool.schema()).collect()
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|tool| tool.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

/// Parse raw tool-call arguments. Blank text counts as `{}`; anything other
/// than a JSON object is rejected.
pub fn parse_arguments(raw: &str) -> Result<Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(Value::Object(Default::default()));
    }

    let value: Value =
        serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
    if !value.is_object() {
        return Err(ToolError::InvalidArguments(format!(
            "expected a JSON object, got `{raw}`"
        )));
    }
    Ok(value)
}

/// Fetch a required string argument.
pub fn required_str<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ToolError::InvalidArguments(format!("missing string field `{key}`")))
}

pub fn optional_str<'a>(arguments: &'a Value, key: &str) -> Option<&'a str> {
    arguments.get(key).and_then(Value::as_str)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Echo(&'static str);

    #[async_trait]
    impl Tool for Echo {
        fn name(&self) -> &str {
            self.0
        }

        fn schema(&self) -> ToolSchema {
            ToolSchema {
                name: self.0.to_string(),
                description: "echo".to_string(),
                parameters: json!({"type": "object"}),
            }
        }

        async fn execute(
            &self,
            arguments: &Value,
            _cancel: &CancellationToken,
        ) -> Result<String, ToolError> {
            Ok(format!("{}:{}", self.0, arguments))
        }
    }

    #[test]
    fn registry_keeps_order_and_replaces_duplicates() {
        let registry = ToolRegistry::new()
            .with(Echo("git_log"))
            .with(Echo("git_diff"))
            .with(Echo("git_log"));

        assert_eq!(registry.names(), vec!["git_log", "git_diff"]);
        assert_eq!(registry.len(), 2);
        assert!(registry.get("git_status").is_none());
    }

    #[tokio::test]
    async fn registered_tool_executes() {
        let registry = ToolRegistry::new().with(Echo("git_log"));
        let Some(tool) = registry.get("git_log") else {
            panic!("tool should be registered");
        };
        let result = tool
            .execute(&json!({"n": 1}), &CancellationToken::new())
            .await;
        assert_eq!(result.ok().as_deref(), Some("git_log:{\"n\":1}"));
    }

    #[test]
    fn arguments_must_be_a_json_object() {
        assert_eq!(parse_arguments("").ok(), Some(json!({})));
        assert_eq!(parse_arguments("{\"a\":1}").ok(), Some(json!({"a": 1})));
        assert!(matches!(
            parse_arguments("{\"a\":"),
            Err(ToolError::InvalidArguments(_))
        ));
        assert!(matches!(
            parse_arguments("[1,2]"),
            Err(ToolError::InvalidArguments(_))
        ));
    }

    #[test]
    fn required_str_reports_missing_field() {
        let args = json!({"path": "src/lib.rs", "limit": 3});
        assert_eq!(required_str(&args, "path").ok(), Some("src/lib.rs"));
        assert!(required_str(&args, "limit").is_err());
        assert_eq!(optional_str(&args, "pattern"), None);
    }
}
