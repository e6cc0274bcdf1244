use crate::{
    model::ModelError,
    types::{Message, Role, TokenUsage, ToolCallRequest},
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// One incremental fragment of a streamed model response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamDelta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCallFragment>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
}

impl StreamDelta {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn tool_call(fragment: ToolCallFragment) -> Self {
        Self {
            tool_calls: vec![fragment],
            ..Self::default()
        }
    }

    pub fn usage(usage: TokenUsage) -> Self {
        Self {
            usage: Some(usage),
            ..Self::default()
        }
    }
}

/// Partial tool call, placed by `index`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolCallFragment {
    pub index: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arguments: Option<String>,
}

impl ToolCallFragment {
    pub fn new(index: usize) -> Self {
        Self {
            index,
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_arguments(mut self, arguments: impl Into<String>) -> Self {
        self.arguments = Some(arguments.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccumulatedResponse {
    pub message: Message,
    pub usage: TokenUsage,
}

#[derive(Debug, Clone, Default)]
struct ToolCallSlot {
    id: String,
    name: String,
    arguments: String,
}

/// Reassembles one assistant message from ordered deltas.
#[derive(Debug, Default)]
pub struct StreamAccumulator {
    content: String,
    slots: Vec<ToolCallSlot>,
    usage: TokenUsage,
}

impl StreamAccumulator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, delta: &StreamDelta) {
        if let Some(content) = &delta.content {
            self.content.push_str(content);
        }

        for fragment in &delta.tool_calls {
            if self.slots.len() <= fragment.index {
                self.slots
                    .resize_with(fragment.index + 1, ToolCallSlot::default);
            }
            let slot = &mut self.slots[fragment.index];

            if let Some(id) = fragment.id.as_deref()
                && slot.id.is_empty()
            {
                slot.id = id.to_string();
            }
            if let Some(name) = fragment.name.as_deref()
                && slot.name.is_empty()
            {
                slot.name = name.to_string();
            }
            if let Some(arguments) = fragment.arguments.as_deref() {
                slot.arguments.push_str(arguments);
            }
        }

        if let Some(usage) = &delta.usage {
            self.usage.merge_max(usage);
        }
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    /// Slots whose name never arrived are dropped; a named slot without an id
    /// gets a generated one.
    pub fn finish(self) -> AccumulatedResponse {
        let tool_calls = self
            .slots
            .into_iter()
            .enumerate()
            .filter(|(_, slot)| !slot.name.is_empty())
            .map(|(index, slot)| ToolCallRequest {
                id: if slot.id.is_empty() {
                    format!("call_{}", Uuid::new_v4().simple())
                } else {
                    slot.id
                },
                index,
                name: slot.name,
                arguments: slot.arguments,
            })
            .collect();

        AccumulatedResponse {
            message: Message {
                role: Role::Assistant,
                content: self.content,
                tool_calls,
                tool_call_id: None,
            },
            usage: self.usage,
        }
    }
}

/// Drive `stream` to its end. A mid-stream error or cancellation discards the
/// partial response.
pub async fn accumulate_stream<S, F>(
    stream: S,
    cancel: &CancellationToken,
    mut on_delta: F,
) -> Result<AccumulatedResponse, ModelError>
where
    S: Stream<Item = Result<StreamDelta, ModelError>>,
    F: FnMut(&StreamDelta),
{
    let mut stream = Box::pin(stream);
    let mut accumulator = StreamAccumulator::new();

    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(ModelError::Cancelled),
            next = stream.next() => next,
        };

        match next {
            Some(Ok(delta)) => {
                on_delta(&delta);
                accumulator.push(&delta);
            }
            Some(Err(error)) => return Err(error),
            None => break,
        }
    }

    Ok(accumulator.finish())
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::stream;

    fn accumulate(deltas: Vec<StreamDelta>) -> AccumulatedResponse {
        let mut accumulator = StreamAccumulator::new();
        for delta in &deltas {
            accumulator.push(delta);
        }
        accumulator.finish()
    }

    #[test]
    fn concatenates_argument_fragments_per_index() {
        let response = accumulate(vec![
            StreamDelta::tool_call(ToolCallFragment::new(0).with_name("submit")),
            StreamDelta::tool_call(ToolCallFragment::new(0).with_arguments("{\"a\":")),
            StreamDelta::tool_call(ToolCallFragment::new(0).with_arguments("1}")),
        ]);

        let calls = &response.message.tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].name, "submit");
        assert_eq!(calls[0].arguments, "{\"a\":1}");
        assert!(calls[0].id.starts_with("call_"));
    }

    #[test]
    fn interleaves_text_and_multiple_tool_calls() {
        let response = accumulate(vec![
            StreamDelta::text("Looking at "),
            StreamDelta::tool_call(
                ToolCallFragment::new(0)
                    .with_id("tc_1")
                    .with_name("git_log")
                    .with_arguments("{\"range\":"),
            ),
            StreamDelta::text("the history"),
            StreamDelta::tool_call(
                ToolCallFragment::new(1)
                    .with_id("tc_2")
                    .with_name("git_diff")
                    .with_arguments("{}"),
            ),
            StreamDelta::tool_call(ToolCallFragment::new(0).with_arguments("\"HEAD~3..\"}")),
        ]);

        assert_eq!(response.message.role, Role::Assistant);
        assert_eq!(response.message.content, "Looking at the history");
        assert_eq!(
            response.message.tool_calls,
            vec![
                ToolCallRequest {
                    id: "tc_1".to_string(),
                    index: 0,
                    name: "git_log".to_string(),
                    arguments: "{\"range\":\"HEAD~3..\"}".to_string(),
                },
                ToolCallRequest {
                    id: "tc_2".to_string(),
                    index: 1,
                    name: "git_diff".to_string(),
                    arguments: "{}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn first_name_wins_and_placeholders_are_dropped() {
        let response = accumulate(vec![
            StreamDelta::tool_call(ToolCallFragment::new(2).with_id("tc_3").with_name("read_file")),
            StreamDelta::tool_call(ToolCallFragment::new(2).with_name("write_file")),
            StreamDelta::tool_call(ToolCallFragment::new(1).with_arguments("{\"orphan\":true}")),
        ]);

        let calls = &response.message.tool_calls;
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "tc_3");
        assert_eq!(calls[0].index, 2);
        assert_eq!(calls[0].name, "read_file");
    }

    #[test]
    fn usage_keeps_maximum_per_counter() {
        let response = accumulate(vec![
            StreamDelta::usage(TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 3,
                total_tokens: 103,
            }),
            StreamDelta::usage(TokenUsage {
                prompt_tokens: 0,
                completion_tokens: 40,
                total_tokens: 140,
            }),
        ]);

        assert_eq!(
            response.usage,
            TokenUsage {
                prompt_tokens: 100,
                completion_tokens: 40,
                total_tokens: 140,
            }
        );
    }

    #[tokio::test]
    async fn accumulate_stream_notifies_each_delta() {
        let deltas = vec![
            Ok(StreamDelta::text("fix: ")),
            Ok(StreamDelta::text("typo")),
        ];
        let mut seen = Vec::new();

        let response = accumulate_stream(stream::iter(deltas), &CancellationToken::new(), |d| {
            seen.push(d.content.clone().unwrap_or_default())
        })
        .await;

        let Ok(response) = response else {
            panic!("stream should accumulate");
        };
        assert_eq!(response.message.content, "fix: typo");
        assert_eq!(seen, vec!["fix: ".to_string(), "typo".to_string()]);
    }

    #[tokio::test]
    async fn mid_stream_error_discards_partial_state() {
        let deltas = vec![
            Ok(StreamDelta::tool_call(
                ToolCallFragment::new(0).with_arguments("{\"half\":"),
            )),
            Err(ModelError::Network("connection reset".to_string())),
        ];

        let result = accumulate_stream(stream::iter(deltas), &CancellationToken::new(), |_| {}).await;
        assert_eq!(
            result,
            Err(ModelError::Network("connection reset".to_string()))
        );
    }

    #[tokio::test]
    async fn cancellation_stops_a_pending_stream() {
        let cancel = CancellationToken::new();
        let pending = stream::iter(vec![Ok(StreamDelta::text("partial"))])
            .chain(stream::pending());

        let trigger = cancel.clone();
        let result = accumulate_stream(pending, &cancel, move |_| trigger.cancel()).await;
        assert_eq!(result, Err(ModelError::Cancelled));
    }
}
