//! Conversion between core types and Chat Completions types

use super::types::*;
use gitsage_agent_core::{
    Message, ModelError, Role, StreamDelta, TokenUsage, ToolCallFragment, ToolSchema,
};
use serde_json::json;

pub fn to_chat_request(
    model: &str,
    messages: &[Message],
    tools: &[ToolSchema],
) -> ChatCompletionRequest {
    let tools = (!tools.is_empty()).then(|| {
        tools
            .iter()
            .map(|tool| {
                json!({
                    "type": "function",
                    "function": {
                        "name": tool.name,
                        "description": tool.description,
                        "parameters": tool.parameters,
                    }
                })
            })
            .collect::<Vec<_>>()
    });

    ChatCompletionRequest {
        model: model.to_string(),
        messages: messages.iter().map(to_chat_message).collect(),
        stream: true,
        stream_options: Some(StreamOptions {
            include_usage: true,
        }),
        tools,
    }
}

fn to_chat_message(message: &Message) -> ChatMessage {
    let tool_calls = (message.role == Role::Assistant && message.has_tool_calls()).then(|| {
        message
            .tool_calls
            .iter()
            .map(|call| OpenAiToolCall {
                id: call.id.clone(),
                type_: "function".to_string(),
                function: OpenAiFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.clone(),
                },
            })
            .collect()
    });

    // Assistant turns that only call tools carry no content.
    let content = if tool_calls.is_some() && message.content.is_empty() {
        None
    } else {
        Some(message.content.clone())
    };

    ChatMessage {
        role: message.role.to_string(),
        content,
        tool_calls,
        tool_call_id: message.tool_call_id.clone(),
    }
}

/// Parse one SSE `data:` payload. Chunks that carry nothing (role-only or
/// finish-only chunks) yield `None`.
pub fn chunk_to_delta(data: &str) -> Result<Option<StreamDelta>, ModelError> {
    let chunk: ChatCompletionChunk = serde_json::from_str(data)
        .map_err(|e| ModelError::InvalidResponse(format!("failed to parse chunk: {e}")))?;

    let mut delta = StreamDelta {
        usage: chunk.usage.map(|usage| TokenUsage {
            prompt_tokens: usage.prompt_tokens,
            completion_tokens: usage.completion_tokens,
            total_tokens: usage.total_tokens,
        }),
        ..StreamDelta::default()
    };

    if let Some(choice) = chunk.choices.into_iter().next() {
        delta.content = choice.delta.content.filter(|content| !content.is_empty());

        for call in choice.delta.tool_calls.unwrap_or_default() {
            let mut fragment = ToolCallFragment::new(call.index as usize);
            fragment.id = call.id.filter(|id| !id.is_empty());
            if let Some(function) = call.function {
                fragment.name = function.name.filter(|name| !name.is_empty());
                fragment.arguments = function.arguments;
            }
            delta.tool_calls.push(fragment);
        }
    }

    let empty = delta.content.is_none() && delta.tool_calls.is_empty() && delta.usage.is_none();
    Ok((!empty).then_some(delta))
}
