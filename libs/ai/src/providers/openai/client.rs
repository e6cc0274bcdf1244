use super::convert::to_chat_request;
use super::stream::{create_completions_stream, map_reqwest_error};
use super::types::{OFFICIAL_OPENAI_BASE_URL, OpenAiConfig};
use async_trait::async_trait;
use gitsage_agent_core::{DeltaStream, Message, ModelClient, ModelError, ToolSchema};
use reqwest::Client;
use reqwest_eventsource::EventSource;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

/// Streaming client for `/chat/completions` on any OpenAI-compatible server.
#[derive(Debug, Clone)]
pub struct OpenAiClient {
    config: OpenAiConfig,
    client: Client,
}

impl OpenAiClient {
    /// The API key may be empty for custom endpoints (local servers often
    /// need none) but is required for the official one.
    pub fn new(mut config: OpenAiConfig) -> Result<Self, ModelError> {
        config.base_url = config.base_url.trim_end_matches('/').to_string();

        if config.api_key.is_empty() && config.base_url == OFFICIAL_OPENAI_BASE_URL {
            return Err(ModelError::Status {
                status: 401,
                message: "no API key configured for api.openai.com".to_string(),
            });
        }

        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(map_reqwest_error)?;

        Ok(Self { config, client })
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.config.base_url)
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ModelError> {
        if cancel.is_cancelled() {
            return Err(ModelError::Cancelled);
        }

        let request = to_chat_request(&self.config.model, messages, tools);
        tracing::debug!(
            model = %self.config.model,
            messages = request.messages.len(),
            tools = tools.len(),
            "starting chat completion stream"
        );

        let mut builder = self.client.post(self.endpoint()).json(&request);
        if !self.config.api_key.is_empty() {
            builder = builder.bearer_auth(&self.config.api_key);
        }

        let event_source = EventSource::new(builder).map_err(|e| {
            ModelError::Other(format!("failed to create event source: {e}"))
        })?;

        Ok(create_completions_stream(event_source))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::StreamExt;
    use gitsage_agent_core::{StreamDelta, TokenUsage, accumulate_stream};

    fn client_for(server: &mockito::ServerGuard) -> OpenAiClient {
        let config = OpenAiConfig::new("test-key", "gpt-4o-mini").with_base_url(server.url());
        match OpenAiClient::new(config) {
            Ok(client) => client,
            Err(error) => panic!("client should build: {error}"),
        }
    }

    #[test]
    fn official_endpoint_requires_an_api_key() {
        assert!(OpenAiClient::new(OpenAiConfig::new("", "gpt-4o-mini")).is_err());
        let local = OpenAiConfig::new("", "llama3").with_base_url("http://localhost:11434/v1/");
        let client = match OpenAiClient::new(local) {
            Ok(client) => client,
            Err(error) => panic!("custom endpoints need no key: {error}"),
        };
        assert_eq!(client.endpoint(), "http://localhost:11434/v1/chat/completions");
    }

    #[tokio::test]
    async fn streams_and_accumulates_a_tool_call() {
        let mut server = mockito::Server::new_async().await;
        let body = concat!(
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"role\":\"assistant\",\"content\":\"\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"content\":\"Checking\"}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"call_1\",\"type\":\"function\",\"function\":{\"name\":\"git_diff\",\"arguments\":\"{\\\"staged\\\":\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{\"tool_calls\":[{\"index\":0,\"function\":{\"arguments\":\"true}\"}}]}}]}\n\n",
            "data: {\"choices\":[{\"index\":0,\"delta\":{},\"finish_reason\":\"tool_calls\"}]}\n\n",
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":50,\"completion_tokens\":7,\"total_tokens\":57}}\n\n",
            "data: [DONE]\n\n",
        );
        let mock = server
            .mock("POST", "/chat/completions")
            .match_header("authorization", "Bearer test-key")
            .with_status(200)
            .with_header("content-type", "text/event-stream")
            .with_body(body)
            .create_async()
            .await;

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        let stream = match client
            .stream_chat(&[Message::user("commit this")], &[], &cancel)
            .await
        {
            Ok(stream) => stream,
            Err(error) => panic!("stream should open: {error}"),
        };

        let response = match accumulate_stream(stream, &cancel, |_| {}).await {
            Ok(response) => response,
            Err(error) => panic!("stream should accumulate: {error}"),
        };

        mock.assert_async().await;
        assert_eq!(response.message.content, "Checking");
        assert_eq!(response.message.tool_calls.len(), 1);
        assert_eq!(response.message.tool_calls[0].id, "call_1");
        assert_eq!(response.message.tool_calls[0].name, "git_diff");
        assert_eq!(response.message.tool_calls[0].arguments, "{\"staged\":true}");
        assert_eq!(
            response.usage,
            TokenUsage {
                prompt_tokens: 50,
                completion_tokens: 7,
                total_tokens: 57,
            }
        );
    }

    #[tokio::test]
    async fn error_status_is_reported_with_body() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/chat/completions")
            .with_status(429)
            .with_body("rate limited")
            .create_async()
            .await;

        let client = client_for(&server);
        let cancel = CancellationToken::new();
        let mut stream = match client.stream_chat(&[Message::user("hi")], &[], &cancel).await {
            Ok(stream) => stream,
            Err(error) => panic!("stream should open: {error}"),
        };

        let first: Option<Result<StreamDelta, ModelError>> = stream.next().await;
        assert_eq!(
            first,
            Some(Err(ModelError::Status {
                status: 429,
                message: "rate limited".to_string(),
            }))
        );
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn cancelled_token_refuses_to_start() {
        let client = match OpenAiClient::new(
            OpenAiConfig::new("", "llama3").with_base_url("http://localhost:1/v1"),
        ) {
            Ok(client) => client,
            Err(error) => panic!("client should build: {error}"),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(matches!(
            client.stream_chat(&[], &[], &cancel).await,
            Err(ModelError::Cancelled)
        ));
    }
}
