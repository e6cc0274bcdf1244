use crate::{
    classify::RetryClassify,
    stream::StreamDelta,
    types::{Message, ToolSchema},
};
use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Lazy, finite, non-restartable sequence of response deltas.
pub type DeltaStream = Pin<Box<dyn Stream<Item = Result<StreamDelta, ModelError>> + Send>>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ModelError {
    #[error("request cancelled")]
    Cancelled,

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("provider returned status {status}: {message}")]
    Status { status: u16, message: String },

    #[error("invalid response from provider: {0}")]
    InvalidResponse(String),

    #[error("{0}")]
    Other(String),
}

impl RetryClassify for ModelError {
    fn status_code(&self) -> Option<u16> {
        match self {
            ModelError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }

    fn is_cancelled(&self) -> bool {
        matches!(self, ModelError::Cancelled)
    }

    fn is_timeout(&self) -> bool {
        matches!(self, ModelError::Timeout(_))
    }

    fn is_network(&self) -> bool {
        matches!(self, ModelError::Network(_))
    }
}

/// A streaming chat model.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[Message],
        tools: &[ToolSchema],
        cancel: &CancellationToken,
    ) -> Result<DeltaStream, ModelError>;
}
