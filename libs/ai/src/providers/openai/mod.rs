//! OpenAI-compatible Chat Completions provider

mod client;
mod convert;
mod stream;
mod types;

pub use client::OpenAiClient;
pub use convert::{chunk_to_delta, to_chat_request};
pub use types::{OFFICIAL_OPENAI_BASE_URL, OpenAiConfig};
