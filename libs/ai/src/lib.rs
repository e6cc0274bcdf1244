//! # gitsage-ai
//!
//! Streaming chat model clients for the gitsage agent core.
//!
//! ```rust,no_run
//! use gitsage_ai::{OpenAiClient, OpenAiConfig};
//!
//! let client = OpenAiClient::new(OpenAiConfig::new("sk-...", "gpt-4o-mini"))?;
//! # Ok::<(), gitsage_agent_core::ModelError>(())
//! ```

pub mod providers;

pub use providers::openai::{OFFICIAL_OPENAI_BASE_URL, OpenAiClient, OpenAiConfig};
