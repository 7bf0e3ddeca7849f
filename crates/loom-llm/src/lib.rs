mod client;
mod error;
mod types;

pub use client::{LlmClient, LlmProvider};
pub use error::{LlmError, Result};
pub use types::{StreamEvent, ToolDefinition};
