use serde::{Deserialize, Serialize};

/// A tool descriptor sent to the remote completions endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: serde_json::Value,
}

/// Events emitted while consuming a streaming completion.
#[derive(Debug, Clone)]
pub enum StreamEvent {
    /// Incremental assistant text.
    TextDelta { text: String },

    /// A new tool call has been announced (its `id` was observed for the
    /// first time). `arguments` holds whatever argument text accompanied
    /// the announcement, which may be empty.
    ToolCallStart {
        index: usize,
        id: String,
        name: String,
        arguments: String,
    },

    /// Incremental argument text for an already-announced tool call.
    ToolCallDelta { index: usize, delta: String },

    /// The stream ended normally.
    Done,

    /// The stream ended with an error (network, protocol, or timeout).
    Error { message: String },
}
