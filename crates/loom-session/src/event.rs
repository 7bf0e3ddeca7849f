use serde::Serialize;

/// An event broadcast to subscribers of a chat's live stream.
///
/// `Done` is not JSON data on the wire — the HTTP layer translates it into
/// the literal `[DONE]` sentinel frame instead of `data: {...}`.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum Event {
    #[serde(rename = "connected")]
    Connected,

    #[serde(rename = "user-message")]
    UserMessage { content: String },

    #[serde(rename = "text-delta")]
    TextDelta { text: String },

    #[serde(rename = "tool-call")]
    ToolCall {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        #[serde(rename = "toolName")]
        tool_name: String,
        input: serde_json::Value,
    },

    #[serde(rename = "tool-result")]
    ToolResult {
        #[serde(rename = "toolCallId")]
        tool_call_id: String,
        output: serde_json::Value,
    },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(skip)]
    Done,
}
