//! Pure helpers for the streaming tool-calling agent loop — message format
//! conversion and incremental tool-call assembly. Kept free of actor/channel
//! types so they're directly unit-testable.

use std::collections::BTreeMap;

use loom_store::{Message, ToolCallRecord};

pub const DEFAULT_SYSTEM_PROMPT: &str =
    "You are a helpful assistant with access to a shell command tool. \
     Use it when a command would help answer the user's question.";

/// Convert the persisted message log into the raw JSON shape the LLM client
/// expects, prefixed with a system message.
pub fn build_raw_messages(system_prompt: &str, history: &[Message]) -> Vec<serde_json::Value> {
    let mut out = vec![serde_json::json!({
        "role": "system",
        "content": system_prompt,
    })];
    for m in history {
        out.push(message_to_json(m));
    }
    out
}

/// Convert a single persisted message into the LLM client's raw JSON shape.
pub fn message_to_json(m: &Message) -> serde_json::Value {
    match m {
        Message::User { content } => serde_json::json!({"role": "user", "content": content}),
        Message::Assistant { content, tool_calls } => {
            if tool_calls.is_empty() {
                serde_json::json!({"role": "assistant", "content": content})
            } else {
                let calls: Vec<serde_json::Value> = tool_calls
                    .iter()
                    .map(|c| {
                        serde_json::json!({
                            "id": c.id,
                            "type": "function",
                            "function": {"name": c.name, "arguments": c.arguments},
                        })
                    })
                    .collect();
                serde_json::json!({
                    "role": "assistant",
                    "content": if content.is_empty() { serde_json::Value::Null } else { serde_json::json!(content) },
                    "tool_calls": calls,
                })
            }
        }
        Message::Tool { tool_call_id, content } => serde_json::json!({
            "role": "tool",
            "tool_call_id": tool_call_id,
            "content": content,
        }),
    }
}

/// In-progress tool call being assembled from `ToolCallStart`/`ToolCallDelta`
/// stream events. Only becomes a completed `ToolCallRecord` once an `id` has
/// been observed.
#[derive(Debug, Clone, Default)]
pub struct PendingToolCall {
    pub id: Option<String>,
    pub name: String,
    pub arguments: String,
}

/// Accumulates tool calls across a single LLM stream by index, in arrival
/// order, so they can be announced and invoked once the stream ends.
#[derive(Debug, Default)]
pub struct ToolCallAssembler {
    by_index: BTreeMap<usize, PendingToolCall>,
}

impl ToolCallAssembler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&mut self, index: usize, id: String, name: String, arguments: String) {
        self.by_index.insert(
            index,
            PendingToolCall {
                id: Some(id),
                name,
                arguments,
            },
        );
    }

    pub fn delta(&mut self, index: usize, delta: &str) {
        self.by_index.entry(index).or_default().arguments.push_str(delta);
    }

    /// Completed calls (those with an observed `id`), in index order.
    pub fn finish(self) -> Vec<ToolCallRecord> {
        self.by_index
            .into_values()
            .filter_map(|p| {
                p.id.map(|id| ToolCallRecord {
                    id,
                    name: p.name,
                    arguments: p.arguments,
                })
            })
            .collect()
    }
}

/// Parse a tool call's raw argument string as JSON, falling back to a
/// `{"raw": "..."}` wrapper when it isn't valid JSON.
pub fn parse_tool_arguments(raw: &str) -> serde_json::Value {
    serde_json::from_str(raw).unwrap_or_else(|_| serde_json::json!({"raw": raw}))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_single_shot_call() {
        let mut asm = ToolCallAssembler::new();
        asm.start(0, "t1".into(), "execute_command".into(), String::new());
        asm.delta(0, "{\"command\":");
        asm.delta(0, "\"ls\"}");
        let calls = asm.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[0].arguments, "{\"command\":\"ls\"}");
    }

    #[test]
    fn calls_without_id_never_observed_are_dropped() {
        let mut asm = ToolCallAssembler::new();
        asm.delta(0, "{\"command\":\"ls\"}");
        assert!(asm.finish().is_empty());
    }

    #[test]
    fn preserves_index_order() {
        let mut asm = ToolCallAssembler::new();
        asm.start(1, "t2".into(), "execute_command".into(), String::new());
        asm.start(0, "t1".into(), "execute_command".into(), String::new());
        let calls = asm.finish();
        assert_eq!(calls[0].id, "t1");
        assert_eq!(calls[1].id, "t2");
    }

    #[test]
    fn parse_tool_arguments_falls_back_on_invalid_json() {
        let v = parse_tool_arguments("not json");
        assert_eq!(v["raw"], "not json");
    }

    #[test]
    fn parse_tool_arguments_decodes_valid_json() {
        let v = parse_tool_arguments("{\"command\":\"ls\"}");
        assert_eq!(v["command"], "ls");
    }

    #[test]
    fn message_round_trip_preserves_tool_calls() {
        let history = vec![
            Message::user("hi"),
            Message::assistant(
                "",
                vec![ToolCallRecord {
                    id: "t1".into(),
                    name: "execute_command".into(),
                    arguments: "{\"command\":\"ls\"}".into(),
                }],
            ),
            Message::tool("t1", "{\"success\":true}"),
        ];
        let raw = build_raw_messages(DEFAULT_SYSTEM_PROMPT, &history);
        assert_eq!(raw.len(), 4);
        assert_eq!(raw[2]["tool_calls"][0]["function"]["name"], "execute_command");
        assert_eq!(raw[3]["role"], "tool");
    }
}
