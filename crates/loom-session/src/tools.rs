use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use loom_executor::{ExecResult, Executor};

/// Result of executing a tool — text content plus an error flag, re-injected
/// into the conversation as a `tool` role message.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub content: serde_json::Value,
    pub is_error: bool,
}

/// Trait every agent-callable tool implements.
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> serde_json::Value;
    async fn execute(&self, input: &serde_json::Value, work_dir: &Path) -> ToolResult;
}

/// The only tool the agent loop exposes: a guarded shell command.
pub struct ExecuteCommandTool {
    executor: Arc<Executor>,
}

impl ExecuteCommandTool {
    pub fn new(executor: Arc<Executor>) -> Self {
        Self { executor }
    }
}

#[async_trait]
impl Tool for ExecuteCommandTool {
    fn name(&self) -> &str {
        "execute_command"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the chat's working directory and return its \
         stdout and stderr. Commands are whitelist-checked; only a fixed set of \
         read-only/inspection commands are allowed. Timeout is 30 seconds."
    }

    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute via sh -c."
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, input: &serde_json::Value, work_dir: &Path) -> ToolResult {
        let command = match input.get("command").and_then(|v| v.as_str()) {
            Some(c) => c,
            None => {
                return ToolResult {
                    content: serde_json::json!({"success": false, "error": "Invalid arguments"}),
                    is_error: true,
                }
            }
        };

        let result: ExecResult = self.executor.execute(command, work_dir).await;
        let is_error = !result.success;
        ToolResult {
            content: serde_json::to_value(&result).unwrap_or(serde_json::Value::Null),
            is_error,
        }
    }
}
