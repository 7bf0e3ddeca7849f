use serde::{Deserialize, Serialize};

/// Outcome of one `Executor::execute` call — always returned, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExecResult {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ExecResult {
    pub(crate) fn ok(stdout: String) -> Self {
        Self {
            success: true,
            stdout: if stdout.is_empty() { None } else { Some(stdout) },
            stderr: None,
            error: None,
        }
    }

    pub(crate) fn failed(stdout: String, stderr: String, error: String) -> Self {
        Self {
            success: false,
            stdout: if stdout.is_empty() { None } else { Some(stdout) },
            stderr: if stderr.is_empty() { None } else { Some(stderr) },
            error: Some(error),
        }
    }

    pub(crate) fn blocked(reason: String) -> Self {
        Self {
            success: false,
            stdout: None,
            stderr: None,
            error: Some(reason),
        }
    }
}
