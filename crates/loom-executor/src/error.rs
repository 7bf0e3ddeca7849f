use thiserror::Error;

/// Internal failures of the subprocess layer. Never surfaced directly to
/// callers — `Executor::execute` folds these into `ExecResult::error` so the
/// agent loop always gets a structured result, never a thrown error.
#[derive(Debug, Error)]
pub(crate) enum ExecutorError {
    #[error("spawn failed: {0}")]
    Spawn(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("command timed out after {ms}ms")]
    Timeout { ms: u64 },
}
