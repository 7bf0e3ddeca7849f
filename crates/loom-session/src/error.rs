use thiserror::Error;

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("chat not found: {id}")]
    NotFound { id: String },

    #[error("store error: {0}")]
    Store(#[from] loom_store::StoreError),

    #[error("session actor is no longer running")]
    Gone,
}

pub type Result<T> = std::result::Result<T, SessionError>;
