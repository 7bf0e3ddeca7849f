use thiserror::Error;

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("missing OPENAI_API_KEY")]
    MissingApiKey,
}

pub type Result<T> = std::result::Result<T, LlmError>;
