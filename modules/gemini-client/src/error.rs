use thiserror::Error;

#[derive(Error, Debug)]
pub enum GeminiError {
    /// Quota exhausted (HTTP 429 / RESOURCE_EXHAUSTED). The only retryable
    /// failure mode.
    #[error("Gemini API rate limited")]
    RateLimited,

    #[error("Gemini API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("Gemini response contained no completion text")]
    EmptyResponse,

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, GeminiError>;
