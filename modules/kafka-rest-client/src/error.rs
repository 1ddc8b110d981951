use thiserror::Error;

#[derive(Error, Debug)]
pub enum KafkaRestError {
    #[error("Kafka REST proxy error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
}

pub type Result<T> = std::result::Result<T, KafkaRestError>;
