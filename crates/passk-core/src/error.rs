use thiserror::Error;

#[derive(Error, Debug)]
pub enum PassKError {
    #[error("Malformed record at line {line}: {message} ({record})")]
    MalformedRecord {
        line: usize,
        record: String,
        message: String,
    },

    #[error("Invalid k value: {0} (k must be >= 1)")]
    InvalidK(u32),

    #[error("Config error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, PassKError>;
