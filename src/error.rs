use thiserror::Error;

#[derive(Debug, Error)]
pub enum JudgeError {
    #[error("broker error: {0}")]
    Broker(#[from] redis::RedisError),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compilation failed: {0}")]
    Compile(String),

    #[error("code contains potentially unsafe operations")]
    UnsafeCode,

    #[error("{0}")]
    Other(String),
}

impl JudgeError {
    /// Produce a sanitized message safe for embedding in a verdict returned
    /// to submitters. Does not leak filesystem paths, broker addresses, or
    /// internal error chains.
    pub fn user_message(&self) -> String {
        match self {
            Self::Broker(_) => "internal queue error".to_string(),
            Self::Json(_) => "internal serialization error".to_string(),
            Self::Io(_) => "system error during execution".to_string(),
            Self::Compile(stderr) => stderr.clone(),
            Self::UnsafeCode => crate::security::UNSAFE_CODE_MESSAGE.to_string(),
            Self::Other(msg) => msg.clone(),
        }
    }
}
