use thiserror::Error;

pub type Result<T> = std::result::Result<T, ClientError>;

#[derive(Debug, Error)]
pub enum ClientError {
    /// Malformed identity input. Rejected immediately, never retried.
    #[error("invalid input: {0}")]
    Validation(String),

    /// Network failure, timeout, or anti-bot rejection. Retried with backoff
    /// up to a bounded attempt count before surfacing.
    #[error("fetch failed after {attempts} attempt(s): {message}")]
    Transient { attempts: u32, message: String },

    /// An expected structure stayed absent past the bounded wait. Not retried.
    #[error("not found: {0}")]
    NotFound(String),

    /// The remote service answered with a non-zero business code.
    #[error("api error code={code}: {message}")]
    Api { code: i64, message: String },
}

impl ClientError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            attempts: 1,
            message: message.into(),
        }
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        Self::transient(err.to_string())
    }
}
