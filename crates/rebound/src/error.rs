//! Transport-level errors.
//!
//! Only the injected streaming function can fail. Truncation, budget
//! exhaustion and cancellation are normal controller outcomes and never show
//! up here.

/// An error raised by a [`StreamFn`](crate::api::StreamFn) while opening or
/// reading a stream. The controller forwards it to its caller and ends the
/// run.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to serialize request: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("{0}")]
    Transport(String),
}

impl StreamError {
    pub fn transport(message: impl Into<String>) -> Self {
        StreamError::Transport(message.into())
    }

    /// HTTP status code, when the backend answered with one.
    pub fn status(&self) -> Option<u16> {
        match self {
            StreamError::Status { status, .. } => Some(*status),
            StreamError::Request(e) => e.status().map(|s| s.as_u16()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_error_display() {
        let err = StreamError::Status {
            status: 429,
            body: "rate limited".into(),
        };
        assert_eq!(err.to_string(), "API HTTP 429: rate limited");
        assert_eq!(err.status(), Some(429));
    }

    #[test]
    fn transport_error_has_no_status() {
        let err = StreamError::transport("connection reset by peer");
        assert_eq!(err.to_string(), "connection reset by peer");
        assert!(err.status().is_none());
    }
}
