use std::fmt;

/// Error type for Kosha client operations.
#[derive(Debug)]
pub enum KoshaError {
    /// Connection failure or timeout, after retries were exhausted.
    Network(String),
    /// Non-success response to a single request.
    Http { status: u16, detail: String },
    /// Non-success response to a batch submission.
    Batch { batch_id: usize, status: u16, detail: String },
    /// Response body could not be decoded, or did not line up with the request.
    Parse(String),
    /// Missing or malformed field in caller-supplied data.
    InvalidInput(String),
    /// Bad configuration value.
    Config(String),
    /// File I/O error.
    Io(String),
}

impl KoshaError {
    /// True for errors raised by the transport layer (network or HTTP status).
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Http { .. } | Self::Batch { .. })
    }

    /// HTTP status code, when the error carries one.
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Http { status, .. } | Self::Batch { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl fmt::Display for KoshaError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Network(msg) => write!(f, "network error: {msg}"),
            Self::Http { status, detail } => write!(f, "HTTP {status}: {detail}"),
            Self::Batch { batch_id, status, detail } => {
                write!(f, "Batch {batch_id} failed with status {status}: {detail}")
            }
            Self::Parse(msg) => write!(f, "parse error: {msg}"),
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::Config(msg) => write!(f, "config error: {msg}"),
            Self::Io(msg) => write!(f, "I/O error: {msg}"),
        }
    }
}

impl std::error::Error for KoshaError {}

impl From<reqwest::Error> for KoshaError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Parse(e.to_string())
        } else {
            Self::Network(e.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_error_message_names_batch_and_status() {
        let err = KoshaError::Batch {
            batch_id: 2,
            status: 503,
            detail: "Service Unavailable".into(),
        };
        assert_eq!(err.to_string(), "Batch 2 failed with status 503: Service Unavailable");
        assert!(err.is_transport());
        assert_eq!(err.status(), Some(503));
    }

    #[test]
    fn input_errors_are_not_transport() {
        let err = KoshaError::InvalidInput("missing amount".into());
        assert!(!err.is_transport());
        assert_eq!(err.status(), None);
    }
}
