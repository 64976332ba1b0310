use thiserror::Error;

/// Failure talking to a third-party market-data service.
///
/// Classification matters for the retry policy: `Network` and 5xx `Http`
/// failures are retryable, 4xx `Http` is not, and `Timeout` means the request
/// was aborted after the configured deadline.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("Request timeout - {upstream} took too long to respond")]
    Timeout { upstream: &'static str },

    #[error("{upstream} returned HTTP {status}")]
    Http { upstream: &'static str, status: u16 },

    #[error("{upstream} network error: {message}")]
    Network {
        upstream: &'static str,
        message: String,
    },
}

impl UpstreamError {
    pub fn is_retryable(&self) -> bool {
        match self {
            UpstreamError::Timeout { .. } => false,
            UpstreamError::Http { status, .. } => *status >= 500,
            UpstreamError::Network { .. } => true,
        }
    }
}

/// A stored record whose embedded JSON does not match the expected shape.
/// Never propagated as a hard failure: callers exclude the record and surface
/// the diagnostic alongside the rest of the result.
#[derive(Debug, Clone, PartialEq, Error)]
#[error("malformed record {id}: {reason}")]
pub struct MalformedRecord {
    pub id: String,
    pub reason: String,
}
