use thiserror::Error;

/// Failure to decode a Kubernetes quantity string.
///
/// Decode failures are always recoverable: the poller that hit one skips the
/// tick instead of appending a clamped value.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Empty or missing input. Distinct from an explicit `"0"`.
    #[error("empty quantity")]
    Empty,
    /// Bad numeric part or an unrecognized unit suffix.
    #[error("malformed quantity: {0:?}")]
    Malformed(String),
    /// Negative value for a physically non-negative quantity.
    #[error("negative quantity: {0:?}")]
    Negative(String),
}

/// Failure to fetch a sample or log chunk from the backend.
///
/// Never fatal: the owning poller records the failed tick as a gap, degrades
/// its health flag, and keeps ticking.
#[derive(Debug, Clone, Error)]
pub enum FetchError {
    /// Backend or metrics-server unreachable; retried on the next tick.
    #[error("backend unavailable: {0}")]
    Unavailable(String),
    /// Fetch exceeded its deadline. Handled identically to `Unavailable`.
    #[error("fetch timed out after {0}s")]
    Timeout(u64),
}
