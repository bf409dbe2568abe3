use crate::validate::ImageMeta;

pub type ComposeResult<T> = Result<T, ComposeError>;

/// Every failure a composition can surface.
///
/// The first four are detected before any output byte exists. `Decode` and
/// `Encode` may also arrive mid-stream, in which case the output is truncated
/// and must be discarded by the caller.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ComposeError {
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("image not found: {0}")]
    NotFound(String),

    #[error("dimension mismatch: front is {front}, back is {back}")]
    DimensionMismatch { front: ImageMeta, back: ImageMeta },

    #[error("invalid threshold {0}: must be a non-negative number")]
    InvalidThreshold(f64),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("encode error: {0}")]
    Encode(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ComposeError {
    pub fn invalid_request(msg: impl Into<String>) -> Self {
        Self::InvalidRequest(msg.into())
    }

    pub fn decode(msg: impl Into<String>) -> Self {
        Self::Decode(msg.into())
    }

    pub fn encode(msg: impl Into<String>) -> Self {
        Self::Encode(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Errors caused by the request itself rather than by the server.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidRequest(_)
                | Self::NotFound(_)
                | Self::DimensionMismatch { .. }
                | Self::InvalidThreshold(_)
        )
    }
}

impl From<tokio::task::JoinError> for ComposeError {
    fn from(e: tokio::task::JoinError) -> Self {
        Self::Internal(format!("pipeline task failed: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_prefixes_are_stable() {
        assert!(ComposeError::invalid_request("x").to_string().starts_with("invalid request:"));
        assert!(ComposeError::decode("x").to_string().starts_with("decode error:"));
        assert!(ComposeError::encode("x").to_string().starts_with("encode error:"));
        assert!(ComposeError::internal("x").to_string().starts_with("internal error:"));
    }

    #[test]
    fn mismatch_names_both_sizes() {
        let err = ComposeError::DimensionMismatch {
            front: ImageMeta::new(100, 100),
            back: ImageMeta::new(50, 50),
        };
        let msg = err.to_string();
        assert!(msg.contains("100x100"));
        assert!(msg.contains("50x50"));
    }

    #[test]
    fn client_error_classification() {
        assert!(ComposeError::NotFound("a".into()).is_client_error());
        assert!(ComposeError::InvalidThreshold(-1.0).is_client_error());
        assert!(!ComposeError::decode("bad").is_client_error());
        assert!(!ComposeError::internal("bug").is_client_error());
    }
}
