use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use backswap_engine::ComposeError;
use serde_json::json;
use tracing::error;

use crate::store::StoreError;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Compose(#[from] ComposeError),
    #[error("server busy: all {0} composition slots are in use")]
    Busy(usize),
    #[error("image not found: {0}")]
    NotFound(String),
    #[error("upload rejected: {0}")]
    Upload(String),
    #[error("catalog error: {0}")]
    Catalog(#[from] rusqlite::Error),
    #[error(transparent)]
    Storage(#[from] StoreError),
    #[error("background task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Compose(ComposeError::NotFound(_)) | ApiError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            ApiError::Compose(e) if e.is_client_error() => StatusCode::BAD_REQUEST,
            ApiError::Compose(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::Busy(_) => StatusCode::SERVICE_UNAVAILABLE,
            ApiError::Upload(_) => StatusCode::BAD_REQUEST,
            ApiError::Storage(StoreError::InvalidId(_)) => StatusCode::NOT_FOUND,
            ApiError::Catalog(_) | ApiError::Storage(_) | ApiError::Join(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() && status != StatusCode::SERVICE_UNAVAILABLE {
            error!(error = %self, "request failed");
        }
        let body = Json(json!({ "error": self.to_string() }));
        match self {
            ApiError::Busy(_) => (status, [(header::RETRY_AFTER, "1")], body).into_response(),
            _ => (status, body).into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use backswap_engine::ImageMeta;

    #[test]
    fn compose_errors_map_to_client_or_server() {
        let mismatch = ApiError::from(ComposeError::DimensionMismatch {
            front: ImageMeta::new(1, 1),
            back: ImageMeta::new(2, 2),
        });
        assert_eq!(mismatch.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ApiError::from(ComposeError::InvalidThreshold(-1.0)).status(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(
            ApiError::from(ComposeError::NotFound("x".into())).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            ApiError::from(ComposeError::decode("bad")).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn busy_sets_retry_after() {
        let resp = ApiError::Busy(4).into_response();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(resp.headers()[header::RETRY_AFTER], "1");
    }

    #[test]
    fn invalid_store_id_is_not_found() {
        let err = ApiError::from(StoreError::InvalidId("../x".into()));
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }
}
