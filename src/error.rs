use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};

use crate::database::StoreError;

pub enum UrlError {
    MalformedUrl,
    CodeSpaceExhausted,
    Store(StoreError),
}

impl IntoResponse for UrlError {
    fn into_response(self) -> Response {
        match self {
            Self::MalformedUrl => (
                StatusCode::BAD_REQUEST,
                Json(serde_json::json!({ "message": "URL provided was malformed" })),
            )
                .into_response(),
            Self::CodeSpaceExhausted => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "message": "could not allocate a unique short code" })),
            )
                .into_response(),
            Self::Store(err) => {
                tracing::error!(err = ?err);
                StatusCode::INTERNAL_SERVER_ERROR.into_response()
            }
        }
    }
}

impl From<StoreError> for UrlError {
    fn from(err: StoreError) -> Self {
        Self::Store(err)
    }
}
