use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use presence_store::StoreError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("login required")]
    Unauthenticated,

    #[error("teacher role required")]
    Forbidden,

    #[error("user not found")]
    UnknownUser,

    #[error("{0}")]
    BadRequest(String),

    #[error("no face detected")]
    NoFace,

    #[error("{}", .0.user_message())]
    Store(#[from] StoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match self {
            AppError::Unauthenticated | AppError::UnknownUser => StatusCode::UNAUTHORIZED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::NoFace => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Store(_) => StatusCode::BAD_GATEWAY,
        };

        (status, Json(serde_json::json!({ "error": self.to_string() }))).into_response()
    }
}
