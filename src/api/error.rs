//! JSON error replies.
//!
//! User errors come back as `400` with their code. Session and role failures
//! use `401`/`403`. Backend failures are `500` with only an opaque reference in
//! the context; the real cause is logged under the same reference.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tracing::error;
use ulid::Ulid;
use utoipa::ToSchema;

use crate::error::{Error, ErrorCode};

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct ErrorReply {
    pub error_code: ErrorCode,
    pub error_context: Vec<String>,
}

#[must_use]
pub const fn status_for(code: ErrorCode) -> StatusCode {
    match code {
        ErrorCode::NotLoggedIn => StatusCode::UNAUTHORIZED,
        ErrorCode::Unauthorized | ErrorCode::CsrfTokenInvalid => StatusCode::FORBIDDEN,
        ErrorCode::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        _ => StatusCode::BAD_REQUEST,
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let code = self.code();
        let error_context = if self.is_internal() {
            let reference = Ulid::new().to_string();
            error!(reference = %reference, "request failed: {self}");
            vec![reference]
        } else {
            self.context()
        };
        let reply = ErrorReply {
            error_code: code,
            error_context,
        };
        (status_for(code), Json(reply)).into_response()
    }
}
