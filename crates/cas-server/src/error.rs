//! Admin API errors.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use cas_ticket::{ErrorCategory, TicketError};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// No valid ticket under the id.
    #[error("Ticket not found: {0}")]
    NotFound(String),

    /// Malformed request parameters.
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Ticket(#[from] TicketError),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Ticket(e) if e.is_not_found() => StatusCode::NOT_FOUND,
            Self::Ticket(e) => match e.category() {
                ErrorCategory::Ticket | ErrorCategory::Creation | ErrorCategory::Validation => {
                    StatusCode::BAD_REQUEST
                }
                ErrorCategory::Infrastructure
                | ErrorCategory::Security
                | ErrorCategory::Configuration => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn code(&self) -> String {
        match self {
            Self::NotFound(_) => "not-found".to_string(),
            Self::BadRequest(_) => "invalid".to_string(),
            Self::Ticket(e) => e.category().to_string(),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!(error = %self, "Admin request failed");
        }
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
