use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("order {0} has no further status")]
    TerminalState(String),

    #[error("insufficient stock for {item}")]
    InsufficientStock { item: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("no delivery partner available")]
    NoPartnerAvailable,

    #[error("upstream failure: {0}")]
    UpstreamFailure(String),
}

impl AppError {
    /// Stable machine-readable kind, safe to hand to any caller.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::InvalidTransition(_) => "invalid_transition",
            AppError::InvalidState(_) => "invalid_state",
            AppError::TerminalState(_) => "terminal_state",
            AppError::InsufficientStock { .. } => "insufficient_stock",
            AppError::Forbidden(_) => "forbidden",
            AppError::Conflict(_) => "conflict",
            AppError::NoPartnerAvailable => "no_partner_available",
            AppError::UpstreamFailure(_) => "upstream_failure",
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::InvalidTransition(_)
            | AppError::InvalidState(_)
            | AppError::TerminalState(_)
            | AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::InsufficientStock { .. } => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NoPartnerAvailable => StatusCode::SERVICE_UNAVAILABLE,
            AppError::UpstreamFailure(_) => StatusCode::BAD_GATEWAY,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let message = match &self {
            AppError::UpstreamFailure(detail) => {
                tracing::error!(error = %detail, "upstream failure");
                "a backing service is unavailable, please retry".to_string()
            }
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": self.kind(),
            "message": message
        }));

        (status, body).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::AppError;

    #[test]
    fn insufficient_stock_names_the_item() {
        let err = AppError::InsufficientStock {
            item: "Paracetamol 500mg".to_string(),
        };
        assert_eq!(err.kind(), "insufficient_stock");
        assert!(err.to_string().contains("Paracetamol 500mg"));
    }
}
