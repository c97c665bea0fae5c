use axum::{
    extract::rejection::{JsonRejection, QueryRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use rust_decimal::Decimal;
use serde_json::json;
use thiserror::Error;

/// Application-level errors
///
/// Each variant maps onto one HTTP status. Storage and gateway transport
/// details are logged, never echoed to the client.
#[derive(Debug, Error)]
pub enum RelayError {
    #[error("{0}")]
    Validation(String),

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Game not found: {0}")]
    GameNotFound(String),

    #[error("Wallet not found: {0}")]
    WalletNotFound(String),

    #[error("Insufficient funds. Required: {required}, Available: {available}")]
    InsufficientFunds {
        required: Decimal,
        available: Decimal,
    },

    #[error("Wallet is not active: {0}")]
    WalletSuspended(String),

    /// The gateway answered but refused the request; its message is passed through.
    #[error("{0}")]
    Gateway(String),

    #[error("Payment gateway unavailable: {0}")]
    GatewayUnavailable(String),

    #[error("Database error: {0}")]
    DatabaseError(#[from] sqlx::Error),

    #[error("Internal server error: {0}")]
    InternalError(String),
}

impl RelayError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            RelayError::Validation(_) => StatusCode::BAD_REQUEST,
            RelayError::TransactionNotFound(_)
            | RelayError::GameNotFound(_)
            | RelayError::WalletNotFound(_) => StatusCode::NOT_FOUND,
            RelayError::InsufficientFunds { .. } | RelayError::WalletSuspended(_) => {
                StatusCode::BAD_REQUEST
            }
            RelayError::Gateway(_) => StatusCode::BAD_REQUEST,
            RelayError::GatewayUnavailable(_)
            | RelayError::DatabaseError(_)
            | RelayError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for RelayError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let error_message = match self {
            RelayError::DatabaseError(ref e) => {
                tracing::error!("Database error: {:?}", e);
                "Database operation failed".to_string()
            }

            RelayError::GatewayUnavailable(ref e) => {
                tracing::error!("Gateway error: {}", e);
                self.to_string()
            }

            RelayError::InternalError(ref e) => {
                tracing::error!("Internal error: {}", e);
                self.to_string()
            }

            _ => self.to_string(),
        };

        let body = Json(json!({
            "success": false,
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

impl From<JsonRejection> for RelayError {
    fn from(rejection: JsonRejection) -> Self {
        RelayError::Validation(format!("Invalid JSON payload: {}", rejection.body_text()))
    }
}

impl From<QueryRejection> for RelayError {
    fn from(rejection: QueryRejection) -> Self {
        RelayError::Validation(format!("Invalid query string: {}", rejection.body_text()))
    }
}

pub type RelayResult<T> = Result<T, RelayError>;
