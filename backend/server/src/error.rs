use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bank::{LedgerError, PersistError};
use process::ForecastError;
use thiserror::Error;
use tracing::error;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Missing or expired session")]
    Unauthorized,

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Forecast(#[from] ForecastError),

    #[error("Storage error: {0}")]
    Storage(#[from] PersistError),

    #[error("Internal error: {0}")]
    InternalError(#[from] Box<dyn std::error::Error + Send + Sync>),
}

fn ledger_status(error: &LedgerError) -> StatusCode {
    match error {
        LedgerError::NotFound { .. } => StatusCode::NOT_FOUND,
        LedgerError::Forbidden(_) => StatusCode::FORBIDDEN,
        LedgerError::InvalidInput(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidCredentials | LedgerError::InvalidSession => StatusCode::UNAUTHORIZED,
        LedgerError::EmailTaken
        | LedgerError::InvalidTransition { .. }
        | LedgerError::NotClaimable(_)
        | LedgerError::InsufficientQuantity { .. }
        | LedgerError::DuplicateClaim
        | LedgerError::Expired => StatusCode::CONFLICT,
    }
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Ledger(e) | AppError::Forecast(ForecastError::Ledger(e)) => ledger_status(e),
            AppError::Forecast(_) => StatusCode::BAD_GATEWAY,
            AppError::Storage(_) | AppError::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        if status.is_server_error() {
            error!("{self}");
        }

        (status, self.to_string()).into_response()
    }
}
