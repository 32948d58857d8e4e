use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use bank::BankError;
use thiserror::Error;

use crate::{auth::AuthError, views};

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Malformed payload")]
    MalformedPayload,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Bank(#[from] BankError),

    #[error("Authentication error: {0}")]
    Auth(#[from] AuthError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::MalformedPayload => StatusCode::BAD_REQUEST,
            AppError::Bank(BankError::NotFound { .. }) => StatusCode::NOT_FOUND,
            AppError::Auth(AuthError::InvalidCredentials) => StatusCode::UNAUTHORIZED,
            AppError::Bank(_) | AppError::Auth(_) => StatusCode::BAD_GATEWAY,
            AppError::Config(_) | AppError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match self {
            AppError::MalformedPayload => self.to_string(),
            AppError::Bank(BankError::NotFound { .. }) => "Not found".to_string(),
            AppError::Auth(AuthError::InvalidCredentials) => self.to_string(),
            _ => "Something went wrong, please try again".to_string(),
        };

        (status, views::error_page(status, &message)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(AppError::MalformedPayload.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            AppError::Bank(BankError::not_found("workers", "w1")).status(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::Auth(AuthError::InvalidCredentials).status(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Config("bad".to_string()).status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
