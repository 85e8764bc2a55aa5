use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("Database error: {0}")]
    DatabaseError(#[from] sea_orm::DbErr),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Auth error: {0}")]
    AuthError(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error(
        "Insufficient capacity for ticket type {ticket_type_id}: requested {requested}, available {available}"
    )]
    InsufficientCapacity {
        ticket_type_id: i64,
        requested: i32,
        available: i32,
    },

    #[error(
        "Insufficient funds for organizer {organizer_id}: requested {requested}, available {available}"
    )]
    InsufficientFunds {
        organizer_id: i64,
        requested: i64,
        available: i64,
    },

    #[error("Payment verification failed for {reference}: {reason}")]
    ExternalVerificationFailure { reference: String, reason: String },

    #[error("Forbidden")]
    Forbidden,

    #[error("External API error: {0}")]
    ExternalApiError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Internal server error: {0}")]
    InternalError(String),

    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    #[error("HTTP request error: {0}")]
    ReqwestError(#[from] reqwest::Error),

    #[error("JSON serialization/deserialization error: {0}")]
    SerdeJsonError(#[from] serde_json::Error),
}

impl AppError {
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::ValidationError(_) => "VALIDATION_ERROR",
            AppError::AuthError(_) | AppError::JwtError(_) => "AUTH_ERROR",
            AppError::NotFound(_) => "NOT_FOUND",
            AppError::Conflict(_) => "CONFLICT",
            AppError::InsufficientCapacity { .. } => "INSUFFICIENT_CAPACITY",
            AppError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            AppError::ExternalVerificationFailure { .. } => "PAYMENT_VERIFICATION_FAILED",
            AppError::Forbidden => "FORBIDDEN",
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => "EXTERNAL_API_ERROR",
            AppError::DatabaseError(_) => "DATABASE_ERROR",
            AppError::ConfigError(_)
            | AppError::InternalError(_)
            | AppError::SerdeJsonError(_) => "INTERNAL_ERROR",
        }
    }
}

impl ResponseError for AppError {
    fn status_code(&self) -> actix_web::http::StatusCode {
        use actix_web::http::StatusCode;
        match self {
            AppError::ValidationError(_) | AppError::InsufficientFunds { .. } => {
                StatusCode::BAD_REQUEST
            }
            AppError::AuthError(_) | AppError::JwtError(_) => StatusCode::UNAUTHORIZED,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Conflict(_) | AppError::InsufficientCapacity { .. } => StatusCode::CONFLICT,
            AppError::ExternalVerificationFailure { .. } => StatusCode::PAYMENT_REQUIRED,
            AppError::Forbidden => StatusCode::FORBIDDEN,
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => StatusCode::BAD_GATEWAY,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            AppError::ValidationError(_)
            | AppError::AuthError(_)
            | AppError::JwtError(_)
            | AppError::Conflict(_)
            | AppError::InsufficientCapacity { .. }
            | AppError::InsufficientFunds { .. }
            | AppError::ExternalVerificationFailure { .. } => {
                log::warn!("{self}");
                self.to_string()
            }
            AppError::NotFound(_) => self.to_string(),
            AppError::Forbidden => {
                log::warn!("Forbidden access");
                "Forbidden".to_string()
            }
            AppError::ExternalApiError(_) | AppError::ReqwestError(_) => {
                log::error!("{self}");
                self.to_string()
            }
            AppError::DatabaseError(err) => {
                log::error!("Database error: {err}");
                "Database error".to_string()
            }
            _ => {
                log::error!("Internal error: {self}");
                "Internal server error".to_string()
            }
        };

        HttpResponse::build(self.status_code()).json(json!({
            "success": false,
            "error": {
                "code": self.error_code(),
                "message": message
            }
        }))
    }
}
