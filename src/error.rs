// src/error.rs - HTTP error type shared by all handlers
use actix_web::{HttpResponse, ResponseError};
use serde::Serialize;
use std::fmt;

use crate::rules::{QuantityError, StockError};

#[derive(Debug)]
pub enum ApiError {
    BadRequest(String),
    NotFound(String),
    Unauthorized(String),
    Forbidden(String),
    Conflict(String),
    InternalServerError(String),
    ValidationError(String),
    DatabaseError(sqlx::Error),
    AuthError(String),
}

pub type ApiResult<T> = Result<T, ApiError>;

#[derive(Serialize)]
struct ErrorResponse {
    success: bool,
    message: String,
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            ApiError::BadRequest(msg) => write!(f, "Bad Request: {}", msg),
            ApiError::NotFound(msg) => write!(f, "Not Found: {}", msg),
            ApiError::Unauthorized(msg) => write!(f, "Unauthorized: {}", msg),
            ApiError::Forbidden(msg) => write!(f, "Forbidden: {}", msg),
            ApiError::Conflict(msg) => write!(f, "Conflict: {}", msg),
            ApiError::InternalServerError(msg) => write!(f, "Internal Server Error: {}", msg),
            ApiError::ValidationError(msg) => write!(f, "Validation Error: {}", msg),
            ApiError::DatabaseError(err) => write!(f, "Database Error: {}", err),
            ApiError::AuthError(msg) => write!(f, "Auth Error: {}", msg),
        }
    }
}

impl ResponseError for ApiError {
    fn error_response(&self) -> HttpResponse {
        if let ApiError::DatabaseError(err) = self {
            log::error!("Database error: {}", err);
        }

        let error_response = ErrorResponse {
            success: false,
            message: self.to_string(),
        };

        match self {
            ApiError::BadRequest(_) => HttpResponse::BadRequest().json(error_response),
            ApiError::NotFound(_) => HttpResponse::NotFound().json(error_response),
            ApiError::Unauthorized(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::Forbidden(_) => HttpResponse::Forbidden().json(error_response),
            ApiError::Conflict(_) => HttpResponse::Conflict().json(error_response),
            ApiError::ValidationError(_) => HttpResponse::UnprocessableEntity().json(error_response),
            ApiError::DatabaseError(_) => HttpResponse::InternalServerError().json(error_response),
            ApiError::AuthError(_) => HttpResponse::Unauthorized().json(error_response),
            ApiError::InternalServerError(_) => HttpResponse::InternalServerError().json(error_response),
        }
    }
}

impl From<sqlx::Error> for ApiError {
    fn from(err: sqlx::Error) -> Self {
        let unique_violation = err
            .as_database_error()
            .map(|db_err| db_err.is_unique_violation())
            .unwrap_or(false);

        if unique_violation {
            return ApiError::Conflict("A record with the same unique value already exists".to_string());
        }
        ApiError::DatabaseError(err)
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(err: validator::ValidationErrors) -> Self {
        ApiError::ValidationError(err.to_string())
    }
}

impl From<StockError> for ApiError {
    fn from(err: StockError) -> Self {
        match err {
            StockError::NonPositiveAmount(_) => ApiError::ValidationError(err.to_string()),
            StockError::InsufficientStock { .. } | StockError::Overflow => ApiError::Conflict(err.to_string()),
        }
    }
}

impl From<QuantityError> for ApiError {
    fn from(err: QuantityError) -> Self {
        match err {
            QuantityError::Negative { .. } => ApiError::ValidationError(err.to_string()),
            QuantityError::ReadyExceedsTotal { .. } | QuantityError::AllocatedExceedsTotal { .. } => {
                ApiError::Conflict(err.to_string())
            }
        }
    }
}

// Domain-specific errors
impl ApiError {
    pub fn not_found(entity: &str) -> Self {
        ApiError::NotFound(format!("{} not found", entity))
    }

    pub fn bad_request(msg: &str) -> Self {
        ApiError::BadRequest(msg.to_string())
    }

    pub fn material_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Material with ID '{}' not found", id))
    }

    pub fn book_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Book with ID '{}' not found", id))
    }

    pub fn order_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("Print order with ID '{}' not found", id))
    }

    pub fn user_not_found(id: &str) -> Self {
        ApiError::NotFound(format!("User with ID '{}' not found", id))
    }

    pub fn isbn_already_exists(isbn: &str) -> Self {
        ApiError::Conflict(format!("Book with ISBN '{}' already exists", isbn))
    }

    pub fn username_already_exists(username: &str) -> Self {
        ApiError::Conflict(format!("Username '{}' already exists", username))
    }

    pub fn insufficient_stock(available: i64, requested: i64) -> Self {
        ApiError::from(StockError::InsufficientStock { available, requested })
    }

    pub fn page_forbidden(page: &str) -> Self {
        ApiError::Forbidden(format!("Your role cannot access '{}'", page))
    }
}
