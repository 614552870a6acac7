//! Crate-wide error aggregation. Each module defines its own `thiserror`
//! enum (see `inventory::InventoryError`, `payment::PaymentError`,
//! `purchase::FinaliseError`); this type is the boundary error the
//! gateway converts into an HTTP response.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

use crate::catalogue::CatalogueError;
use crate::discount::DiscountError;
use crate::inventory::InventoryError;
use crate::payment::PaymentError;
use crate::purchase::FinaliseError;
use crate::review::ReviewError;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error(transparent)]
    Inventory(#[from] InventoryError),
    #[error(transparent)]
    Payment(#[from] PaymentError),
    #[error(transparent)]
    Finalise(#[from] FinaliseError),
    #[error(transparent)]
    Discount(#[from] DiscountError),
    #[error(transparent)]
    Catalogue(#[from] CatalogueError),
    #[error(transparent)]
    Review(#[from] ReviewError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("not found")]
    NotFound,
}

impl AppError {
    fn code(&self) -> &'static str {
        match self {
            AppError::Inventory(_) => "inventory_error",
            AppError::Payment(e) => e.failure_code(),
            AppError::Finalise(_) => "finalise_error",
            AppError::Discount(_) => "discount_invalid",
            AppError::Catalogue(_) => "internal_error",
            AppError::Review(ReviewError::AlreadyReviewed) => "already_reviewed",
            AppError::Review(ReviewError::InvalidRating) => "validation_error",
            AppError::Review(ReviewError::Database(_)) => "internal_error",
            AppError::Database(_) => "internal_error",
            AppError::Validation(_) => "validation_error",
            AppError::NotFound => "not_found",
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            AppError::Inventory(_) => StatusCode::CONFLICT,
            AppError::Payment(_) => StatusCode::BAD_REQUEST,
            AppError::Finalise(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Discount(_) => StatusCode::BAD_REQUEST,
            AppError::Catalogue(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Review(ReviewError::AlreadyReviewed) => StatusCode::CONFLICT,
            AppError::Review(ReviewError::InvalidRating) => StatusCode::BAD_REQUEST,
            AppError::Review(ReviewError::Database(_)) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            AppError::Validation(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();
        let body = json!({
            "error": self.code(),
            "message": self.to_string(),
        });
        (status, Json(body)).into_response()
    }
}
