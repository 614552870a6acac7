//! Payment Orchestrator error vocabulary. Generalises
//! `funding::error::TransferError`'s `thiserror` shape; the `failure_code`
//! method maps each variant onto the localised failure vocabulary named
//! in the external-interface contract.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("discount code is invalid or inactive")]
    DiscountInvalid,
    #[error("discount code total does not match the recomputed basket total")]
    DiscountMismatch,
    #[error("crypto amount {min_crypto} {currency} (approx. {min_eur} EUR) is below the provider minimum")]
    AmountTooLow {
        min_crypto: String,
        min_eur: String,
        currency: String,
    },
    #[error("currency {0} is not supported by the payment provider")]
    CurrencyNotSupported(String),
    #[error("payment provider rejected the configured API key")]
    ApiKeyInvalid,
    #[error("payment provider request timed out")]
    ApiTimeout,
    #[error("payment provider request failed: {0}")]
    ApiRequestFailed(String),
    #[error("pending payment record could not be written")]
    PendingRecordWriteFailed,
    #[error("basket is empty")]
    EmptyBasket,
    #[error("finalisation failed after payment was confirmed: {0}")]
    FinaliseFailed(String),
}

impl From<crate::discount::DiscountError> for PaymentError {
    fn from(err: crate::discount::DiscountError) -> Self {
        match err {
            crate::discount::DiscountError::Database(e) => PaymentError::Database(e),
            crate::discount::DiscountError::Invalid => PaymentError::DiscountInvalid,
            crate::discount::DiscountError::Mismatch => PaymentError::DiscountMismatch,
        }
    }
}

impl From<crate::inventory::InventoryError> for PaymentError {
    fn from(err: crate::inventory::InventoryError) -> Self {
        match err {
            crate::inventory::InventoryError::Database(e) => PaymentError::Database(e),
        }
    }
}

impl PaymentError {
    pub fn failure_code(&self) -> &'static str {
        match self {
            PaymentError::Database(_) => "api_unavailable",
            PaymentError::DiscountInvalid => "discount_code_invalid",
            PaymentError::DiscountMismatch => "discount_code_invalid",
            PaymentError::AmountTooLow { .. } => "amount_too_low",
            PaymentError::CurrencyNotSupported(_) => "currency_not_supported",
            PaymentError::ApiKeyInvalid => "api_unavailable",
            PaymentError::ApiTimeout => "api_unavailable",
            PaymentError::ApiRequestFailed(_) => "api_unavailable",
            PaymentError::PendingRecordWriteFailed => "api_unavailable",
            PaymentError::EmptyBasket => "validation_error",
            PaymentError::FinaliseFailed(_) => "internal_error",
        }
    }
}
