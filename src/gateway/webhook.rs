//! Payment provider callback: `POST /webhook`. Always returns 200 on a
//! well-formed request, even when the business-level work is a no-op, so
//! the provider's retry policy doesn't hammer the log.

use std::sync::Arc;

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use rust_decimal::Decimal;
use serde_json::Value;

use crate::payment::{PaymentOrchestrator, PaymentStatus};

use super::signature::verify_webhook_signature;
use super::state::AppState;

fn required_str<'a>(body: &'a Value, field: &str) -> Option<&'a str> {
    body.get(field)?.as_str()
}

fn required_decimal(body: &Value, field: &str) -> Option<Decimal> {
    let value = body.get(field)?;
    if let Some(s) = value.as_str() {
        return s.parse().ok();
    }
    value.as_f64().and_then(|f| Decimal::try_from(f).ok())
}

pub async fn handle_payment_webhook(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: axum::body::Bytes,
) -> StatusCode {
    let Ok(json): Result<Value, _> = serde_json::from_slice(&body) else {
        return StatusCode::BAD_REQUEST;
    };

    if state.config.payment.verify_webhook_signature {
        let signature_header = headers
            .iter()
            .find(|(name, _)| name.as_str().starts_with("x-") && name.as_str().ends_with("-sig"))
            .and_then(|(_, value)| value.to_str().ok());

        let signed_ok = match signature_header {
            Some(sig) => verify_webhook_signature(&json, sig, &state.config.payment.ipn_secret),
            None => false,
        };
        if !signed_ok {
            tracing::warn!("rejected payment webhook with invalid or missing signature");
            return StatusCode::OK; // never give the provider a reason to retry a forged request
        }
    }

    let (Some(payment_id), Some(status_str), Some(_pay_currency), Some(actually_paid)) = (
        required_str(&json, "payment_id"),
        required_str(&json, "payment_status"),
        required_str(&json, "pay_currency"),
        required_decimal(&json, "actually_paid"),
    ) else {
        return StatusCode::BAD_REQUEST;
    };
    let parent_payment_id = required_str(&json, "parent_payment_id");

    let status = PaymentStatus::from_provider_str(status_str);
    let orchestrator = PaymentOrchestrator::new(&state.pool, state.provider.as_ref(), &state.alerts);

    match orchestrator
        .dispatch_status(payment_id, status, actually_paid, parent_payment_id, state.receipts.as_ref())
        .await
    {
        Ok(outcome) => tracing::info!(payment_id, ?outcome, "payment webhook processed"),
        Err(err) => tracing::error!(payment_id, %err, "payment webhook processing failed"),
    }

    StatusCode::OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_decimal_parses_string_and_number() {
        let body = json!({"actually_paid": "1.5"});
        assert_eq!(required_decimal(&body, "actually_paid"), Some(Decimal::new(15, 1)));
        let body = json!({"actually_paid": 2});
        assert_eq!(required_decimal(&body, "actually_paid"), Some(Decimal::from(2)));
    }
}
