//! `PaymentProvider` trait and implementations: a production client
//! (`NowPaymentsClient`, reqwest-based) plus a mock (`MockPaymentProvider`)
//! behind the `mock-payment-api` feature.

use std::time::Duration;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::Deserialize;

use super::error::PaymentError;

#[derive(Debug, Clone)]
pub struct Estimate {
    pub crypto_amount: Decimal,
    pub provider_minimum: Decimal,
}

#[derive(Debug, Clone)]
pub struct InvoiceDescriptor {
    pub payment_id: String,
    pub deposit_address: String,
    pub crypto_amount: Decimal,
    pub expiry_hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaymentStatus {
    Waiting,
    Finished,
    Confirmed,
    PartiallyPaid,
    Failed,
    Expired,
    Refunded,
    Other,
}

impl PaymentStatus {
    pub fn from_provider_str(s: &str) -> Self {
        match s {
            "finished" => PaymentStatus::Finished,
            "confirmed" => PaymentStatus::Confirmed,
            "partially_paid" => PaymentStatus::PartiallyPaid,
            "failed" => PaymentStatus::Failed,
            "expired" => PaymentStatus::Expired,
            "refunded" => PaymentStatus::Refunded,
            "waiting" | "confirming" | "sending" => PaymentStatus::Waiting,
            _ => PaymentStatus::Other,
        }
    }

    /// `finished | confirmed | partially_paid` with positive paid amount.
    pub fn is_settled_success(&self) -> bool {
        matches!(self, PaymentStatus::Finished | PaymentStatus::Confirmed | PaymentStatus::PartiallyPaid)
    }

    pub fn is_terminal_failure(&self) -> bool {
        matches!(self, PaymentStatus::Failed | PaymentStatus::Expired | PaymentStatus::Refunded)
    }
}

#[derive(Debug, Clone)]
pub struct StatusReport {
    pub status: PaymentStatus,
    pub actually_paid: Decimal,
    pub parent_payment_id: Option<String>,
}

#[async_trait]
pub trait PaymentProvider: Send + Sync {
    async fn estimate(&self, eur_amount: Decimal, crypto_currency: &str) -> Result<Estimate, PaymentError>;

    async fn create_invoice(
        &self,
        crypto_amount: Decimal,
        crypto_currency: &str,
        order_id: &str,
    ) -> Result<InvoiceDescriptor, PaymentError>;

    async fn status(&self, payment_id: &str) -> Result<StatusReport, PaymentError>;

    /// Real-time EUR-per-unit spot price for `crypto_currency`, used to
    /// convert `actually_paid` into a EUR equivalent. Implementations
    /// that cannot provide this return an error, and the orchestrator
    /// falls back to proportional computation.
    async fn spot_price_eur(&self, crypto_currency: &str) -> Result<Decimal, PaymentError>;
}

pub struct NowPaymentsClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl NowPaymentsClient {
    pub fn new(base_url: String, api_key: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(20))
            .build()
            .expect("reqwest client builds");
        Self { http, base_url, api_key }
    }

    fn map_transport_error(err: reqwest::Error) -> PaymentError {
        if err.is_timeout() {
            PaymentError::ApiTimeout
        } else {
            PaymentError::ApiRequestFailed(err.to_string())
        }
    }
}

#[derive(Deserialize)]
struct EstimateResponse {
    estimated_amount: Decimal,
    #[serde(default)]
    min_amount: Option<Decimal>,
}

#[derive(Deserialize)]
struct InvoiceResponse {
    payment_id: String,
    pay_address: String,
    pay_amount: Decimal,
    #[serde(default)]
    valid_until: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    payment_status: String,
    #[serde(default)]
    actually_paid: Option<Decimal>,
    #[serde(default)]
    parent_payment_id: Option<String>,
}

#[async_trait]
impl PaymentProvider for NowPaymentsClient {
    async fn estimate(&self, eur_amount: Decimal, crypto_currency: &str) -> Result<Estimate, PaymentError> {
        let url = format!(
            "{}/estimate?amount={eur_amount}&currency_from=eur&currency_to={crypto_currency}",
            self.base_url
        );
        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(PaymentError::ApiKeyInvalid);
        }
        if !response.status().is_success() {
            return Err(PaymentError::CurrencyNotSupported(crypto_currency.to_string()));
        }

        let body: EstimateResponse = response.json().await.map_err(Self::map_transport_error)?;
        Ok(Estimate {
            crypto_amount: body.estimated_amount,
            provider_minimum: body.min_amount.unwrap_or(Decimal::ZERO),
        })
    }

    async fn create_invoice(
        &self,
        crypto_amount: Decimal,
        crypto_currency: &str,
        order_id: &str,
    ) -> Result<InvoiceDescriptor, PaymentError> {
        let url = format!("{}/payment", self.base_url);
        let payload = serde_json::json!({
            "price_amount": crypto_amount,
            "price_currency": crypto_currency,
            "pay_currency": crypto_currency,
            "order_id": order_id,
        });

        let response = self
            .http
            .post(&url)
            .header("x-api-key", &self.api_key)
            .json(&payload)
            .timeout(Duration::from_secs(20))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        match response.status() {
            reqwest::StatusCode::UNAUTHORIZED => return Err(PaymentError::ApiKeyInvalid),
            status if status == reqwest::StatusCode::BAD_REQUEST => {
                return Err(PaymentError::AmountTooLow {
                    min_crypto: "0".to_string(),
                    min_eur: "0".to_string(),
                    currency: crypto_currency.to_string(),
                });
            }
            status if !status.is_success() => {
                return Err(PaymentError::ApiRequestFailed(format!("status {status}")));
            }
            _ => {}
        }

        let body: InvoiceResponse = response.json().await.map_err(Self::map_transport_error)?;
        Ok(InvoiceDescriptor {
            payment_id: body.payment_id,
            deposit_address: body.pay_address,
            crypto_amount: body.pay_amount,
            expiry_hint: body.valid_until,
        })
    }

    async fn status(&self, payment_id: &str) -> Result<StatusReport, PaymentError> {
        let url = format!("{}/payment/{payment_id}", self.base_url);
        let response = self
            .http
            .get(&url)
            .header("x-api-key", &self.api_key)
            .timeout(Duration::from_secs(15))
            .send()
            .await
            .map_err(Self::map_transport_error)?;

        if !response.status().is_success() {
            return Err(PaymentError::ApiRequestFailed(format!("status {}", response.status())));
        }

        let body: StatusResponse = response.json().await.map_err(Self::map_transport_error)?;
        Ok(StatusReport {
            status: PaymentStatus::from_provider_str(&body.payment_status),
            actually_paid: body.actually_paid.unwrap_or(Decimal::ZERO),
            parent_payment_id: body.parent_payment_id,
        })
    }

    async fn spot_price_eur(&self, crypto_currency: &str) -> Result<Decimal, PaymentError> {
        let estimate = self.estimate(Decimal::ONE, crypto_currency).await?;
        if estimate.crypto_amount.is_zero() {
            return Err(PaymentError::ApiRequestFailed("zero-amount estimate".to_string()));
        }
        Ok(Decimal::ONE / estimate.crypto_amount)
    }
}

/// In-process provider used under the `mock-payment-api` feature and in
/// tests, mirroring `funding::chain_adapter::MockEvmChain`.
#[cfg(feature = "mock-payment-api")]
pub struct MockPaymentProvider {
    pub fixed_rate_eur_per_unit: Decimal,
    pub minimum_crypto: Decimal,
}

#[cfg(feature = "mock-payment-api")]
impl Default for MockPaymentProvider {
    fn default() -> Self {
        Self {
            fixed_rate_eur_per_unit: Decimal::new(20000, 0),
            minimum_crypto: Decimal::new(1, 5),
        }
    }
}

#[cfg(feature = "mock-payment-api")]
#[async_trait]
impl PaymentProvider for MockPaymentProvider {
    async fn estimate(&self, eur_amount: Decimal, _crypto_currency: &str) -> Result<Estimate, PaymentError> {
        Ok(Estimate {
            crypto_amount: eur_amount / self.fixed_rate_eur_per_unit,
            provider_minimum: self.minimum_crypto,
        })
    }

    async fn create_invoice(
        &self,
        crypto_amount: Decimal,
        _crypto_currency: &str,
        order_id: &str,
    ) -> Result<InvoiceDescriptor, PaymentError> {
        Ok(InvoiceDescriptor {
            payment_id: format!("mock-{order_id}"),
            deposit_address: "mock-address".to_string(),
            crypto_amount,
            expiry_hint: None,
        })
    }

    async fn status(&self, _payment_id: &str) -> Result<StatusReport, PaymentError> {
        Ok(StatusReport {
            status: PaymentStatus::Waiting,
            actually_paid: Decimal::ZERO,
            parent_payment_id: None,
        })
    }

    async fn spot_price_eur(&self, _crypto_currency: &str) -> Result<Decimal, PaymentError> {
        Ok(self.fixed_rate_eur_per_unit)
    }
}
