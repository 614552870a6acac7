//! Payment Orchestrator: invoice creation, callback dispatch, manual
//! status probe. Flow grounded on `original_source/payment.py` and
//! `original_source/main.py`'s webhook handler; the `PaymentProvider`
//! trait object is grounded on `funding::chain_adapter::ChainClient`.

pub mod error;
pub mod provider;
pub mod repository;

use chrono::Utc;
use rust_decimal::Decimal;
use sqlx::SqlitePool;
use uuid::Uuid;

pub use error::PaymentError;
pub use provider::{PaymentProvider, PaymentStatus};
pub use repository::PendingPaymentRepository;

use crate::alert::{AlertSender, OperatorAlert};
use crate::discount::DiscountRepository;
use crate::inventory::InventoryEngine;
use crate::models::{BasketItemSnapshot, PendingPayment, PendingPaymentKind, UserId};
use crate::pricing;
use crate::purchase::{PurchaseFinaliser, ReceiptSink};
use crate::user::UserRepository;

fn discount_tolerance() -> Decimal {
    Decimal::new(1, 2) // 0.01
}

#[derive(Debug, Clone)]
pub struct InvoiceDescriptor {
    pub payment_id: String,
    pub deposit_address: String,
    pub crypto_amount: Decimal,
    pub expiry_hint: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackOutcome {
    /// No matching pending payment: already processed, spurious, or a
    /// child-payment notification. Idempotent no-op.
    Ignored,
    PurchaseDelivered { overpaid_credit: Option<Decimal> },
    PurchaseUnderpaid { credited: Decimal },
    RefillCredited { amount: Decimal },
    PaymentFailedOrExpired,
}

pub struct PaymentOrchestrator<'a> {
    pool: &'a SqlitePool,
    provider: &'a dyn PaymentProvider,
    alerts: &'a AlertSender,
}

impl<'a> PaymentOrchestrator<'a> {
    pub fn new(pool: &'a SqlitePool, provider: &'a dyn PaymentProvider, alerts: &'a AlertSender) -> Self {
        Self { pool, provider, alerts }
    }

    /// D.1 create invoice.
    pub async fn create_invoice(
        &self,
        user_id: UserId,
        final_eur_amount: Decimal,
        crypto_currency: &str,
        is_purchase: bool,
        basket_snapshot: Option<Vec<BasketItemSnapshot>>,
        discount_code: Option<String>,
    ) -> Result<InvoiceDescriptor, PaymentError> {
        if is_purchase && basket_snapshot.as_ref().is_none_or(|s| s.is_empty()) {
            return Err(PaymentError::EmptyBasket);
        }

        // Step 1: re-validate the discount code against a freshly
        // recomputed total, preventing a TOCTOU gap between preview and
        // checkout.
        if let Some(code) = &discount_code {
            let discount = DiscountRepository::get(self.pool, code)
                .await?
                .filter(|d| d.is_usable(Utc::now()))
                .ok_or(PaymentError::DiscountInvalid)?;

            if let Some(snapshot) = &basket_snapshot {
                let (_, recomputed_total) =
                    pricing::compute_priced_items(self.pool, user_id, snapshot, Some(&discount)).await?;
                if (recomputed_total - final_eur_amount).abs() > discount_tolerance() {
                    return Err(PaymentError::DiscountMismatch);
                }
            }
        }

        // Step 2: estimate, reject if below provider minimum.
        let estimate = self.provider.estimate(final_eur_amount, crypto_currency).await?;
        if estimate.crypto_amount < estimate.provider_minimum {
            let spot = self.provider.spot_price_eur(crypto_currency).await.unwrap_or(Decimal::ZERO);
            return Err(PaymentError::AmountTooLow {
                min_crypto: estimate.provider_minimum.to_string(),
                min_eur: (estimate.provider_minimum * spot).to_string(),
                currency: crypto_currency.to_string(),
            });
        }

        // Step 3: request the invoice.
        let order_id = Uuid::new_v4().to_string();
        let invoice = self
            .provider
            .create_invoice(estimate.crypto_amount, crypto_currency, &order_id)
            .await?;

        // Step 4: record the pending payment. If this fails, the caller
        // must not see success.
        let pending = PendingPayment {
            provider_payment_id: invoice.payment_id.clone(),
            user_id,
            target_eur: final_eur_amount,
            expected_crypto_amount: invoice.crypto_amount,
            crypto_currency: crypto_currency.to_string(),
            created_at: Utc::now(),
            kind: if is_purchase { PendingPaymentKind::Purchase } else { PendingPaymentKind::Refill },
            basket_snapshot,
            discount_code,
        };
        PendingPaymentRepository::insert(self.pool, &pending)
            .await
            .map_err(|_| PaymentError::PendingRecordWriteFailed)?;

        Ok(InvoiceDescriptor {
            payment_id: invoice.payment_id,
            deposit_address: invoice.deposit_address,
            crypto_amount: invoice.crypto_amount,
            expiry_hint: invoice.expiry_hint,
        })
    }

    /// D.2 receive callback / D.3 manual probe (same dispatch, gated by
    /// "pending record absent ⇒ no-op" for idempotency).
    pub async fn dispatch_status(
        &self,
        payment_id: &str,
        status: PaymentStatus,
        actually_paid: Decimal,
        parent_payment_id: Option<&str>,
        receipts: &dyn ReceiptSink,
    ) -> Result<CallbackOutcome, PaymentError> {
        if parent_payment_id.is_some() {
            return Ok(CallbackOutcome::Ignored);
        }

        let Some(pending) = PendingPaymentRepository::get(self.pool, payment_id).await? else {
            return Ok(CallbackOutcome::Ignored);
        };

        if status.is_terminal_failure() {
            if pending.kind == PendingPaymentKind::Purchase {
                if let Some(snapshot) = &pending.basket_snapshot {
                    let ids: Vec<_> = snapshot.iter().map(|i| i.product_id).collect();
                    InventoryEngine::release_products(self.pool, &ids).await?;
                }
            }
            PendingPaymentRepository::remove(self.pool, payment_id).await?;
            return Ok(CallbackOutcome::PaymentFailedOrExpired);
        }

        if !status.is_settled_success() || actually_paid <= Decimal::ZERO {
            return Ok(CallbackOutcome::Ignored);
        }

        let paid_eur = match self.provider.spot_price_eur(&pending.crypto_currency).await {
            Ok(spot) => actually_paid * spot,
            Err(_) => {
                if pending.expected_crypto_amount.is_zero() {
                    Decimal::ZERO
                } else {
                    actually_paid / pending.expected_crypto_amount * pending.target_eur
                }
            }
        };

        match pending.kind {
            PendingPaymentKind::Refill => {
                if UserRepository::credit_balance(self.pool, pending.user_id, paid_eur).await.is_err() {
                    // Do not remove the pending record: money moved, credit
                    // didn't land.
                    self.alerts
                        .send(OperatorAlert::CompensationFailed {
                            user_id: pending.user_id,
                            amount: paid_eur.to_string(),
                            detail: "refill credit failed".to_string(),
                        })
                        .ok();
                    return Ok(CallbackOutcome::Ignored);
                }
                PendingPaymentRepository::remove(self.pool, payment_id).await?;
                Ok(CallbackOutcome::RefillCredited { amount: paid_eur })
            }
            PendingPaymentKind::Purchase => {
                let snapshot = pending.basket_snapshot.clone().unwrap_or_default();

                if actually_paid >= pending.expected_crypto_amount {
                    let outcome = PurchaseFinaliser::finalize(
                        self.pool,
                        self.alerts,
                        receipts,
                        pending.user_id,
                        &snapshot,
                        pending.discount_code.as_deref(),
                    )
                    .await;

                    match outcome {
                        Ok(result) => {
                            let overage = (paid_eur - pending.target_eur).max(Decimal::ZERO);
                            let overpaid_credit = if overage > Decimal::ZERO {
                                UserRepository::credit_balance(self.pool, pending.user_id, overage).await.ok();
                                Some(overage)
                            } else {
                                None
                            };
                            let _ = result;
                            PendingPaymentRepository::remove(self.pool, payment_id).await?;
                            Ok(CallbackOutcome::PurchaseDelivered { overpaid_credit })
                        }
                        Err(err) => {
                            self.alerts
                                .send(OperatorAlert::FinaliseFailedAfterPayment {
                                    payment_id: Some(payment_id.to_string()),
                                    user_id: pending.user_id,
                                    detail: err.to_string(),
                                })
                                .ok();
                            // Do not remove the pending record: inventory
                            // hasn't moved even though money has.
                            Err(PaymentError::FinaliseFailed(err.to_string()))
                        }
                    }
                } else {
                    // Underpayment: release reserved items, credit the
                    // EUR equivalent, notify, remove the pending record.
                    let ids: Vec<_> = snapshot.iter().map(|i| i.product_id).collect();
                    InventoryEngine::release_products(self.pool, &ids).await?;
                    UserRepository::credit_balance(self.pool, pending.user_id, paid_eur).await.ok();
                    PendingPaymentRepository::remove(self.pool, payment_id).await?;
                    Ok(CallbackOutcome::PurchaseUnderpaid { credited: paid_eur })
                }
            }
        }
    }

    pub async fn manual_probe(
        &self,
        payment_id: &str,
        receipts: &dyn ReceiptSink,
    ) -> Result<CallbackOutcome, PaymentError> {
        let report = self.provider.status(payment_id).await?;
        self.dispatch_status(
            payment_id,
            report.status,
            report.actually_paid,
            report.parent_payment_id.as_deref(),
            receipts,
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalogue::ProductRepository;
    use crate::db::Database;
    use crate::inventory::InventoryEngine;
    use crate::payment::provider::MockPaymentProvider;
    use crate::purchase::LoggingReceiptSink;
    use crate::user::UserRepository;

    async fn setup(db: &Database) -> i64 {
        UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        ProductRepository::insert(db.pool(), "Berlin", "Mitte", "widget", "M", Decimal::new(1250, 2), "d", &[])
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn exact_payment_delivers_purchase_and_removes_product() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = setup(&db).await;
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        let provider = MockPaymentProvider::default();
        let (alerts, _rx) = crate::alert::channel();
        let orchestrator = PaymentOrchestrator::new(db.pool(), &provider, &alerts);

        let invoice = orchestrator
            .create_invoice(1, Decimal::new(1250, 2), "btc", true, Some(snapshot), None)
            .await
            .unwrap();

        let outcome = orchestrator
            .dispatch_status(&invoice.payment_id, PaymentStatus::Finished, invoice.crypto_amount, None, &LoggingReceiptSink)
            .await
            .unwrap();

        assert!(matches!(outcome, CallbackOutcome::PurchaseDelivered { overpaid_credit: None }));
        assert!(ProductRepository::get(db.pool(), product_id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn overpayment_credits_the_difference_to_balance() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = setup(&db).await;
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        let provider = MockPaymentProvider::default();
        let (alerts, _rx) = crate::alert::channel();
        let orchestrator = PaymentOrchestrator::new(db.pool(), &provider, &alerts);

        let invoice = orchestrator
            .create_invoice(1, Decimal::new(1250, 2), "btc", true, Some(snapshot), None)
            .await
            .unwrap();

        let overpaid = invoice.crypto_amount * Decimal::new(105, 2);
        let outcome = orchestrator
            .dispatch_status(&invoice.payment_id, PaymentStatus::Finished, overpaid, None, &LoggingReceiptSink)
            .await
            .unwrap();

        match outcome {
            CallbackOutcome::PurchaseDelivered { overpaid_credit } => assert!(overpaid_credit.is_some()),
            other => panic!("unexpected outcome {other:?}"),
        }
        let user = UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        assert!(user.balance > Decimal::ZERO);
    }

    #[tokio::test]
    async fn underpayment_releases_reservation_and_credits_partial_amount() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = setup(&db).await;
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        let provider = MockPaymentProvider::default();
        let (alerts, _rx) = crate::alert::channel();
        let orchestrator = PaymentOrchestrator::new(db.pool(), &provider, &alerts);

        let invoice = orchestrator
            .create_invoice(1, Decimal::new(1250, 2), "btc", true, Some(snapshot), None)
            .await
            .unwrap();

        let underpaid = invoice.crypto_amount * Decimal::new(50, 2);
        let outcome = orchestrator
            .dispatch_status(&invoice.payment_id, PaymentStatus::Finished, underpaid, None, &LoggingReceiptSink)
            .await
            .unwrap();

        assert!(matches!(outcome, CallbackOutcome::PurchaseUnderpaid { .. }));
        let product = ProductRepository::get(db.pool(), product_id).await.unwrap().unwrap();
        assert!(!product.reserved);
        let user = UserRepository::get_or_create(db.pool(), 1).await.unwrap();
        assert!(user.balance > Decimal::ZERO);
    }

    #[tokio::test]
    async fn idempotent_replay_is_a_noop() {
        let db = Database::connect(":memory:").await.unwrap();
        let product_id = setup(&db).await;
        InventoryEngine::reserve(db.pool(), 1, product_id).await.unwrap();
        let basket = InventoryEngine::snapshot_basket(db.pool(), 1).await.unwrap();
        let snapshot = InventoryEngine::basket_to_snapshot(&basket);

        let provider = MockPaymentProvider::default();
        let (alerts, _rx) = crate::alert::channel();
        let orchestrator = PaymentOrchestrator::new(db.pool(), &provider, &alerts);

        let invoice = orchestrator
            .create_invoice(1, Decimal::new(1250, 2), "btc", true, Some(snapshot), None)
            .await
            .unwrap();

        orchestrator
            .dispatch_status(&invoice.payment_id, PaymentStatus::Finished, invoice.crypto_amount, None, &LoggingReceiptSink)
            .await
            .unwrap();

        let replay = orchestrator
            .dispatch_status(&invoice.payment_id, PaymentStatus::Finished, invoice.crypto_amount, None, &LoggingReceiptSink)
            .await
            .unwrap();
        assert_eq!(replay, CallbackOutcome::Ignored);
    }

    #[tokio::test]
    async fn child_payment_is_ignored() {
        let db = Database::connect(":memory:").await.unwrap();
        setup(&db).await;
        let provider = MockPaymentProvider::default();
        let (alerts, _rx) = crate::alert::channel();
        let orchestrator = PaymentOrchestrator::new(db.pool(), &provider, &alerts);

        let outcome = orchestrator
            .dispatch_status("child-1", PaymentStatus::Finished, Decimal::ONE, Some("parent-1"), &LoggingReceiptSink)
            .await
            .unwrap();
        assert_eq!(outcome, CallbackOutcome::Ignored);
    }
}
