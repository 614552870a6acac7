//! Operator notification for invariant violations: a zero-row decrement
//! on a row we just held, failure to debit a balance we just confirmed,
//! failure to credit an over/underpayment. Logged at CRITICAL; the log
//! record is paired with a typed channel so a real deployment can
//! forward it out-of-band without
//! touching the call sites that raise it.

use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub enum OperatorAlert {
    /// The finaliser's transactional body failed after money had
    /// already moved (balance debited or a provider payment confirmed).
    FinaliseFailedAfterPayment { payment_id: Option<String>, user_id: i64, detail: String },
    /// A compensating credit/refund itself failed.
    CompensationFailed { user_id: i64, amount: String, detail: String },
    /// A product row was decremented to zero stock unexpectedly, or a
    /// snapshot item vanished mid-finalisation.
    InventoryInconsistency { product_id: i64, detail: String },
}

pub type AlertSender = mpsc::UnboundedSender<OperatorAlert>;
pub type AlertReceiver = mpsc::UnboundedReceiver<OperatorAlert>;

pub fn channel() -> (AlertSender, AlertReceiver) {
    mpsc::unbounded_channel()
}

/// Drains the channel, logging each alert at `error!`. A production
/// deployment would forward these to an out-of-band channel (email,
/// paging system); that delivery mechanism is outside this crate.
pub async fn run_alert_sink(mut receiver: AlertReceiver) {
    while let Some(alert) = receiver.recv().await {
        match &alert {
            OperatorAlert::FinaliseFailedAfterPayment { payment_id, user_id, detail } => {
                tracing::error!(target: "alert", payment_id = ?payment_id, user_id, detail, "finalisation failed after payment");
            }
            OperatorAlert::CompensationFailed { user_id, amount, detail } => {
                tracing::error!(target: "alert", user_id, amount, detail, "compensating credit/refund failed");
            }
            OperatorAlert::InventoryInconsistency { product_id, detail } => {
                tracing::error!(target: "alert", product_id, detail, "inventory inconsistency");
            }
        }
    }
}
