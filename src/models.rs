//! Shared domain types. Generalises `account::models`'s status-enum and
//! struct-with-helper-methods idiom to this domain's entities.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

pub type UserId = i64;
pub type ProductId = i64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    pub id: UserId,
    pub language: String,
    pub balance: Decimal,
    pub lifetime_purchases: i64,
    pub is_reseller: bool,
    pub is_banned: bool,
}

impl User {
    pub fn can_transact(&self) -> bool {
        !self.is_banned
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaKind {
    Photo,
    Video,
    Animation,
}

impl MediaKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MediaKind::Photo => "photo",
            MediaKind::Video => "video",
            MediaKind::Animation => "animation",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "photo" => Some(MediaKind::Photo),
            "video" => Some(MediaKind::Video),
            "animation" => Some(MediaKind::Animation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MediaDescriptor {
    pub kind: MediaKind,
    pub file_path: String,
    pub provider_file_handle: Option<String>,
}

/// A single sellable unit. `available` and `reserved` are modelled as
/// `bool` here; the storage layer persists them as `INTEGER` 0/1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProductRow {
    pub id: ProductId,
    pub city: String,
    pub district: String,
    pub product_type: String,
    pub size: String,
    pub unit_price: Decimal,
    pub description: String,
    pub media: Vec<MediaDescriptor>,
    pub available: bool,
    pub reserved: bool,
}

/// A single line of a basket, captured at reservation time and kept
/// self-contained so a pending payment can be finalised after the live
/// product row is deleted or mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketItemSnapshot {
    pub product_id: ProductId,
    pub original_price: Decimal,
    pub product_type: String,
    pub city: String,
    pub district: String,
    pub size: String,
    pub name: String,
    pub original_text: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BasketHoldView {
    pub user_id: UserId,
    pub product: ProductRow,
    pub inserted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DiscountKind {
    Percentage,
    FixedEur,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiscountCode {
    pub code: String,
    pub kind: DiscountKind,
    pub value: Decimal,
    pub max_uses: Option<i64>,
    pub uses_count: i64,
    pub expires_at: Option<DateTime<Utc>>,
    pub active: bool,
}

impl DiscountCode {
    pub fn is_usable(&self, now: DateTime<Utc>) -> bool {
        if !self.active {
            return false;
        }
        if let Some(expiry) = self.expires_at {
            if now >= expiry {
                return false;
            }
        }
        if let Some(max) = self.max_uses {
            if self.uses_count >= max {
                return false;
            }
        }
        true
    }

    /// Applies this code to `subtotal`, clamped to zero.
    pub fn apply(&self, subtotal: Decimal) -> Decimal {
        let discounted = match self.kind {
            DiscountKind::Percentage => subtotal * (Decimal::ONE - self.value / Decimal::ONE_HUNDRED),
            DiscountKind::FixedEur => subtotal - self.value,
        };
        discounted.max(Decimal::ZERO)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResellerDiscountRule {
    pub reseller_user_id: UserId,
    pub product_type: String,
    pub percentage: Decimal,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurchaseRecord {
    pub id: i64,
    pub user_id: UserId,
    pub product_id: ProductId,
    pub product_type: String,
    pub city: String,
    pub district: String,
    pub size: String,
    pub name: String,
    pub paid_price: Decimal,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdminActionLog {
    pub id: i64,
    pub admin_user_id: UserId,
    pub action: String,
    pub detail: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PendingPaymentKind {
    Purchase,
    Refill,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingPayment {
    pub provider_payment_id: String,
    pub user_id: UserId,
    pub target_eur: Decimal,
    pub expected_crypto_amount: Decimal,
    pub crypto_currency: String,
    pub created_at: DateTime<Utc>,
    pub kind: PendingPaymentKind,
    pub basket_snapshot: Option<Vec<BasketItemSnapshot>>,
    pub discount_code: Option<String>,
}

/// Per-user conversation state, owned by the gateway. Never persisted;
/// a crash simply drops in-flight multi-step dialogs back to `Idle`.
#[derive(Debug, Clone, PartialEq)]
pub enum ConversationState {
    Idle,
    AwaitingDiscountCode {
        pending_total: Decimal,
    },
    AwaitingCustomAmount,
    AwaitingAdminProductDetails {
        city: String,
        district: String,
        product_type: String,
        size: String,
    },
    AwaitingAdminProductMedia {
        city: String,
        district: String,
        product_type: String,
        size: String,
        price: Decimal,
        description: String,
    },
    AwaitingAdminBroadcastText,
}

impl Default for ConversationState {
    fn default() -> Self {
        ConversationState::Idle
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn percentage_discount_applies_correctly() {
        let code = DiscountCode {
            code: "X10".into(),
            kind: DiscountKind::Percentage,
            value: Decimal::TEN,
            max_uses: Some(1),
            uses_count: 0,
            expires_at: None,
            active: true,
        };
        assert_eq!(code.apply(Decimal::from(20)), Decimal::from(18));
    }

    #[test]
    fn usable_respects_cap_and_expiry() {
        let mut code = DiscountCode {
            code: "X10".into(),
            kind: DiscountKind::Percentage,
            value: Decimal::TEN,
            max_uses: Some(1),
            uses_count: 1,
            expires_at: None,
            active: true,
        };
        assert!(!code.is_usable(Utc::now()));
        code.uses_count = 0;
        assert!(code.is_usable(Utc::now()));
    }
}
