//! Shared basket pricing. Used both by the Payment Orchestrator (to
//! re-validate a discount code against the live catalogue before
//! creating an invoice, preventing TOCTOU) and by the Purchase Finaliser
//! (to compute the per-item paid price actually recorded).

use rust_decimal::Decimal;
use sqlx::SqlitePool;

use crate::discount::{DiscountError, ResellerDiscountRepository};
use crate::models::{BasketItemSnapshot, DiscountCode, DiscountKind, UserId};

/// Applies a reseller's per-product-type percentage discount to one item.
pub fn reseller_adjusted_price(original: Decimal, reseller_percentage: Decimal) -> Decimal {
    let price = original * (Decimal::ONE - reseller_percentage / Decimal::ONE_HUNDRED);
    price.max(Decimal::ZERO)
}

/// Applies a discount code to a single item's price. Percentage codes
/// apply their ratio per item (equivalent to applying it to the total);
/// fixed-EUR codes split their value evenly across the basket so the sum
/// of item prices still equals the discounted total.
pub fn apply_code_to_item(price: Decimal, code: &DiscountCode, item_count: usize) -> Decimal {
    match code.kind {
        DiscountKind::Percentage => code.apply(price),
        DiscountKind::FixedEur => {
            let share = code.value / Decimal::from(item_count.max(1));
            (price - share).max(Decimal::ZERO)
        }
    }
}

/// Recomputes each item's paid price from scratch: the live reseller
/// discount rule for `user_id` plus the discount code, if any. Returns
/// `(per_item_prices, total)`.
pub async fn compute_priced_items(
    pool: &SqlitePool,
    user_id: UserId,
    snapshot: &[BasketItemSnapshot],
    discount_code: Option<&DiscountCode>,
) -> Result<(Vec<Decimal>, Decimal), DiscountError> {
    let mut prices = Vec::with_capacity(snapshot.len());
    for item in snapshot {
        let reseller_pct = ResellerDiscountRepository::get_percentage(pool, user_id, &item.product_type).await?;
        let mut price = reseller_adjusted_price(item.original_price, reseller_pct);
        if let Some(code) = discount_code {
            price = apply_code_to_item(price, code, snapshot.len());
        }
        prices.push(price);
    }
    let total = prices.iter().fold(Decimal::ZERO, |acc, p| acc + p);
    Ok((prices, total))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reseller_discount_reduces_price() {
        let price = reseller_adjusted_price(Decimal::from(10), Decimal::from(20));
        assert_eq!(price, Decimal::from(8));
    }

    #[test]
    fn percentage_code_splits_evenly_across_basket() {
        let code = DiscountCode {
            code: "X10".into(),
            kind: DiscountKind::Percentage,
            value: Decimal::TEN,
            max_uses: Some(1),
            uses_count: 0,
            expires_at: None,
            active: true,
        };
        let price = apply_code_to_item(Decimal::from(10), &code, 2);
        assert_eq!(price, Decimal::from(9));
    }
}
