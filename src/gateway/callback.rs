//! Decodes the platform's `command|arg1|arg2|...` callback payload into
//! a closed sum type at the boundary, per the design note to keep the
//! wire format but stop passing raw strings past ingress.

use crate::models::ProductId;

#[derive(Debug, Clone, PartialEq)]
pub enum CallbackCommand {
    SelectCity { city: String },
    SelectDistrict { district: String },
    SelectProductType { product_type: String },
    AddToBasket { product_id: ProductId },
    RemoveFromBasket { product_id: ProductId },
    EnterDiscountCode,
    ConfirmPay,
    PayWithBalance,
    PayWithCrypto { currency: String },
    AdminDeleteProduct { product_id: ProductId },
    AdminBroadcast,
    Unknown { raw: String },
}

pub fn decode(raw: &str) -> CallbackCommand {
    let mut parts = raw.split('|');
    let Some(command) = parts.next() else {
        return CallbackCommand::Unknown { raw: raw.to_string() };
    };
    let args: Vec<&str> = parts.collect();

    match (command, args.as_slice()) {
        ("city", [city]) => CallbackCommand::SelectCity { city: city.to_string() },
        ("district", [district]) => CallbackCommand::SelectDistrict { district: district.to_string() },
        ("ptype", [product_type]) => CallbackCommand::SelectProductType { product_type: product_type.to_string() },
        ("add_basket", [id]) => id
            .parse()
            .map(|product_id| CallbackCommand::AddToBasket { product_id })
            .unwrap_or_else(|_| CallbackCommand::Unknown { raw: raw.to_string() }),
        ("remove_basket", [id]) => id
            .parse()
            .map(|product_id| CallbackCommand::RemoveFromBasket { product_id })
            .unwrap_or_else(|_| CallbackCommand::Unknown { raw: raw.to_string() }),
        ("enter_discount", []) => CallbackCommand::EnterDiscountCode,
        ("confirm_pay", []) => CallbackCommand::ConfirmPay,
        ("pay_balance", []) => CallbackCommand::PayWithBalance,
        ("pay_crypto", [currency]) => CallbackCommand::PayWithCrypto { currency: currency.to_string() },
        ("adm_delete_prod", [id]) => id
            .parse()
            .map(|product_id| CallbackCommand::AdminDeleteProduct { product_id })
            .unwrap_or_else(|_| CallbackCommand::Unknown { raw: raw.to_string() }),
        ("adm_broadcast", []) => CallbackCommand::AdminBroadcast,
        _ => CallbackCommand::Unknown { raw: raw.to_string() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decodes_known_vocabulary() {
        assert_eq!(decode("city|Berlin"), CallbackCommand::SelectCity { city: "Berlin".to_string() });
        assert_eq!(decode("confirm_pay"), CallbackCommand::ConfirmPay);
        assert_eq!(decode("adm_delete_prod|42"), CallbackCommand::AdminDeleteProduct { product_id: 42 });
    }

    #[test]
    fn falls_back_to_unknown_on_malformed_args() {
        assert_eq!(decode("add_basket|not-a-number"), CallbackCommand::Unknown { raw: "add_basket|not-a-number".to_string() });
        assert_eq!(decode("nonsense"), CallbackCommand::Unknown { raw: "nonsense".to_string() });
    }
}
