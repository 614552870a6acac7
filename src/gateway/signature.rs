//! HMAC verification for the two authenticated inbound surfaces: the
//! payment webhook (HMAC-SHA512 over the sorted-keys, separator-minimised
//! JSON body) and the browse UI's init-data blob (HMAC-SHA256 against the
//! bot token). Grounded on `api_auth::signature`'s verify-then-reject
//! shape, swapping Ed25519 for HMAC since there is no per-caller keypair
//! here, just a single shared secret.

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use sha2::Sha512;

type HmacSha512 = Hmac<Sha512>;
type HmacSha256 = Hmac<Sha256>;

/// Re-serialises `body` with keys sorted and no separators, matching the
/// canonical form the provider signs.
fn canonicalise(body: &Value) -> Option<String> {
    let Value::Object(map) = body else {
        return None;
    };
    let mut sorted: std::collections::BTreeMap<&String, &Value> = std::collections::BTreeMap::new();
    for (k, v) in map {
        sorted.insert(k, v);
    }
    let ordered: serde_json::Map<String, Value> =
        sorted.into_iter().map(|(k, v)| (k.clone(), v.clone())).collect();
    serde_json::to_string(&Value::Object(ordered)).ok()
}

/// Verifies the `x-*-sig` header against an HMAC-SHA512 of the
/// canonicalised body.
pub fn verify_webhook_signature(body: &Value, signature_hex: &str, secret: &str) -> bool {
    let Some(canonical) = canonicalise(body) else {
        return false;
    };
    let Ok(mut mac) = HmacSha512::new_from_slice(secret.as_bytes()) else {
        return false;
    };
    mac.update(canonical.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, signature_hex)
}

/// Verifies a platform init-data blob: a `key=value` pairs string
/// (URL-decoded) with a `hash` field removed before signing, HMAC-SHA256
/// over the remaining sorted `key=value` lines, keyed by the bot token.
pub fn verify_init_data(init_data: &str, bot_token: &str) -> bool {
    let mut pairs: Vec<(String, String)> = Vec::new();
    let mut provided_hash: Option<String> = None;

    for pair in init_data.split('&') {
        let Some((key, value)) = pair.split_once('=') else {
            continue;
        };
        let decoded = urlencoding_decode(value);
        if key == "hash" {
            provided_hash = Some(decoded);
        } else {
            pairs.push((key.to_string(), decoded));
        }
    }
    let Some(provided_hash) = provided_hash else {
        return false;
    };

    pairs.sort_by(|a, b| a.0.cmp(&b.0));
    let data_check_string = pairs
        .iter()
        .map(|(k, v)| format!("{k}={v}"))
        .collect::<Vec<_>>()
        .join("\n");

    let Ok(mut mac) = HmacSha256::new_from_slice(bot_token.as_bytes()) else {
        return false;
    };
    mac.update(data_check_string.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());
    constant_time_eq(&expected, &provided_hash)
}

fn urlencoding_decode(s: &str) -> String {
    let mut out = Vec::with_capacity(s.len());
    let bytes = s.as_bytes();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'%' if i + 2 < bytes.len() => {
                if let Ok(byte) = u8::from_str_radix(&s[i + 1..i + 3], 16) {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(bytes[i]);
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.bytes().zip(b.bytes()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn webhook_signature_round_trips() {
        let body = json!({"payment_id": "1", "payment_status": "finished"});
        let canonical = canonicalise(&body).unwrap();
        let mut mac = HmacSha512::new_from_slice(b"secret").unwrap();
        mac.update(canonical.as_bytes());
        let sig = hex::encode(mac.finalize().into_bytes());
        assert!(verify_webhook_signature(&body, &sig, "secret"));
        assert!(!verify_webhook_signature(&body, &sig, "wrong-secret"));
    }

    #[test]
    fn init_data_round_trips() {
        let mut mac = HmacSha256::new_from_slice(b"bot-token").unwrap();
        mac.update(b"user_id=42");
        let hash = hex::encode(mac.finalize().into_bytes());
        let blob = format!("user_id=42&hash={hash}");
        assert!(verify_init_data(&blob, "bot-token"));
        assert!(!verify_init_data(&blob, "other-token"));
    }
}
