//! The embedded HTTP browse UI's JSON surface under `/api/*`. Every
//! handler here authenticates the caller via the init-data blob in the
//! `x-init-data` header before touching the database, using an HMAC
//! signature rather than a per-request Ed25519 signature.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::catalogue::ProductRepository;
use crate::discount::DiscountRepository;
use crate::inventory::{InventoryEngine, ReleaseOutcome, ReserveOutcome};
use crate::models::{BasketItemSnapshot, ProductId, UserId};
use crate::payment::PaymentOrchestrator;
use crate::pricing;
use crate::purchase::LoggingReceiptSink;
use crate::review::ReviewRepository;
use crate::user::UserRepository;

use super::signature::verify_init_data;
use super::state::AppState;

/// Extracted from `x-init-data` once verified; the user id is the only
/// claim the rest of this module trusts.
pub struct AuthenticatedUser {
    pub user_id: UserId,
}

pub fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<AuthenticatedUser, StatusCode> {
    let init_data = headers
        .get("x-init-data")
        .and_then(|v| v.to_str().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    if !verify_init_data(init_data, &state.config.bot_token) {
        return Err(StatusCode::UNAUTHORIZED);
    }

    let user_id = init_data
        .split('&')
        .find_map(|pair| pair.strip_prefix("user_id="))
        .and_then(|v| v.parse::<UserId>().ok())
        .ok_or(StatusCode::UNAUTHORIZED)?;

    Ok(AuthenticatedUser { user_id })
}

#[derive(Serialize)]
pub struct ProfileResponse {
    pub user_id: UserId,
    pub balance: Decimal,
    pub language: String,
    pub lifetime_purchases: i64,
    pub is_reseller: bool,
}

pub async fn get_profile(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<ProfileResponse>, StatusCode> {
    let auth = authenticate(&state, &headers)?;
    let user = UserRepository::get_or_create(&state.pool, auth.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(ProfileResponse {
        user_id: user.id,
        balance: user.balance,
        language: user.language,
        lifetime_purchases: user.lifetime_purchases,
        is_reseller: user.is_reseller,
    }))
}

pub async fn get_catalogue(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<crate::catalogue::CatalogueSnapshot>, StatusCode> {
    authenticate(&state, &headers)?;
    Ok(Json((*state.catalogue.current().await).clone()))
}

#[derive(Deserialize)]
pub struct ListProductsQuery {
    pub city: String,
    pub district: String,
}

pub async fn list_products(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Query(params): Query<ListProductsQuery>,
) -> Result<Json<Vec<crate::models::ProductRow>>, StatusCode> {
    authenticate(&state, &headers)?;
    let products = ProductRepository::list_browsable(&state.pool, &params.city, &params.district)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(products))
}

#[derive(Serialize)]
pub struct BasketMutationResponse {
    pub ok: bool,
    pub reason: Option<&'static str>,
}

pub async fn add_to_basket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<ProductId>,
) -> Result<Json<BasketMutationResponse>, StatusCode> {
    let auth = authenticate(&state, &headers)?;
    let outcome = InventoryEngine::reserve(&state.pool, auth.user_id, product_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(match outcome {
        ReserveOutcome::Reserved => BasketMutationResponse { ok: true, reason: None },
        ReserveOutcome::AlreadyReserved => BasketMutationResponse { ok: false, reason: Some("already_reserved") },
        ReserveOutcome::NotAvailable => BasketMutationResponse { ok: false, reason: Some("not_available") },
    }))
}

pub async fn remove_from_basket(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(product_id): Path<ProductId>,
) -> Result<Json<BasketMutationResponse>, StatusCode> {
    let auth = authenticate(&state, &headers)?;
    let outcome = InventoryEngine::release(&state.pool, auth.user_id, product_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(match outcome {
        ReleaseOutcome::Released => BasketMutationResponse { ok: true, reason: None },
        ReleaseOutcome::NotHeldByUser => BasketMutationResponse { ok: false, reason: Some("not_held_by_user") },
    }))
}

#[derive(Serialize)]
pub struct BasketView {
    pub items: Vec<crate::models::ProductRow>,
    pub total: Decimal,
}

pub async fn get_basket(State(state): State<Arc<AppState>>, headers: HeaderMap) -> Result<Json<BasketView>, StatusCode> {
    let auth = authenticate(&state, &headers)?;
    let holds = InventoryEngine::snapshot_basket(&state.pool, auth.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let snapshot: Vec<BasketItemSnapshot> = InventoryEngine::basket_to_snapshot(&holds);
    let (_, total) = pricing::compute_priced_items(&state.pool, auth.user_id, &snapshot, None)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    Ok(Json(BasketView { items: holds.into_iter().map(|h| h.product).collect(), total }))
}

#[derive(Deserialize)]
pub struct CreateInvoiceRequest {
    pub crypto_currency: String,
    pub discount_code: Option<String>,
}

#[derive(Serialize)]
pub struct InvoiceResponse {
    pub payment_id: String,
    pub deposit_address: String,
    pub crypto_amount: Decimal,
    pub expiry_hint: Option<String>,
}

pub async fn create_invoice(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<CreateInvoiceRequest>,
) -> Result<Json<InvoiceResponse>, StatusCode> {
    let auth = authenticate(&state, &headers)?;
    let holds = InventoryEngine::snapshot_basket(&state.pool, auth.user_id)
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;
    let snapshot = InventoryEngine::basket_to_snapshot(&holds);
    if snapshot.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }
    let discount = match &request.discount_code {
        Some(code) => DiscountRepository::get(&state.pool, code)
            .await
            .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
            .filter(|d| d.is_usable(chrono::Utc::now())),
        None => None,
    };
    // The orchestrator re-derives this same total from the snapshot and
    // rejects on mismatch, so it must already reflect the discount code.
    let (_, total) = pricing::compute_priced_items(&state.pool, auth.user_id, &snapshot, discount.as_ref())
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    let orchestrator = PaymentOrchestrator::new(&state.pool, state.provider.as_ref(), &state.alerts);
    let invoice = orchestrator
        .create_invoice(auth.user_id, total, &request.crypto_currency, true, Some(snapshot), request.discount_code)
        .await
        .map_err(|_| StatusCode::BAD_REQUEST)?;

    Ok(Json(InvoiceResponse {
        payment_id: invoice.payment_id,
        deposit_address: invoice.deposit_address,
        crypto_amount: invoice.crypto_amount,
        expiry_hint: invoice.expiry_hint,
    }))
}

#[derive(Serialize)]
pub struct ProbeResponse {
    pub outcome: String,
}

pub async fn probe_payment(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Path(payment_id): Path<String>,
) -> Result<Json<ProbeResponse>, StatusCode> {
    authenticate(&state, &headers)?;
    let orchestrator = PaymentOrchestrator::new(&state.pool, state.provider.as_ref(), &state.alerts);
    let outcome = orchestrator
        .manual_probe(&payment_id, &LoggingReceiptSink)
        .await
        .map_err(|_| StatusCode::BAD_GATEWAY)?;
    Ok(Json(ProbeResponse { outcome: format!("{outcome:?}") }))
}

#[derive(Deserialize)]
pub struct SubmitReviewRequest {
    pub purchase_record_id: i64,
    pub rating: i64,
    pub text: String,
}

pub async fn submit_review(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    Json(request): Json<SubmitReviewRequest>,
) -> Result<StatusCode, StatusCode> {
    let auth = authenticate(&state, &headers)?;
    ReviewRepository::submit(&state.pool, request.purchase_record_id, auth.user_id, request.rating, &request.text)
        .await
        .map_err(|err| match err {
            crate::review::ReviewError::InvalidRating => StatusCode::BAD_REQUEST,
            crate::review::ReviewError::AlreadyReviewed => StatusCode::CONFLICT,
            crate::review::ReviewError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
        })?;
    Ok(StatusCode::CREATED)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alert;
    use crate::db::Database;
    use crate::gateway::outbound::LoggingTransport;
    use crate::gateway::outbound::{OutboundReceiptSink, OutboundSender, RetryingSender};
    use crate::media_group::MediaGroupCollector;
    use crate::payment::provider::MockPaymentProvider;
    use hmac::{Hmac, Mac};
    use sha2::Sha256;
    use std::time::Duration;

    async fn test_state(bot_token: &str) -> Arc<AppState> {
        let db = Database::connect(":memory:").await.unwrap();
        let mut config = crate::config::AppConfig::default();
        config.bot_token = bot_token.to_string();
        let config = Arc::new(config);
        let catalogue = Arc::new(crate::catalogue::CatalogueCache::new());
        let provider: Arc<dyn crate::payment::PaymentProvider> = Arc::new(MockPaymentProvider::default());
        let (alerts, _rx) = alert::channel();
        let sender = Arc::new(RetryingSender::new(LoggingTransport));
        let outbound: Arc<dyn OutboundSender> = sender.clone();
        let receipts = Arc::new(OutboundReceiptSink::new(sender as Arc<dyn OutboundSender>));
        let (flush_tx, _flush_rx) = tokio::sync::mpsc::unbounded_channel();
        let media_groups = Arc::new(MediaGroupCollector::new(Duration::from_secs(1), flush_tx));

        Arc::new(AppState::new(db.pool().clone(), config, catalogue, provider, alerts, receipts, outbound, media_groups))
    }

    fn signed_init_data(user_id: UserId, bot_token: &str) -> String {
        let body = format!("user_id={user_id}");
        let mut mac = Hmac::<Sha256>::new_from_slice(bot_token.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        let hash = hex::encode(mac.finalize().into_bytes());
        format!("{body}&hash={hash}")
    }

    #[tokio::test]
    async fn authenticate_rejects_missing_header() {
        let state = test_state("bot-token").await;
        let headers = HeaderMap::new();
        assert_eq!(authenticate(&state, &headers).err(), Some(StatusCode::UNAUTHORIZED));
    }

    #[tokio::test]
    async fn authenticate_accepts_a_correctly_signed_blob() {
        let state = test_state("bot-token").await;
        let mut headers = HeaderMap::new();
        headers.insert("x-init-data", signed_init_data(42, "bot-token").parse().unwrap());
        let auth = authenticate(&state, &headers).unwrap();
        assert_eq!(auth.user_id, 42);
    }

    #[tokio::test]
    async fn authenticate_rejects_a_tampered_blob() {
        let state = test_state("bot-token").await;
        let mut headers = HeaderMap::new();
        headers.insert("x-init-data", signed_init_data(42, "wrong-token").parse().unwrap());
        assert_eq!(authenticate(&state, &headers).err(), Some(StatusCode::UNAUTHORIZED));
    }
}
