//! Boundary adapter for the messaging-platform side of the bot: accepts
//! already-decoded inbound events (text, one media part, a button press)
//! and calls straight through to the core modules. Menu rendering,
//! localisation, and admin dialog UIs live in the external collaborator
//! that produces these events; this module only owns the parts of the
//! flow that touch inventory, pricing, or payment state.

use std::sync::Arc;

use rust_decimal::Decimal;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::catalogue::ProductRepository;
use crate::discount::DiscountRepository;
use crate::inventory::{InventoryEngine, ReleaseOutcome, ReserveOutcome};
use crate::media_group::{CollectedSubmission, MediaPart};
use crate::models::{ConversationState, MediaDescriptor, ProductId, UserId};
use crate::payment::PaymentOrchestrator;
use crate::pricing;
use crate::purchase::{CheckoutError, PurchaseFinaliser};

use super::admin::AdminActionLogRepository;
use super::callback::{self, CallbackCommand};
use super::outbound::OutboundSender;
use super::state::AppState;

pub struct IncomingText {
    pub user_id: UserId,
    pub text: String,
}

pub struct IncomingMediaPart {
    pub user_id: UserId,
    pub group_id: String,
    pub part: MediaPart,
    pub caption: Option<String>,
}

pub struct IncomingCallback {
    pub user_id: UserId,
    pub raw: String,
}

async fn basket_total(state: &AppState, user_id: UserId) -> Result<(Vec<crate::models::BasketItemSnapshot>, Decimal), crate::AppError> {
    let basket = InventoryEngine::snapshot_basket(&state.pool, user_id).await?;
    let snapshot = InventoryEngine::basket_to_snapshot(&basket);
    let (_, total) = pricing::compute_priced_items(&state.pool, user_id, &snapshot, None).await?;
    Ok((snapshot, total))
}

/// Basket snapshot and total with whatever discount code the user
/// applied via `EnterDiscountCode` still in effect, the same pairing
/// `PaymentOrchestrator::create_invoice` re-derives at the payment
/// boundary. Returns `None` for the code if it was applied but is no
/// longer usable (expired, or its cap was reached in the meantime), so
/// checkout callers never pass a stale code downstream.
async fn priced_basket(
    state: &AppState,
    user_id: UserId,
) -> Result<(Vec<crate::models::BasketItemSnapshot>, Option<String>, Decimal), crate::AppError> {
    let basket = InventoryEngine::snapshot_basket(&state.pool, user_id).await?;
    let snapshot = InventoryEngine::basket_to_snapshot(&basket);

    let applied_code = state.applied_discount_code(user_id).await;
    let discount = match &applied_code {
        Some(code) => DiscountRepository::get(&state.pool, code)
            .await?
            .filter(|d| d.is_usable(chrono::Utc::now())),
        None => None,
    };

    let (_, total) = pricing::compute_priced_items(&state.pool, user_id, &snapshot, discount.as_ref()).await?;
    let code = if discount.is_some() { applied_code } else { None };
    Ok((snapshot, code, total))
}

pub async fn handle_callback(state: &AppState, incoming: IncomingCallback) -> Result<(), crate::AppError> {
    let user_id = incoming.user_id;
    let command = callback::decode(&incoming.raw);

    match command {
        CallbackCommand::SelectCity { .. } | CallbackCommand::SelectDistrict { .. } | CallbackCommand::SelectProductType { .. } => {
            // Browsing is rendered by the external UI from the catalogue
            // snapshot directly; nothing for the core to do here.
        }

        CallbackCommand::AddToBasket { product_id } => {
            let outcome = InventoryEngine::reserve(&state.pool, user_id, product_id).await?;
            let text = match outcome {
                ReserveOutcome::Reserved => "added to basket",
                ReserveOutcome::AlreadyReserved => "item is already held by another buyer",
                ReserveOutcome::NotAvailable => "item is no longer available",
            };
            state.outbound.send_text(user_id, text).await;
        }

        CallbackCommand::RemoveFromBasket { product_id } => {
            let outcome = InventoryEngine::release(&state.pool, user_id, product_id).await?;
            let text = match outcome {
                ReleaseOutcome::Released => "removed from basket",
                ReleaseOutcome::NotHeldByUser => "item was not in your basket",
            };
            state.outbound.send_text(user_id, text).await;
        }

        CallbackCommand::EnterDiscountCode => {
            let (_, pending_total) = basket_total(state, user_id).await?;
            state.set_conversation_state(user_id, ConversationState::AwaitingDiscountCode { pending_total }).await;
            state.outbound.send_text(user_id, "send your discount code").await;
        }

        CallbackCommand::ConfirmPay => {
            let (_, _, total) = priced_basket(state, user_id).await?;
            state.outbound.send_text(user_id, &format!("total due: {total} EUR")).await;
        }

        CallbackCommand::PayWithBalance => {
            let (snapshot, discount_code, total) = priced_basket(state, user_id).await?;
            if snapshot.is_empty() {
                state.outbound.send_text(user_id, "your basket is empty").await;
                return Ok(());
            }
            state.set_applied_discount_code(user_id, None).await;
            match PurchaseFinaliser::checkout_with_balance(
                &state.pool,
                &state.alerts,
                state.receipts.as_ref(),
                user_id,
                &snapshot,
                discount_code.as_deref(),
                total,
            )
            .await
            {
                Ok(outcome) => {
                    state
                        .outbound
                        .send_text(user_id, &format!("purchase complete: {} item(s)", outcome.fulfilled_product_ids.len()))
                        .await;
                }
                Err(CheckoutError::InsufficientBalance) => {
                    state.outbound.send_text(user_id, "insufficient balance").await;
                }
                Err(CheckoutError::Finalise(err)) => return Err(crate::AppError::Finalise(err)),
            }
        }

        CallbackCommand::PayWithCrypto { currency } => {
            let (snapshot, discount_code, total) = priced_basket(state, user_id).await?;
            if snapshot.is_empty() {
                state.outbound.send_text(user_id, "your basket is empty").await;
                return Ok(());
            }
            state.set_applied_discount_code(user_id, None).await;
            let orchestrator = PaymentOrchestrator::new(&state.pool, state.provider.as_ref(), &state.alerts);
            match orchestrator.create_invoice(user_id, total, &currency, true, Some(snapshot), discount_code).await {
                Ok(invoice) => {
                    state
                        .outbound
                        .send_text(user_id, &format!("send {} {} to {}", invoice.crypto_amount, currency, invoice.deposit_address))
                        .await;
                }
                Err(err) => {
                    state.outbound.send_text(user_id, err.failure_code()).await;
                }
            }
        }

        CallbackCommand::AdminDeleteProduct { product_id } => {
            ProductRepository::delete(&state.pool, product_id).await?;
            state.catalogue.refresh(&state.pool).await?;
            AdminActionLogRepository::record(&state.pool, user_id, "delete_product", &product_id.to_string()).await?;
            state.outbound.send_text(user_id, "product deleted").await;
        }

        CallbackCommand::AdminBroadcast => {
            state.set_conversation_state(user_id, ConversationState::AwaitingAdminBroadcastText).await;
            state.outbound.send_text(user_id, "send the broadcast text").await;
        }

        CallbackCommand::Unknown { raw } => {
            tracing::warn!(user_id, raw, "unrecognised callback payload");
        }
    }

    Ok(())
}

pub async fn handle_text(state: &AppState, incoming: IncomingText) -> Result<(), crate::AppError> {
    let user_id = incoming.user_id;
    let text = incoming.text.trim().to_string();
    let conversation = state.conversation_state(user_id).await;

    match conversation {
        ConversationState::AwaitingDiscountCode { pending_total } => {
            state.set_conversation_state(user_id, ConversationState::Idle).await;
            match DiscountRepository::get(&state.pool, &text).await? {
                Some(discount) if discount.is_usable(chrono::Utc::now()) => {
                    let basket = InventoryEngine::snapshot_basket(&state.pool, user_id).await?;
                    let snapshot = InventoryEngine::basket_to_snapshot(&basket);
                    let (_, discounted_total) =
                        pricing::compute_priced_items(&state.pool, user_id, &snapshot, Some(&discount)).await?;
                    state.set_applied_discount_code(user_id, Some(text.clone())).await;
                    state
                        .outbound
                        .send_text(user_id, &format!("code applied: {pending_total} -> {discounted_total} EUR"))
                        .await;
                }
                _ => {
                    state.outbound.send_text(user_id, "invalid or expired discount code").await;
                }
            }
        }

        ConversationState::AwaitingCustomAmount => {
            state.set_conversation_state(user_id, ConversationState::Idle).await;
            match text.parse::<Decimal>() {
                Ok(amount) if amount > Decimal::ZERO => {
                    state.outbound.send_text(user_id, &format!("top-up of {amount} EUR noted, choose a currency")).await;
                }
                _ => {
                    state.outbound.send_text(user_id, "enter a positive amount").await;
                }
            }
        }

        ConversationState::AwaitingAdminProductDetails { city, district, product_type, size } => {
            let Some((price_str, description)) = text.split_once('|') else {
                state.outbound.send_text(user_id, "format: price|description").await;
                return Ok(());
            };
            let Ok(price) = price_str.trim().parse::<Decimal>() else {
                state.outbound.send_text(user_id, "price must be a number").await;
                return Ok(());
            };
            state
                .set_conversation_state(
                    user_id,
                    ConversationState::AwaitingAdminProductMedia {
                        city,
                        district,
                        product_type,
                        size,
                        price,
                        description: description.trim().to_string(),
                    },
                )
                .await;
            state.outbound.send_text(user_id, "send product media now").await;
        }

        ConversationState::AwaitingAdminProductMedia { .. } => {
            state.outbound.send_text(user_id, "waiting for media, not text").await;
        }

        ConversationState::AwaitingAdminBroadcastText => {
            state.set_conversation_state(user_id, ConversationState::Idle).await;
            AdminActionLogRepository::record(&state.pool, user_id, "broadcast", &text).await?;
            state.outbound.send_text(user_id, "broadcast queued").await;
        }

        ConversationState::Idle => {
            // No open dialog: free-form text outside a flow is ignored at
            // this boundary, handled instead by the external menu router.
        }
    }

    Ok(())
}

pub async fn handle_media_part(state: &AppState, incoming: IncomingMediaPart) {
    state
        .media_groups
        .on_part(incoming.user_id, incoming.group_id, incoming.part, incoming.caption)
        .await;
}

/// Drains flushed media-group submissions and, when the submitting user
/// is mid-admin-product-creation, inserts the finished product row.
pub fn spawn_media_flush_consumer(
    state: Arc<AppState>,
    mut rx: mpsc::UnboundedReceiver<(UserId, CollectedSubmission)>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        while let Some((user_id, submission)) = rx.recv().await {
            if let Err(err) = handle_flushed_submission(&state, user_id, submission).await {
                tracing::error!(user_id, %err, "failed to finish admin product creation from media group");
            }
        }
    })
}

async fn handle_flushed_submission(
    state: &AppState,
    user_id: UserId,
    submission: CollectedSubmission,
) -> Result<(), crate::AppError> {
    let ConversationState::AwaitingAdminProductMedia { city, district, product_type, size, price, description } =
        state.conversation_state(user_id).await
    else {
        return Ok(());
    };

    let media: Vec<MediaDescriptor> = submission
        .parts
        .into_iter()
        .map(|part| MediaDescriptor {
            kind: part.kind,
            file_path: part.file_handle.clone(),
            provider_file_handle: Some(part.file_handle),
        })
        .collect();

    let product_id: ProductId =
        ProductRepository::insert(&state.pool, &city, &district, &product_type, &size, price, &description, &media).await?;
    state.catalogue.refresh(&state.pool).await?;
    state.set_conversation_state(user_id, ConversationState::Idle).await;
    AdminActionLogRepository::record(&state.pool, user_id, "create_product", &product_id.to_string()).await?;
    state.outbound.send_text(user_id, "product listed").await;
    Ok(())
}
