//! Shared gateway state, generalising `gateway::state::AppState`'s
//! clone-on-extract `Arc` bundle.

use std::collections::HashMap;
use std::sync::Arc;

use sqlx::SqlitePool;
use tokio::sync::Mutex;

use crate::alert::AlertSender;
use crate::catalogue::CatalogueCache;
use crate::config::AppConfig;
use crate::media_group::MediaGroupCollector;
use crate::models::{ConversationState, UserId};
use crate::payment::PaymentProvider;
use crate::purchase::ReceiptSink;

use super::outbound::OutboundSender;

#[derive(Clone)]
pub struct AppState {
    pub pool: SqlitePool,
    pub config: Arc<AppConfig>,
    pub catalogue: Arc<CatalogueCache>,
    pub provider: Arc<dyn PaymentProvider>,
    pub alerts: AlertSender,
    pub receipts: Arc<dyn ReceiptSink>,
    pub outbound: Arc<dyn OutboundSender>,
    pub media_groups: Arc<MediaGroupCollector>,
    /// Per-user dialog state. Owned by the gateway (never the
    /// sweepers); a crash drops in-flight dialogs back to `Idle`.
    conversations: Arc<Mutex<HashMap<UserId, ConversationState>>>,
    /// Discount code applied to a user's basket via `EnterDiscountCode`,
    /// carried forward to the checkout callbacks. Cleared on any checkout
    /// attempt; a crash drops it the same way a conversation drops to
    /// `Idle`.
    applied_discount_codes: Arc<Mutex<HashMap<UserId, String>>>,
}

impl AppState {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        pool: SqlitePool,
        config: Arc<AppConfig>,
        catalogue: Arc<CatalogueCache>,
        provider: Arc<dyn PaymentProvider>,
        alerts: AlertSender,
        receipts: Arc<dyn ReceiptSink>,
        outbound: Arc<dyn OutboundSender>,
        media_groups: Arc<MediaGroupCollector>,
    ) -> Self {
        Self {
            pool,
            config,
            catalogue,
            provider,
            alerts,
            receipts,
            outbound,
            media_groups,
            conversations: Arc::new(Mutex::new(HashMap::new())),
            applied_discount_codes: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub async fn conversation_state(&self, user_id: UserId) -> ConversationState {
        self.conversations.lock().await.get(&user_id).cloned().unwrap_or_default()
    }

    pub async fn set_conversation_state(&self, user_id: UserId, state: ConversationState) {
        if state == ConversationState::Idle {
            self.conversations.lock().await.remove(&user_id);
        } else {
            self.conversations.lock().await.insert(user_id, state);
        }
    }

    pub async fn applied_discount_code(&self, user_id: UserId) -> Option<String> {
        self.applied_discount_codes.lock().await.get(&user_id).cloned()
    }

    pub async fn set_applied_discount_code(&self, user_id: UserId, code: Option<String>) {
        match code {
            Some(code) => {
                self.applied_discount_codes.lock().await.insert(user_id, code);
            }
            None => {
                self.applied_discount_codes.lock().await.remove(&user_id);
            }
        }
    }
}
