//! HTTP surface: the platform update webhook (bot-token secret path),
//! the payment provider callback, and the embedded browse UI's `/api/*`
//! JSON endpoints.

pub mod admin;
pub mod api;
pub mod callback;
pub mod outbound;
pub mod platform;
pub mod signature;
pub mod state;
pub mod webhook;

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde::Deserialize;
use tokio::net::TcpListener;

use crate::models::{MediaKind, UserId};
use state::AppState;

#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InboundUpdate {
    Text {
        user_id: UserId,
        text: String,
    },
    Callback {
        user_id: UserId,
        raw: String,
    },
    Media {
        user_id: UserId,
        group_id: String,
        kind: String,
        file_handle: String,
        caption: Option<String>,
    },
}

/// Ingress for platform updates. The path segment carrying the bot token
/// is the only authentication: a mismatch is treated as an unknown
/// route rather than surfacing which part of the URL was wrong.
async fn platform_webhook(
    State(state): State<Arc<AppState>>,
    Path(token): Path<String>,
    Json(update): Json<InboundUpdate>,
) -> StatusCode {
    if token != state.config.bot_token || state.config.bot_token.is_empty() {
        return StatusCode::NOT_FOUND;
    }

    let result = match update {
        InboundUpdate::Text { user_id, text } => {
            platform::handle_text(&state, platform::IncomingText { user_id, text }).await
        }
        InboundUpdate::Callback { user_id, raw } => {
            platform::handle_callback(&state, platform::IncomingCallback { user_id, raw }).await
        }
        InboundUpdate::Media { user_id, group_id, kind, file_handle, caption } => {
            let Some(kind) = MediaKind::from_str(&kind) else {
                return StatusCode::BAD_REQUEST;
            };
            platform::handle_media_part(
                &state,
                platform::IncomingMediaPart {
                    user_id,
                    group_id,
                    part: crate::media_group::MediaPart { kind, file_handle },
                    caption,
                },
            )
            .await;
            Ok(())
        }
    };

    match result {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::error!(%err, "platform update handling failed");
            StatusCode::OK // ingress never causes the platform to retry an update
        }
    }
}

fn api_router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/profile", get(api::get_profile))
        .route("/catalogue", get(api::get_catalogue))
        .route("/products", get(api::list_products))
        .route("/basket", get(api::get_basket))
        .route("/basket/{product_id}", post(api::add_to_basket))
        .route("/basket/{product_id}", delete(api::remove_from_basket))
        .route("/invoice", post(api::create_invoice))
        .route("/payment/{payment_id}/probe", get(api::probe_payment))
        .route("/review", post(api::submit_review))
}

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/webhook", post(webhook::handle_payment_webhook))
        .route("/bot/{token}", post(platform_webhook))
        .nest("/api", api_router())
        .with_state(state)
}

/// Binds and serves, exiting the process on a startup failure: there is
/// no meaningful recovery from an unbindable listen address.
pub async fn run_server(state: Arc<AppState>, addr: &str) {
    let app = build_router(state);

    let listener = match TcpListener::bind(addr).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(addr, %err, "failed to bind gateway listener");
            std::process::exit(1);
        }
    };

    tracing::info!(addr, "gateway listening");
    if let Err(err) = axum::serve(listener, app).await {
        tracing::error!(%err, "gateway server error");
        std::process::exit(1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inbound_update_deserialises_by_tag() {
        let text: InboundUpdate = serde_json::from_str(r#"{"type":"text","user_id":1,"text":"hi"}"#).unwrap();
        assert!(matches!(text, InboundUpdate::Text { user_id: 1, .. }));

        let callback: InboundUpdate = serde_json::from_str(r#"{"type":"callback","user_id":2,"raw":"confirm_pay"}"#).unwrap();
        assert!(matches!(callback, InboundUpdate::Callback { user_id: 2, .. }));
    }
}
