//! Outbound messaging with bounded retry: a send-with-backoff loop over
//! the platform's rate-limit contract. On `RetryAfter(n)` sleep `n+1`
//! seconds and retry once; on `Unauthorized` or a persistent
//! `BadRequest`, drop and log.

use async_trait::async_trait;
use std::time::Duration;

use crate::models::{MediaDescriptor, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    Delivered,
    Dropped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendAttemptError {
    RetryAfter(u64),
    Unauthorized,
    BadRequest,
    Transport,
}

/// Abstracts the messaging-platform send call so the retry policy can be
/// exercised without a live bot token.
#[async_trait]
pub trait PlatformTransport: Send + Sync {
    async fn send_text(&self, user_id: UserId, text: &str) -> Result<(), SendAttemptError>;
    async fn send_media(&self, user_id: UserId, media: &[MediaDescriptor]) -> Result<(), SendAttemptError>;
}

#[async_trait]
pub trait OutboundSender: Send + Sync {
    async fn send_text(&self, user_id: UserId, text: &str) -> SendOutcome;
    async fn send_media(&self, user_id: UserId, media: &[MediaDescriptor]) -> SendOutcome;
}

pub struct RetryingSender<T: PlatformTransport> {
    transport: T,
}

impl<T: PlatformTransport> RetryingSender<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    async fn classify(&self, result: Result<(), SendAttemptError>, retried: bool) -> Option<SendOutcome> {
        match result {
            Ok(()) => Some(SendOutcome::Delivered),
            Err(SendAttemptError::RetryAfter(seconds)) if !retried => {
                tokio::time::sleep(Duration::from_secs(seconds + 1)).await;
                None
            }
            Err(err) => {
                tracing::warn!(?err, "outbound send dropped");
                Some(SendOutcome::Dropped)
            }
        }
    }
}

#[async_trait]
impl<T: PlatformTransport> OutboundSender for RetryingSender<T> {
    async fn send_text(&self, user_id: UserId, text: &str) -> SendOutcome {
        let first = self.transport.send_text(user_id, text).await;
        if let Some(outcome) = self.classify(first, false).await {
            return outcome;
        }
        let second = self.transport.send_text(user_id, text).await;
        self.classify(second, true).await.unwrap_or(SendOutcome::Dropped)
    }

    async fn send_media(&self, user_id: UserId, media: &[MediaDescriptor]) -> SendOutcome {
        let first = self.transport.send_media(user_id, media).await;
        if let Some(outcome) = self.classify(first, false).await {
            return outcome;
        }
        let second = self.transport.send_media(user_id, media).await;
        self.classify(second, true).await.unwrap_or(SendOutcome::Dropped)
    }
}

#[async_trait]
impl OutboundSender for std::sync::Arc<dyn OutboundSender> {
    async fn send_text(&self, user_id: UserId, text: &str) -> SendOutcome {
        (**self).send_text(user_id, text).await
    }
    async fn send_media(&self, user_id: UserId, media: &[MediaDescriptor]) -> SendOutcome {
        (**self).send_media(user_id, media).await
    }
}

/// Logging-only transport for environments with no live bot token
/// configured (tests, local runs).
pub struct LoggingTransport;

#[async_trait]
impl PlatformTransport for LoggingTransport {
    async fn send_text(&self, user_id: UserId, text: &str) -> Result<(), SendAttemptError> {
        tracing::info!(user_id, len = text.len(), "outbound text (logging transport)");
        Ok(())
    }

    async fn send_media(&self, user_id: UserId, media: &[MediaDescriptor]) -> Result<(), SendAttemptError> {
        tracing::info!(user_id, count = media.len(), "outbound media (logging transport)");
        Ok(())
    }
}

/// Adapts an [`OutboundSender`] into the core's [`ReceiptSink`] so the
/// Purchase Finaliser can deliver receipts without knowing about the
/// transport.
pub struct OutboundReceiptSink<S: OutboundSender> {
    sender: S,
}

impl<S: OutboundSender> OutboundReceiptSink<S> {
    pub fn new(sender: S) -> Self {
        Self { sender }
    }
}

#[async_trait]
impl<S: OutboundSender> crate::purchase::ReceiptSink for OutboundReceiptSink<S> {
    async fn deliver_media(&self, user_id: UserId, media: &[MediaDescriptor]) {
        self.sender.send_media(user_id, media).await;
    }

    async fn deliver_text(&self, user_id: UserId, text: &str) {
        self.sender.send_text(user_id, text).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyOnceTransport {
        calls: AtomicU32,
    }

    #[async_trait]
    impl PlatformTransport for FlakyOnceTransport {
        async fn send_text(&self, _user_id: UserId, _text: &str) -> Result<(), SendAttemptError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(SendAttemptError::RetryAfter(0))
            } else {
                Ok(())
            }
        }
        async fn send_media(&self, _user_id: UserId, _media: &[MediaDescriptor]) -> Result<(), SendAttemptError> {
            Ok(())
        }
    }

    struct AlwaysUnauthorized;

    #[async_trait]
    impl PlatformTransport for AlwaysUnauthorized {
        async fn send_text(&self, _user_id: UserId, _text: &str) -> Result<(), SendAttemptError> {
            Err(SendAttemptError::Unauthorized)
        }
        async fn send_media(&self, _user_id: UserId, _media: &[MediaDescriptor]) -> Result<(), SendAttemptError> {
            Err(SendAttemptError::Unauthorized)
        }
    }

    #[tokio::test]
    async fn retries_once_after_rate_limit_then_succeeds() {
        let sender = RetryingSender::new(FlakyOnceTransport { calls: AtomicU32::new(0) });
        let outcome = sender.send_text(1, "hi").await;
        assert_eq!(outcome, SendOutcome::Delivered);
    }

    #[tokio::test]
    async fn drops_on_unauthorized_without_retry() {
        let sender = RetryingSender::new(AlwaysUnauthorized);
        let outcome = sender.send_text(1, "hi").await;
        assert_eq!(outcome, SendOutcome::Dropped);
    }
}
