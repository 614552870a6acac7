//! Process entry point: load configuration, bootstrap storage and
//! logging, wire the provider/transport implementations, spawn the
//! sweepers and the alert sink, then hand off to the gateway.

use std::sync::Arc;

use chatshop::alert;
use chatshop::catalogue::CatalogueCache;
use chatshop::config::AppConfig;
use chatshop::db::Database;
use chatshop::gateway::outbound::{LoggingTransport, OutboundReceiptSink, OutboundSender, RetryingSender};
use chatshop::gateway::platform::spawn_media_flush_consumer;
use chatshop::gateway::state::AppState;
use chatshop::logging;
use chatshop::media_group::MediaGroupCollector;
use chatshop::payment::PaymentProvider;
use chatshop::sweepers::{LoggingNotifier, Sweepers};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = Arc::new(AppConfig::load_from_env()?);
    let _log_guard = logging::init_logging(&config.logging)?;

    tracing::info!("starting chatshop");

    let db = Database::connect(&config.database_path).await?;
    let pool = db.pool().clone();

    let (alerts, alert_rx) = alert::channel();
    tokio::spawn(alert::run_alert_sink(alert_rx));

    let catalogue = Arc::new(CatalogueCache::new());
    catalogue.refresh(&pool).await?;

    let provider: Arc<dyn PaymentProvider> = build_provider(&config);

    let sender = Arc::new(RetryingSender::new(LoggingTransport));
    let outbound: Arc<dyn OutboundSender> = sender.clone();
    let receipts = Arc::new(OutboundReceiptSink::new(sender as Arc<dyn OutboundSender>));

    let (flush_tx, flush_rx) = tokio::sync::mpsc::unbounded_channel();
    let media_groups = Arc::new(MediaGroupCollector::new(config.media_group.debounce(), flush_tx));

    let state = Arc::new(AppState::new(
        pool.clone(),
        config.clone(),
        catalogue,
        provider,
        alerts,
        receipts,
        outbound,
        media_groups,
    ));

    let _media_flush_consumer = spawn_media_flush_consumer(state.clone(), flush_rx);

    let _sweepers = Sweepers::spawn(pool, config.sweepers.clone(), Arc::new(LoggingNotifier));

    let bind_addr = std::env::var("CHATSHOP_BIND").unwrap_or_else(|_| "0.0.0.0:8080".to_string());
    chatshop::gateway::run_server(state, &bind_addr).await;

    Ok(())
}

fn build_provider(config: &AppConfig) -> Arc<dyn PaymentProvider> {
    #[cfg(feature = "mock-payment-api")]
    if config.payment.api_key.is_empty() {
        tracing::warn!("no NowPayments API key configured; using the mock payment provider");
        return Arc::new(chatshop::payment::provider::MockPaymentProvider::default());
    }

    Arc::new(chatshop::payment::provider::NowPaymentsClient::new(
        config.payment.provider_base_url.clone(),
        config.payment.api_key.clone(),
    ))
}
