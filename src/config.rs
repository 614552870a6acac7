//! Application configuration, loaded from a YAML file with environment
//! overrides for secrets, via a `serde_yaml` loader.

use std::env;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_path: String,
    #[serde(default)]
    pub bot_token: String,
    pub basket: BasketConfig,
    pub sweepers: SweeperConfig,
    pub media_group: MediaGroupConfig,
    pub payment: PaymentConfig,
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BasketConfig {
    #[serde(default = "BasketConfig::default_timeout_secs")]
    pub timeout_secs: u64,
}

impl BasketConfig {
    fn default_timeout_secs() -> u64 {
        15 * 60
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BasketConfig {
    fn default() -> Self {
        Self {
            timeout_secs: Self::default_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SweeperConfig {
    #[serde(default = "SweeperConfig::default_basket_interval")]
    pub basket_interval_secs: u64,
    #[serde(default = "SweeperConfig::default_pending_payment_interval")]
    pub pending_payment_interval_secs: u64,
    #[serde(default = "SweeperConfig::default_pending_payment_ttl")]
    pub pending_payment_ttl_secs: u64,
    #[serde(default = "SweeperConfig::default_abandoned_interval")]
    pub abandoned_reservation_interval_secs: u64,
    #[serde(default = "SweeperConfig::default_abandoned_grace")]
    pub abandoned_reservation_grace_secs: u64,
}

impl SweeperConfig {
    fn default_basket_interval() -> u64 {
        60
    }
    fn default_pending_payment_interval() -> u64 {
        10 * 60
    }
    fn default_pending_payment_ttl() -> u64 {
        2 * 60 * 60
    }
    fn default_abandoned_interval() -> u64 {
        3 * 60
    }
    fn default_abandoned_grace() -> u64 {
        20 * 60
    }

    pub fn basket_interval(&self) -> Duration {
        Duration::from_secs(self.basket_interval_secs)
    }
    pub fn pending_payment_interval(&self) -> Duration {
        Duration::from_secs(self.pending_payment_interval_secs)
    }
    pub fn pending_payment_ttl(&self) -> Duration {
        Duration::from_secs(self.pending_payment_ttl_secs)
    }
    pub fn abandoned_reservation_interval(&self) -> Duration {
        Duration::from_secs(self.abandoned_reservation_interval_secs)
    }
    pub fn abandoned_reservation_grace(&self) -> Duration {
        Duration::from_secs(self.abandoned_reservation_grace_secs)
    }
}

impl Default for SweeperConfig {
    fn default() -> Self {
        Self {
            basket_interval_secs: Self::default_basket_interval(),
            pending_payment_interval_secs: Self::default_pending_payment_interval(),
            pending_payment_ttl_secs: Self::default_pending_payment_ttl(),
            abandoned_reservation_interval_secs: Self::default_abandoned_interval(),
            abandoned_reservation_grace_secs: Self::default_abandoned_grace(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaGroupConfig {
    #[serde(default = "MediaGroupConfig::default_debounce_ms")]
    pub debounce_ms: u64,
}

impl MediaGroupConfig {
    fn default_debounce_ms() -> u64 {
        3_500
    }

    pub fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for MediaGroupConfig {
    fn default() -> Self {
        Self {
            debounce_ms: Self::default_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfig {
    #[serde(default)]
    pub api_key: String,
    #[serde(default)]
    pub ipn_secret: String,
    #[serde(default = "PaymentConfig::default_verify")]
    pub verify_webhook_signature: bool,
    #[serde(default = "PaymentConfig::default_base_url")]
    pub provider_base_url: String,
}

impl PaymentConfig {
    fn default_verify() -> bool {
        true
    }
    fn default_base_url() -> String {
        "https://api.nowpayments.io/v1".to_string()
    }
}

impl Default for PaymentConfig {
    fn default() -> Self {
        Self {
            api_key: String::new(),
            ipn_secret: String::new(),
            verify_webhook_signature: Self::default_verify(),
            provider_base_url: Self::default_base_url(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "LoggingConfig::default_dir")]
    pub dir: String,
    #[serde(default)]
    pub json: bool,
}

impl LoggingConfig {
    fn default_dir() -> String {
        "logs".to_string()
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            dir: Self::default_dir(),
            json: false,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: "chatshop.db".to_string(),
            bot_token: String::new(),
            basket: BasketConfig::default(),
            sweepers: SweeperConfig::default(),
            media_group: MediaGroupConfig::default(),
            payment: PaymentConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl AppConfig {
    /// Loads configuration from `path` if it exists, falling back to
    /// defaults otherwise, then applies secret overrides from the
    /// environment.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = std::fs::read_to_string(path)?;
            serde_yaml::from_str(&raw)?
        } else {
            AppConfig::default()
        };
        config.apply_env_overrides();
        Ok(config)
    }

    /// Loads from the path in `CHATSHOP_CONFIG`, defaulting to `config.yaml`.
    pub fn load_from_env() -> anyhow::Result<Self> {
        let path = env::var("CHATSHOP_CONFIG").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load(path)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("DATABASE_URL") {
            self.database_path = v;
        }
        if let Ok(v) = env::var("BOT_TOKEN") {
            self.bot_token = v;
        }
        if let Ok(v) = env::var("NOWPAYMENTS_API_KEY") {
            self.payment.api_key = v;
        }
        if let Ok(v) = env::var("IPN_SECRET") {
            self.payment.ipn_secret = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = AppConfig::default();
        assert_eq!(config.basket.timeout_secs, 900);
        assert_eq!(config.sweepers.basket_interval_secs, 60);
        assert_eq!(config.sweepers.pending_payment_interval_secs, 600);
        assert_eq!(config.sweepers.pending_payment_ttl_secs, 7_200);
        assert_eq!(config.sweepers.abandoned_reservation_interval_secs, 180);
        assert_eq!(config.media_group.debounce_ms, 3_500);
    }

    #[test]
    fn env_override_takes_precedence() {
        // SAFETY: test runs single-threaded w.r.t. this var via serial env access.
        unsafe {
            env::set_var("BOT_TOKEN", "overridden-token");
        }
        let mut config = AppConfig::default();
        config.apply_env_overrides();
        assert_eq!(config.bot_token, "overridden-token");
        unsafe {
            env::remove_var("BOT_TOKEN");
        }
    }
}
