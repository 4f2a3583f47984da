use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

/// Main configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub stream: StreamConfig,
    pub polling: PollingConfig,
    pub logs: LogWatchConfig,
    pub actors: ActorConfig,
    pub database: DatabaseConfig,
    #[serde(default)]
    pub pushover: PushoverConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Streaming ingester (exchange trade feed) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StreamConfig {
    /// WebSocket endpoint for the trade feed
    pub ws_url: String,
    /// REST info endpoint used for instrument universe discovery
    pub info_url: String,
    /// Notional threshold (USD) above which a trade is a whale event
    pub whale_threshold_usd: Decimal,
    /// Heartbeat probe interval in milliseconds
    #[serde(default = "default_heartbeat_ms")]
    pub heartbeat_interval_ms: u64,
    /// Base reconnect delay in milliseconds
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    /// Reconnect delay ceiling in milliseconds
    #[serde(default = "default_backoff_cap_ms")]
    pub backoff_cap_ms: u64,
    /// Universe refresh interval in seconds
    #[serde(default = "default_universe_refresh_secs")]
    pub universe_refresh_secs: u64,
    /// Instruments subscribed at startup, before the first universe refresh
    #[serde(default)]
    pub seed_instruments: Vec<String>,
}

fn default_heartbeat_ms() -> u64 {
    30_000
}

fn default_backoff_base_ms() -> u64 {
    1_000
}

fn default_backoff_cap_ms() -> u64 {
    30_000
}

fn default_universe_refresh_secs() -> u64 {
    3_600
}

/// Polling ingester (REST transaction history) configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Base URL of the transaction-history API
    pub api_url: String,
    /// Optional API key sent as a request header
    #[serde(default)]
    pub api_key: Option<String>,
    /// Treasury address whose transfers are tracked
    pub treasury_address: String,
    /// Token contract address to filter by
    pub contract_address: String,
    /// Minimum transfer amount (display units) to alert on
    pub min_amount: Decimal,
    /// Poll interval in seconds
    #[serde(default = "default_poll_interval_secs")]
    pub poll_interval_secs: u64,
    /// Page size for each fetch
    #[serde(default = "default_poll_page_size")]
    pub page_size: u32,
}

fn default_poll_interval_secs() -> u64 {
    10
}

fn default_poll_page_size() -> u32 {
    50
}

/// Log-subscription ingester configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogWatchConfig {
    /// WebSocket JSON-RPC endpoint of the node provider
    pub ws_url: String,
    /// Token contract address emitting the transfer events
    pub contract_address: String,
    /// Treasury address whose transfers are tracked
    pub treasury_address: String,
    /// Fixed decimal precision of the token amount
    #[serde(default = "default_token_decimals")]
    pub token_decimals: u32,
    /// Minimum transfer amount (display units) to alert on
    pub min_amount: Decimal,
    /// Disable the ingester entirely (e.g. no provider key available)
    #[serde(default)]
    pub disabled: bool,
}

fn default_token_decimals() -> u32 {
    6
}

/// Known-actor directory configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ActorConfig {
    /// Ranking service endpoint returning known trader addresses
    pub api_url: String,
    /// Refresh interval in seconds
    #[serde(default = "default_actor_refresh_secs")]
    pub refresh_interval_secs: u64,
}

fn default_actor_refresh_secs() -> u64 {
    600
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// PostgreSQL connection URL
    pub url: String,
    /// Maximum connections in pool
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

/// Push notification credentials; when absent alerts are log-only
#[derive(Debug, Clone, Deserialize, Default)]
pub struct PushoverConfig {
    #[serde(default)]
    pub user_key: Option<String>,
    #[serde(default)]
    pub api_token: Option<String>,
}

impl PushoverConfig {
    pub fn is_configured(&self) -> bool {
        self.user_key.is_some() && self.api_token.is_some()
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Enable JSON formatted logs
    #[serde(default)]
    pub json: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl AppConfig {
    /// Load configuration from files and environment
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from("config")
    }

    /// Load configuration from a specific directory
    pub fn load_from<P: AsRef<Path>>(config_dir: P) -> Result<Self, ConfigError> {
        let config_dir = config_dir.as_ref();

        let builder = Config::builder()
            // Start with default values
            .set_default("logging.level", "info")?
            .set_default("logging.json", false)?
            .set_default("database.max_connections", 5)?
            // Load default config file
            .add_source(File::from(config_dir.join("default.toml")).required(false))
            // Load environment-specific config (e.g. config/production.toml)
            .add_source(
                File::from(config_dir.join(
                    std::env::var("WHALEWATCH_ENV").unwrap_or_else(|_| "development".to_string()),
                ))
                .required(false),
            )
            // Override with environment variables (WHALEWATCH_STREAM__WS_URL, etc.)
            .add_source(
                Environment::with_prefix("WHALEWATCH")
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), Vec<String>> {
        let mut errors = Vec::new();

        if self.stream.whale_threshold_usd <= Decimal::ZERO {
            errors.push("stream.whale_threshold_usd must be positive".to_string());
        }

        if self.stream.backoff_base_ms == 0 {
            errors.push("stream.backoff_base_ms must be positive".to_string());
        }

        if self.stream.backoff_cap_ms < self.stream.backoff_base_ms {
            errors.push("stream.backoff_cap_ms must be >= stream.backoff_base_ms".to_string());
        }

        if self.stream.heartbeat_interval_ms == 0 {
            errors.push("stream.heartbeat_interval_ms must be positive".to_string());
        }

        if self.polling.min_amount < Decimal::ZERO {
            errors.push("polling.min_amount must be non-negative".to_string());
        }

        if self.polling.poll_interval_secs == 0 {
            errors.push("polling.poll_interval_secs must be positive".to_string());
        }

        if self.polling.treasury_address.trim().is_empty() {
            errors.push("polling.treasury_address must be set".to_string());
        }

        if !self.logs.disabled {
            if self.logs.treasury_address.trim().is_empty() {
                errors.push("logs.treasury_address must be set".to_string());
            }
            if self.logs.min_amount < Decimal::ZERO {
                errors.push("logs.min_amount must be non-negative".to_string());
            }
        }

        if self.actors.refresh_interval_secs == 0 {
            errors.push("actors.refresh_interval_secs must be positive".to_string());
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn sample_config() -> AppConfig {
        AppConfig {
            stream: StreamConfig {
                ws_url: "wss://api.hyperliquid.xyz/ws".to_string(),
                info_url: "https://api.hyperliquid.xyz/info".to_string(),
                whale_threshold_usd: dec!(1000000),
                heartbeat_interval_ms: 30_000,
                backoff_base_ms: 1_000,
                backoff_cap_ms: 30_000,
                universe_refresh_secs: 3_600,
                seed_instruments: vec!["BTC".to_string()],
            },
            polling: PollingConfig {
                api_url: "https://api.trongrid.io".to_string(),
                api_key: None,
                treasury_address: "TKHuVq1oKVruCGLvqVexFs6dawKv6fQgFs".to_string(),
                contract_address: "TR7NHqjeKQxGTCi8q8ZY4pL8otSzgjLj6t".to_string(),
                min_amount: dec!(100000000),
                poll_interval_secs: 10,
                page_size: 50,
            },
            logs: LogWatchConfig {
                ws_url: "wss://eth-mainnet.example/ws".to_string(),
                contract_address: "0xdAC17F958D2ee523a2206206994597C13D831ec7".to_string(),
                treasury_address: "0x5754284f345afc66a98fbb0a0afe71e0f00f37e3".to_string(),
                token_decimals: 6,
                min_amount: dec!(100000000),
                disabled: false,
            },
            actors: ActorConfig {
                api_url: "https://ranking.example/traders".to_string(),
                refresh_interval_secs: 600,
            },
            database: DatabaseConfig {
                url: "postgres://localhost/whalewatch".to_string(),
                max_connections: 5,
            },
            pushover: PushoverConfig::default(),
            logging: LoggingConfig::default(),
        }
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(sample_config().validate().is_ok());
    }

    #[test]
    fn test_zero_threshold_rejected() {
        let mut cfg = sample_config();
        cfg.stream.whale_threshold_usd = Decimal::ZERO;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("whale_threshold_usd")));
    }

    #[test]
    fn test_backoff_cap_below_base_rejected() {
        let mut cfg = sample_config();
        cfg.stream.backoff_cap_ms = 500;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.iter().any(|e| e.contains("backoff_cap_ms")));
    }

    #[test]
    fn test_pushover_configured() {
        let mut cfg = PushoverConfig::default();
        assert!(!cfg.is_configured());
        cfg.user_key = Some("u".to_string());
        assert!(!cfg.is_configured());
        cfg.api_token = Some("t".to_string());
        assert!(cfg.is_configured());
    }
}
