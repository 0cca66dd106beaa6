//! Application configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use checkout::CheckoutConfig;
use domain::{Money, PricingPolicy};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value:?}")]
    Invalid { name: &'static str, value: String },
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Credentials for the hosted payment gateway.
#[derive(Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub key_id: String,
    pub key_secret: String,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("base_url", &self.base_url)
            .field("key_id", &self.key_id)
            .finish_non_exhaustive()
    }
}

/// Server configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json`
/// - `DATABASE_URL`: Postgres connection string; unset runs in memory
/// - `CATALOG_PATH`: JSON catalog file; unset uses the built-in demo catalog
/// - `GATEWAY_BASE_URL`, `GATEWAY_KEY_ID`, `GATEWAY_KEY_SECRET`: payment
///   gateway; unset base URL runs against the in-memory sandbox
/// - `GATEWAY_TIMEOUT_MS`, `CURRENCY`, `RESERVATION_HOLD_SECS`,
///   `RECONCILE_INTERVAL_SECS`, `MAX_PAYMENT_ATTEMPTS`
/// - `FREE_SHIPPING_THRESHOLD`, `FLAT_SHIPPING_FEE` (minor units), `TAX_RATE_BPS`
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub catalog_path: Option<String>,
    pub gateway: Option<GatewayConfig>,
    /// Shared secret for callback signatures when no gateway is configured.
    pub sandbox_secret: String,
    pub gateway_timeout: Duration,
    pub currency: String,
    pub reservation_hold: Duration,
    pub reconcile_interval: Duration,
    pub max_payment_attempts: u32,
    pub free_shipping_threshold: i64,
    pub flat_shipping_fee: i64,
    pub tax_rate_bps: u32,
}

impl Config {
    /// Loads configuration from environment variables, falling back to defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let log_format = match std::env::var("LOG_FORMAT") {
            Ok(value) if value.eq_ignore_ascii_case("json") => LogFormat::Json,
            Ok(value) if value.eq_ignore_ascii_case("pretty") || value.is_empty() => {
                LogFormat::Pretty
            }
            Ok(value) => {
                return Err(ConfigError::Invalid {
                    name: "LOG_FORMAT",
                    value,
                });
            }
            Err(_) => defaults.log_format,
        };

        let gateway = non_empty("GATEWAY_BASE_URL").map(|base_url| GatewayConfig {
            base_url,
            key_id: std::env::var("GATEWAY_KEY_ID").unwrap_or_default(),
            key_secret: std::env::var("GATEWAY_KEY_SECRET").unwrap_or_default(),
        });

        Ok(Self {
            host: std::env::var("HOST").unwrap_or(defaults.host),
            port: parse("PORT", defaults.port)?,
            log_level: std::env::var("RUST_LOG").unwrap_or(defaults.log_level),
            log_format,
            database_url: non_empty("DATABASE_URL"),
            catalog_path: non_empty("CATALOG_PATH"),
            gateway,
            sandbox_secret: defaults.sandbox_secret,
            gateway_timeout: Duration::from_millis(parse("GATEWAY_TIMEOUT_MS", 10_000)?),
            currency: std::env::var("CURRENCY").unwrap_or(defaults.currency),
            reservation_hold: Duration::from_secs(parse("RESERVATION_HOLD_SECS", 1800)?),
            reconcile_interval: Duration::from_secs(parse("RECONCILE_INTERVAL_SECS", 60)?),
            max_payment_attempts: parse("MAX_PAYMENT_ATTEMPTS", defaults.max_payment_attempts)?,
            free_shipping_threshold: parse(
                "FREE_SHIPPING_THRESHOLD",
                defaults.free_shipping_threshold,
            )?,
            flat_shipping_fee: parse("FLAT_SHIPPING_FEE", defaults.flat_shipping_fee)?,
            tax_rate_bps: parse("TAX_RATE_BPS", defaults.tax_rate_bps)?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Secret that gateway callback signatures are checked against.
    pub fn signing_secret(&self) -> &str {
        self.gateway
            .as_ref()
            .map(|gateway| gateway.key_secret.as_str())
            .unwrap_or(&self.sandbox_secret)
    }

    pub fn checkout(&self) -> CheckoutConfig {
        CheckoutConfig {
            currency: self.currency.clone(),
            reservation_hold: chrono::Duration::seconds(self.reservation_hold.as_secs() as i64),
            max_payment_attempts: self.max_payment_attempts,
            gateway_timeout: self.gateway_timeout,
            pricing: PricingPolicy {
                free_shipping_threshold: Money::from_minor(self.free_shipping_threshold),
                flat_shipping_fee: Money::from_minor(self.flat_shipping_fee),
                tax_rate_bps: self.tax_rate_bps,
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            catalog_path: None,
            gateway: None,
            sandbox_secret: "sandbox_secret".to_string(),
            gateway_timeout: Duration::from_millis(10_000),
            currency: "INR".to_string(),
            reservation_hold: Duration::from_secs(1800),
            reconcile_interval: Duration::from_secs(60),
            max_payment_attempts: 3,
            free_shipping_threshold: 99_900,
            flat_shipping_fee: 4_900,
            tax_rate_bps: 0,
        }
    }
}

fn non_empty(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|value| !value.trim().is_empty())
}

fn parse<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|_| ConfigError::Invalid { name, value }),
        Err(_) => Ok(default),
    }
}
