use config::{Config, ConfigError, Environment, File};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Deserialize;
use std::env;
use std::env as std_env;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError, ValidationErrors};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_PAYMENT_PROVIDER: &str = "pagarme";
const DEFAULT_STATUS_STRATEGY: &str = "refetch";
const DEFAULT_PROVIDER_TIMEOUT_SECS: u64 = 10;
const DEFAULT_METADATA_MAX_BYTES: usize = 64 * 1024;
const DEFAULT_PIX_EXPIRES_IN_SECS: u64 = 3600;
const DEFAULT_CURRENCY: &str = "BRL";
const DEFAULT_EMAIL_FROM: &str = "DayLove <no-reply@daylove.app>";

/// Payment providers with a gateway implementation.
pub const SUPPORTED_PROVIDERS: [&str; 2] = ["pagarme", "mercadopago"];

/// How the status of a webhook-announced payment is established.
#[derive(Clone, Copy, Debug, PartialEq, Eq, strum::EnumString, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum StatusStrategy {
    /// Use the record embedded in the verified notification.
    TrustWebhook,
    /// Re-read the payment from the provider.
    Refetch,
}

/// Application configuration structure with validation
#[derive(Clone, Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct AppConfig {
    /// Database connection URL
    pub database_url: String,

    /// Server host address
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Application environment
    pub environment: String,

    /// Logging level
    #[serde(default = "default_log_level")]
    #[validate(custom = "validate_log_level")]
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// CORS: comma-separated list of allowed origins (production)
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

    /// Allow permissive CORS fallback
    #[serde(default)]
    pub cors_allow_any_origin: bool,

    /// CORS: allow credentials
    #[serde(default)]
    pub cors_allow_credentials: bool,

    /// DB pool: max connections
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,

    /// DB pool: min connections
    #[serde(default = "default_db_min_connections")]
    pub db_min_connections: u32,

    /// DB timeouts (seconds)
    #[serde(default = "default_db_connect_timeout_secs")]
    pub db_connect_timeout_secs: u64,
    #[serde(default = "default_db_idle_timeout_secs")]
    pub db_idle_timeout_secs: u64,
    #[serde(default = "default_db_acquire_timeout_secs")]
    pub db_acquire_timeout_secs: u64,

    /// Maximum request body size in bytes; inline photos make checkout bodies large
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// Public site origin used to build page links in emails
    #[serde(default = "default_public_base_url")]
    #[validate(custom = "validate_base_url")]
    pub public_base_url: String,

    /// Payment provider identifier ("pagarme" or "mercadopago")
    #[serde(default = "default_payment_provider")]
    #[validate(custom = "validate_payment_provider")]
    pub payment_provider: String,

    /// Secret API key / access token for the provider
    #[serde(default)]
    pub payment_api_key: Option<String>,

    /// Provider API base URL override
    #[serde(default)]
    pub payment_api_base_url: Option<String>,

    /// Webhook secret for verifying payment gateway callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// "refetch" or "trust-webhook"
    #[serde(default = "default_status_strategy")]
    #[validate(custom = "validate_status_strategy")]
    pub payment_status_strategy: String,

    /// Skip webhook signature verification (never allowed in production)
    #[serde(default)]
    pub webhook_signature_bypass: bool,

    /// Timeout applied to every outbound provider, asset and email call
    #[serde(default = "default_provider_timeout_secs")]
    #[validate(range(min = 1, max = 120))]
    pub provider_timeout_secs: u64,

    /// Upper bound on the serialized submission sent as provider metadata
    #[serde(default = "default_metadata_max_bytes")]
    #[validate(range(min = 1024))]
    pub metadata_max_bytes: usize,

    /// Price of the one-time "forever" plan
    #[serde(default = "default_price_forever")]
    #[validate(custom = "validate_price")]
    pub price_forever: Decimal,

    /// Price of the recurring "annual" plan
    #[serde(default = "default_price_annual")]
    #[validate(custom = "validate_price")]
    pub price_annual: Decimal,

    /// ISO 4217 currency code for provider orders
    #[serde(default = "default_currency")]
    #[validate(length(equal = 3))]
    pub currency: String,

    /// PIX code lifetime in seconds
    #[serde(default = "default_pix_expires_in_secs")]
    pub pix_expires_in_secs: u64,

    /// Object storage base URL; unset keeps uploads in memory
    #[serde(default)]
    pub asset_store_url: Option<String>,

    /// Object storage service key
    #[serde(default)]
    pub asset_store_key: Option<String>,

    /// Transactional email API endpoint; unset logs emails instead of sending
    #[serde(default)]
    pub email_api_url: Option<String>,

    /// Transactional email API key
    #[serde(default)]
    pub email_api_key: Option<String>,

    /// Sender address for customer emails
    #[serde(default = "default_email_from")]
    pub email_from: String,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Creates a new configuration with defaults for everything but the essentials
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            host,
            port,
            environment,
            log_level: default_log_level(),
            log_json: false,
            auto_migrate: false,
            cors_allowed_origins: None,
            cors_allow_any_origin: false,
            cors_allow_credentials: false,
            db_max_connections: default_db_max_connections(),
            db_min_connections: default_db_min_connections(),
            db_connect_timeout_secs: default_db_connect_timeout_secs(),
            db_idle_timeout_secs: default_db_idle_timeout_secs(),
            db_acquire_timeout_secs: default_db_acquire_timeout_secs(),
            max_body_size: default_max_body_size(),
            public_base_url: default_public_base_url(),
            payment_provider: default_payment_provider(),
            payment_api_key: None,
            payment_api_base_url: None,
            payment_webhook_secret: None,
            payment_status_strategy: default_status_strategy(),
            webhook_signature_bypass: false,
            provider_timeout_secs: default_provider_timeout_secs(),
            metadata_max_bytes: default_metadata_max_bytes(),
            price_forever: default_price_forever(),
            price_annual: default_price_annual(),
            currency: default_currency(),
            pix_expires_in_secs: default_pix_expires_in_secs(),
            asset_store_url: None,
            asset_store_key: None,
            email_api_url: None,
            email_api_key: None,
            email_from: default_email_from(),
        }
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
    }

    /// Returns true if explicit CORS origins are configured
    pub fn has_cors_allowed_origins(&self) -> bool {
        self.cors_allowed_origins
            .as_ref()
            .map(|raw| raw.split(',').any(|origin| !origin.trim().is_empty()))
            .unwrap_or(false)
    }

    /// Whether we should fall back to permissive CORS
    pub fn should_allow_permissive_cors(&self) -> bool {
        self.is_development() || self.cors_allow_any_origin
    }

    /// Parsed status strategy; falls back to refetch for unvalidated configs.
    pub fn status_strategy(&self) -> StatusStrategy {
        self.payment_status_strategy
            .parse()
            .unwrap_or(StatusStrategy::Refetch)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Signature bypass only ever takes effect outside production.
    pub fn signature_bypass_enabled(&self) -> bool {
        self.webhook_signature_bypass && !self.is_production()
    }

    pub(crate) fn validate_additional_constraints(&self) -> Result<(), ValidationErrors> {
        let mut errors = ValidationErrors::new();

        if !self.should_allow_permissive_cors() && !self.has_cors_allowed_origins() {
            let mut err = ValidationError::new("cors_allowed_origins_required");
            err.message = Some(
                "Set APP__CORS_ALLOWED_ORIGINS for non-development environments or explicitly opt-in via APP__CORS_ALLOW_ANY_ORIGIN=true".into(),
            );
            errors.add("cors_allowed_origins", err);
        }

        if self.is_production() && self.webhook_signature_bypass {
            let mut err = ValidationError::new("webhook_signature_bypass_in_production");
            err.message = Some(
                "Webhook signature verification cannot be disabled in production. Unset APP__WEBHOOK_SIGNATURE_BYPASS."
                    .into(),
            );
            errors.add("webhook_signature_bypass", err);
        }

        if self.is_production()
            && self
                .payment_webhook_secret
                .as_deref()
                .map(str::trim)
                .unwrap_or("")
                .is_empty()
        {
            let mut err = ValidationError::new("payment_webhook_secret_required");
            err.message =
                Some("Set APP__PAYMENT_WEBHOOK_SECRET to verify provider notifications".into());
            errors.add("payment_webhook_secret", err);
        }

        if errors.errors().is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Gets log level reference
    pub fn log_level(&self) -> &str {
        &self.log_level
    }
}

/// Configuration loading errors
#[derive(Debug, Error)]
pub enum AppConfigError {
    #[error("Configuration loading failed: {0}")]
    Load(#[from] ConfigError),

    #[error("Configuration validation failed: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Default value functions
fn default_log_level() -> String {
    DEFAULT_LOG_LEVEL.to_string()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_db_max_connections() -> u32 {
    16
}
fn default_db_min_connections() -> u32 {
    2
}
fn default_db_connect_timeout_secs() -> u64 {
    30
}
fn default_db_idle_timeout_secs() -> u64 {
    600
}
fn default_db_acquire_timeout_secs() -> u64 {
    8
}

fn default_max_body_size() -> usize {
    25 * 1024 * 1024 // eight inline photos plus a song
}

fn default_public_base_url() -> String {
    "http://localhost:3000".to_string()
}

fn default_payment_provider() -> String {
    DEFAULT_PAYMENT_PROVIDER.to_string()
}

fn default_status_strategy() -> String {
    DEFAULT_STATUS_STRATEGY.to_string()
}

fn default_provider_timeout_secs() -> u64 {
    DEFAULT_PROVIDER_TIMEOUT_SECS
}

fn default_metadata_max_bytes() -> usize {
    DEFAULT_METADATA_MAX_BYTES
}

fn default_price_forever() -> Decimal {
    dec!(29.90)
}

fn default_price_annual() -> Decimal {
    dec!(19.90)
}

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_pix_expires_in_secs() -> u64 {
    DEFAULT_PIX_EXPIRES_IN_SECS
}

fn default_email_from() -> String {
    DEFAULT_EMAIL_FROM.to_string()
}

/// Validates log level values
fn validate_log_level(level: &str) -> Result<(), ValidationError> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if valid_levels.contains(&level.to_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("log_level");
        err.message = Some("Must be one of: trace, debug, info, warn, error".into());
        Err(err)
    }
}

fn validate_payment_provider(value: &str) -> Result<(), ValidationError> {
    if SUPPORTED_PROVIDERS.contains(&value.to_ascii_lowercase().as_str()) {
        Ok(())
    } else {
        let mut err = ValidationError::new("payment_provider");
        err.message = Some("Must be one of: pagarme, mercadopago".into());
        Err(err)
    }
}

fn validate_status_strategy(value: &str) -> Result<(), ValidationError> {
    match value.parse::<StatusStrategy>() {
        Ok(_) => Ok(()),
        Err(_) => {
            let mut err = ValidationError::new("payment_status_strategy");
            err.message = Some("Must be one of: refetch, trust-webhook".into());
            Err(err)
        }
    }
}

fn validate_base_url(value: &str) -> Result<(), ValidationError> {
    match url::Url::parse(value) {
        Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => Ok(()),
        _ => {
            let mut err = ValidationError::new("public_base_url");
            err.message = Some("Must be an absolute http(s) URL".into());
            Err(err)
        }
    }
}

fn validate_price(price: &Decimal) -> Result<(), ValidationError> {
    if price.is_sign_negative() || price.is_zero() {
        let mut err = ValidationError::new("price");
        err.message = Some("Plan prices must be greater than zero".into());
        return Err(err);
    }
    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let default_directive = format!("daylove_api={},tower_http=debug", level);
    let filter_directive = std_env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive.clone());

    // Optional OpenTelemetry initialization via env (APP__OTEL_ENABLED or OTEL_EXPORTER_OTLP_ENDPOINT)
    let otel_enabled = std_env::var("APP__OTEL_ENABLED")
        .map(|v| v == "1" || v.to_lowercase() == "true")
        .unwrap_or(false)
        || std_env::var("OTEL_EXPORTER_OTLP_ENDPOINT").is_ok();

    if otel_enabled {
        use opentelemetry::KeyValue;
        use opentelemetry_otlp::WithExportConfig;
        use opentelemetry_sdk::{trace as sdktrace, Resource};

        let endpoint = std_env::var("OTEL_EXPORTER_OTLP_ENDPOINT")
            .unwrap_or_else(|_| "http://localhost:4317".to_string());
        let service_name =
            std_env::var("OTEL_SERVICE_NAME").unwrap_or_else(|_| "daylove-api".to_string());

        let resource = Resource::new(vec![KeyValue::new("service.name", service_name)]);
        let tracer = match opentelemetry_otlp::new_pipeline()
            .tracing()
            .with_exporter(
                opentelemetry_otlp::new_exporter()
                    .tonic()
                    .with_endpoint(endpoint),
            )
            .with_trace_config(sdktrace::config().with_resource(resource))
            .install_batch(opentelemetry_sdk::runtime::Tokio)
        {
            Ok(tracer) => tracer,
            Err(err) => {
                error!("Failed to install OTLP pipeline: {}", err);
                if json {
                    let _ = fmt().with_env_filter(filter_directive).json().try_init();
                } else {
                    let _ = fmt().with_env_filter(filter_directive).try_init();
                }
                return;
            }
        };

        let base = tracing_subscriber::registry()
            .with(tracing_opentelemetry::layer().with_tracer(tracer))
            .with(EnvFilter::new(filter_directive));

        if json {
            let _ = base.with(fmt::layer().json()).try_init();
        } else {
            let _ = base.with(fmt::layer()).try_init();
        }
    } else if json {
        let _ = fmt().with_env_filter(filter_directive).json().try_init();
    } else {
        let _ = fmt().with_env_filter(filter_directive).try_init();
    }
}

/// Loads application configuration
///
/// Layers configuration sources in this order:
/// 1. Built-in defaults
/// 2. Default config (config/default.toml)
/// 3. Environment-specific config (config/{env}.toml)
/// 4. Environment variables (APP__*)
pub fn load_config() -> Result<AppConfig, AppConfigError> {
    // Support both RUN_ENV and APP_ENV for selecting config profile
    let run_env = env::var("RUN_ENV")
        .or_else(|_| env::var("APP_ENV"))
        .unwrap_or_else(|_| DEFAULT_ENV.to_string());
    info!("Loading configuration for environment: {}", run_env);

    if !Path::new(CONFIG_DIR).exists() {
        info!(
            "Config directory '{}' not found; relying on built-in defaults and environment variables",
            CONFIG_DIR
        );
    }

    let config = Config::builder()
        .set_default("database_url", "sqlite://daylove.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", DEFAULT_PORT as i64)?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    app_config.validate_additional_constraints().map_err(|e| {
        error!("Configuration security validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    if app_config.signature_bypass_enabled() {
        tracing::warn!(
            environment = %app_config.environment,
            "webhook signature verification is DISABLED"
        );
    }

    info!("Configuration loaded successfully");
    Ok(app_config)
}

#[cfg(test)]
mod cors_validation_tests {
    use super::*;

    fn base_config() -> AppConfig {
        let mut cfg = AppConfig::new(
            "sqlite://daylove.db?mode=memory".into(),
            "127.0.0.1".into(),
            8080,
            "production".into(),
        );
        cfg.payment_webhook_secret = Some("whsec_test".into());
        cfg
    }

    #[test]
    fn non_dev_requires_cors_origins() {
        let cfg = base_config();
        assert!(cfg.validate_additional_constraints().is_err());
    }

    #[test]
    fn non_dev_allows_override_flag() {
        let mut cfg = base_config();
        cfg.cors_allow_any_origin = true;
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn non_dev_with_origins_passes() {
        let mut cfg = base_config();
        cfg.cors_allowed_origins = Some("https://example.com".into());
        assert!(cfg.validate_additional_constraints().is_ok());
    }

    #[test]
    fn development_allows_permissive_by_default() {
        let mut cfg = base_config();
        cfg.environment = "development".into();
        assert!(cfg.validate_additional_constraints().is_ok());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dev_config() -> AppConfig {
        AppConfig::new(
            "sqlite::memory:".into(),
            "127.0.0.1".into(),
            8080,
            "development".into(),
        )
    }

    #[test]
    fn production_rejects_signature_bypass() {
        let mut cfg = dev_config();
        cfg.environment = "production".into();
        cfg.cors_allow_any_origin = true;
        cfg.payment_webhook_secret = Some("whsec_test".into());
        cfg.webhook_signature_bypass = true;

        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("webhook_signature_bypass"));
        assert!(!cfg.signature_bypass_enabled());
    }

    #[test]
    fn production_requires_webhook_secret() {
        let mut cfg = dev_config();
        cfg.environment = "production".into();
        cfg.cors_allow_any_origin = true;

        let errors = cfg.validate_additional_constraints().unwrap_err();
        assert!(errors.field_errors().contains_key("payment_webhook_secret"));
    }

    #[test]
    fn development_honors_signature_bypass() {
        let mut cfg = dev_config();
        cfg.webhook_signature_bypass = true;
        assert!(cfg.validate_additional_constraints().is_ok());
        assert!(cfg.signature_bypass_enabled());
    }

    #[test]
    fn defaults_pass_field_validation() {
        let cfg = dev_config();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.price_forever, dec!(29.90));
        assert_eq!(cfg.price_annual, dec!(19.90));
        assert_eq!(cfg.metadata_max_bytes, 65_536);
        assert_eq!(cfg.status_strategy(), StatusStrategy::Refetch);
    }

    #[test]
    fn rejects_unknown_provider_and_strategy() {
        let mut cfg = dev_config();
        cfg.payment_provider = "stripe".into();
        cfg.payment_status_strategy = "sometimes".into();

        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("payment_provider"));
        assert!(errors.field_errors().contains_key("payment_status_strategy"));
    }

    #[test]
    fn rejects_non_positive_prices() {
        let mut cfg = dev_config();
        cfg.price_annual = Decimal::ZERO;
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("price_annual"));
    }

    #[test]
    fn parses_trust_webhook_strategy() {
        let mut cfg = dev_config();
        cfg.payment_status_strategy = "trust-webhook".into();
        assert_eq!(cfg.status_strategy(), StatusStrategy::TrustWebhook);
    }

    #[test]
    fn rejects_relative_public_base_url() {
        let mut cfg = dev_config();
        cfg.public_base_url = "daylove.app".into();
        let errors = cfg.validate().unwrap_err();
        assert!(errors.field_errors().contains_key("public_base_url"));
    }
}
