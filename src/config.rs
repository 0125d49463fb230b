use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::{error, info};
use validator::{Validate, ValidationError};

/// Default values for configuration
const DEFAULT_LOG_LEVEL: &str = "info";
const DEFAULT_ENV: &str = "development";
const DEFAULT_PORT: u16 = 8080;
const CONFIG_DIR: &str = "config";
const DEFAULT_MERCHANT_REF_PREFIX: &str = "RBX";
const DEFAULT_CURRENCY: &str = "IDR";

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
    pub log_level: String,

    /// Log in JSON format (structured logging)
    #[serde(default)]
    pub log_json: bool,

    /// Whether to run database migrations on startup
    #[serde(default)]
    pub auto_migrate: bool,

    /// Request handling timeout (seconds)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Maximum request body size in bytes
    #[serde(default = "default_max_body_size")]
    pub max_body_size: usize,

    /// CORS: comma-separated list of allowed origins
    #[serde(default)]
    pub cors_allowed_origins: Option<String>,

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

    /// Currency code used for all prices
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Event channel capacity for async event processing
    #[serde(default = "default_event_channel_capacity")]
    #[validate(custom = "validate_event_channel_capacity")]
    pub event_channel_capacity: usize,

    // ========== Payment gateway ==========
    /// Base URL of the payment gateway API
    #[serde(default)]
    pub payment_gateway_base_url: Option<String>,

    /// Gateway API key (Authorization header)
    #[serde(default)]
    pub payment_gateway_api_key: Option<String>,

    /// Merchant code assigned by the gateway
    #[serde(default)]
    pub payment_gateway_merchant_code: Option<String>,

    /// Private key used to sign payment-creation requests.
    /// Server-side only; must never reach any client-facing payload.
    #[serde(default)]
    pub payment_gateway_private_key: Option<String>,

    /// Webhook callback URL handed to the gateway on payment creation
    #[serde(default)]
    pub payment_gateway_callback_url: Option<String>,

    /// Browser return URL handed to the gateway on payment creation
    #[serde(default)]
    pub payment_gateway_return_url: Option<String>,

    /// Gateway HTTP timeout (seconds)
    #[serde(default = "default_gateway_timeout_secs")]
    pub payment_gateway_timeout_secs: u64,

    /// Prefix for generated merchant references
    #[serde(default = "default_merchant_ref_prefix")]
    pub merchant_ref_prefix: String,

    /// Webhook secret for verifying inbound payment callbacks
    #[serde(default)]
    pub payment_webhook_secret: Option<String>,

    /// Webhook timestamp tolerance (seconds)
    #[serde(default)]
    pub payment_webhook_tolerance_secs: Option<u64>,

    // ========== Marketplace ==========
    /// Base URL for the marketplace listings API
    #[serde(default = "default_marketplace_games_base_url")]
    pub marketplace_games_base_url: String,

    /// Base URL for the platform username resolution API
    #[serde(default = "default_marketplace_users_base_url")]
    pub marketplace_users_base_url: String,

    /// Marketplace HTTP timeout (seconds)
    #[serde(default = "default_marketplace_timeout_secs")]
    pub marketplace_timeout_secs: u64,

    /// Upper bound on listing pages fetched per verification
    #[serde(default = "default_marketplace_max_pages")]
    pub marketplace_max_pages: u32,

    // ========== Verification tickets ==========
    /// Secret used to sign gamepass verification tickets
    /// (minimum 32 characters)
    #[validate(length(min = 32), custom = "validate_signing_secret")]
    pub verification_signing_secret: String,

    /// Lifetime of a verification ticket (seconds)
    #[serde(default = "default_verification_ttl_secs")]
    pub verification_ttl_secs: u64,

    // ========== Credential vault ==========
    /// Base64-encoded 32-byte AES-256-GCM key for vialogin
    /// credentials at rest. Optional: without it vialogin intake
    /// is rejected with a configuration error.
    #[serde(default)]
    pub credential_vault_key: Option<String>,
}

impl AppConfig {
    /// Gets database URL reference
    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    /// Checks if running in production environment
    pub fn is_production(&self) -> bool {
        self.environment.eq_ignore_ascii_case("production")
    }

    /// Checks if running in development environment
    pub fn is_development(&self) -> bool {
        self.environment.eq_ignore_ascii_case("development")
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

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_max_body_size() -> usize {
    1024 * 1024 // 1MB is plenty for this API's payloads
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

fn default_currency() -> String {
    DEFAULT_CURRENCY.to_string()
}

fn default_event_channel_capacity() -> usize {
    1024
}

fn default_gateway_timeout_secs() -> u64 {
    15
}

fn default_merchant_ref_prefix() -> String {
    DEFAULT_MERCHANT_REF_PREFIX.to_string()
}

fn default_marketplace_games_base_url() -> String {
    "https://games.roblox.com".to_string()
}

fn default_marketplace_users_base_url() -> String {
    "https://users.roblox.com".to_string()
}

fn default_marketplace_timeout_secs() -> u64 {
    10
}

fn default_marketplace_max_pages() -> u32 {
    10
}

fn default_verification_ttl_secs() -> u64 {
    900
}

fn validate_event_channel_capacity(capacity: usize) -> Result<(), ValidationError> {
    if capacity == 0 {
        let mut err = ValidationError::new("event_channel_capacity");
        err.message = Some("event_channel_capacity must be greater than 0".into());
        return Err(err);
    }
    Ok(())
}

fn validate_signing_secret(secret: &str) -> Result<(), ValidationError> {
    let trimmed = secret.trim();

    // Reject obvious placeholders
    const DISALLOWED: [&str; 3] = [
        "CHANGE_THIS_SECRET_IN_PRODUCTION",
        "your-secret-key",
        "default-secret-key",
    ];
    if DISALLOWED
        .iter()
        .any(|&bad| trimmed.eq_ignore_ascii_case(bad))
    {
        let mut err = ValidationError::new("verification_signing_secret");
        err.message = Some("signing secret must be overridden with a secure random value".into());
        return Err(err);
    }

    // Reject trivially weak secrets
    if let Some(first) = trimmed.chars().next() {
        if trimmed.chars().all(|c| c == first) {
            let mut err = ValidationError::new("verification_signing_secret");
            err.message = Some("signing secret cannot be a repeated character sequence".into());
            return Err(err);
        }
    }

    let unique_chars: std::collections::HashSet<char> = trimmed.chars().collect();
    if unique_chars.len() < 10 {
        let mut err = ValidationError::new("verification_signing_secret");
        err.message = Some(
            "signing secret must have at least 10 unique characters for adequate entropy".into(),
        );
        return Err(err);
    }

    Ok(())
}

/// Initializes tracing using the provided log level as the default filter
pub fn init_tracing(level: &str, json: bool) {
    use tracing_subscriber::{fmt, EnvFilter};

    let default_directive = format!("robux_shop_api={},tower_http=debug", level);
    let filter_directive = env::var("RUST_LOG")
        .ok()
        .filter(|s| !s.trim().is_empty())
        .unwrap_or(default_directive);

    if json {
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

    // NOTE: verification_signing_secret has no default - it MUST be
    // provided via environment variable or config file.
    let config = Config::builder()
        .set_default("database_url", "sqlite://robux_shop.db?mode=rwc")?
        .set_default("host", "0.0.0.0")?
        .set_default("port", i64::from(DEFAULT_PORT))?
        .set_default("environment", DEFAULT_ENV)?
        .set_default("log_level", DEFAULT_LOG_LEVEL)?
        .set_default("log_json", false)?
        .add_source(File::with_name(&format!("{}/default", CONFIG_DIR)).required(false))
        .add_source(File::with_name(&format!("{}/{}", CONFIG_DIR, run_env)).required(false))
        .add_source(Environment::with_prefix("APP").separator("__"))
        .build()?;

    if config.get_string("verification_signing_secret").is_err() {
        error!("Verification signing secret is not configured. Set APP__VERIFICATION_SIGNING_SECRET with a secure random string (minimum 32 characters).");
        error!("Generate one with: openssl rand -base64 32");
        return Err(AppConfigError::Load(ConfigError::NotFound(
            "verification_signing_secret is required but not configured. Set APP__VERIFICATION_SIGNING_SECRET."
                .into(),
        )));
    }

    let app_config: AppConfig = config.try_deserialize()?;

    app_config.validate().map_err(|e| {
        error!("Configuration validation failed: {:?}", e);
        AppConfigError::Validation(e)
    })?;

    info!("Configuration loaded successfully");
    Ok(app_config)
}
