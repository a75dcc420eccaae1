use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::catalog::{Catalog, CatalogError, PaymentMethod, Plan};
use crate::registry::{RetryConfig, UserId};

/// Main configuration structure for tierpass
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TierpassConfig {
    /// Who may approve or reject submissions
    pub admins: AdminConfig,
    /// Plans and payment methods on offer
    pub catalog: CatalogConfig,
    /// Registry backend and resilience settings
    pub registry: RegistryConfig,
    /// Conversation session settings
    pub sessions: SessionConfig,
    /// Outbound message settings
    pub notifications: NotificationConfig,
    /// Logging settings
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AdminConfig {
    /// Administrator user ids (also read from ADMIN_IDS, comma separated)
    pub ids: Vec<UserId>,
    /// Contact shown to users in help texts
    pub contact: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub plans: Vec<Plan>,
    pub payment_methods: Vec<PaymentMethod>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RegistryConfig {
    /// JSON file mirroring the registry table; in-memory only when unset
    pub data_file: Option<String>,
    /// Timeout for a single registry call
    pub timeout_ms: u64,
    /// Delay before the single retry
    pub retry_backoff_ms: u64,
    /// Total attempts per call, including the first
    pub max_attempts: u32,
    /// Sustained request rate towards the remote store
    pub requests_per_second: u32,
    /// Burst capacity above the sustained rate
    pub burst: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Sessions idle for longer than this are discarded on next contact
    pub idle_timeout_minutes: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Timeout for a single outbound message
    pub timeout_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level used when RUST_LOG is not set
    pub log_level: String,
    /// Emit JSON log lines instead of human readable output
    pub json: bool,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("no administrators configured; set admins.ids or ADMIN_IDS")]
    NoAdmins,
    #[error("invalid catalogue: {0}")]
    Catalog(#[from] CatalogError),
    #[error("{field} must be greater than zero")]
    Zero { field: &'static str },
    #[error("invalid administrator id {0:?}")]
    BadAdminId(String),
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            ids: Vec::new(),
            contact: "@admin_username".to_string(),
        }
    }
}

impl Default for CatalogConfig {
    fn default() -> Self {
        let plan = |id: &str, name: &str, price: &str, days: u32, features: &[&str]| Plan {
            id: id.to_string(),
            name: name.to_string(),
            price: price.to_string(),
            duration_days: days,
            features: features.iter().map(|f| f.to_string()).collect(),
        };
        let method = |id: &str, name: &str| PaymentMethod {
            id: id.to_string(),
            name: name.to_string(),
            account: "09XXXXXXXX".to_string(),
        };
        Self {
            plans: vec![
                plan("level1", "Advertising Lv.1", "10,000 MMK", 7, &["Feature 1", "Feature 2", "Feature 3"]),
                plan(
                    "level2",
                    "Advertising Lv.2",
                    "20,000 MMK",
                    14,
                    &["Feature 1", "Feature 2", "Feature 3", "Feature 4"],
                ),
                plan(
                    "level3",
                    "Advertising Lv.3",
                    "30,000 MMK",
                    30,
                    &["All Features", "Priority Support", "Extra Benefits"],
                ),
            ],
            payment_methods: vec![
                method("kbz_pay", "KBZ Pay"),
                method("wave_pay", "Wave Pay"),
                method("aya_pay", "Aya Pay"),
                method("cb_pay", "CB Pay"),
            ],
        }
    }
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            data_file: None,
            timeout_ms: 5_000,
            retry_backoff_ms: 500,
            max_attempts: 2,
            requests_per_second: 1,
            burst: 10,
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_minutes: 60,
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self { timeout_ms: 10_000 }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json: false,
        }
    }
}

impl TierpassConfig {
    /// Load configuration from multiple sources with precedence:
    /// 1. Default values
    /// 2. Configuration file (`path`, or tierpass.toml when present)
    /// 3. Environment variables (prefixed with TIERPASS_, nested with `__`)
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        builder = match path {
            Some(path) => builder.add_source(File::from(path)),
            None => builder.add_source(File::with_name("tierpass").required(false)),
        };

        builder = builder.add_source(
            Environment::with_prefix("TIERPASS")
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true)
                .list_separator(",")
                .with_list_parse_key("admins.ids"),
        );

        let mut tierpass_config: TierpassConfig = builder.build()?.try_deserialize()?;

        // Plain ADMIN_IDS is honoured when no admins are configured
        if tierpass_config.admins.ids.is_empty() {
            if let Ok(raw) = std::env::var("ADMIN_IDS") {
                tierpass_config.admins.ids = parse_admin_ids(&raw)?;
            }
        }

        Ok(tierpass_config)
    }

    /// Check everything the bot relies on at runtime.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.admins.ids.is_empty() {
            return Err(ConfigError::NoAdmins);
        }
        if self.registry.timeout_ms == 0 {
            return Err(ConfigError::Zero {
                field: "registry.timeout_ms",
            });
        }
        if self.registry.max_attempts == 0 {
            return Err(ConfigError::Zero {
                field: "registry.max_attempts",
            });
        }
        if self.sessions.idle_timeout_minutes == 0 {
            return Err(ConfigError::Zero {
                field: "sessions.idle_timeout_minutes",
            });
        }
        self.catalog()?;
        Ok(())
    }

    pub fn catalog(&self) -> Result<Catalog, CatalogError> {
        Catalog::new(
            self.catalog.plans.clone(),
            self.catalog.payment_methods.clone(),
        )
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            attempt_timeout: Duration::from_millis(self.registry.timeout_ms),
            max_attempts: self.registry.max_attempts,
            backoff: Duration::from_millis(self.registry.retry_backoff_ms),
            requests_per_second: self.registry.requests_per_second,
            burst: self.registry.burst,
        }
    }

    pub fn session_idle_timeout(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.sessions.idle_timeout_minutes as i64)
    }

    pub fn notification_timeout(&self) -> Duration {
        Duration::from_millis(self.notifications.timeout_ms)
    }

    /// Save configuration to file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let toml_content = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_content)?;
        Ok(())
    }

    /// Load .env file if it exists
    pub fn load_env_file() -> Result<()> {
        if Path::new(".env").exists() {
            dotenvy::dotenv()?;
            tracing::info!("Loaded environment variables from .env file");
        }
        Ok(())
    }
}

/// Parse a comma separated id list such as "123, 456".
pub fn parse_admin_ids(raw: &str) -> Result<Vec<UserId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse().map_err(|_| ConfigError::BadAdminId(id.to_string())))
        .collect()
}
