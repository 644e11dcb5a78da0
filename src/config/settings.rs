//! Application settings loaded from `config.toml`.
//!
//! Every section and field has a default, so a missing file or a partial file
//! still yields a usable configuration. Secrets (the SMTP password) are read
//! from the environment, never from the file.

use crate::errors::{Error, Result};
use chrono::Duration;
use serde::Deserialize;
use std::path::Path;

use super::catalog::CatalogItemConfig;

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Deserialize, Clone, Default)]
#[serde(default)]
pub struct AppConfig {
    /// Reservation windows and limits
    pub reservation: ReservationSettings,
    /// Background sweep periods
    pub scheduler: SchedulerSettings,
    /// Outgoing email
    pub email: EmailSettings,
    /// Catalog seeded on startup
    pub items: Vec<CatalogItemConfig>,
}

/// Reservation windows and limits
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct ReservationSettings {
    /// Minutes after creation during which the student may self-cancel
    pub cancel_window_minutes: i64,
    /// Minutes after the cancel window closes during which items may be claimed
    pub claim_window_minutes: i64,
    /// Largest quantity of a single item one reservation may hold
    pub max_quantity_per_item: i32,
    /// Global walk-in floor written to `system_config` when none is stored yet
    pub min_reservation_stock: Option<i32>,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            cancel_window_minutes: 10,
            claim_window_minutes: 24 * 60,
            max_quantity_per_item: 5,
            min_reservation_stock: None,
        }
    }
}

/// Background sweep periods
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct SchedulerSettings {
    /// Seconds between claim-ready sweeps (also the sweep's lookback)
    pub claim_ready_interval_secs: u64,
    /// Seconds between auto-expire sweeps
    pub auto_expire_interval_secs: u64,
}

impl Default for SchedulerSettings {
    fn default() -> Self {
        Self {
            claim_ready_interval_secs: 5 * 60,
            auto_expire_interval_secs: 30 * 60,
        }
    }
}

/// Outgoing email settings. Without `smtp_server` emails are only logged.
#[derive(Debug, Deserialize, Clone)]
#[serde(default)]
pub struct EmailSettings {
    /// SMTP relay host (e.g., "smtp.gmail.com")
    pub smtp_server: Option<String>,
    /// SMTP port
    pub smtp_port: u16,
    /// SMTP login
    pub smtp_username: Option<String>,
    /// Sender address
    pub from_email: String,
    /// Sender display name
    pub from_name: String,
    /// Upper bound on a single send
    pub timeout_secs: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            smtp_server: None,
            smtp_port: 587,
            smtp_username: None,
            from_email: "giftstore@localhost".to_string(),
            from_name: "School Giftstore".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Loads the application configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
/// - A field has the wrong type
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let path_ref = path.as_ref();
    tracing::debug!("Attempting to load configuration from: {:?}", path_ref);
    let contents = std::fs::read_to_string(path_ref).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path_ref.display()),
    })?;

    parse_config(&contents)
}

/// Parses configuration from TOML text.
pub fn parse_config(contents: &str) -> Result<AppConfig> {
    let config: AppConfig = toml::from_str(contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })?;
    config.validate()?;
    Ok(config)
}

/// Loads configuration from `CONFIG_PATH`, or `./config.toml`.
/// A missing default file yields the built-in defaults.
pub fn load_app_configuration() -> Result<AppConfig> {
    if let Ok(path) = std::env::var("CONFIG_PATH") {
        return load_config(path);
    }
    if Path::new("config.toml").exists() {
        load_config("config.toml")
    } else {
        tracing::warn!("No config.toml found, using built-in defaults");
        Ok(AppConfig::default())
    }
}

impl AppConfig {
    fn validate(&self) -> Result<()> {
        let r = &self.reservation;
        if r.cancel_window_minutes < 0 || r.claim_window_minutes < 0 {
            return Err(Error::Config {
                message: "Reservation windows cannot be negative".to_string(),
            });
        }
        if r.max_quantity_per_item < 1 {
            return Err(Error::Config {
                message: "max_quantity_per_item must be at least 1".to_string(),
            });
        }
        if r.min_reservation_stock.is_some_and(|floor| floor < 0) {
            return Err(Error::Config {
                message: "min_reservation_stock cannot be negative".to_string(),
            });
        }
        if self.scheduler.claim_ready_interval_secs == 0
            || self.scheduler.auto_expire_interval_secs == 0
        {
            return Err(Error::Config {
                message: "Sweep intervals must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl ReservationSettings {
    /// Cancel window as a duration
    #[must_use]
    pub fn cancel_window(&self) -> Duration {
        Duration::minutes(self.cancel_window_minutes)
    }

    /// Claim window as a duration
    #[must_use]
    pub fn claim_window(&self) -> Duration {
        Duration::minutes(self.claim_window_minutes)
    }
}
