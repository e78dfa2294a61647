use config::{Config, ConfigError, Environment, File as ConfigFile};
use serde::Deserialize;
use std::time::Duration;

use crate::error::Error;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
    pub directory: DirectoryConfig,
    #[serde(default)]
    pub admin: AdminConfig,
    #[serde(default)]
    pub inventory: InventoryConfig,
    #[serde(default)]
    pub scan: ScanConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
}

#[derive(Clone, Deserialize)]
pub struct DirectoryConfig {
    /// `ldap://` or `ldaps://` url of a domain controller.
    pub url: String,
    pub base_dn: String,
    #[serde(default)]
    pub bind_dn: String,
    #[serde(default)]
    pub bind_password: Option<String>,
    #[serde(default = "default_page_size")]
    pub page_size: i32,
    #[serde(default = "default_directory_timeout")]
    pub timeout_secs: u64,
}

/// Global administrative account used when a computer has no access override.
#[derive(Clone, Default, Deserialize)]
pub struct AdminConfig {
    pub admin_username: Option<String>,
    #[serde(default)]
    pub account_suffix: String,
    pub admin_password: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InventoryConfig {
    #[serde(default = "default_wmic_path")]
    pub wmic_path: String,
    #[serde(default = "default_inventory_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScanConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScheduleConfig {
    #[serde(default = "default_scan_interval")]
    pub scan_interval_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
    #[serde(default = "default_sync_interval")]
    pub user_sync_interval_secs: u64,
    #[serde(default = "default_sync_interval")]
    pub computer_sync_interval_secs: u64,
    /// Runs exceeding this are cancelled.
    #[serde(default = "default_job_timeout")]
    pub job_timeout_secs: u64,
    #[serde(default = "default_tick_millis")]
    pub tick_millis: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetentionConfig {
    #[serde(default = "default_max_age_days")]
    pub max_age_days: u64,
}

fn default_database_path() -> String {
    "desk_sync.db".to_string()
}

fn default_page_size() -> i32 {
    500
}

fn default_directory_timeout() -> u64 {
    10
}

fn default_wmic_path() -> String {
    "wmic".to_string()
}

fn default_inventory_timeout() -> u64 {
    30
}

fn default_workers() -> usize {
    5
}

fn default_scan_interval() -> u64 {
    5 * 60
}

fn default_sweep_interval() -> u64 {
    10 * 60
}

fn default_sync_interval() -> u64 {
    60 * 60
}

fn default_job_timeout() -> u64 {
    30 * 60
}

fn default_tick_millis() -> u64 {
    1000
}

fn default_max_age_days() -> u64 {
    30
}

impl Default for InventoryConfig {
    fn default() -> Self {
        Self {
            wmic_path: default_wmic_path(),
            timeout_secs: default_inventory_timeout(),
        }
    }
}

impl Default for ScanConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: default_scan_interval(),
            sweep_interval_secs: default_sweep_interval(),
            user_sync_interval_secs: default_sync_interval(),
            computer_sync_interval_secs: default_sync_interval(),
            job_timeout_secs: default_job_timeout(),
            tick_millis: default_tick_millis(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            max_age_days: default_max_age_days(),
        }
    }
}

impl RetentionConfig {
    pub fn max_age(&self) -> Result<Duration, Error> {
        self.max_age_days
            .checked_mul(24 * 60 * 60)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                Error::Configuration(format!(
                    "retention.max_age_days {} is out of range",
                    self.max_age_days
                ))
            })
    }
}

// Hand-written so the passwords stay out of `print-config` and log output.
impl std::fmt::Debug for DirectoryConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DirectoryConfig")
            .field("url", &self.url)
            .field("base_dn", &self.base_dn)
            .field("bind_dn", &self.bind_dn)
            .field("bind_password", &self.bind_password.as_ref().map(|_| "********"))
            .field("page_size", &self.page_size)
            .field("timeout_secs", &self.timeout_secs)
            .finish()
    }
}

impl std::fmt::Debug for AdminConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AdminConfig")
            .field("admin_username", &self.admin_username)
            .field("account_suffix", &self.account_suffix)
            .field("admin_password", &self.admin_password.as_ref().map(|_| "********"))
            .finish()
    }
}

/// Load `Config.toml` (optional) overlaid with `DESK_SYNC__SECTION__KEY` variables.
pub fn load_configuration() -> Result<AppConfig, ConfigError> {
    let builder = Config::builder()
        .add_source(ConfigFile::with_name("Config").required(false))
        .add_source(
            Environment::with_prefix("DESK_SYNC")
                .prefix_separator("__")
                .separator("__"),
        )
        .build()?;
    builder.try_deserialize::<AppConfig>()
}

impl AppConfig {
    /// Reject configurations the scheduler cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        if self.directory.url.trim().is_empty() {
            return Err(Error::Configuration("directory.url must be set".into()));
        }
        if self.directory.page_size <= 0 {
            return Err(Error::Configuration(
                "directory.page_size must be positive".into(),
            ));
        }
        if self.scan.workers == 0 {
            return Err(Error::Configuration("scan.workers must be at least 1".into()));
        }
        self.retention.max_age()?;

        let intervals = [
            ("schedule.scan_interval_secs", self.schedule.scan_interval_secs),
            ("schedule.sweep_interval_secs", self.schedule.sweep_interval_secs),
            ("schedule.user_sync_interval_secs", self.schedule.user_sync_interval_secs),
            ("schedule.computer_sync_interval_secs", self.schedule.computer_sync_interval_secs),
            ("schedule.job_timeout_secs", self.schedule.job_timeout_secs),
            ("schedule.tick_millis", self.schedule.tick_millis),
        ];
        for (name, value) in intervals {
            if value == 0 {
                return Err(Error::Configuration(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }

    /// The scheduler only starts when the fallback account is usable.
    pub fn validate_for_daemon(&self) -> Result<(), Error> {
        self.validate()?;
        match (&self.admin.admin_username, &self.admin.admin_password) {
            (Some(user), Some(_)) if !user.is_empty() => Ok(()),
            _ => Err(Error::Configuration(
                "admin.admin_username and admin.admin_password are required".into(),
            )),
        }
    }
}
