use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::core::automation::{AutomationTimings, SessionLossPolicy};
use crate::core::store::ScheduleScope;
use crate::platform::{NativePlatform, Platform};

pub const CONFIG_FILE: &str = "config.toml";
pub const DEFAULT_STORE_URL: &str = "https://shop.gameloft.com/games/Asphalt_Legends";

/// Runtime configuration shared by the bot and admin processes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub telegram_token: String,
    /// SQLite file; relative paths resolve against the data dir.
    pub db_path: PathBuf,
    pub admin_host: String,
    pub admin_port: u16,
    /// Bearer token for the admin API. Empty means loopback-only open access.
    pub admin_token: String,
    pub webdriver_url: String,
    pub headless: bool,
    pub store_url: String,
    pub log_level: String,
    pub trial_days: i64,
    pub max_elevated_emails: usize,
    pub collection_interval_secs: u64,
    pub scheduler_period_secs: u64,
    pub relay_period_secs: u64,
    pub reaper_period_secs: u64,
    pub check_cooldown_secs: u64,
    pub collect_cooldown_secs: u64,
    pub login_timeout_secs: u64,
    /// Also schedule ACTIVE non-elevated accounts.
    pub schedule_standard_accounts: bool,
    pub session_loss_policy: SessionLossPolicy,
    pub automation: AutomationTimings,
    #[serde(skip)]
    pub data_dir: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            telegram_token: String::new(),
            db_path: PathBuf::from("freeclaim.db"),
            admin_host: "127.0.0.1".to_string(),
            admin_port: 3000,
            admin_token: String::new(),
            webdriver_url: "http://127.0.0.1:9515".to_string(),
            headless: true,
            store_url: DEFAULT_STORE_URL.to_string(),
            log_level: "info".to_string(),
            trial_days: 3,
            max_elevated_emails: 3,
            collection_interval_secs: 24 * 60 * 60,
            scheduler_period_secs: 60,
            relay_period_secs: 3,
            reaper_period_secs: 10,
            check_cooldown_secs: 60,
            collect_cooldown_secs: 300,
            login_timeout_secs: 300,
            schedule_standard_accounts: false,
            session_loss_policy: SessionLossPolicy::Preserve,
            automation: AutomationTimings::default(),
            data_dir: PathBuf::new(),
        }
    }
}

impl AppConfig {
    /// Load `<data_dir>/config.toml` (if present) and apply env overrides.
    pub fn load() -> Result<Self> {
        Self::load_from(&NativePlatform::data_dir())
    }

    pub fn load_from(data_dir: &Path) -> Result<Self> {
        let path = data_dir.join(CONFIG_FILE);
        let mut cfg = if path.exists() {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading {}", path.display()))?;
            Self::parse(&raw).with_context(|| format!("parsing {}", path.display()))?
        } else {
            Self::default()
        };
        cfg.data_dir = data_dir.to_path_buf();
        cfg.apply_env(|key| std::env::var(key).ok());
        Ok(cfg)
    }

    pub fn parse(raw: &str) -> Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(token) = non_empty("TELEGRAM_BOT_TOKEN") {
            self.telegram_token = token;
        }
        if let Some(db) = non_empty("DATABASE_URL") {
            self.db_path = PathBuf::from(db.trim_start_matches("sqlite://"));
        }
        if let Some(port) = non_empty("DASHBOARD_PORT").and_then(|p| p.parse().ok()) {
            self.admin_port = port;
        }
        if let Some(token) = non_empty("ADMIN_TOKEN") {
            self.admin_token = token;
        }
        if let Some(url) = non_empty("WEBDRIVER_URL") {
            self.webdriver_url = url;
        }
    }

    pub fn db_file(&self) -> PathBuf {
        if self.db_path.is_absolute() {
            self.db_path.clone()
        } else {
            self.data_dir.join(&self.db_path)
        }
    }

    pub fn run_dir(&self) -> PathBuf {
        self.data_dir.join("run")
    }

    pub fn log_file(&self) -> PathBuf {
        self.run_dir().join("freeclaim.log")
    }

    pub fn pid_file(&self) -> PathBuf {
        self.run_dir().join("freeclaim.pid")
    }

    pub fn profiles_dir(&self) -> PathBuf {
        self.data_dir.join("profiles")
    }

    pub fn collection_interval(&self) -> Duration {
        Duration::from_secs(self.collection_interval_secs)
    }

    pub fn login_timeout(&self) -> Duration {
        Duration::from_secs(self.login_timeout_secs)
    }

    pub fn schedule_scope(&self) -> ScheduleScope {
        if self.schedule_standard_accounts {
            ScheduleScope::AllActive
        } else {
            ScheduleScope::ElevatedOnly
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_defaults() {
        let cfg = AppConfig::parse("").unwrap();
        assert_eq!(cfg.scheduler_period_secs, 60);
        assert_eq!(cfg.relay_period_secs, 3);
        assert_eq!(cfg.reaper_period_secs, 10);
        assert_eq!(cfg.collection_interval_secs, 86_400);
        assert_eq!(cfg.max_elevated_emails, 3);
        assert_eq!(cfg.session_loss_policy, SessionLossPolicy::Preserve);
        assert_eq!(cfg.schedule_scope(), ScheduleScope::ElevatedOnly);
    }

    #[test]
    fn partial_file_overrides_only_named_fields() {
        let cfg = AppConfig::parse(
            r#"
            admin_port = 8080
            session_loss_policy = "discard"
            schedule_standard_accounts = true

            [automation]
            settle_ms = 250
            "#,
        )
        .unwrap();
        assert_eq!(cfg.admin_port, 8080);
        assert_eq!(cfg.session_loss_policy, SessionLossPolicy::Discard);
        assert_eq!(cfg.schedule_scope(), ScheduleScope::AllActive);
        assert_eq!(cfg.automation.settle_ms, 250);
        assert_eq!(
            cfg.automation.navigation_timeout_ms,
            AutomationTimings::default().navigation_timeout_ms
        );
        assert_eq!(cfg.relay_period_secs, 3);
    }

    #[test]
    fn env_overrides_win_over_file() {
        let mut cfg = AppConfig::default();
        let env: HashMap<&str, &str> = HashMap::from([
            ("TELEGRAM_BOT_TOKEN", "123:abc"),
            ("DATABASE_URL", "sqlite:///var/lib/fc.db"),
            ("DASHBOARD_PORT", "4000"),
            ("WEBDRIVER_URL", ""),
            ("ADMIN_TOKEN", "s3cret"),
        ]);
        cfg.apply_env(|k| env.get(k).map(|v| v.to_string()));
        assert_eq!(cfg.telegram_token, "123:abc");
        assert_eq!(cfg.db_path, PathBuf::from("/var/lib/fc.db"));
        assert_eq!(cfg.admin_port, 4000);
        assert_eq!(cfg.admin_token, "s3cret");
        assert_eq!(cfg.webdriver_url, "http://127.0.0.1:9515");
    }

    #[test]
    fn relative_db_path_resolves_against_data_dir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE), "db_path = \"state.db\"\n").unwrap();
        let cfg = AppConfig::load_from(dir.path()).unwrap();
        if std::env::var("DATABASE_URL").is_err() {
            assert_eq!(cfg.db_file(), dir.path().join("state.db"));
        }
        assert_eq!(cfg.pid_file(), dir.path().join("run").join("freeclaim.pid"));
    }

    #[test]
    fn default_config_serializes_back() {
        let cfg = AppConfig::default();
        let text = cfg.to_toml().unwrap();
        let back = AppConfig::parse(&text).unwrap();
        assert_eq!(back.admin_port, cfg.admin_port);
        assert_eq!(back.store_url, cfg.store_url);
    }
}
