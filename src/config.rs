use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{error, info, warn};

use crate::services::PresenceSettings;
use crate::ws::SyncSettings;

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// CORS allowed origins, comma separated
    pub cors_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// JWT secret key. Without it every caller is anonymous.
    pub auth_jwt_secret: Option<String>,

    /// Database URL. Without it documents live in memory.
    pub db_url: Option<String>,

    /// Origin share URLs point at
    #[serde(default = "default_app_origin")]
    pub app_origin: String,

    /// Blob-upload endpoint
    pub upload_url: Option<String>,

    /// Origin relative upload URLs are resolved against
    pub upload_file_origin: Option<String>,

    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,

    #[serde(default = "default_presence_stale_ms")]
    pub presence_stale_ms: u64,

    #[serde(default = "default_autosave_debounce_ms")]
    pub autosave_debounce_ms: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        match envy::from_env::<Config>() {
            Ok(config) => {
                info!("✅ Configuration loaded successfully");
                Ok(config)
            }
            Err(e) => {
                error!("❌ Failed to load configuration: {}", e);
                Err(ConfigError::EnvError(e))
            }
        }
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    pub fn cors_origin_list(&self) -> Vec<String> {
        self.cors_origins
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|o| !o.is_empty())
            .map(str::to_string)
            .collect()
    }

    /// Timing of autosave and presence for every session. Zero timings fall
    /// back to their defaults.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            autosave_debounce: non_zero_millis(
                "AUTOSAVE_DEBOUNCE_MS",
                self.autosave_debounce_ms,
                default_autosave_debounce_ms(),
            ),
            presence: PresenceSettings {
                heartbeat_interval: non_zero_millis(
                    "HEARTBEAT_INTERVAL_MS",
                    self.heartbeat_interval_ms,
                    default_heartbeat_interval_ms(),
                ),
                stale_after: non_zero_millis("PRESENCE_STALE_MS", self.presence_stale_ms, default_presence_stale_ms()),
            },
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            cors_origins: None,
            auth_jwt_secret: None,
            db_url: None,
            app_origin: default_app_origin(),
            upload_url: None,
            upload_file_origin: None,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            presence_stale_ms: default_presence_stale_ms(),
            autosave_debounce_ms: default_autosave_debounce_ms(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

fn non_zero_millis(name: &str, value: u64, default: u64) -> Duration {
    if value == 0 {
        warn!("{} must be positive, using {} ms", name, default);
        Duration::from_millis(default)
    } else {
        Duration::from_millis(value)
    }
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    3000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_app_origin() -> String {
    "http://localhost:3000".to_string()
}

fn default_heartbeat_interval_ms() -> u64 {
    10_000
}

fn default_presence_stale_ms() -> u64 {
    30_000
}

fn default_autosave_debounce_ms() -> u64 {
    60_000
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_sync_timings() {
        let settings = Config::default().sync_settings();
        assert_eq!(settings, SyncSettings::default());
        assert_eq!(settings.presence.heartbeat_interval, Duration::from_secs(10));
        assert_eq!(settings.presence.stale_after, Duration::from_secs(30));
        assert_eq!(settings.autosave_debounce, Duration::from_secs(60));
    }

    #[test]
    fn envy_fills_missing_fields_with_defaults() {
        let vars = vec![
            ("PORT".to_string(), "8080".to_string()),
            ("AUTOSAVE_DEBOUNCE_MS".to_string(), "500".to_string()),
            ("CORS_ORIGINS".to_string(), "https://a.example.com, https://b.example.com".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();

        assert_eq!(config.server_address(), "0.0.0.0:8080");
        assert_eq!(config.sync_settings().autosave_debounce, Duration::from_millis(500));
        assert_eq!(config.heartbeat_interval_ms, 10_000);
        assert_eq!(config.cors_origin_list(), vec!["https://a.example.com", "https://b.example.com"]);
        assert!(config.is_development());
    }

    #[test]
    fn zero_timings_fall_back_to_defaults() {
        let vars = vec![
            ("HEARTBEAT_INTERVAL_MS".to_string(), "0".to_string()),
            ("PRESENCE_STALE_MS".to_string(), "0".to_string()),
            ("AUTOSAVE_DEBOUNCE_MS".to_string(), "0".to_string()),
        ];
        let config: Config = envy::from_iter(vars).unwrap();

        assert_eq!(config.sync_settings(), SyncSettings::default());
    }

    #[test]
    fn env_errors_are_described() {
        let vars = vec![("PORT".to_string(), "not-a-port".to_string())];
        let err = ConfigError::from(envy::from_iter::<_, Config>(vars).unwrap_err());
        assert!(err.to_string().starts_with("Environment variable error:"));
    }
}
