//! Service configuration
//!
//! Read from a TOML file, `~/.config/emobility-fleet/config.toml` unless
//! `FLEET_CONFIG` or `--config` points elsewhere. Every section is optional
//! and falls back to its defaults.
//!
//! ```toml
//! [logging]
//! level = "info"
//! format = "pretty"
//!
//! [fleet]
//! network_id = "local"
//! status_aggregation = "worst_of"
//!
//! [status_push]
//! transmission_mode = "enqueue"
//! flush_interval_secs = 10
//!
//! [[providers]]
//! id = "hubject"
//! disable_push_admin_status = true
//!
//! [authorization]
//! local_tokens = ["04A2B3C4D5"]
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::application::fleet::FleetSettings;
use crate::application::services::StatusPushConfig;
use crate::domain::ids::{AuthToken, BackendId, NetworkId, ProviderId};
use crate::domain::ports::ProviderSettings;
use crate::domain::requests::TransmissionMode;
use crate::domain::status::{AggregationStrategy, DEFAULT_MAX_STATUS_LIST_SIZE};
use crate::shared::{DomainError, DomainResult, RetryConfig};

pub const CONFIG_ENV_VAR: &str = "FLEET_CONFIG";

/// Default config location: `~/.config/emobility-fleet/config.toml`.
pub fn default_config_path() -> PathBuf {
    dirs_next::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("emobility-fleet")
        .join("config.toml")
}

/// `FLEET_CONFIG` if set, otherwise [`default_config_path`].
pub fn resolve_config_path() -> PathBuf {
    std::env::var(CONFIG_ENV_VAR)
        .map(PathBuf::from)
        .unwrap_or_else(|_| default_config_path())
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct AppConfig {
    #[validate(nested)]
    pub logging: LoggingConfig,
    #[validate(nested)]
    pub fleet: FleetConfig,
    #[validate(nested)]
    pub reservations: ReservationConfig,
    #[validate(nested)]
    pub status_push: StatusPushSection,
    #[validate(nested)]
    pub providers: Vec<ProviderConfig>,
    pub authorization: AuthorizationConfig,
}

impl AppConfig {
    /// Parse and validate the file at `path`.
    pub fn load(path: &Path) -> DomainResult<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> DomainResult<Self> {
        let config: AppConfig = toml::from_str(content)?;
        config.validate()?;
        config.authorization.tokens()?;
        Ok(config)
    }

    /// Write the configuration back as TOML, creating parent directories.
    pub fn save(&self, path: &Path) -> DomainResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| DomainError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn network_id(&self) -> DomainResult<NetworkId> {
        NetworkId::new(self.fleet.network_id.clone())
    }

    pub fn fleet_settings(&self) -> FleetSettings {
        FleetSettings {
            max_status_list_size: self.fleet.max_status_list_size,
            max_admin_status_list_size: self.fleet.max_admin_status_list_size,
            max_reservation_duration: Duration::from_secs(self.fleet.max_reservation_duration_secs),
            status_aggregation: self.fleet.status_aggregation,
        }
    }

    pub fn provider_settings(&self) -> DomainResult<HashMap<ProviderId, ProviderSettings>> {
        self.providers
            .iter()
            .map(|p| Ok((ProviderId::new(p.id.clone())?, p.settings)))
            .collect()
    }

    pub fn status_push_config(&self) -> DomainResult<StatusPushConfig> {
        let section = &self.status_push;
        Ok(StatusPushConfig {
            transmission_mode: section.transmission_mode,
            flush_interval: Duration::from_secs(section.flush_interval_secs),
            retry: RetryConfig {
                max_attempts: section.retry_max_attempts,
                initial_delay: Duration::from_millis(section.retry_initial_delay_ms),
                ..RetryConfig::default()
            },
            providers: self.provider_settings()?,
        })
    }

    pub fn expiry_check_interval(&self) -> Duration {
        Duration::from_secs(self.reservations.expiry_check_interval_secs)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    #[validate(length(min = 1, message = "log level must not be empty"))]
    pub level: String,
    /// `pretty` or `json`
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct FleetConfig {
    #[validate(length(min = 1, message = "network_id must not be empty"))]
    pub network_id: String,
    #[validate(range(min = 1, max = 10_000))]
    pub max_status_list_size: usize,
    #[validate(range(min = 1, max = 10_000))]
    pub max_admin_status_list_size: usize,
    #[validate(range(min = 1, message = "reservations must last at least one second"))]
    pub max_reservation_duration_secs: u64,
    pub status_aggregation: AggregationStrategy,
}

impl Default for FleetConfig {
    fn default() -> Self {
        let settings = FleetSettings::default();
        Self {
            network_id: "local".to_string(),
            max_status_list_size: DEFAULT_MAX_STATUS_LIST_SIZE,
            max_admin_status_list_size: DEFAULT_MAX_STATUS_LIST_SIZE,
            max_reservation_duration_secs: settings.max_reservation_duration.as_secs(),
            status_aggregation: settings.status_aggregation,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ReservationConfig {
    /// Period of the expiry sweep
    #[validate(range(min = 1))]
    pub expiry_check_interval_secs: u64,
}

impl Default for ReservationConfig {
    fn default() -> Self {
        Self {
            expiry_check_interval_secs: 60,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StatusPushSection {
    pub enabled: bool,
    pub transmission_mode: TransmissionMode,
    #[validate(range(min = 1))]
    pub flush_interval_secs: u64,
    #[validate(range(min = 1, max = 10))]
    pub retry_max_attempts: u32,
    pub retry_initial_delay_ms: u64,
}

impl Default for StatusPushSection {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            enabled: true,
            transmission_mode: TransmissionMode::Direct,
            flush_interval_secs: 5,
            retry_max_attempts: retry.max_attempts,
            retry_initial_delay_ms: retry.initial_delay.as_millis() as u64,
        }
    }
}

/// Kill-switches of one e-mobility provider. `id` names both the provider
/// (for status pushes) and its authorization service.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct ProviderConfig {
    #[validate(length(min = 1, message = "provider id must not be empty"))]
    pub id: String,
    #[serde(flatten)]
    pub settings: ProviderSettings,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthorizationConfig {
    /// Register the local whitelist service with the router
    pub enabled: bool,
    pub backend_id: String,
    /// Lower is asked first
    pub priority: u32,
    pub local_tokens: Vec<String>,
    pub blocked_tokens: Vec<String>,
}

impl Default for AuthorizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend_id: "local".to_string(),
            priority: 100,
            local_tokens: Vec::new(),
            blocked_tokens: Vec::new(),
        }
    }
}

impl AuthorizationConfig {
    pub fn backend_id(&self) -> DomainResult<BackendId> {
        BackendId::new(self.backend_id.clone())
    }

    /// Allowed and blocked tokens, parsed.
    pub fn tokens(&self) -> DomainResult<(Vec<AuthToken>, Vec<AuthToken>)> {
        let parse = |list: &[String]| -> DomainResult<Vec<AuthToken>> {
            list.iter().map(|t| AuthToken::new(t.clone())).collect()
        };
        Ok((parse(&self.local_tokens)?, parse(&self.blocked_tokens)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn empty_document_yields_defaults() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.fleet.max_status_list_size, 15);
        assert_eq!(
            config.fleet_settings().max_reservation_duration,
            Duration::from_secs(1800)
        );
        assert_eq!(config.expiry_check_interval(), Duration::from_secs(60));
        assert!(config.authorization.enabled);
    }

    #[test]
    fn parses_sections_and_providers() {
        let config = AppConfig::parse(
            r#"
[fleet]
network_id = "eu"
status_aggregation = "availability"
max_reservation_duration_secs = 900

[status_push]
transmission_mode = "enqueue"
flush_interval_secs = 10

[[providers]]
id = "hubject"
disable_push_admin_status = true

[authorization]
local_tokens = ["04A2B3C4D5"]
blocked_tokens = ["DEADBEEF"]
"#,
        )
        .unwrap();

        assert_eq!(config.network_id().unwrap().as_str(), "eu");
        assert_eq!(
            config.fleet_settings().status_aggregation,
            AggregationStrategy::Availability
        );

        let push = config.status_push_config().unwrap();
        assert_eq!(push.transmission_mode, TransmissionMode::Enqueue);
        assert_eq!(push.flush_interval, Duration::from_secs(10));
        let hubject = push.providers[&"hubject".parse::<ProviderId>().unwrap()];
        assert!(hubject.disable_push_admin_status);
        assert!(!hubject.disable_push_status);

        let (allowed, blocked) = config.authorization.tokens().unwrap();
        assert_eq!(allowed.len(), 1);
        assert_eq!(blocked[0].as_str(), "DEADBEEF");
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        let err = AppConfig::parse("[fleet]\nmax_status_list_size = 0\n").unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));

        let err = AppConfig::parse("[reservations]\nexpiry_check_interval_secs = 0\n").unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn unknown_aggregation_is_a_parse_error() {
        let err = AppConfig::parse("[fleet]\nstatus_aggregation = \"best_of\"\n").unwrap_err();
        assert!(matches!(err, DomainError::Config(_)));
    }

    #[test]
    fn load_and_save_round_trip_through_a_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = AppConfig::default();
        config.fleet.network_id = "saved".to_string();
        config.save(&path).unwrap();

        let loaded = AppConfig::load(&path).unwrap();
        assert_eq!(loaded.fleet.network_id, "saved");

        let mut broken = tempfile::NamedTempFile::new().unwrap();
        broken.write_all(b"[fleet\n").unwrap();
        assert!(AppConfig::load(broken.path()).is_err());
    }

    #[test]
    fn default_path_ends_with_crate_dir() {
        let path = default_config_path();
        assert!(path.ends_with("emobility-fleet/config.toml"));
    }
}
