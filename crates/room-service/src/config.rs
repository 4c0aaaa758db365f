//! Room service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::config::ObservabilityConfig;
use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default signaling (WebSocket) bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:7000";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default maximum concurrent rooms.
pub const DEFAULT_MAX_ROOMS: usize = 1000;

/// Default maximum peers in one room.
pub const DEFAULT_MAX_PEERS_PER_ROOM: usize = 50;

/// Default clock skew tolerance for room token `iat`, in seconds.
pub const DEFAULT_CLOCK_SKEW_SECONDS: u64 = 300;

/// Default grace period for graceful shutdown, in seconds.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 10;

/// Default `EnvFilter` directive when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "room_service=debug,tower_http=debug";

/// Room service configuration.
#[derive(Clone)]
pub struct Config {
    /// WebSocket signaling bind address (default: "0.0.0.0:7000").
    pub bind_address: String,

    /// Health/metrics endpoint bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Maximum concurrent rooms.
    pub max_rooms: usize,

    /// Maximum peers per room.
    pub max_peers_per_room: usize,

    /// HS256 key for room access tokens. `None` only when insecure joins
    /// are explicitly allowed.
    pub room_token_secret: Option<SecretString>,

    /// Accept every join without checking a token (development only).
    pub allow_insecure_join: bool,

    /// Clock skew tolerance for the token `iat` claim.
    pub clock_skew_seconds: u64,

    /// How long shutdown waits for rooms to drain.
    pub shutdown_grace_seconds: u64,

    /// Logging setup.
    pub observability: ObservabilityConfig,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("max_rooms", &self.max_rooms)
            .field("max_peers_per_room", &self.max_peers_per_room)
            .field(
                "room_token_secret",
                &self.room_token_secret.as_ref().map(|_| "[REDACTED]"),
            )
            .field("allow_insecure_join", &self.allow_insecure_join)
            .field("clock_skew_seconds", &self.clock_skew_seconds)
            .field("shutdown_grace_seconds", &self.shutdown_grace_seconds)
            .field("observability", &self.observability)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

fn parse_or<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

fn parse_bool(vars: &HashMap<String, String>, key: &str) -> Result<bool, ConfigError> {
    match vars.get(key).map(|s| s.trim().to_ascii_lowercase()) {
        None => Ok(false),
        Some(v) if v == "true" || v == "1" || v == "yes" => Ok(true),
        Some(v) if v == "false" || v == "0" || v == "no" || v.is_empty() => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!("{key}={v}"))),
    }
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// does not parse.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value
    /// does not parse.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let allow_insecure_join = parse_bool(vars, "RS_ALLOW_INSECURE_JOIN")?;

        let room_token_secret = match vars.get("RS_ROOM_TOKEN_SECRET") {
            Some(secret) if !secret.is_empty() => Some(SecretString::from(secret.clone())),
            _ if allow_insecure_join => None,
            _ => {
                return Err(ConfigError::MissingEnvVar(
                    "RS_ROOM_TOKEN_SECRET".to_string(),
                ))
            }
        };

        let bind_address = vars
            .get("RS_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("RS_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let max_rooms = parse_or(vars, "RS_MAX_ROOMS", DEFAULT_MAX_ROOMS)?;
        let max_peers_per_room =
            parse_or(vars, "RS_MAX_PEERS_PER_ROOM", DEFAULT_MAX_PEERS_PER_ROOM)?;
        if max_rooms == 0 || max_peers_per_room == 0 {
            return Err(ConfigError::InvalidValue(
                "room and peer limits must be greater than zero".to_string(),
            ));
        }

        let clock_skew_seconds =
            parse_or(vars, "RS_CLOCK_SKEW_SECONDS", DEFAULT_CLOCK_SKEW_SECONDS)?;
        let shutdown_grace_seconds =
            parse_or(vars, "RS_SHUTDOWN_GRACE_SECONDS", DEFAULT_SHUTDOWN_GRACE_SECONDS)?;

        let observability = ObservabilityConfig {
            log_level: vars
                .get("RUST_LOG")
                .cloned()
                .unwrap_or_else(|| DEFAULT_LOG_FILTER.to_string()),
            json_logs: parse_bool(vars, "RS_LOG_JSON")?,
        };

        Ok(Config {
            bind_address,
            health_bind_address,
            max_rooms,
            max_peers_per_room,
            room_token_secret,
            allow_insecure_join,
            clock_skew_seconds,
            shutdown_grace_seconds,
            observability,
        })
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "RS_ROOM_TOKEN_SECRET".to_string(),
            "dGVzdC1zZWNyZXQtMTIzNDU2Nzg5MA==".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_success_with_defaults() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");

        assert_eq!(
            config.room_token_secret.as_ref().unwrap().expose_secret(),
            "dGVzdC1zZWNyZXQtMTIzNDU2Nzg5MA=="
        );
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.max_rooms, DEFAULT_MAX_ROOMS);
        assert_eq!(config.max_peers_per_room, DEFAULT_MAX_PEERS_PER_ROOM);
        assert_eq!(config.clock_skew_seconds, DEFAULT_CLOCK_SKEW_SECONDS);
        assert!(!config.allow_insecure_join);
        assert!(!config.observability.json_logs);
        assert_eq!(config.observability.log_level, DEFAULT_LOG_FILTER);
    }

    #[test]
    fn test_from_vars_success_with_custom_values() {
        let mut vars = base_vars();
        vars.insert("RS_BIND_ADDRESS".to_string(), "127.0.0.1:7001".to_string());
        vars.insert(
            "RS_HEALTH_BIND_ADDRESS".to_string(),
            "127.0.0.1:8082".to_string(),
        );
        vars.insert("RS_MAX_ROOMS".to_string(), "10".to_string());
        vars.insert("RS_MAX_PEERS_PER_ROOM".to_string(), "4".to_string());
        vars.insert("RS_LOG_JSON".to_string(), "true".to_string());

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.bind_address, "127.0.0.1:7001");
        assert_eq!(config.health_bind_address, "127.0.0.1:8082");
        assert_eq!(config.max_rooms, 10);
        assert_eq!(config.max_peers_per_room, 4);
        assert!(config.observability.json_logs);
    }

    #[test]
    fn test_from_vars_missing_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(
            matches!(result, Err(ConfigError::MissingEnvVar(v)) if v == "RS_ROOM_TOKEN_SECRET")
        );
    }

    #[test]
    fn test_insecure_join_does_not_require_secret() {
        let vars = HashMap::from([(
            "RS_ALLOW_INSECURE_JOIN".to_string(),
            "true".to_string(),
        )]);
        let config = Config::from_vars(&vars).expect("Config should load successfully");
        assert!(config.allow_insecure_join);
        assert!(config.room_token_secret.is_none());
    }

    #[test]
    fn test_invalid_numbers_are_rejected() {
        let mut vars = base_vars();
        vars.insert("RS_MAX_ROOMS".to_string(), "lots".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));

        let mut vars = base_vars();
        vars.insert("RS_MAX_PEERS_PER_ROOM".to_string(), "0".to_string());
        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_debug_redacts_sensitive_fields() {
        let config = Config::from_vars(&base_vars()).expect("Config should load successfully");
        let debug_output = format!("{config:?}");

        assert!(debug_output.contains("[REDACTED]"));
        assert!(!debug_output.contains("dGVzdC1zZWNyZXQ"));
    }
}
