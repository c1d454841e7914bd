//! Board service configuration.
//!
//! Configuration is loaded from environment variables. All sensitive
//! fields are redacted in Debug output.

use common::secret::SecretString;
use common::types::NodeId;
use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default socket gateway bind address.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:3002";

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default node heartbeat TTL in milliseconds.
pub const DEFAULT_HEARTBEAT_TTL_MS: u64 = 15_000;

/// Default presentation session TTL (12 hours).
pub const DEFAULT_PRESENTATION_TTL_SECONDS: u64 = 43_200;

/// Default recording entry TTL (4 hours).
pub const DEFAULT_RECORDING_TTL_SECONDS: u64 = 14_400;

/// Default syncer assignment TTL (24 hours).
pub const DEFAULT_SYNCER_TTL_SECONDS: u64 = 86_400;

/// Default member record TTL (24 hours).
pub const DEFAULT_MEMBER_TTL_SECONDS: u64 = 86_400;

/// Default wait for a remote node to claim a forwarded recording stop.
pub const DEFAULT_FORWARD_TIMEOUT_MS: u64 = 3_000;

/// Default node id prefix.
pub const DEFAULT_NODE_ID_PREFIX: &str = "board";

/// Board service configuration.
#[derive(Clone)]
pub struct Config {
    /// Redis connection URL. `None` selects the in-process fallback store.
    /// Protected by `SecretString` to prevent accidental logging.
    pub redis_url: Option<SecretString>,

    /// Unique identifier for this process.
    pub node_id: NodeId,

    /// Socket gateway bind address (default: "0.0.0.0:3002").
    pub bind_address: String,

    /// Health endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    /// Heartbeat key TTL in milliseconds (default: 15000).
    pub heartbeat_ttl_ms: u64,

    pub presentation_ttl_seconds: u64,
    pub recording_ttl_seconds: u64,
    pub syncer_ttl_seconds: u64,
    pub member_ttl_seconds: u64,

    /// How long the origin node waits for a forwarded stop to be claimed.
    pub forward_timeout_ms: u64,

    /// HS256 secret used to verify socket tokens.
    pub jwt_secret: SecretString,

    /// Emit JSON log lines instead of the human-readable format.
    pub log_json: bool,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field(
                "redis_url",
                &self.redis_url.as_ref().map(|_| "[REDACTED]"),
            )
            .field("node_id", &self.node_id)
            .field("bind_address", &self.bind_address)
            .field("health_bind_address", &self.health_bind_address)
            .field("heartbeat_ttl_ms", &self.heartbeat_ttl_ms)
            .field("presentation_ttl_seconds", &self.presentation_ttl_seconds)
            .field("recording_ttl_seconds", &self.recording_ttl_seconds)
            .field("syncer_ttl_seconds", &self.syncer_ttl_seconds)
            .field("member_ttl_seconds", &self.member_ttl_seconds)
            .field("forward_timeout_ms", &self.forward_timeout_ms)
            .field("jwt_secret", &"[REDACTED]")
            .field("log_json", &self.log_json)
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

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let redis_url = vars
            .get("REDIS_URL")
            .filter(|s| !s.trim().is_empty())
            .map(|s| SecretString::from(s.clone()));

        let jwt_secret_raw = vars
            .get("BOARD_JWT_SECRET")
            .ok_or_else(|| ConfigError::MissingEnvVar("BOARD_JWT_SECRET".to_string()))?;
        if jwt_secret_raw.is_empty() {
            return Err(ConfigError::InvalidValue(
                "BOARD_JWT_SECRET must not be empty".to_string(),
            ));
        }
        let jwt_secret = SecretString::from(jwt_secret_raw.clone());

        let bind_address = vars
            .get("BOARD_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string());

        let health_bind_address = vars
            .get("BOARD_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let heartbeat_ttl_ms = vars
            .get("BOARD_HEARTBEAT_TTL_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_HEARTBEAT_TTL_MS);
        if heartbeat_ttl_ms < 1_000 {
            return Err(ConfigError::InvalidValue(format!(
                "BOARD_HEARTBEAT_TTL_MS must be at least 1000, got {heartbeat_ttl_ms}"
            )));
        }

        let presentation_ttl_seconds = vars
            .get("BOARD_PRESENTATION_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_PRESENTATION_TTL_SECONDS);

        let recording_ttl_seconds = vars
            .get("BOARD_RECORDING_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_RECORDING_TTL_SECONDS);

        let syncer_ttl_seconds = vars
            .get("BOARD_SYNCER_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_SYNCER_TTL_SECONDS);

        let member_ttl_seconds = vars
            .get("BOARD_MEMBER_TTL_SECONDS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_MEMBER_TTL_SECONDS);

        let forward_timeout_ms = vars
            .get("BOARD_FORWARD_TIMEOUT_MS")
            .and_then(|s| s.parse().ok())
            .unwrap_or(DEFAULT_FORWARD_TIMEOUT_MS);

        let log_json = vars
            .get("BOARD_LOG_JSON")
            .is_some_and(|s| s.eq_ignore_ascii_case("true") || s == "1");

        let node_id = NodeId::new(vars.get("BOARD_NODE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_NODE_ID_PREFIX}-{hostname}-{short_suffix}")
        }));

        Ok(Config {
            redis_url,
            node_id,
            bind_address,
            health_bind_address,
            heartbeat_ttl_ms,
            presentation_ttl_seconds,
            recording_ttl_seconds,
            syncer_ttl_seconds,
            member_ttl_seconds,
            forward_timeout_ms,
            jwt_secret,
            log_json,
        })
    }

    pub fn heartbeat_ttl(&self) -> Duration {
        Duration::from_millis(self.heartbeat_ttl_ms)
    }

    pub fn forward_timeout(&self) -> Duration {
        Duration::from_millis(self.forward_timeout_ms)
    }

    /// Per-record TTLs handed to the cluster service.
    pub fn state_ttls(&self) -> crate::cluster::StateTtls {
        crate::cluster::StateTtls {
            presentation: Duration::from_secs(self.presentation_ttl_seconds),
            recording: Duration::from_secs(self.recording_ttl_seconds),
            syncer: Duration::from_secs(self.syncer_ttl_seconds),
            member: Duration::from_secs(self.member_ttl_seconds),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use common::secret::ExposeSecret;

    fn base_vars() -> HashMap<String, String> {
        HashMap::from([(
            "BOARD_JWT_SECRET".to_string(),
            "test-signing-secret".to_string(),
        )])
    }

    #[test]
    fn test_from_vars_defaults() {
        let config = Config::from_vars(&base_vars()).unwrap();

        assert!(config.redis_url.is_none());
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert_eq!(config.health_bind_address, DEFAULT_HEALTH_BIND_ADDRESS);
        assert_eq!(config.heartbeat_ttl_ms, DEFAULT_HEARTBEAT_TTL_MS);
        assert_eq!(config.forward_timeout(), Duration::from_secs(3));
        assert!(config.node_id.as_str().starts_with("board-"));
        assert!(!config.log_json);
    }

    #[test]
    fn test_from_vars_overrides() {
        let mut vars = base_vars();
        vars.insert("REDIS_URL".to_string(), "redis://cache:6379".to_string());
        vars.insert("BOARD_NODE_ID".to_string(), "board-a".to_string());
        vars.insert("BOARD_HEARTBEAT_TTL_MS".to_string(), "6000".to_string());
        vars.insert("BOARD_SYNCER_TTL_SECONDS".to_string(), "60".to_string());
        vars.insert("BOARD_LOG_JSON".to_string(), "true".to_string());

        let config = Config::from_vars(&vars).unwrap();

        assert_eq!(
            config.redis_url.as_ref().unwrap().expose_secret(),
            "redis://cache:6379"
        );
        assert_eq!(config.node_id, NodeId::new("board-a"));
        assert_eq!(config.heartbeat_ttl(), Duration::from_secs(6));
        assert_eq!(config.state_ttls().syncer, Duration::from_secs(60));
        assert!(config.log_json);
    }

    #[test]
    fn test_empty_redis_url_selects_fallback() {
        let mut vars = base_vars();
        vars.insert("REDIS_URL".to_string(), "  ".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert!(config.redis_url.is_none());
    }

    #[test]
    fn test_missing_jwt_secret() {
        let result = Config::from_vars(&HashMap::new());
        assert!(matches!(result, Err(ConfigError::MissingEnvVar(name)) if name == "BOARD_JWT_SECRET"));
    }

    #[test]
    fn test_heartbeat_ttl_lower_bound() {
        let mut vars = base_vars();
        vars.insert("BOARD_HEARTBEAT_TTL_MS".to_string(), "500".to_string());

        assert!(matches!(
            Config::from_vars(&vars),
            Err(ConfigError::InvalidValue(_))
        ));
    }

    #[test]
    fn test_invalid_numbers_fall_back_to_defaults() {
        let mut vars = base_vars();
        vars.insert("BOARD_RECORDING_TTL_SECONDS".to_string(), "soon".to_string());

        let config = Config::from_vars(&vars).unwrap();
        assert_eq!(config.recording_ttl_seconds, DEFAULT_RECORDING_TTL_SECONDS);
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert(
            "REDIS_URL".to_string(),
            "redis://:hunter2@cache:6379".to_string(),
        );

        let config = Config::from_vars(&vars).unwrap();
        let debug = format!("{config:?}");

        assert!(!debug.contains("hunter2"));
        assert!(!debug.contains("test-signing-secret"));
        assert!(debug.contains("[REDACTED]"));
    }
}
