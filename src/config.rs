/// Configuration management for the help-desk account service
use crate::error::{AuthError, AuthResult};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::PathBuf;

/// Main server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub service: ServiceConfig,
    pub storage: StorageConfig,
    pub credentials: CredentialConfig,
    pub sessions: SessionConfig,
    pub rate_limit: RateLimitConfig,
    pub jobs: JobConfig,
    pub logging: LoggingConfig,
}

/// Service-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    pub hostname: String,
    pub port: u16,
    pub version: String,
}

/// Storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    pub data_directory: PathBuf,
    pub account_db: PathBuf,
    pub max_connections: u32,
}

/// One-time code and temporary password settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialConfig {
    /// Validity window of a reset code, in seconds
    pub one_time_code_ttl: u64,
    /// Number of characters in a generated reset code
    pub one_time_code_length: usize,
    /// Validity window of an administrator-issued temporary password, in seconds
    pub temporary_password_ttl: u64,
}

/// Keyed session settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Session lifetime in seconds
    pub ttl: u64,
}

/// Login and reset attempt limits
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub enabled: bool,
    pub attempts_per_minute: u32,
    pub burst: u32,
}

/// Background job settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobConfig {
    /// Interval between expired-credential sweeps, in seconds
    pub cleanup_interval: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

/// Longest configurable lifetime: ten years
pub const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 60 * 60;

/// Convert a lifetime in seconds, rejecting values chrono cannot represent
fn lifetime(name: &str, secs: u64) -> AuthResult<chrono::Duration> {
    i64::try_from(secs)
        .ok()
        .and_then(chrono::Duration::try_seconds)
        .ok_or_else(|| AuthError::Validation(format!("{} of {}s is out of range", name, secs)))
}

impl CredentialConfig {
    pub fn one_time_code_ttl(&self) -> AuthResult<chrono::Duration> {
        lifetime("One-time code lifetime", self.one_time_code_ttl)
    }

    pub fn temporary_password_ttl(&self) -> AuthResult<chrono::Duration> {
        lifetime("Temporary password lifetime", self.temporary_password_ttl)
    }
}

impl Default for CredentialConfig {
    fn default() -> Self {
        Self {
            one_time_code_ttl: 900,
            one_time_code_length: 12,
            temporary_password_ttl: 86400,
        }
    }
}

impl SessionConfig {
    pub fn ttl(&self) -> AuthResult<chrono::Duration> {
        lifetime("Session lifetime", self.ttl)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        let data_directory = PathBuf::from("./data");
        Self {
            service: ServiceConfig {
                hostname: "127.0.0.1".to_string(),
                port: 8080,
                version: env!("CARGO_PKG_VERSION").to_string(),
            },
            storage: StorageConfig {
                account_db: data_directory.join("accounts.sqlite"),
                data_directory,
                max_connections: 10,
            },
            credentials: CredentialConfig::default(),
            sessions: SessionConfig { ttl: 43200 },
            rate_limit: RateLimitConfig {
                enabled: true,
                attempts_per_minute: 10,
                burst: 5,
            },
            jobs: JobConfig {
                cleanup_interval: 600,
            },
            logging: LoggingConfig {
                level: "info".to_string(),
                json: false,
            },
        }
    }
}

/// Read an env var and parse it, falling back to `default` when unset.
fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> AuthResult<T> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| AuthError::Validation(format!("Invalid value for {}: {}", name, raw))),
        Err(_) => Ok(default),
    }
}

impl ServerConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> AuthResult<Self> {
        dotenv::dotenv().ok();

        let defaults = ServerConfig::default();

        let hostname = env::var("HELPDESK_HOSTNAME").unwrap_or(defaults.service.hostname);
        let port = parse_var("HELPDESK_PORT", defaults.service.port)?;

        let data_directory: PathBuf = env::var("HELPDESK_DATA_DIRECTORY")
            .map(PathBuf::from)
            .unwrap_or(defaults.storage.data_directory);
        let account_db = env::var("HELPDESK_ACCOUNT_DB_LOCATION")
            .map(PathBuf::from)
            .unwrap_or_else(|_| data_directory.join("accounts.sqlite"));
        let max_connections =
            parse_var("HELPDESK_DB_MAX_CONNECTIONS", defaults.storage.max_connections)?;

        let one_time_code_ttl = parse_var(
            "HELPDESK_ONE_TIME_CODE_TTL",
            defaults.credentials.one_time_code_ttl,
        )?;
        let one_time_code_length = parse_var(
            "HELPDESK_ONE_TIME_CODE_LENGTH",
            defaults.credentials.one_time_code_length,
        )?;
        let temporary_password_ttl = parse_var(
            "HELPDESK_TEMPORARY_PASSWORD_TTL",
            defaults.credentials.temporary_password_ttl,
        )?;

        let session_ttl = parse_var("HELPDESK_SESSION_TTL", defaults.sessions.ttl)?;

        let rate_limit_enabled =
            parse_var("HELPDESK_RATE_LIMITS_ENABLED", defaults.rate_limit.enabled)?;
        let attempts_per_minute = parse_var(
            "HELPDESK_ATTEMPTS_PER_MINUTE",
            defaults.rate_limit.attempts_per_minute,
        )?;
        let burst = parse_var("HELPDESK_ATTEMPT_BURST", defaults.rate_limit.burst)?;

        let cleanup_interval =
            parse_var("HELPDESK_CLEANUP_INTERVAL", defaults.jobs.cleanup_interval)?;

        let level = env::var("RUST_LOG").unwrap_or(defaults.logging.level);
        let json = env::var("HELPDESK_LOG_FORMAT")
            .map(|f| f.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        Ok(ServerConfig {
            service: ServiceConfig {
                hostname,
                port,
                version: defaults.service.version,
            },
            storage: StorageConfig {
                data_directory,
                account_db,
                max_connections,
            },
            credentials: CredentialConfig {
                one_time_code_ttl,
                one_time_code_length,
                temporary_password_ttl,
            },
            sessions: SessionConfig { ttl: session_ttl },
            rate_limit: RateLimitConfig {
                enabled: rate_limit_enabled,
                attempts_per_minute,
                burst,
            },
            jobs: JobConfig { cleanup_interval },
            logging: LoggingConfig { level, json },
        })
    }

    /// Validate configuration
    pub fn validate(&self) -> AuthResult<()> {
        if self.service.hostname.is_empty() {
            return Err(AuthError::Validation("Hostname cannot be empty".to_string()));
        }

        // Shorter codes are guessable within the attempt budget
        if self.credentials.one_time_code_length < 8 {
            return Err(AuthError::Validation(
                "One-time code length must be at least 8 characters".to_string(),
            ));
        }

        if self.credentials.one_time_code_ttl == 0 || self.sessions.ttl == 0 {
            return Err(AuthError::Validation(
                "Code and session lifetimes must be positive".to_string(),
            ));
        }

        if self.credentials.temporary_password_ttl == 0 || self.jobs.cleanup_interval == 0 {
            return Err(AuthError::Validation(
                "Temporary password lifetime and cleanup interval must be positive".to_string(),
            ));
        }

        let lifetimes = [
            self.credentials.one_time_code_ttl,
            self.credentials.temporary_password_ttl,
            self.sessions.ttl,
        ];
        if lifetimes.iter().any(|&secs| secs > MAX_LIFETIME_SECS) {
            return Err(AuthError::Validation(format!(
                "Lifetimes cannot exceed {} seconds",
                MAX_LIFETIME_SECS
            )));
        }

        if self.storage.max_connections == 0 {
            return Err(AuthError::Validation(
                "Database pool needs at least one connection".to_string(),
            ));
        }

        Ok(())
    }
}
