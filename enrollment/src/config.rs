//! Configuration management for the enrollment service.
//!
//! Loads configuration from environment variables with sensible defaults.

use serde::{Deserialize, Serialize};
use std::env;
use std::time::Duration;

/// Application configuration loaded from environment variables.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Round scheduler configuration
    pub scheduler: SchedulerConfig,
    /// Mail configuration
    pub mail: MailConfig,
    /// Logging and metrics configuration
    pub observability: ObservabilityConfig,
}

/// Round scheduler configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Seconds between controller ticks
    pub tick_secs: u64,
}

impl SchedulerConfig {
    /// Tick period
    #[must_use]
    pub const fn period(&self) -> Duration {
        Duration::from_secs(self.tick_secs)
    }
}

/// Mail configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MailConfig {
    /// Sender address for every outgoing mail
    pub from_address: String,
    /// Recipient of the aggregate draw audit mail
    pub audit_address: String,
    /// SMTP relay; mails are only logged when absent
    pub smtp: Option<SmtpConfig>,
}

/// SMTP relay configuration
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay host
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Login
    pub username: String,
    /// Password
    pub password: String,
}

impl std::fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Logging and metrics configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    /// Log filter directive (trace, debug, info, warn, error)
    pub log_level: String,
    /// Metrics server host (for Prometheus scraping)
    pub metrics_host: String,
    /// Metrics server port
    pub metrics_port: u16,
}

impl Config {
    /// Load configuration from environment variables.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    ///
    /// Unset or unparsable values fall back to their defaults.
    #[must_use]
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let smtp = lookup("SMTP_HOST").map(|host| SmtpConfig {
            host,
            port: lookup("SMTP_PORT")
                .and_then(|s| s.parse().ok())
                .unwrap_or(587),
            username: lookup("SMTP_USERNAME").unwrap_or_default(),
            password: lookup("SMTP_PASSWORD").unwrap_or_default(),
        });

        Self {
            scheduler: SchedulerConfig {
                tick_secs: lookup("SCHEDULER_TICK_SECS")
                    .and_then(|s| s.parse().ok())
                    .filter(|secs| *secs > 0)
                    .unwrap_or(60),
            },
            mail: MailConfig {
                from_address: lookup("MAIL_FROM_ADDRESS")
                    .unwrap_or_else(|| "registrar@localhost".to_string()),
                audit_address: lookup("AUDIT_MAIL_ADDRESS")
                    .unwrap_or_else(|| "audit@localhost".to_string()),
                smtp,
            },
            observability: ObservabilityConfig {
                log_level: lookup("RUST_LOG").unwrap_or_else(|| "info".to_string()),
                metrics_host: lookup("METRICS_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
                metrics_port: lookup("METRICS_PORT")
                    .and_then(|s| s.parse().ok())
                    .unwrap_or(9090),
            },
        }
    }
}
