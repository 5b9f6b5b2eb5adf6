//! Application configuration

use std::env;
use std::net::SocketAddr;
use std::time::Duration;

/// Log output format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    // Server
    pub bind_address: SocketAddr,
    pub shutdown_grace_secs: u64,

    // Conflict resolution
    pub move_jitter_max_ms: u64,
    pub race_followup_delay_ms: u64,

    // Liveness
    pub heartbeat_interval_secs: u64,
    pub heartbeat_max_missed: u32,

    // Logging
    pub stats_interval_secs: u64,
    pub log_format: LogFormat,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        let bind_address = match (env::var("BIND_ADDRESS"), env::var("PORT")) {
            (Ok(addr), _) => addr,
            (Err(_), Ok(port)) => format!("0.0.0.0:{port}"),
            _ => "0.0.0.0:8080".to_string(),
        };

        Ok(Self {
            // Server
            bind_address: bind_address
                .parse()
                .map_err(|_| ConfigError::Invalid("BIND_ADDRESS must be a host:port socket address"))?,
            shutdown_grace_secs: env::var("SHUTDOWN_GRACE_SECS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            // Conflict resolution
            move_jitter_max_ms: env::var("MOVE_JITTER_MAX_MS")
                .unwrap_or_else(|_| "20".to_string())
                .parse()
                .unwrap_or(20),
            race_followup_delay_ms: env::var("RACE_FOLLOWUP_DELAY_MS")
                .unwrap_or_else(|_| "5".to_string())
                .parse()
                .unwrap_or(5),

            // Liveness
            heartbeat_interval_secs: env::var("HEARTBEAT_INTERVAL_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .unwrap_or(30),
            heartbeat_max_missed: {
                let missed = env::var("HEARTBEAT_MAX_MISSED")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()
                    .unwrap_or(1);
                if missed == 0 {
                    return Err(ConfigError::Invalid("HEARTBEAT_MAX_MISSED must be at least 1"));
                }
                missed
            },

            // Logging
            stats_interval_secs: env::var("STATS_INTERVAL_SECS")
                .unwrap_or_else(|_| "60".to_string())
                .parse()
                .unwrap_or(60),
            log_format: match env::var("LOG_FORMAT") {
                Ok(format) if format.eq_ignore_ascii_case("json") => LogFormat::Json,
                _ => LogFormat::Pretty,
            },
        })
    }

    pub fn move_jitter_max(&self) -> Duration {
        Duration::from_millis(self.move_jitter_max_ms)
    }

    pub fn race_followup_delay(&self) -> Duration {
        Duration::from_millis(self.race_followup_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_secs.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// `None` disables the periodic statistics log
    pub fn stats_interval(&self) -> Option<Duration> {
        (self.stats_interval_secs > 0).then(|| Duration::from_secs(self.stats_interval_secs))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([0, 0, 0, 0], 8080)),
            shutdown_grace_secs: 5,
            move_jitter_max_ms: 20,
            race_followup_delay_ms: 5,
            heartbeat_interval_secs: 30,
            heartbeat_max_missed: 1,
            stats_interval_secs: 60,
            log_format: LogFormat::Pretty,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}
