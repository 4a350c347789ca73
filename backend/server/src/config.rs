use std::{env, fmt::Display, fs::read_to_string, path::PathBuf, str::FromStr, time::Duration};

use chrono::TimeDelta;
use thiserror::Error;
use tracing::{info, warn};

/// `LEDGER_PATH` value that keeps the ledger in RAM only.
pub const IN_MEMORY: &str = "memory";

#[derive(Error, Debug)]
#[error("Invalid {key} value {value:?}: {reason}")]
pub struct ConfigError {
    key: &'static str,
    value: String,
    reason: String,
}

#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub ledger_path: Option<PathBuf>,
    pub model_url: Option<String>,
    pub session_ttl: TimeDelta,
    pub sweep_interval: Duration,
    pub cors_max_age: Duration,
    pub admin_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            ledger_path: None,
            model_url: None,
            session_ttl: TimeDelta::hours(24),
            sweep_interval: Duration::from_secs(300),
            cors_max_age: Duration::from_secs(60 * 60),
            admin_key: None,
        }
    }
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let ledger_path: String = try_load("LEDGER_PATH", "ledger.json")?;
        let session_hours: i64 = try_load("SESSION_TTL_HOURS", "24")?;
        let sweep_secs: u64 = try_load("SWEEP_INTERVAL_SECS", "300")?;

        if session_hours <= 0 {
            return Err(ConfigError {
                key: "SESSION_TTL_HOURS",
                value: session_hours.to_string(),
                reason: "must be positive".into(),
            });
        }

        if sweep_secs == 0 {
            return Err(ConfigError {
                key: "SWEEP_INTERVAL_SECS",
                value: "0".into(),
                reason: "must be positive".into(),
            });
        }

        Ok(Self {
            port: try_load("RUST_PORT", "8080")?,
            ledger_path: (ledger_path != IN_MEMORY).then(|| PathBuf::from(ledger_path)),
            model_url: var("MODEL_URL").filter(|url| !url.trim().is_empty()),
            session_ttl: TimeDelta::hours(session_hours),
            sweep_interval: Duration::from_secs(sweep_secs),
            cors_max_age: Duration::from_secs(try_load("CORS_MAX_AGE_SECS", "3600")?),
            admin_key: read_secret("ADMIN_SIGNUP_KEY"),
        })
    }
}

fn var(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn try_load<T: FromStr>(key: &'static str, default: &str) -> Result<T, ConfigError>
where
    T::Err: Display,
{
    let value = var(key).unwrap_or_else(|| {
        info!("{key} not set, using default: {default}");
        default.to_string()
    });

    value.parse().map_err(|e: T::Err| ConfigError {
        key,
        reason: e.to_string(),
        value,
    })
}

/// Docker secret first, then a plain environment variable of the same name.
fn read_secret(secret_name: &str) -> Option<String> {
    let path = format!("/run/secrets/{secret_name}");

    read_to_string(&path)
        .map(|s| s.trim().to_string())
        .ok()
        .or_else(|| var(secret_name))
        .filter(|secret| !secret.is_empty())
        .or_else(|| {
            warn!("{secret_name} not provided, feature disabled");
            None
        })
}

#[cfg(test)]
mod tests {
    use super::try_load;

    #[test]
    fn default_is_parsed_when_unset() {
        let port: u16 = try_load("FOODCAST_TEST_UNSET_PORT", "8080").unwrap();
        assert_eq!(port, 8080);
    }

    #[test]
    fn bad_default_reports_key() {
        let err = try_load::<u16>("FOODCAST_TEST_UNSET_PORT", "eighty").unwrap_err();
        assert!(err.to_string().contains("FOODCAST_TEST_UNSET_PORT"));
    }
}
