use chrono_tz::Tz;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::time::Duration;

use crate::Error;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    pub server: ServerConfig,
    pub cron: CronConfig,
    pub scaling: ScalingConfig,
    pub kube: KubeConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    pub addr: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CronConfig {
    /// IANA name of the zone schedules are evaluated in
    pub timezone: String,
    pub gc_interval_secs: u64,
    /// How late a job may be before it counts as out of date
    pub staleness_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScalingConfig {
    pub retry_interval_secs: u64,
    pub retry_timeout_secs: u64,
    pub status_patch_retries: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KubeConfig {
    /// Reporting controller name on published events
    pub reporter: String,
}

impl Config {
    pub fn load() -> crate::Result<Self> {
        // Load environment variables from .env file if it exists
        let _ = dotenvy::dotenv();

        let defaults = Config::default();
        let config = Config {
            server: ServerConfig {
                addr: std::env::var("SERVER_ADDR").unwrap_or(defaults.server.addr),
            },
            cron: CronConfig {
                timezone: std::env::var("CRONHPA_TIMEZONE").unwrap_or(defaults.cron.timezone),
                gc_interval_secs: env_or("GC_INTERVAL_SECS", defaults.cron.gc_interval_secs)?,
                staleness_secs: env_or("JOB_STALENESS_SECS", defaults.cron.staleness_secs)?,
            },
            scaling: ScalingConfig {
                retry_interval_secs: env_or(
                    "SCALE_RETRY_INTERVAL_SECS",
                    defaults.scaling.retry_interval_secs,
                )?,
                retry_timeout_secs: env_or(
                    "SCALE_RETRY_TIMEOUT_SECS",
                    defaults.scaling.retry_timeout_secs,
                )?,
                status_patch_retries: env_or(
                    "STATUS_PATCH_RETRIES",
                    defaults.scaling.status_patch_retries,
                )?,
            },
            kube: KubeConfig {
                reporter: std::env::var("EVENT_REPORTER").unwrap_or(defaults.kube.reporter),
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> crate::Result<()> {
        self.timezone()?;
        if self.cron.gc_interval_secs == 0 {
            return Err(Error::Config("GC_INTERVAL_SECS must be positive".to_string()));
        }
        if self.scaling.retry_interval_secs == 0 {
            return Err(Error::Config(
                "SCALE_RETRY_INTERVAL_SECS must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn timezone(&self) -> crate::Result<Tz> {
        Tz::from_str(&self.cron.timezone).map_err(|e| {
            Error::Config(format!("unknown time zone {}: {}", self.cron.timezone, e))
        })
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.cron.gc_interval_secs)
    }

    pub fn staleness(&self) -> chrono::Duration {
        chrono::Duration::seconds(self.cron.staleness_secs as i64)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_secs(self.scaling.retry_interval_secs)
    }

    pub fn retry_timeout(&self) -> Duration {
        Duration::from_secs(self.scaling.retry_timeout_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                addr: "0.0.0.0:8000".to_string(),
            },
            cron: CronConfig {
                timezone: "UTC".to_string(),
                gc_interval_secs: 600,
                staleness_secs: 300,
            },
            scaling: ScalingConfig {
                retry_interval_secs: 3,
                retry_timeout_secs: 10,
                status_patch_retries: 3,
            },
            kube: KubeConfig {
                reporter: "cronhpa-controller".to_string(),
            },
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> crate::Result<T>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(value) => value
            .trim()
            .parse()
            .map_err(|e| Error::Config(format!("invalid {} '{}': {}", key, value, e))),
        Err(_) => Ok(default),
    }
}
