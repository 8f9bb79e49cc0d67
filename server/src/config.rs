//! Configuration management for the server.

use std::env;

/// Server configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Number of concurrent jobs spawned by the stress endpoint
    pub stress_jobs: usize,
    /// Insert the demo players into an empty store at startup
    pub seed_demo: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            stress_jobs: 20,
            seed_demo: true,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration from any key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let host = lookup("HOST").unwrap_or(defaults.host);

        let port = match lookup("PORT") {
            Some(port) => port.parse().map_err(|_| ConfigError::InvalidPort)?,
            None => defaults.port,
        };

        let stress_jobs = match lookup("STRESS_JOBS") {
            Some(jobs) => jobs.parse().map_err(|_| ConfigError::InvalidStressJobs)?,
            None => defaults.stress_jobs,
        };

        let seed_demo = match lookup("SEED_DEMO") {
            Some(flag) => parse_flag(&flag).ok_or(ConfigError::InvalidSeedDemo)?,
            None => defaults.seed_demo,
        };

        Ok(Self {
            host,
            port,
            stress_jobs,
            seed_demo,
        })
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid STRESS_JOBS value")]
    InvalidStressJobs,

    #[error("Invalid SEED_DEMO value")]
    InvalidSeedDemo,
}
