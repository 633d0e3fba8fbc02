use std::time::Duration;

use anyhow::{Context, Error};
use config::{Config, Environment};
use serde::Deserialize;

use crate::domain::poll::DEFAULT_POLL_INTERVAL;

#[derive(Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct AppConfig {
    pub api: ApiConfig,
    pub dashboard: DashboardConfig,
}

#[derive(Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ApiConfig {
    pub base_url: String,
    pub token: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8000".to_string(),
            token: None,
            username: None,
            password: None,
        }
    }
}

impl std::fmt::Debug for ApiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiConfig")
            .field("base_url", &self.base_url)
            .field("token", &self.token.as_ref().map(|_| "***"))
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "***"))
            .finish()
    }
}

#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DashboardConfig {
    pub listen: String,
    pub poll_interval_secs: u64,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:3000".to_string(),
            poll_interval_secs: DEFAULT_POLL_INTERVAL.as_secs(),
        }
    }
}

impl DashboardConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }
}

/// Reads `KEYSTONE_API__BASE_URL`, `KEYSTONE_DASHBOARD__POLL_INTERVAL_SECS`, ...
pub fn load_config() -> Result<AppConfig, Error> {
    load_from(environment())
}

fn environment() -> Environment {
    Environment::with_prefix("keystone")
        .prefix_separator("_")
        .separator("__")
}

fn load_from(source: Environment) -> Result<AppConfig, Error> {
    let config = Config::builder()
        .add_source(source)
        .build()
        .context("Can't load configuration")?;

    config
        .try_deserialize()
        .context("Can't deserialize AppConfig from loaded configuration")
}
