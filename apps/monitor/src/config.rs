use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub database_url: String,
    pub tron_grpc_url: String,
    pub tron_api_key: Option<String>,
    pub bind_addr: String,
    pub poll_interval: Duration,
    pub network: String,
}

#[derive(Debug, Deserialize)]
#[serde(default)]
struct Env {
    database_url: String,
    tron_grpc_url: String,
    tron_api_key: Option<String>,
    monitor_bind_addr: String,
    monitor_poll_interval_secs: u64,
    monitor_network: String,
}

impl Default for Env {
    fn default() -> Self {
        Self {
            database_url: String::new(),
            tron_grpc_url: String::new(),
            tron_api_key: None,
            monitor_bind_addr: DEFAULT_BIND_ADDR.to_string(),
            monitor_poll_interval_secs: DEFAULT_POLL_INTERVAL_SECS,
            monitor_network: DEFAULT_NETWORK.to_string(),
        }
    }
}

pub fn load_config() -> Result<AppConfig> {
    let env: Env = envy::from_env().context("load monitor env config")?;

    if env.database_url.trim().is_empty() {
        anyhow::bail!("DATABASE_URL must be set");
    }
    if env.tron_grpc_url.trim().is_empty() {
        anyhow::bail!("TRON_GRPC_URL must be set");
    }

    Ok(AppConfig {
        database_url: env.database_url,
        tron_grpc_url: env.tron_grpc_url,
        tron_api_key: env.tron_api_key.filter(|k| !k.trim().is_empty()),
        bind_addr: env.monitor_bind_addr,
        poll_interval: Duration::from_secs(env.monitor_poll_interval_secs.max(1)),
        network: env.monitor_network,
    })
}

const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
const DEFAULT_POLL_INTERVAL_SECS: u64 = 3;
const DEFAULT_NETWORK: &str = "mainnet";
