// src/config.rs
use crate::prices::{ALPHA_VANTAGE_URL, COINGECKO_URL};
use std::collections::HashMap;
use std::net::IpAddr;
use std::str::FromStr;
use thiserror::Error;

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreBackend {
    Scylla,
    Memory,
}

impl FromStr for StoreBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "scylla" => Ok(StoreBackend::Scylla),
            "memory" => Ok(StoreBackend::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: IpAddr,
    pub port: u16,
    pub jwt_secret: String,
    pub token_ttl_hours: i64,
    pub store_backend: StoreBackend,
    pub scylla_node: String,
    pub alpha_vantage_key: Option<String>,
    pub alpha_vantage_url: String,
    pub coingecko_url: String,
    pub price_timeout_secs: u64,
    pub price_cache_secs: i64,
    pub ai_proxy_url: Option<String>,
    pub ai_api_key: Option<String>,
    pub ai_model: String,
}

fn parsed<T: FromStr>(
    vars: &HashMap<String, String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(value) => value.trim().parse().map_err(|_| ConfigError::Invalid {
            key,
            value: value.clone(),
        }),
        None => Ok(default),
    }
}

fn optional(vars: &HashMap<String, String>, key: &str) -> Option<String> {
    vars.get(key)
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

impl Config {
    /// Reads settings from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(std::env::vars().collect())
    }

    pub fn from_vars(vars: HashMap<String, String>) -> Result<Self, ConfigError> {
        let text = |key: &str, default: &str| optional(&vars, key).unwrap_or_else(|| default.to_string());

        Ok(Config {
            bind_addr: parsed(&vars, "BIND_ADDR", IpAddr::from([127, 0, 0, 1]))?,
            port: parsed(&vars, "PORT", 3030)?,
            jwt_secret: text("JWT_SECRET", "finmate-dev-secret"),
            token_ttl_hours: parsed(&vars, "TOKEN_TTL_HOURS", 24 * 7)?,
            store_backend: parsed(&vars, "STORE_BACKEND", StoreBackend::Scylla)?,
            scylla_node: text("SCYLLA_NODE", "127.0.0.1:9042"),
            alpha_vantage_key: optional(&vars, "ALPHA_VANTAGE_KEY"),
            alpha_vantage_url: text("ALPHA_VANTAGE_URL", ALPHA_VANTAGE_URL),
            coingecko_url: text("COINGECKO_URL", COINGECKO_URL),
            price_timeout_secs: parsed(&vars, "PRICE_TIMEOUT_SECS", 10)?,
            price_cache_secs: parsed(&vars, "PRICE_CACHE_SECS", 0)?,
            ai_proxy_url: optional(&vars, "AI_PROXY_URL"),
            ai_api_key: optional(&vars, "AI_API_KEY"),
            ai_model: text("AI_MODEL", "gpt-3.5-turbo"),
        })
    }
}
