// src/config/mod.rs
// All tunables load from the environment (.env supported), with defaults.

use once_cell::sync::Lazy;
use serde::Deserialize;
use std::str::FromStr;

#[derive(Debug, Clone, Deserialize)]
pub struct RelayConfig {
    // ── Database Configuration
    pub database_url: String,
    pub sqlite_max_connections: u32,

    // ── Lock Manager Configuration
    pub lock_ttl_seconds: i64,

    // ── Event Log Configuration
    pub change_log_capacity: usize,
    pub message_log_capacity: usize,

    // ── Liveness Configuration (lazy staleness checks, no sweeper)
    pub agent_idle_timeout_seconds: i64,

    // ── Session Close Configuration
    pub classify_timeout_seconds: u64,
    pub persist_timeout_seconds: u64,

    // ── Router Configuration
    pub allowed_clients: String,

    // ── Logging Configuration
    pub log_level: String,
}

fn env_var_or<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match std::env::var(key) {
        Ok(val) => {
            // Tolerate trailing comments and whitespace in .env values
            let clean_val = val.split('#').next().unwrap_or("").trim();
            match clean_val.parse::<T>() {
                Ok(parsed) => parsed,
                Err(_) => {
                    eprintln!("Config: {} = '{}' (parse failed, using default)", key, val);
                    default
                }
            }
        }
        Err(_) => default,
    }
}

impl RelayConfig {
    pub fn from_env() -> Self {
        // Missing .env is normal; environment variables still apply.
        let _ = dotenvy::dotenv();

        Self {
            database_url: env_var_or("DATABASE_URL", "sqlite:./relay.db".to_string()),
            sqlite_max_connections: env_var_or("SQLITE_MAX_CONNECTIONS", 5),
            lock_ttl_seconds: env_var_or("RELAY_LOCK_TTL_SECONDS", 1800),
            change_log_capacity: env_var_or("RELAY_CHANGE_LOG_CAPACITY", 100),
            message_log_capacity: env_var_or("RELAY_MESSAGE_LOG_CAPACITY", 100),
            agent_idle_timeout_seconds: env_var_or("RELAY_AGENT_IDLE_TIMEOUT", 300),
            classify_timeout_seconds: env_var_or("RELAY_CLASSIFY_TIMEOUT", 20),
            persist_timeout_seconds: env_var_or("RELAY_PERSIST_TIMEOUT", 30),
            allowed_clients: env_var_or("RELAY_ALLOWED_CLIENTS", "claude-code".to_string()),
            log_level: env_var_or("RELAY_LOG_LEVEL", "info".to_string()),
        }
    }

    /// Allowed caller identities, normalized for the capability table.
    pub fn allowed_client_list(&self) -> Vec<String> {
        self.allowed_clients
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect()
    }
}

// Global config instance - loaded once at startup
pub static CONFIG: Lazy<RelayConfig> = Lazy::new(RelayConfig::from_env);
