//! Application configuration loaded from environment variables.

use crate::errors::{ApiError, Result};

#[derive(Debug, Clone)]
pub struct Config {
    /// JSON-RPC endpoint of the settlement collaborator
    pub settlement_url: String,
    /// Account credited with forfeits, penalties, and platform fees
    pub platform_account: String,
    /// Path to the SQLite journal database file
    pub database_url: String,
    /// Port for the REST API server
    pub api_port: u16,
    /// Patience (in seconds) for a single settlement call
    pub settlement_timeout_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Ok(Config {
            settlement_url: env_var("SETTLEMENT_URL").map_err(|_| {
                ApiError::Config("SETTLEMENT_URL environment variable is required".to_string())
            })?,
            platform_account: env_var("PLATFORM_ACCOUNT")
                .unwrap_or_else(|_| "platform".to_string()),
            database_url: env_var("DATABASE_URL")
                .unwrap_or_else(|_| "sqlite:./escrow_journal.db".to_string()),
            api_port: env_var("API_PORT")
                .unwrap_or_else(|_| "3001".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid API_PORT".to_string()))?,
            settlement_timeout_secs: env_var("SETTLEMENT_TIMEOUT_SECS")
                .unwrap_or_else(|_| "30".to_string())
                .parse()
                .map_err(|_| ApiError::Config("Invalid SETTLEMENT_TIMEOUT_SECS".to_string()))?,
        })
    }
}

fn env_var(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| ApiError::Config(format!("Missing env var: {key}")))
}
