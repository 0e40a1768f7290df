//! Startup configuration (§6.3): one JSON document read once and treated as
//! read-only thereafter, mirroring the teacher's `dotenvy::var(...)` +
//! `DATABASE_URL` pattern but generalized to the gateway's multi-pool,
//! multi-tenant shape.

use std::path::Path;

use anyhow::Context;
use dbgateway_core::config_err;
use dbgateway_core::{ConnectionConfig, Result};
use serde::Deserialize;

/// Top-level shape of the configuration file (§6.3).
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    pub application: ApplicationConfig,
    pub database_pools: Vec<ConnectionConfig>,
    pub security: SecurityConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationConfig {
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub log_level: LogLevel,
}

/// `application.logLevel` (§6.3). `None`/`Fatal`/`Critical`/`Spam` don't map
/// cleanly onto `tracing::Level`; they collapse to the nearest tracing level
/// or "logging off" so the config schema stays exactly what the spec names.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    None,
    Fatal,
    Critical,
    Error,
    Warning,
    #[default]
    Info,
    Debug,
    Spam,
}

impl LogLevel {
    pub fn as_tracing_filter(self) -> &'static str {
        match self {
            LogLevel::None => "off",
            LogLevel::Fatal | LogLevel::Critical | LogLevel::Error => "error",
            LogLevel::Warning => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Spam => "trace",
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    pub jwt: JwtConfig,
}

/// JWT issuance/validation policy (§6.3). `secret` must be at least 32
/// characters — enforced in [`AppConfig::validate`], the same invariant
/// spec.md states for `security.jwt.secret`.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JwtConfig {
    pub secret: String,
    pub issuer: String,
    pub audience: String,
    pub expiration_hours: u64,
}

impl AppConfig {
    /// Reads and parses the config file. Does not validate; call
    /// [`AppConfig::validate`] before starting the HTTP listener.
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: AppConfig =
            serde_json::from_str(&raw).with_context(|| format!("failed to parse config file {}", path.display()))?;
        Ok(config)
    }

    /// Validates every pool config (§3.1) and the JWT secret length,
    /// per the ambient rule that a bad startup config is a fatal error, not
    /// a per-request failure.
    pub fn validate(&mut self) -> Result<()> {
        if self.security.jwt.secret.len() < 32 {
            return Err(config_err!("security.jwt.secret must be at least 32 characters"));
        }
        for pool in &mut self.database_pools {
            pool.validate()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_short_jwt_secret() {
        let mut config = AppConfig {
            application: ApplicationConfig { name: "gw".into(), version: "0.1.0".into(), log_level: LogLevel::Info },
            database_pools: vec![],
            security: SecurityConfig {
                jwt: JwtConfig { secret: "short".into(), issuer: "gw".into(), audience: "gw".into(), expiration_hours: 8 },
            },
        };
        assert!(config.validate().is_err());
    }
}
