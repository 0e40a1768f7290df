//! [`ConnectionConfig`] and its nested policy structs (§3.1).
//!
//! A `ConnectionConfig` is immutable once [`ConnectionConfig::validate`] has
//! returned successfully — callers are expected to construct, validate, then
//! hand it to [`dbgateway_pool`](../../dbgateway_pool/index.html) and never
//! mutate it again, the same contract `sqlx::pool::PoolOptions` has with its
//! `Pool`.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Which wire dialect a [`ConnectionConfig`] targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Engine {
    Unknown,
    Mssql,
    Postgres,
    Mysql,
}

impl Engine {
    /// The default TCP port for this engine, used when a config omits `port`.
    pub fn default_port(self) -> u16 {
        match self {
            Engine::Mssql => 1433,
            Engine::Postgres => 5432,
            Engine::Mysql => 3306,
            Engine::Unknown => 0,
        }
    }

    /// Quote an identifier (table or column name) the way this engine expects.
    ///
    /// Callers must whitelist `ident` against a known set of names *before*
    /// calling this — quoting makes an identifier syntactically safe, it does
    /// not make an attacker-chosen name semantically safe to expose.
    pub fn quote_identifier(self, ident: &str) -> String {
        match self {
            Engine::Mssql => format!("[{}]", ident.replace(']', "]]")),
            Engine::Postgres => format!("\"{}\"", ident.replace('"', "\"\"")),
            Engine::Mysql => format!("`{}`", ident.replace('`', "``")),
            Engine::Unknown => ident.to_owned(),
        }
    }

    /// The session-initialization statements this engine runs immediately
    /// after a successful connect (§4.1 table), in order.
    pub fn session_init_statements(self, schema: Option<&str>) -> Vec<String> {
        match self {
            Engine::Mssql => vec![
                "SET ANSI_NULLS ON".into(),
                "SET ANSI_PADDING ON".into(),
                "SET ANSI_WARNINGS ON".into(),
                "SET ARITHABORT ON".into(),
                "SET CONCAT_NULL_YIELDS_NULL ON".into(),
                "SET QUOTED_IDENTIFIER ON".into(),
                "SET NUMERIC_ROUNDABORT OFF".into(),
                "SET DATEFORMAT ymd".into(),
            ],
            Engine::Postgres => {
                let mut stmts = Vec::with_capacity(3);
                if let Some(schema) = schema.filter(|s| !s.is_empty()) {
                    stmts.push(format!("SET search_path TO {}", Engine::Postgres.quote_identifier(schema)));
                }
                stmts.push("SET client_encoding TO 'UTF8'".into());
                stmts.push("SET TIME ZONE 'UTC'".into());
                stmts
            }
            Engine::Mysql => vec![
                "SET NAMES utf8mb4 COLLATE utf8mb4_unicode_ci".into(),
                "SET SESSION time_zone = '+00:00'".into(),
                "SET SESSION sql_mode = 'STRICT_TRANS_TABLES,NO_ZERO_IN_DATE,NO_ZERO_DATE,ERROR_FOR_DIVISION_BY_ZERO,NO_ENGINE_SUBSTITUTION'".into(),
            ],
            Engine::Unknown => Vec::new(),
        }
    }
}

/// Pooling policy embedded in a [`ConnectionConfig`] (§3.1).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PoolingConfig {
    pub enabled: bool,
    pub min_size: u32,
    pub max_size: u32,
    pub idle_timeout_sec: u64,
    pub acquire_timeout_ms: u64,
}

impl Default for PoolingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            min_size: 1,
            max_size: 10,
            idle_timeout_sec: 300,
            acquire_timeout_ms: 30_000,
        }
    }
}

/// TLS policy embedded in a [`ConnectionConfig`].
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TlsConfig {
    pub enabled: bool,
    pub cert: Option<String>,
    pub key: Option<String>,
    pub root_cert: Option<String>,
}

/// Retry policy embedded in a [`ConnectionConfig`].
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RetryConfig {
    pub attempts: u32,
    pub delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 0, delay_ms: 0 }
    }
}

/// A validated description of one database endpoint and its pool policy
/// (§3.1). Construct with the builder-style setters or via `serde`
/// deserialization from the `databasePools` section of the config file
/// (§6.3), then call [`validate`][Self::validate] before handing it to the
/// pool manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionConfig {
    pub name: String,
    pub engine: Engine,
    pub server: String,
    #[serde(default)]
    pub port: u16,
    pub database: String,
    #[serde(default)]
    pub schema: Option<String>,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub application_name: String,
    #[serde(default)]
    pub extra_params: Vec<(String, String)>,
    #[serde(default = "default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_command_timeout_sec")]
    pub command_timeout_sec: u64,
    #[serde(default)]
    pub pooling: PoolingConfig,
    #[serde(default)]
    pub tls: TlsConfig,
    #[serde(default)]
    pub retry: RetryConfig,
}

fn default_connect_timeout_sec() -> u64 {
    30
}

fn default_command_timeout_sec() -> u64 {
    30
}

/// Returns `true` when the process is running in production, per spec.md §3.1
/// ("env `ENVIRONMENT=PRODUCTION` or `APP_ENV=PROD`").
pub fn is_production_env() -> bool {
    std::env::var("ENVIRONMENT").map(|v| v.eq_ignore_ascii_case("PRODUCTION")).unwrap_or(false)
        || std::env::var("APP_ENV").map(|v| v.eq_ignore_ascii_case("PROD")).unwrap_or(false)
}

impl ConnectionConfig {
    /// Validates and clamps this config in place, returning an error that
    /// describes the first invariant violated.
    ///
    /// Clamping follows spec.md §3.1 exactly: `acquireTimeoutMs` is clamped
    /// into `[1000, 300000]` rather than rejected, while `minSize`/`maxSize`
    /// relationships are hard errors.
    pub fn validate(&mut self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(Error::Config("pool name must not be empty".into()));
        }
        if self.server.trim().is_empty() {
            return Err(Error::Config(format!("pool {:?}: server must not be empty", self.name)));
        }
        if self.database.trim().is_empty() {
            return Err(Error::Config(format!("pool {:?}: database must not be empty", self.name)));
        }
        if self.port == 0 {
            self.port = self.engine.default_port();
        }

        if self.pooling.enabled {
            if self.pooling.min_size < 1 || self.pooling.min_size > self.pooling.max_size {
                return Err(Error::Config(format!(
                    "pool {:?}: min_size ({}) must be between 1 and max_size ({})",
                    self.name, self.pooling.min_size, self.pooling.max_size
                )));
            }
            if is_production_env() {
                if self.pooling.min_size < 2 {
                    return Err(Error::Config(format!(
                        "pool {:?}: production deployments require min_size >= 2",
                        self.name
                    )));
                }
                if self.pooling.max_size < 2 * self.pooling.min_size {
                    return Err(Error::Config(format!(
                        "pool {:?}: production deployments require max_size >= 2 * min_size",
                        self.name
                    )));
                }
            }
            self.pooling.acquire_timeout_ms = self.pooling.acquire_timeout_ms.clamp(1_000, 300_000);
            self.pooling.idle_timeout_sec = self.pooling.idle_timeout_sec.max(60);
        } else {
            self.pooling.min_size = 0;
            self.pooling.max_size = 1;
        }

        self.connect_timeout_sec = self.connect_timeout_sec.min(300);
        self.command_timeout_sec = self.command_timeout_sec.min(3600);
        self.retry.attempts = self.retry.attempts.min(10);
        self.retry.delay_ms = self.retry.delay_ms.min(60_000);

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> ConnectionConfig {
        ConnectionConfig {
            name: "main".into(),
            engine: Engine::Postgres,
            server: "db.internal".into(),
            port: 0,
            database: "hospitality".into(),
            schema: None,
            username: "app".into(),
            password: "secret".into(),
            application_name: "gateway".into(),
            extra_params: Vec::new(),
            connect_timeout_sec: 30,
            command_timeout_sec: 30,
            pooling: PoolingConfig::default(),
            tls: TlsConfig::default(),
            retry: RetryConfig::default(),
        }
    }

    #[test]
    fn defaults_port_from_engine() {
        let mut cfg = base();
        cfg.validate().unwrap();
        assert_eq!(cfg.port, 5432);
    }

    #[test]
    fn rejects_empty_server() {
        let mut cfg = base();
        cfg.server.clear();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn clamps_acquire_timeout() {
        let mut cfg = base();
        cfg.pooling.acquire_timeout_ms = 10;
        cfg.validate().unwrap();
        assert_eq!(cfg.pooling.acquire_timeout_ms, 1_000);
    }

    #[test]
    fn disabled_pooling_forces_single_connection() {
        let mut cfg = base();
        cfg.pooling.enabled = false;
        cfg.validate().unwrap();
        assert_eq!(cfg.pooling.min_size, 0);
        assert_eq!(cfg.pooling.max_size, 1);
    }

    #[test]
    fn rejects_min_greater_than_max() {
        let mut cfg = base();
        cfg.pooling.min_size = 5;
        cfg.pooling.max_size = 2;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn postgres_session_init_includes_search_path_when_schema_set() {
        let stmts = Engine::Postgres.session_init_statements(Some("tenant_a"));
        assert!(stmts[0].contains("search_path"));
        assert!(stmts[0].contains("\"tenant_a\""));
    }

    #[test]
    fn mssql_quoting_escapes_brackets() {
        assert_eq!(Engine::Mssql.quote_identifier("foo]bar"), "[foo]]bar]");
    }
}
