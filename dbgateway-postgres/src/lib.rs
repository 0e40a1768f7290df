//! PostgreSQL [`DbConnection`] implementation (§4.1), backed by `sqlx`'s raw
//! `PgConnection` rather than its own pool — pooling, lifecycle and
//! validation are this gateway's job (`dbgateway-pool`), so this crate only
//! ever opens and drives a single connection, the way `sqlx-core`'s
//! `PgConnection` itself does before `sqlx::Pool` wraps it.

use std::time::Duration;

use async_trait::async_trait;
use dbgateway_core::connection::{DbConnection, ParamValue, Params, ResultSet, Row};
use dbgateway_core::{config::Engine, ConnectionConfig, Error, Result};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgArguments, PgConnectOptions, PgConnection, PgRow};
use sqlx::query::Query;
use sqlx::{Column, Connection, Executor, Postgres, Row as _};
use time::format_description::well_known::Iso8601;

/// A single live PostgreSQL session.
pub struct PostgresConnection {
    config: ConnectionConfig,
    inner: Option<PgConnection>,
    in_txn: bool,
    query_timeout_sec: u32,
}

async fn open_connection(config: &ConnectionConfig) -> Result<PgConnection> {
    let mut opts = PgConnectOptions::new()
        .host(&config.server)
        .port(config.port)
        .username(&config.username)
        .password(&config.password)
        .database(&config.database)
        .application_name(&config.application_name);

    for (key, value) in &config.extra_params {
        opts = opts.options([(key.as_str(), value.as_str())]);
    }

    let connect_timeout = Duration::from_secs(config.connect_timeout_sec.max(1));
    let mut raw = tokio::time::timeout(connect_timeout, PgConnection::connect_with(&opts))
        .await
        .map_err(|_| Error::Connection(format!("connect to {:?} timed out", config.name)))?
        .map_err(|e| Error::Connection(e.to_string()))?;

    for stmt in Engine::Postgres.session_init_statements(config.schema.as_deref()) {
        raw.execute(stmt.as_str()).await.map_err(|e| Error::Connection(e.to_string()))?;
    }

    Ok(raw)
}

/// Opens a new, session-initialized connection for `config` (§4.1's
/// session-init table). This is the `Connector` every `dbgateway-postgres`
/// consumer registers with the pool manager.
pub async fn connect(config: ConnectionConfig) -> Result<Box<dyn DbConnection>> {
    let raw = open_connection(&config).await?;
    let query_timeout_sec = config.command_timeout_sec as u32;
    Ok(Box::new(PostgresConnection { config, inner: Some(raw), in_txn: false, query_timeout_sec }))
}

impl PostgresConnection {
    fn conn_mut(&mut self) -> Result<&mut PgConnection> {
        self.inner.as_mut().ok_or_else(|| Error::Connection("connection is closed".into()))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_sec.max(1) as u64)
    }
}

impl std::fmt::Debug for PostgresConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PostgresConnection")
            .field("name", &self.config.name)
            .field("connected", &self.inner.is_some())
            .field("in_txn", &self.in_txn)
            .finish()
    }
}

fn bind_params<'q>(
    mut query: Query<'q, Postgres, PgArguments>,
    names: &[String],
    params: &Params,
) -> Query<'q, Postgres, PgArguments> {
    for name in names {
        query = match params.get(name).cloned().unwrap_or(ParamValue::Null) {
            ParamValue::Null => query.bind(Option::<String>::None),
            ParamValue::Bool(b) => query.bind(b),
            ParamValue::Int(i) => query.bind(i),
            ParamValue::Float(f) => query.bind(f),
            ParamValue::Text(s) => query.bind(s),
            ParamValue::DateTime(dt) => query.bind(dt),
        };
    }
    query
}

fn column_to_json(row: &PgRow, idx: usize) -> JsonValue {
    if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<i32>, _>(idx) {
        return v.map(|n| JsonValue::from(n as i64)).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<time::OffsetDateTime>, _>(idx) {
        return v
            .and_then(|dt| dt.format(&Iso8601::DEFAULT).ok())
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
        return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
    }
    JsonValue::Null
}

fn row_to_gateway_row(row: &PgRow) -> Row {
    let columns = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_owned(), column_to_json(row, i)))
        .collect();
    Row::new(columns)
}

fn map_sqlx_err(e: sqlx::Error) -> Error {
    Error::Command(e.to_string())
}

#[async_trait]
impl DbConnection for PostgresConnection {
    fn engine(&self) -> Engine {
        Engine::Postgres
    }

    async fn connect(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }
        self.inner = Some(open_connection(&self.config).await?);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        if let Some(conn) = self.inner.take() {
            let _ = conn.close().await;
        }
        self.in_txn = false;
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.inner.is_some()
    }

    async fn start_transaction(&mut self) -> Result<()> {
        if self.in_txn {
            return Err(Error::Command("transaction already in progress".into()));
        }
        let conn = self.conn_mut()?;
        conn.execute("BEGIN").await.map_err(map_sqlx_err)?;
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let conn = self.conn_mut()?;
        conn.execute("COMMIT").await.map_err(map_sqlx_err)?;
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let conn = self.conn_mut()?;
        conn.execute("ROLLBACK").await.map_err(map_sqlx_err)?;
        self.in_txn = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_txn
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
        tracing::debug!(sql = %sql, param_count = params.len(), "executing");
        let (rewritten, names) = dbgateway_core::rewrite_named_params(sql, dbgateway_core::PlaceholderStyle::Dollar);
        let query = bind_params(sqlx::query(&rewritten), &names, params);
        let timeout = self.timeout();
        let conn = self.conn_mut()?;
        let result = tokio::time::timeout(timeout, query.execute(conn))
            .await
            .map_err(|_| Error::Command("query timed out".into()))?
            .map_err(map_sqlx_err)?;
        Ok(result.rows_affected())
    }

    async fn execute_scalar(&mut self, sql: &str, params: &Params) -> Result<Option<JsonValue>> {
        tracing::debug!(sql = %sql, param_count = params.len(), "executing");
        let (rewritten, names) = dbgateway_core::rewrite_named_params(sql, dbgateway_core::PlaceholderStyle::Dollar);
        let query = bind_params(sqlx::query(&rewritten), &names, params);
        let timeout = self.timeout();
        let conn = self.conn_mut()?;
        let row = tokio::time::timeout(timeout, query.fetch_optional(conn))
            .await
            .map_err(|_| Error::Command("query timed out".into()))?
            .map_err(map_sqlx_err)?;
        Ok(row.map(|r| column_to_json(&r, 0)))
    }

    async fn execute_reader(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        tracing::debug!(sql = %sql, param_count = params.len(), "executing");
        let (rewritten, names) = dbgateway_core::rewrite_named_params(sql, dbgateway_core::PlaceholderStyle::Dollar);
        let query = bind_params(sqlx::query(&rewritten), &names, params);
        let timeout = self.timeout();
        let conn = self.conn_mut()?;
        let rows = tokio::time::timeout(timeout, query.fetch_all(conn))
            .await
            .map_err(|_| Error::Command("query timed out".into()))?
            .map_err(map_sqlx_err)?;
        Ok(ResultSet { rows: rows.iter().map(row_to_gateway_row).collect() })
    }

    async fn version(&mut self) -> Result<String> {
        let value = self.execute_scalar("SELECT version()", &Params::new()).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default())
    }

    async fn get_tables(&mut self) -> Result<Vec<String>> {
        let schema = self.config.schema.clone().unwrap_or_else(|| "public".to_owned());
        let params = Params::new().with("schema", schema);
        let rows = self
            .execute_reader(
                "SELECT table_name FROM information_schema.tables WHERE table_schema = @schema ORDER BY table_name",
                &params,
            )
            .await?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|r| r.get("table_name").and_then(|v| v.as_str().map(str::to_owned)))
            .collect())
    }

    async fn get_fields(&mut self, table: &str) -> Result<Vec<String>> {
        let params = Params::new().with("table", table.to_owned());
        let rows = self
            .execute_reader(
                "SELECT column_name FROM information_schema.columns WHERE table_name = @table ORDER BY ordinal_position",
                &params,
            )
            .await?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|r| r.get("column_name").and_then(|v| v.as_str().map(str::to_owned)))
            .collect())
    }

    fn set_query_timeout(&mut self, sec: u32) {
        self.query_timeout_sec = sec;
    }

    fn query_timeout(&self) -> u32 {
        self.query_timeout_sec
    }
}
