//! SQL Server [`DbConnection`] implementation (§4.1), backed by `tiberius`
//! (the pure-Rust TDS client) rather than sqlx, which has no MSSQL driver.
//! See `dbgateway-postgres` for the rationale behind driving a single raw
//! connection instead of a driver-native pool.

use std::time::Duration;

use async_trait::async_trait;
use dbgateway_core::connection::{DbConnection, ParamValue, Params, ResultSet, Row};
use dbgateway_core::{config::Engine, ConnectionConfig, Error, Result};
use serde_json::Value as JsonValue;
use tiberius::{AuthMethod, Client, Config as TiberiusConfig, EncryptionLevel};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};

type Connection = Client<Compat<TcpStream>>;

/// A single live SQL Server session.
pub struct MssqlConnection {
    config: ConnectionConfig,
    inner: Option<Connection>,
    in_txn: bool,
    query_timeout_sec: u32,
}

async fn open_connection(config: &ConnectionConfig) -> Result<Connection> {
    let mut tiberius_config = TiberiusConfig::new();
    tiberius_config.host(&config.server);
    tiberius_config.port(config.port);
    tiberius_config.database(&config.database);
    tiberius_config.authentication(AuthMethod::sql_server(&config.username, &config.password));
    if config.tls.enabled {
        tiberius_config.encryption(EncryptionLevel::Required);
    } else {
        tiberius_config.trust_cert();
    }

    let connect_timeout = Duration::from_secs(config.connect_timeout_sec.max(1));
    let tcp = tokio::time::timeout(connect_timeout, TcpStream::connect(tiberius_config.get_addr()))
        .await
        .map_err(|_| Error::Connection(format!("connect to {:?} timed out", config.name)))?
        .map_err(|e| Error::Connection(e.to_string()))?;
    tcp.set_nodelay(true).map_err(|e| Error::Connection(e.to_string()))?;

    let mut client =
        Client::connect(tiberius_config, tcp.compat_write()).await.map_err(|e| Error::Connection(e.to_string()))?;

    for stmt in Engine::Mssql.session_init_statements(config.schema.as_deref()) {
        let stream = client.simple_query(stmt).await.map_err(|e| Error::Connection(e.to_string()))?;
        futures_like_into_results(stream).await.map_err(|e| Error::Connection(e.to_string()))?;
    }

    Ok(client)
}

// tiberius's query streams must be driven to completion before the
// connection can run another statement; `into_results` does that for
// session-init statements whose output we don't need.
async fn futures_like_into_results(
    stream: tiberius::QueryStream<'_>,
) -> std::result::Result<Vec<Vec<tiberius::Row>>, tiberius::error::Error> {
    stream.into_results().await
}

impl MssqlConnection {
    fn conn_mut(&mut self) -> Result<&mut Connection> {
        self.inner.as_mut().ok_or_else(|| Error::Connection("connection is closed".into()))
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.query_timeout_sec.max(1) as u64)
    }
}

/// Opens a new, session-initialized connection for `config`. Registered with
/// the pool manager as the `Connector` for [`Engine::Mssql`].
pub async fn connect(config: ConnectionConfig) -> Result<Box<dyn DbConnection>> {
    let raw = open_connection(&config).await?;
    let query_timeout_sec = config.command_timeout_sec as u32;
    Ok(Box::new(MssqlConnection { config, inner: Some(raw), in_txn: false, query_timeout_sec }))
}

impl std::fmt::Debug for MssqlConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MssqlConnection")
            .field("name", &self.config.name)
            .field("connected", &self.inner.is_some())
            .field("in_txn", &self.in_txn)
            .finish()
    }
}

fn to_tiberius_param(value: &ParamValue) -> Box<dyn tiberius::ToSql> {
    match value {
        ParamValue::Null => Box::new(Option::<i64>::None),
        ParamValue::Bool(b) => Box::new(*b),
        ParamValue::Int(i) => Box::new(*i),
        ParamValue::Float(f) => Box::new(*f),
        ParamValue::Text(s) => Box::new(s.clone()),
        ParamValue::DateTime(dt) => Box::new(*dt),
    }
}

fn bind_refs<'a>(boxed: &'a [Box<dyn tiberius::ToSql>]) -> Vec<&'a dyn tiberius::ToSql> {
    boxed.iter().map(|b| b.as_ref()).collect()
}

fn column_to_json(row: &tiberius::Row, idx: usize) -> JsonValue {
    if let Ok(Some(v)) = row.try_get::<i64, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<i32, _>(idx) {
        return JsonValue::from(v as i64);
    }
    if let Ok(Some(v)) = row.try_get::<f64, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<bool, _>(idx) {
        return JsonValue::from(v);
    }
    if let Ok(Some(v)) = row.try_get::<time::OffsetDateTime, _>(idx) {
        return v
            .format(&time::format_description::well_known::Iso8601::DEFAULT)
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null);
    }
    if let Ok(Some(v)) = row.try_get::<&str, _>(idx) {
        return JsonValue::from(v);
    }
    JsonValue::Null
}

fn row_to_gateway_row(row: &tiberius::Row) -> Row {
    let columns = row
        .columns()
        .iter()
        .enumerate()
        .map(|(i, col)| (col.name().to_owned(), column_to_json(row, i)))
        .collect();
    Row::new(columns)
}

fn map_tiberius_err(e: tiberius::error::Error) -> Error {
    Error::Command(e.to_string())
}

#[async_trait]
impl DbConnection for MssqlConnection {
    fn engine(&self) -> Engine {
        Engine::Mssql
    }

    async fn connect(&mut self) -> Result<()> {
        if self.inner.is_some() {
            return Ok(());
        }
        self.inner = Some(open_connection(&self.config).await?);
        Ok(())
    }

    async fn disconnect(&mut self) -> Result<()> {
        self.inner = None;
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
        let stream = conn.simple_query("BEGIN TRANSACTION").await.map_err(map_tiberius_err)?;
        stream.into_results().await.map_err(map_tiberius_err)?;
        self.in_txn = true;
        Ok(())
    }

    async fn commit(&mut self) -> Result<()> {
        let conn = self.conn_mut()?;
        let stream = conn.simple_query("COMMIT TRANSACTION").await.map_err(map_tiberius_err)?;
        stream.into_results().await.map_err(map_tiberius_err)?;
        self.in_txn = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<()> {
        let conn = self.conn_mut()?;
        let stream = conn.simple_query("ROLLBACK TRANSACTION").await.map_err(map_tiberius_err)?;
        stream.into_results().await.map_err(map_tiberius_err)?;
        self.in_txn = false;
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.in_txn
    }

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
        tracing::debug!(sql = %sql, param_count = params.len(), "executing");
        let (rewritten, names) = dbgateway_core::rewrite_named_params(sql, dbgateway_core::PlaceholderStyle::AtP);
        let boxed: Vec<_> =
            names.iter().map(|n| to_tiberius_param(&params.get(n).cloned().unwrap_or(ParamValue::Null))).collect();
        let refs = bind_refs(&boxed);
        let timeout = self.timeout();
        let conn = self.conn_mut()?;
        let result = tokio::time::timeout(timeout, conn.execute(&rewritten, &refs))
            .await
            .map_err(|_| Error::Command("query timed out".into()))?
            .map_err(map_tiberius_err)?;
        Ok(result.rows_affected().iter().sum())
    }

    async fn execute_scalar(&mut self, sql: &str, params: &Params) -> Result<Option<JsonValue>> {
        tracing::debug!(sql = %sql, param_count = params.len(), "executing");
        let (rewritten, names) = dbgateway_core::rewrite_named_params(sql, dbgateway_core::PlaceholderStyle::AtP);
        let boxed: Vec<_> =
            names.iter().map(|n| to_tiberius_param(&params.get(n).cloned().unwrap_or(ParamValue::Null))).collect();
        let refs = bind_refs(&boxed);
        let timeout = self.timeout();
        let conn = self.conn_mut()?;
        let stream = tokio::time::timeout(timeout, conn.query(&rewritten, &refs))
            .await
            .map_err(|_| Error::Command("query timed out".into()))?
            .map_err(map_tiberius_err)?;
        let row = stream.into_row().await.map_err(map_tiberius_err)?;
        Ok(row.as_ref().map(|r| column_to_json(r, 0)))
    }

    async fn execute_reader(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        tracing::debug!(sql = %sql, param_count = params.len(), "executing");
        let (rewritten, names) = dbgateway_core::rewrite_named_params(sql, dbgateway_core::PlaceholderStyle::AtP);
        let boxed: Vec<_> =
            names.iter().map(|n| to_tiberius_param(&params.get(n).cloned().unwrap_or(ParamValue::Null))).collect();
        let refs = bind_refs(&boxed);
        let timeout = self.timeout();
        let conn = self.conn_mut()?;
        let stream = tokio::time::timeout(timeout, conn.query(&rewritten, &refs))
            .await
            .map_err(|_| Error::Command("query timed out".into()))?
            .map_err(map_tiberius_err)?;
        let rows = stream.into_first_result().await.map_err(map_tiberius_err)?;
        Ok(ResultSet { rows: rows.iter().map(row_to_gateway_row).collect() })
    }

    async fn version(&mut self) -> Result<String> {
        let value = self.execute_scalar("SELECT @@VERSION", &Params::new()).await?;
        Ok(value.and_then(|v| v.as_str().map(str::to_owned)).unwrap_or_default())
    }

    async fn get_tables(&mut self) -> Result<Vec<String>> {
        let schema = self.config.schema.clone().unwrap_or_else(|| "dbo".to_owned());
        let params = Params::new().with("schema", schema);
        let rows = self
            .execute_reader(
                "SELECT TABLE_NAME FROM INFORMATION_SCHEMA.TABLES WHERE TABLE_SCHEMA = @schema ORDER BY TABLE_NAME",
                &params,
            )
            .await?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|r| r.get("TABLE_NAME").and_then(|v| v.as_str().map(str::to_owned)))
            .collect())
    }

    async fn get_fields(&mut self, table: &str) -> Result<Vec<String>> {
        let params = Params::new().with("table", table.to_owned());
        let rows = self
            .execute_reader(
                "SELECT COLUMN_NAME FROM INFORMATION_SCHEMA.COLUMNS WHERE TABLE_NAME = @table ORDER BY ORDINAL_POSITION",
                &params,
            )
            .await?;
        Ok(rows
            .rows
            .into_iter()
            .filter_map(|r| r.get("COLUMN_NAME").and_then(|v| v.as_str().map(str::to_owned)))
            .collect())
    }

    fn set_query_timeout(&mut self, sec: u32) {
        self.query_timeout_sec = sec;
    }

    fn query_timeout(&self) -> u32 {
        self.query_timeout_sec
    }
}
