//! The [`DbConnection`] contract (§4.1): one live database session,
//! polymorphic over engine. This plays the role `sqlx::Database` /
//! `sqlx::Connection` play in the teacher crate, collapsed into a single
//! object-safe `async_trait` because the gateway picks the engine at
//! runtime (from config), not at compile time via a generic parameter —
//! the same tradeoff `sqlx::any::Any` makes for its runtime-polymorphic
//! driver.

use async_trait::async_trait;
use serde_json::Value as JsonValue;
use std::collections::BTreeMap;
use std::fmt;

use crate::error::Result;

/// A bag of bind parameters, keyed by name. Drivers translate these to their
/// own placeholder syntax (`$1`, `?`, `@p1`) when building the wire-level
/// statement; callers never see engine-specific placeholders.
#[derive(Debug, Clone, Default)]
pub struct Params(BTreeMap<String, ParamValue>);

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<ParamValue>) -> Self {
        self.0.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<ParamValue>) {
        self.0.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&ParamValue> {
        self.0.get(name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ParamValue)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A single bind value, polymorphic over the handful of scalar types the
/// gateway's controllers and the sync engine ever bind. Modeled on
/// `sqlx_core::any::AnyValueKind`, trimmed to what this gateway actually
/// sends across the wire (no blobs, no engine-specific array types).
#[derive(Debug, Clone, PartialEq)]
pub enum ParamValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    DateTime(time::OffsetDateTime),
}

impl From<&str> for ParamValue {
    fn from(v: &str) -> Self {
        ParamValue::Text(v.to_owned())
    }
}

impl From<String> for ParamValue {
    fn from(v: String) -> Self {
        ParamValue::Text(v)
    }
}

impl From<i64> for ParamValue {
    fn from(v: i64) -> Self {
        ParamValue::Int(v)
    }
}

impl From<i32> for ParamValue {
    fn from(v: i32) -> Self {
        ParamValue::Int(v as i64)
    }
}

impl From<f64> for ParamValue {
    fn from(v: f64) -> Self {
        ParamValue::Float(v)
    }
}

impl From<bool> for ParamValue {
    fn from(v: bool) -> Self {
        ParamValue::Bool(v)
    }
}

impl From<time::OffsetDateTime> for ParamValue {
    fn from(v: time::OffsetDateTime) -> Self {
        ParamValue::DateTime(v)
    }
}

impl<T: Into<ParamValue>> From<Option<T>> for ParamValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(ParamValue::Null)
    }
}

/// One materialized row: column name to JSON-representable value, in column
/// order. `ExecuteJSON` (§4.1) serializes a `Vec<Row>` directly; everything
/// else builds on top of this.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: Vec<(String, JsonValue)>,
}

impl Row {
    pub fn new(columns: Vec<(String, JsonValue)>) -> Self {
        Self { columns }
    }

    pub fn get(&self, column: &str) -> Option<&JsonValue> {
        self.columns.iter().find(|(name, _)| name == column).map(|(_, v)| v)
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Convert into a `serde_json::Value::Object`, the unit of work
    /// `ExecuteJSON` uses per row.
    pub fn into_json_object(self) -> JsonValue {
        JsonValue::Object(self.columns.into_iter().collect())
    }
}

/// A materialized result set: all rows fetched eagerly (spec.md §1
/// Non-goals explicitly excludes streaming result sets).
#[derive(Debug, Clone, Default)]
pub struct ResultSet {
    pub rows: Vec<Row>,
}

impl ResultSet {
    pub fn into_json_array(self) -> JsonValue {
        JsonValue::Array(self.rows.into_iter().map(Row::into_json_object).collect())
    }
}

/// A single live database session (§4.1). Implementations exist per engine
/// in `dbgateway-postgres`, `dbgateway-mysql`, `dbgateway-mssql`; the pool
/// and sync engine only ever see this trait.
///
/// Not `Sync` by design — the pool's active/idle partition guarantees a
/// connection is used by exactly one caller at a time (spec.md §5), so the
/// trait only requires `Send` to move across an await point / task boundary.
#[async_trait]
pub trait DbConnection: Send + fmt::Debug {
    fn engine(&self) -> crate::config::Engine;

    async fn connect(&mut self) -> Result<()>;
    async fn disconnect(&mut self) -> Result<()>;
    fn is_connected(&self) -> bool;

    async fn start_transaction(&mut self) -> Result<()>;
    async fn commit(&mut self) -> Result<()>;
    async fn rollback(&mut self) -> Result<()>;
    fn in_transaction(&self) -> bool;

    async fn execute(&mut self, sql: &str, params: &Params) -> Result<u64>;
    async fn execute_scalar(&mut self, sql: &str, params: &Params) -> Result<Option<JsonValue>>;
    async fn execute_reader(&mut self, sql: &str, params: &Params) -> Result<ResultSet>;

    async fn execute_json(&mut self, sql: &str, params: &Params) -> Result<String> {
        let rows = self.execute_reader(sql, params).await?;
        Ok(rows.into_json_array().to_string())
    }

    async fn version(&mut self) -> Result<String>;
    async fn get_tables(&mut self) -> Result<Vec<String>>;
    async fn get_fields(&mut self, table: &str) -> Result<Vec<String>>;

    fn set_query_timeout(&mut self, sec: u32);
    fn query_timeout(&self) -> u32;

    /// `SELECT 1` (or engine equivalent) used by the pool's lazy validation
    /// policy (§4.2.1), with a reduced, caller-supplied timeout.
    async fn ping(&mut self) -> Result<()> {
        self.execute_scalar("SELECT 1", &Params::new()).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn params_builder_overwrites_by_name() {
        let params = Params::new().with("id", 1_i64).with("id", 2_i64);
        assert_eq!(params.len(), 1);
        assert_eq!(params.get("id"), Some(&ParamValue::Int(2)));
    }

    #[test]
    fn row_to_json_preserves_column_order() {
        let row = Row::new(vec![
            ("id".into(), JsonValue::from(1)),
            ("name".into(), JsonValue::from("Ada")),
        ]);
        let json = row.into_json_object();
        assert_eq!(json["id"], JsonValue::from(1));
        assert_eq!(json["name"], JsonValue::from("Ada"));
    }

    #[test]
    fn optional_param_value_null_when_none() {
        let v: ParamValue = None::<i64>.into();
        assert_eq!(v, ParamValue::Null);
    }
}
