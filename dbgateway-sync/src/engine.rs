//! The sync engine (§4.5): `Sync()`'s batched, per-batch-atomic upsert and
//! `GetChanges()`'s change-feed reader.

use dbgateway_core::connection::DbConnection;
use dbgateway_core::{Error, ParamValue, Params, Result};
use serde_json::Value as JsonValue;
use time::OffsetDateTime;

use crate::entity::{coerce_field, SyncEntityKind};

/// Items per transaction (§4.5.1).
const BATCH_SIZE: usize = 250;
/// Row cap on the change feed (§4.5.2).
const CHANGE_FEED_LIMIT: u32 = 1000;
/// Errors kept verbatim in [`SyncResult::errors`] before the rest are only
/// reflected in the summary count (§4.5.1).
const MAX_STORED_ERRORS: usize = 10;
/// Errors shown verbatim in [`SyncResult::error_summary`] before collapsing
/// the rest into `"(and N more)"`.
const SUMMARY_VERBATIM_ERRORS: usize = 3;

/// The outcome of one `Sync()` call (§4.5.1): totals plus a capped,
/// human-readable error sample.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncResult {
    pub total_processed: u64,
    pub success_count: u64,
    pub fail_count: u64,
    errors: Vec<String>,
    error_count: u64,
}

impl SyncResult {
    fn record_success(&mut self) {
        self.total_processed += 1;
        self.success_count += 1;
    }

    fn record_failure(&mut self, message: String) {
        self.total_processed += 1;
        self.fail_count += 1;
        self.error_count += 1;
        if self.errors.len() < MAX_STORED_ERRORS {
            self.errors.push(message);
        }
    }

    /// Raw stored error messages, capped at [`MAX_STORED_ERRORS`].
    pub fn errors(&self) -> &[String] {
        &self.errors
    }

    /// The first three error messages verbatim, plus a `"(and N more)"`
    /// entry counting everything past those three (§4.5.1).
    pub fn error_summary(&self) -> Vec<String> {
        let mut summary: Vec<String> = self.errors.iter().take(SUMMARY_VERBATIM_ERRORS).cloned().collect();
        if self.error_count > SUMMARY_VERBATIM_ERRORS as u64 {
            summary.push(format!("(and {} more)", self.error_count - SUMMARY_VERBATIM_ERRORS as u64));
        }
        summary
    }
}

/// Runs `Sync()` for `kind` against `conn` (§4.5.1): parses `payload`'s
/// entity array, upserts in batches of [`BATCH_SIZE`], committing a batch
/// only when every item in it succeeded.
pub async fn sync(conn: &mut dyn DbConnection, kind: SyncEntityKind, payload: &JsonValue) -> Result<SyncResult> {
    let array_key = kind.array_key();
    let items = payload
        .get(array_key)
        .and_then(JsonValue::as_array)
        .ok_or_else(|| Error::MissingParameter(array_key))?;

    let mut result = SyncResult::default();
    tracing::debug!(entity = array_key, item_count = items.len(), "syncing");

    for batch in items.chunks(BATCH_SIZE) {
        conn.start_transaction().await?;
        let mut batch_failures = 0u64;

        for item in batch {
            match upsert_item(conn, kind, item).await {
                Ok(()) => result.record_success(),
                Err(e) => {
                    batch_failures += 1;
                    result.record_failure(e.to_string());
                }
            }
        }

        if batch_failures == 0 {
            conn.commit().await?;
        } else {
            conn.rollback().await?;
        }
    }

    Ok(result)
}

async fn upsert_item(conn: &mut dyn DbConnection, kind: SyncEntityKind, item: &JsonValue) -> Result<()> {
    let obj = item.as_object().ok_or_else(|| Error::InvalidParameter("sync item must be an object".into()))?;

    let id = obj
        .get("id")
        .and_then(|v| v.as_i64().or_else(|| v.as_str().and_then(|s| s.trim().parse::<i64>().ok())))
        .ok_or_else(|| Error::InvalidParameter("sync item \"id\" must be an integer".into()))?;

    let engine = conn.engine();
    let table = engine.quote_identifier(kind.table_name());
    let id_col = engine.quote_identifier("id");
    let last_sync_col = engine.quote_identifier("LastSync");

    let mut exists_params = Params::new();
    exists_params.insert("id", ParamValue::Int(id));
    let exists_sql = format!("SELECT 1 FROM {table} WHERE {id_col} = @id");
    tracing::debug!(sql = %exists_sql, param_count = exists_params.len(), "executing");
    let exists = conn.execute_scalar(&exists_sql, &exists_params).await?.is_some();

    let fields = kind.fields();
    let mut params = Params::new();
    params.insert("id", ParamValue::Int(id));
    for field in fields {
        params.insert(field.name, coerce_field(obj.get(field.name), field));
    }

    let sql = if exists {
        let assignments: Vec<String> =
            fields.iter().map(|f| format!("{} = @{}", engine.quote_identifier(f.name), f.name)).collect();
        format!(
            "UPDATE {table} SET {}, {last_sync_col} = CURRENT_TIMESTAMP WHERE {id_col} = @id",
            assignments.join(", ")
        )
    } else {
        let columns: Vec<String> = fields.iter().map(|f| engine.quote_identifier(f.name)).collect();
        let binds: Vec<String> = fields.iter().map(|f| format!("@{}", f.name)).collect();
        format!(
            "INSERT INTO {table} ({id_col}, {}, {last_sync_col}) VALUES (@id, {}, CURRENT_TIMESTAMP)",
            columns.join(", "),
            binds.join(", ")
        )
    };

    tracing::debug!(sql = %sql, param_count = params.len(), "executing");
    conn.execute(&sql, &params).await?;
    Ok(())
}

/// Runs `GetChanges()` for `kind` (§4.5.2): rows whose `LastSync` is after
/// `since`, oldest first, capped at [`CHANGE_FEED_LIMIT`].
pub async fn get_changes(conn: &mut dyn DbConnection, kind: SyncEntityKind, since: OffsetDateTime) -> Result<JsonValue> {
    let engine = conn.engine();
    let table = engine.quote_identifier(kind.table_name());
    let last_sync_col = engine.quote_identifier("LastSync");

    let mut params = Params::new();
    params.insert("since", ParamValue::DateTime(since));

    let pagination = match engine {
        dbgateway_core::Engine::Mssql => {
            format!("OFFSET 0 ROWS FETCH NEXT {CHANGE_FEED_LIMIT} ROWS ONLY")
        }
        _ => format!("LIMIT {CHANGE_FEED_LIMIT}"),
    };

    let sql =
        format!("SELECT * FROM {table} WHERE {last_sync_col} > @since ORDER BY {last_sync_col} ASC {pagination}");

    tracing::debug!(sql = %sql, param_count = params.len(), "executing");
    let rows = conn.execute_reader(&sql, &params).await?;
    Ok(rows.into_json_array())
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use dbgateway_core::{Engine, ResultSet};
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Debug, Default)]
    struct FakeConn {
        existing_ids: Mutex<Vec<i64>>,
        executed: Mutex<Vec<String>>,
        fail_id: Option<i64>,
    }

    #[async_trait]
    impl DbConnection for FakeConn {
        fn engine(&self) -> Engine {
            Engine::Postgres
        }
        async fn connect(&mut self) -> Result<()> {
            Ok(())
        }
        async fn disconnect(&mut self) -> Result<()> {
            Ok(())
        }
        fn is_connected(&self) -> bool {
            true
        }
        async fn start_transaction(&mut self) -> Result<()> {
            Ok(())
        }
        async fn commit(&mut self) -> Result<()> {
            Ok(())
        }
        async fn rollback(&mut self) -> Result<()> {
            Ok(())
        }
        fn in_transaction(&self) -> bool {
            false
        }
        async fn execute(&mut self, sql: &str, params: &Params) -> Result<u64> {
            if let Some(ParamValue::Int(id)) = params.get("id") {
                if Some(*id) == self.fail_id {
                    return Err(Error::Command("boom".into()));
                }
            }
            self.executed.lock().unwrap().push(sql.to_owned());
            Ok(1)
        }
        async fn execute_scalar(&mut self, _sql: &str, params: &Params) -> Result<Option<serde_json::Value>> {
            let id = match params.get("id") {
                Some(ParamValue::Int(id)) => *id,
                _ => return Ok(None),
            };
            if self.existing_ids.lock().unwrap().contains(&id) {
                Ok(Some(json!(1)))
            } else {
                Ok(None)
            }
        }
        async fn execute_reader(&mut self, _sql: &str, _params: &Params) -> Result<ResultSet> {
            Ok(ResultSet::default())
        }
        async fn version(&mut self) -> Result<String> {
            Ok("fake".into())
        }
        async fn get_tables(&mut self) -> Result<Vec<String>> {
            Ok(vec![])
        }
        async fn get_fields(&mut self, _table: &str) -> Result<Vec<String>> {
            Ok(vec![])
        }
        fn set_query_timeout(&mut self, _sec: u32) {}
        fn query_timeout(&self) -> u32 {
            30
        }
    }

    #[tokio::test]
    async fn missing_array_key_is_missing_parameter() {
        let mut conn = FakeConn::default();
        let err = sync(&mut conn, SyncEntityKind::Tables, &json!({})).await.unwrap_err();
        assert!(matches!(err, Error::MissingParameter("tables")));
    }

    #[tokio::test]
    async fn new_id_inserts_existing_id_updates() {
        let mut conn = FakeConn::default();
        conn.existing_ids.lock().unwrap().push(2);

        let payload = json!({ "tables": [
            { "id": 1, "name": "Patio 1", "capacity": 4 },
            { "id": 2, "name": "Patio 2", "capacity": "6" },
        ]});

        let result = sync(&mut conn, SyncEntityKind::Tables, &payload).await.unwrap();
        assert_eq!(result.total_processed, 2);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.fail_count, 0);

        let executed = conn.executed.lock().unwrap();
        assert!(executed[0].starts_with("INSERT INTO"));
        assert!(executed[1].starts_with("UPDATE"));
    }

    #[tokio::test]
    async fn batch_with_any_failure_rolls_back_whole_batch() {
        let mut conn = FakeConn { fail_id: Some(2), ..Default::default() };

        let payload = json!({ "products": [
            { "id": 1, "name": "Latte" },
            { "id": 2, "name": "Mocha" },
        ]});

        let result = sync(&mut conn, SyncEntityKind::Products, &payload).await.unwrap();
        assert_eq!(result.success_count, 1);
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.errors().len(), 1);
    }

    #[tokio::test]
    async fn item_missing_integer_id_counts_as_a_failure() {
        let mut conn = FakeConn::default();
        let payload = json!({ "orders": [ { "id": "not-a-number", "status": "open" } ] });
        let result = sync(&mut conn, SyncEntityKind::Orders, &payload).await.unwrap();
        assert_eq!(result.fail_count, 1);
        assert_eq!(result.success_count, 0);
    }

    #[test]
    fn error_summary_collapses_past_three() {
        let mut result = SyncResult::default();
        for i in 0..5 {
            result.record_failure(format!("err {i}"));
        }
        let summary = result.error_summary();
        assert_eq!(summary.len(), 4);
        assert_eq!(summary[3], "(and 2 more)");
    }

    #[tokio::test]
    async fn get_changes_binds_since_as_datetime() {
        let mut conn = FakeConn::default();
        let since = OffsetDateTime::now_utc();
        let out = get_changes(&mut conn, SyncEntityKind::Orders, since).await.unwrap();
        assert!(out.is_array());
    }
}
