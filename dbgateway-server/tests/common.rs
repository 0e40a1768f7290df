// This is imported by different tests that use different functions.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use tokio::sync::OnceCell;

use async_trait::async_trait;
use axum::body::Body;
use axum::http::header::CONTENT_TYPE;
use axum::http::{request, Request};
use axum::response::Response;
use http_body_util::BodyExt;
use serde_json::{json, Map, Value as JsonValue};

use dbgateway_core::connection::DbConnection;
use dbgateway_core::{ConnectionConfig, Engine, Error, Params, Result, ResultSet, Row};
use dbgateway_pool::manager::EngineRegistry;
use dbgateway_pool::PoolManager;
use dbgateway_server::config::JwtConfig;
use dbgateway_server::state::AppState;

pub trait RequestBuilderExt {
    fn json(self, json: JsonValue) -> Request<Body>;

    fn empty_body(self) -> Request<Body>;
}

impl RequestBuilderExt for request::Builder {
    fn json(self, json: JsonValue) -> Request<Body> {
        self.header("Content-Type", "application/json")
            .body(Body::from(json.to_string()))
            .expect("failed to build request")
    }

    fn empty_body(self) -> Request<Body> {
        self.body(Body::empty()).expect("failed to build request")
    }
}

pub async fn response_json(resp: Response) -> JsonValue {
    assert_eq!(resp.headers().get(CONTENT_TYPE).expect("expected Content-Type"), "application/json");
    let bytes = resp.into_body().collect().await.expect("error reading response body").to_bytes();
    serde_json::from_slice(&bytes).expect("failed to read response body as json")
}

pub fn test_jwt() -> JwtConfig {
    JwtConfig {
        secret: "test-secret-at-least-32-characters-long".into(),
        issuer: "dbgateway-tests".into(),
        audience: "dbgateway-tests".into(),
        expiration_hours: 8,
    }
}

/// An in-memory [`DbConnection`] standing in for a real driver in black-box
/// HTTP tests, the same role `FakeConn` plays in `dbgateway-sync`'s own
/// tests — except this one is shared process-wide so the router can exercise
/// full request/response round-trips without a live database.
#[derive(Debug, Default)]
struct FakeConnection {
    customers: Mutex<Vec<Map<String, JsonValue>>>,
    users: Mutex<Vec<Map<String, JsonValue>>>,
    next_id: Mutex<i64>,
}

fn param_str(params: &Params, name: &str) -> Option<String> {
    match params.get(name) {
        Some(dbgateway_core::ParamValue::Text(s)) => Some(s.clone()),
        _ => None,
    }
}

fn param_int(params: &Params, name: &str) -> Option<i64> {
    match params.get(name) {
        Some(dbgateway_core::ParamValue::Int(v)) => Some(*v),
        _ => None,
    }
}

fn row_of(obj: &Map<String, JsonValue>) -> Row {
    Row::new(obj.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
}

#[async_trait]
impl DbConnection for FakeConnection {
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
        if sql.starts_with("INSERT INTO \"customers\"") {
            let mut customers = self.customers.lock().unwrap();
            let mut next_id = self.next_id.lock().unwrap();
            *next_id += 1;
            let mut row = Map::new();
            row.insert("id".into(), json!(*next_id));
            row.insert("name".into(), json!(param_str(params, "name").unwrap_or_default()));
            row.insert("email".into(), json!(param_str(params, "email").unwrap_or_default()));
            row.insert("phone".into(), json!(param_str(params, "phone")));
            row.insert("address".into(), json!(param_str(params, "address")));
            row.insert("active".into(), json!(true));
            customers.push(row);
            return Ok(1);
        }

        if sql.starts_with("UPDATE \"customers\" SET name") {
            let id = param_int(params, "id").ok_or_else(|| Error::MissingParameter("id"))?;
            let mut customers = self.customers.lock().unwrap();
            let Some(row) = customers.iter_mut().find(|r| r.get("id").and_then(JsonValue::as_i64) == Some(id)) else {
                return Ok(0);
            };
            row.insert("name".into(), json!(param_str(params, "name").unwrap_or_default()));
            row.insert("email".into(), json!(param_str(params, "email").unwrap_or_default()));
            row.insert("phone".into(), json!(param_str(params, "phone")));
            row.insert("address".into(), json!(param_str(params, "address")));
            return Ok(1);
        }

        if sql.starts_with("UPDATE \"customers\" SET active = false") {
            let id = param_int(params, "id").ok_or_else(|| Error::MissingParameter("id"))?;
            let mut customers = self.customers.lock().unwrap();
            let Some(row) = customers.iter_mut().find(|r| r.get("id").and_then(JsonValue::as_i64) == Some(id)) else {
                return Ok(0);
            };
            row.insert("active".into(), json!(false));
            return Ok(1);
        }

        Err(Error::Command(format!("FakeConnection: unhandled statement {sql:?}")))
    }

    async fn execute_scalar(&mut self, _sql: &str, _params: &Params) -> Result<Option<JsonValue>> {
        Ok(None)
    }

    async fn execute_reader(&mut self, sql: &str, params: &Params) -> Result<ResultSet> {
        if sql.starts_with("SELECT * FROM \"customers\" WHERE \"active\" = true") {
            let customers = self.customers.lock().unwrap();
            let rows = customers.iter().filter(|r| r.get("active") == Some(&json!(true))).map(row_of).collect();
            return Ok(ResultSet { rows });
        }

        if sql.starts_with("SELECT * FROM \"customers\" WHERE \"id\" = @id AND \"active\" = true") {
            let id = param_int(params, "id").ok_or_else(|| Error::MissingParameter("id"))?;
            let customers = self.customers.lock().unwrap();
            let rows = customers
                .iter()
                .filter(|r| r.get("id").and_then(JsonValue::as_i64) == Some(id) && r.get("active") == Some(&json!(true)))
                .map(row_of)
                .collect();
            return Ok(ResultSet { rows });
        }

        if sql.starts_with("SELECT * FROM \"customers\" WHERE \"email\" = @email") {
            let email = param_str(params, "email").unwrap_or_default();
            let customers = self.customers.lock().unwrap();
            let rows = customers.iter().filter(|r| r.get("email").and_then(JsonValue::as_str) == Some(email.as_str())).map(row_of).collect();
            return Ok(ResultSet { rows });
        }

        if sql.starts_with("SELECT * FROM \"customers\" WHERE \"id\" = @id") {
            let id = param_int(params, "id").ok_or_else(|| Error::MissingParameter("id"))?;
            let customers = self.customers.lock().unwrap();
            let rows = customers.iter().filter(|r| r.get("id").and_then(JsonValue::as_i64) == Some(id)).map(row_of).collect();
            return Ok(ResultSet { rows });
        }

        if sql.starts_with("SELECT * FROM \"users\" WHERE \"username\" = @username") {
            let username = param_str(params, "username").unwrap_or_default();
            let users = self.users.lock().unwrap();
            let rows = users.iter().filter(|r| r.get("username").and_then(JsonValue::as_str) == Some(username.as_str())).map(row_of).collect();
            return Ok(ResultSet { rows });
        }

        Err(Error::Command(format!("FakeConnection: unhandled query {sql:?}")))
    }

    async fn version(&mut self) -> Result<String> {
        Ok("fake-1.0".into())
    }
    async fn get_tables(&mut self) -> Result<Vec<String>> {
        Ok(vec!["customers".into(), "users".into()])
    }
    async fn get_fields(&mut self, _table: &str) -> Result<Vec<String>> {
        Ok(vec![])
    }
    fn set_query_timeout(&mut self, _sec: u32) {}
    fn query_timeout(&self) -> u32 {
        30
    }
}

fn fake_pool_config() -> ConnectionConfig {
    use dbgateway_core::config::{PoolingConfig, RetryConfig, TlsConfig};
    ConnectionConfig {
        name: "primary".into(),
        engine: Engine::Postgres,
        server: "localhost".into(),
        port: 5432,
        database: "db".into(),
        schema: None,
        username: "u".into(),
        password: "p".into(),
        application_name: "dbgateway-tests".into(),
        extra_params: vec![],
        connect_timeout_sec: 5,
        command_timeout_sec: 5,
        pooling: PoolingConfig { enabled: true, min_size: 0, max_size: 4, idle_timeout_sec: 60, acquire_timeout_ms: 500 },
        tls: TlsConfig::default(),
        retry: RetryConfig::default(),
    }
}

static MANAGER: OnceCell<PoolManager> = OnceCell::const_new();

/// Builds (once per test binary) a [`PoolManager`] backed by [`FakeConnection`]
/// and returns the routed [`axum::Router`], ready for `tower::ServiceExt::oneshot`.
pub async fn test_app() -> axum::Router {
    let manager = MANAGER
        .get_or_init(|| async {
            let mut registry = EngineRegistry::new();
            registry.register(Engine::Postgres, Arc::new(|_cfg| Box::pin(async { Ok(Box::new(FakeConnection::default()) as Box<dyn DbConnection>) })));
            PoolManager::init(registry);
            let manager = PoolManager::instance().expect("just initialized");
            manager.register_pool(fake_pool_config()).await.expect("register fake pool");
            manager
        })
        .await;

    let state = AppState::new(manager.clone(), test_jwt());
    dbgateway_server::http::router(state)
}
