//! `/customers` CRUD + soft-delete (§6.1, §6.2). Every handler acquires a
//! connection from the primary pool, runs one or more statements through
//! [`DbConnection`], and releases it when the guard drops — the same
//! acquire/use/release shape spec.md §2's data-flow paragraph describes.

use std::collections::HashSet;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use serde::Deserialize;
use serde_json::Value as JsonValue;

use dbgateway_core::{ParamValue, Params};
use dbgateway_query::{parse_query_params, QueryBuilder};

use crate::auth::AuthUser;
use crate::http::{Error, Result, ValidatedJson};
use crate::state::AppState;

const CUSTOMER_TABLE: &str = "customers";

fn whitelist() -> HashSet<&'static str> {
    ["id", "name", "email", "phone", "address", "active", "created_at", "updated_at"].into_iter().collect()
}

#[derive(Debug, Deserialize)]
pub struct CustomerRequest {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub phone: Option<String>,
    #[serde(default)]
    pub address: Option<String>,
}

pub async fn list_customers(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(raw): Query<Vec<(String, String)>>,
) -> Result<Json<JsonValue>> {
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;

    let parsed = parse_query_params(&raw, &whitelist());
    let built = QueryBuilder::new(guard.engine()).build(&parsed);
    let table = guard.engine().quote_identifier(CUSTOMER_TABLE);
    let active_col = guard.engine().quote_identifier("active");

    let mut sql = format!("SELECT * FROM {table} WHERE {active_col} = true");
    let params = built.params;
    if let Some(where_clause) = built.where_clause {
        sql.push_str(" AND ");
        sql.push_str(where_clause.trim_start_matches("WHERE "));
    }
    if let Some(order) = &built.order_clause {
        sql.push(' ');
        sql.push_str(order);
    }
    if let Some(pagination) = &built.pagination_clause {
        sql.push(' ');
        sql.push_str(pagination);
    }

    let rows = guard.execute_reader(&sql, &params).await?;
    Ok(Json(rows.into_json_array()))
}

pub async fn get_customer(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<JsonValue>> {
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;
    let table = guard.engine().quote_identifier(CUSTOMER_TABLE);
    let id_col = guard.engine().quote_identifier("id");
    let active_col = guard.engine().quote_identifier("active");

    let sql = format!("SELECT * FROM {table} WHERE {id_col} = @id AND {active_col} = true");
    let params = Params::new().with("id", id);
    let rows = guard.execute_reader(&sql, &params).await?;

    match rows.rows.into_iter().next() {
        Some(row) => Ok(Json(row.into_json_object())),
        None => Err(Error::NotFound(format!("no active customer with id {id}"))),
    }
}

pub async fn create_customer(
    State(state): State<AppState>,
    _auth: AuthUser,
    ValidatedJson(req): ValidatedJson<CustomerRequest>,
) -> Result<(StatusCode, Json<JsonValue>)> {
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;
    let engine = guard.engine();
    let table = engine.quote_identifier(CUSTOMER_TABLE);

    let params = Params::new()
        .with("name", req.name.clone())
        .with("email", req.email.clone())
        .with("phone", req.phone.clone())
        .with("address", req.address.clone());

    let sql = format!(
        "INSERT INTO {table} (name, email, phone, address, active, created_at, updated_at) \
         VALUES (@name, @email, @phone, @address, true, CURRENT_TIMESTAMP, CURRENT_TIMESTAMP)"
    );
    guard.execute(&sql, &params).await?;

    let id_col = engine.quote_identifier("id");
    let email_col = engine.quote_identifier("email");
    let lookup = guard
        .execute_reader(&format!("SELECT * FROM {table} WHERE {email_col} = @email ORDER BY {id_col} DESC"), &params)
        .await?;
    let created = lookup.rows.into_iter().next().map(|r| r.into_json_object()).unwrap_or(JsonValue::Null);

    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn update_customer(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
    ValidatedJson(req): ValidatedJson<CustomerRequest>,
) -> Result<Json<JsonValue>> {
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;
    let engine = guard.engine();
    let table = engine.quote_identifier(CUSTOMER_TABLE);
    let id_col = engine.quote_identifier("id");

    let params = Params::new()
        .with("id", ParamValue::Int(id))
        .with("name", req.name.clone())
        .with("email", req.email.clone())
        .with("phone", req.phone.clone())
        .with("address", req.address.clone());

    let sql = format!(
        "UPDATE {table} SET name = @name, email = @email, phone = @phone, address = @address, \
         updated_at = CURRENT_TIMESTAMP WHERE {id_col} = @id"
    );
    let affected = guard.execute(&sql, &params).await?;
    if affected == 0 {
        return Err(Error::NotFound(format!("no customer with id {id}")));
    }

    let rows = guard
        .execute_reader(&format!("SELECT * FROM {table} WHERE {id_col} = @id"), &params)
        .await?;
    let updated = rows.rows.into_iter().next().map(|r| r.into_json_object()).unwrap_or(JsonValue::Null);
    Ok(Json(updated))
}

pub async fn delete_customer(
    State(state): State<AppState>,
    _auth: AuthUser,
    Path(id): Path<i64>,
) -> Result<Json<JsonValue>> {
    let mut guard = state.pool_manager.acquire(&state.primary_pool).await?;
    let engine = guard.engine();
    let table = engine.quote_identifier(CUSTOMER_TABLE);
    let id_col = engine.quote_identifier("id");

    let params = Params::new().with("id", id);
    let sql = format!("UPDATE {table} SET active = false, updated_at = CURRENT_TIMESTAMP WHERE {id_col} = @id");
    let affected = guard.execute(&sql, &params).await?;
    if affected == 0 {
        return Err(Error::NotFound(format!("no customer with id {id}")));
    }

    Ok(Json(serde_json::json!({ "success": true, "message": "customer deleted" })))
}
